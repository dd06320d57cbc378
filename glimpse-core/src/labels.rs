//! Class-index → label mapping for the classifier output.
//!
//! Two formats are accepted:
//! - Keras `imagenet_class_index.json`: `{"0": ["n01440764", "tench"], ...}`
//! - plain text, one label per line (blank lines skipped)

use std::collections::HashMap;
use std::path::Path;

use crate::classifier::ClassifyError;
use crate::models::Label;

#[derive(Debug, Clone)]
pub struct LabelSet {
    labels: Vec<Label>,
}

impl LabelSet {
    pub fn from_path(path: &Path) -> Result<Self, ClassifyError> {
        if !path.exists() {
            return Err(ClassifyError::LabelsNotFound {
                path: path.display().to_string(),
            });
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| ClassifyError::Labels(format!("{}: {e}", path.display())))?;

        let is_json = path.extension().is_some_and(|ext| ext == "json")
            || text.trim_start().starts_with('{');

        let set = if is_json {
            Self::parse_class_index(&text)?
        } else {
            Self::parse_lines(&text)
        };

        if set.is_empty() {
            return Err(ClassifyError::Labels(format!(
                "{} contains no labels",
                path.display()
            )));
        }
        Ok(set)
    }

    pub fn parse_class_index(json: &str) -> Result<Self, ClassifyError> {
        let raw: HashMap<String, (String, String)> =
            serde_json::from_str(json).map_err(|e| ClassifyError::Labels(e.to_string()))?;

        let mut slots: Vec<Option<Label>> = vec![None; raw.len()];
        for (key, (_synset, name)) in raw {
            let index: usize = key
                .parse()
                .map_err(|_| ClassifyError::Labels(format!("non-numeric class index {key:?}")))?;
            let slot = slots
                .get_mut(index)
                .ok_or_else(|| ClassifyError::Labels(format!("class index {index} out of range")))?;
            *slot = Some(Label::new(name));
        }

        // Every slot is filled once indices are unique and in range.
        let labels = slots
            .into_iter()
            .enumerate()
            .map(|(i, l)| l.ok_or_else(|| ClassifyError::Labels(format!("missing class {i}"))))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { labels })
    }

    pub fn parse_lines(text: &str) -> Self {
        let labels = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(Label::new)
            .collect();
        Self { labels }
    }

    pub fn get(&self, index: usize) -> Option<&Label> {
        self.labels.get(index)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
