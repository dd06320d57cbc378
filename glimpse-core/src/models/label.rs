use serde::{Deserialize, Serialize};
use std::fmt;

/// Category name produced by the classifier, e.g. `golden_retriever`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_keeps_raw_name() {
        let label = Label::new("golden_retriever");
        assert_eq!(label.as_str(), "golden_retriever");
        assert_eq!(label.to_string(), "golden_retriever");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_value(Label::new("tabby")).unwrap();
        assert_eq!(json, serde_json::json!("tabby"));
    }
}
