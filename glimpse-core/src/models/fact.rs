use serde::{Deserialize, Serialize};

/// Ordered, bounded list of short facts in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactList(Vec<String>);

impl FactList {
    pub fn new(facts: Vec<String>) -> Self {
        Self(facts)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// Top-ranked search hit for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
}
