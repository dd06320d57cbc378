use serde::{Deserialize, Serialize};

use super::{FactList, Label};

/// Top-1 decode of a classifier output.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: Label,
    pub class_index: usize,
    pub confidence: f32,
}

/// Success body of `POST /classify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub prediction: Label,
    pub facts: FactList,
}
