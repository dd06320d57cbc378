use thiserror::Error;

use crate::classifier::ClassifyError;
use crate::facts::FactsError;

#[derive(Error, Debug)]
pub enum GlimpseError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifyError),

    #[error("Fact source error: {0}")]
    Facts(#[from] FactsError),
}
