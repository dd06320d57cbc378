pub mod classifier;
pub mod config;
pub mod error;
pub mod facts;
pub mod labels;
pub mod models;
pub mod onnx_classifier;

pub use classifier::{decode_image, Classifier, ClassifyError, LazyClassifier};
pub use config::GlimpseConfig;
pub use error::GlimpseError;
pub use facts::{FactSource, WikipediaClient, DEFAULT_MAX_FACTS, SENTINEL_FACT};
pub use labels::LabelSet;
pub use models::{ClassifyResponse, FactList, Label, Prediction};
pub use onnx_classifier::{OnnxClassifier, OnnxClassifierConfig};
