pub mod fact;
pub mod label;
pub mod prediction;

pub use fact::{FactList, SearchResult};
pub use label::Label;
pub use prediction::{ClassifyResponse, Prediction};
