use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::facts::DEFAULT_MAX_FACTS;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GlimpseConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub facts: FactsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Pixel normalisation applied before inference.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Preprocessing {
    /// Keras/Caffe style: BGR order, ImageNet mean subtracted, no scaling.
    #[default]
    Caffe,
    /// PyTorch style: RGB order, scaled to [0, 1], mean/std normalised.
    Torch,
}

/// Memory layout of the input tensor.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    #[default]
    Nhwc,
    Nchw,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Empty means the default model directory.
    pub model_path: String,
    /// Empty means `imagenet_class_index.json` next to the model.
    pub labels_path: String,
    pub input_size: u32,
    pub preprocessing: Preprocessing,
    pub layout: TensorLayout,
    pub preload: bool,
    pub intra_threads: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            labels_path: String::new(),
            input_size: 224,
            preprocessing: Preprocessing::default(),
            layout: TensorLayout::default(),
            preload: true,
            intra_threads: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FactsConfig {
    pub base_url: String,
    pub max_facts: usize,
    pub timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub user_agent: String,
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://en.wikipedia.org/w/api.php".to_string(),
            max_facts: DEFAULT_MAX_FACTS,
            timeout_seconds: 10,
            max_retries: 2,
            retry_delay_ms: 200,
            user_agent: format!("glimpse/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl GlimpseConfig {
    /// Load config from an optional TOML file, overridden by `GLIMPSE_*`
    /// environment variables (`GLIMPSE_HTTP__PORT=9000`).
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Self::load_with_env(path, env_source())
    }

    fn load_with_env(path: &str, env: Environment) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(env)
            .build()?;
        s.try_deserialize()
    }
}

/// `GLIMPSE_<SECTION>__<KEY>`: one underscore after the prefix, two between
/// section and key so keys like `max_facts` keep theirs.
fn env_source() -> Environment {
    Environment::with_prefix("GLIMPSE")
        .prefix_separator("_")
        .separator("__")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = GlimpseConfig::load("/nonexistent/glimpse").expect("defaults should load");
        assert_eq!(config.http.port, 8765);
        assert_eq!(config.facts.max_facts, 10);
        assert_eq!(config.classifier.input_size, 224);
        assert_eq!(config.classifier.preprocessing, Preprocessing::Caffe);
        assert_eq!(config.classifier.layout, TensorLayout::Nhwc);
        assert!(config.classifier.preload);
        assert_eq!(config.service.log_level, "info");
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[http]
port = 9100

[classifier]
preprocessing = "torch"
layout = "nchw"

[facts]
max_facts = 3
"#
        )
        .unwrap();

        let config = GlimpseConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.http.port, 9100);
        assert_eq!(config.http.host, "127.0.0.1");
        assert_eq!(config.classifier.preprocessing, Preprocessing::Torch);
        assert_eq!(config.classifier.layout, TensorLayout::Nchw);
        assert_eq!(config.classifier.input_size, 224);
        assert_eq!(config.facts.max_facts, 3);
        assert_eq!(config.facts.base_url, "https://en.wikipedia.org/w/api.php");
    }

    #[test]
    fn test_env_overrides_section_keys() {
        let vars: config::Map<String, String> = [
            ("GLIMPSE_HTTP__PORT", "9000"),
            ("GLIMPSE_FACTS__MAX_FACTS", "4"),
            ("GLIMPSE_CLASSIFIER__PREPROCESSING", "torch"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config =
            GlimpseConfig::load_with_env("/nonexistent/glimpse", env_source().source(Some(vars)))
                .unwrap();
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.facts.max_facts, 4);
        assert_eq!(config.classifier.preprocessing, Preprocessing::Torch);
        assert_eq!(config.http.host, "127.0.0.1");
    }

    #[test]
    fn test_env_ignores_unrelated_glimpse_vars() {
        let vars: config::Map<String, String> = [
            ("GLIMPSE_HTTP_URL", "http://10.0.0.1:8765"),
            ("OTHER_HTTP__PORT", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config =
            GlimpseConfig::load_with_env("/nonexistent/glimpse", env_source().source(Some(vars)))
                .unwrap();
        assert_eq!(config.http.port, 8765);
    }
}
