//! ONNX classifier backend: local ImageNet inference
//!
//! Uses the `ort` crate for ONNX Runtime and `image` + `ndarray` to build the
//! input tensor. Defaults match a Keras VGG16 export: 224×224, NHWC, BGR with
//! the ImageNet mean subtracted.

use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::classifier::{Classifier, ClassifyError, LazyClassifier};
use crate::config::{ClassifierConfig, Preprocessing, TensorLayout};
use crate::labels::LabelSet;
use crate::models::Prediction;

/// ImageNet channel means on the 0–255 scale, in BGR order.
const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

/// ImageNet channel means and standard deviations on the 0–1 scale, RGB order.
const TORCH_MEAN_RGB: [f32; 3] = [0.485, 0.456, 0.406];
const TORCH_STD_RGB: [f32; 3] = [0.229, 0.224, 0.225];

/// Resolved settings for an `OnnxClassifier`.
#[derive(Debug, Clone)]
pub struct OnnxClassifierConfig {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub input_size: u32,
    pub preprocessing: Preprocessing,
    pub layout: TensorLayout,
    pub intra_threads: usize,
}

impl From<&ClassifierConfig> for OnnxClassifierConfig {
    fn from(config: &ClassifierConfig) -> Self {
        let (model_path, labels_path) =
            resolve_classifier_paths(&config.model_path, &config.labels_path);
        Self {
            model_path,
            labels_path,
            input_size: config.input_size,
            preprocessing: config.preprocessing,
            layout: config.layout,
            intra_threads: config.intra_threads.max(1),
        }
    }
}

/// Image classifier running a pretrained ONNX model.
pub struct OnnxClassifier {
    session: Arc<Mutex<Session>>,
    labels: Arc<LabelSet>,
    input_size: u32,
    preprocessing: Preprocessing,
    layout: TensorLayout,
    name: String,
}

impl std::fmt::Debug for OnnxClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxClassifier")
            .field("name", &self.name)
            .field("classes", &self.labels.len())
            .field("input_size", &self.input_size)
            .finish_non_exhaustive()
    }
}

impl OnnxClassifier {
    /// Load the model and labels named in `config`.
    ///
    /// Returns `ClassifyError::ModelNotFound` / `LabelsNotFound` if either
    /// file is missing.
    pub fn new(config: OnnxClassifierConfig) -> Result<Self, ClassifyError> {
        if !config.model_path.exists() {
            return Err(ClassifyError::ModelNotFound {
                path: config.model_path.display().to_string(),
            });
        }

        let labels = LabelSet::from_path(&config.labels_path)?;

        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(config.intra_threads))
            .and_then(|b| b.commit_from_file(&config.model_path))
            .map_err(|e| ClassifyError::Load(e.to_string()))?;

        let name = config
            .model_path
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        tracing::info!(
            model = %config.model_path.display(),
            classes = labels.len(),
            input_size = config.input_size,
            "ONNX classifier ready"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            labels: Arc::new(labels),
            input_size: config.input_size,
            preprocessing: config.preprocessing,
            layout: config.layout,
            name,
        })
    }

    /// Wrap construction in a `LazyClassifier` so the model loads on first use.
    pub fn lazy(config: OnnxClassifierConfig) -> LazyClassifier {
        let name = config
            .model_path
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        LazyClassifier::new(name, move || {
            Ok(Arc::new(OnnxClassifier::new(config.clone())?) as Arc<dyn Classifier>)
        })
    }
}

#[async_trait]
impl Classifier for OnnxClassifier {
    async fn classify(&self, image: DynamicImage) -> Result<Prediction, ClassifyError> {
        // Resize and inference are CPU-bound; run on the blocking thread pool.
        let session = Arc::clone(&self.session);
        let labels = Arc::clone(&self.labels);
        let (size, preprocessing, layout) = (self.input_size, self.preprocessing, self.layout);

        tokio::task::spawn_blocking(move || {
            let input = preprocess(&image, size, preprocessing, layout);
            let mut session_guard = session
                .lock()
                .map_err(|e| ClassifyError::Inference(format!("session lock poisoned: {e}")))?;
            let scores = run_sync(&mut session_guard, input)?;
            decode_top1(&scores, &labels)
        })
        .await
        .map_err(|e| ClassifyError::Inference(format!("spawn_blocking join error: {e}")))?
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Build the `[1, size, size, 3]` (NHWC) or `[1, 3, size, size]` (NCHW)
/// input tensor for `image`.
pub fn preprocess(
    image: &DynamicImage,
    size: u32,
    preprocessing: Preprocessing,
    layout: TensorLayout,
) -> Array4<f32> {
    let resized = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let s = size as usize;

    let mut tensor = match layout {
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, s, s, 3)),
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, s, s)),
    };

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let value = match preprocessing {
                // Channel c of the output is BGR: read R/G/B in reverse.
                Preprocessing::Caffe => pixel[2 - c] as f32 - CAFFE_MEAN_BGR[c],
                Preprocessing::Torch => {
                    (pixel[c] as f32 / 255.0 - TORCH_MEAN_RGB[c]) / TORCH_STD_RGB[c]
                }
            };
            match layout {
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
                TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
            }
        }
    }

    tensor
}

/// Run ONNX inference synchronously and return the flat score vector.
fn run_sync(session: &mut Session, input: Array4<f32>) -> Result<Vec<f32>, ClassifyError> {
    let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
    let data: Vec<f32> = input.iter().copied().collect();

    let input_tensor = Tensor::from_array((shape, data))
        .map_err(|e| ClassifyError::Inference(e.to_string()))?;

    let outputs = session
        .run(ort::inputs![input_tensor])
        .map_err(|e| ClassifyError::Inference(e.to_string()))?;

    // Expected shape: [1, num_classes]
    let (_out_shape, scores) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| ClassifyError::Inference(e.to_string()))?;

    Ok(scores.to_vec())
}

/// Pick the highest-scoring class and map it to its label.
///
/// Scores that already form a probability distribution are used as-is,
/// otherwise they are treated as logits and softmaxed for the confidence.
pub fn decode_top1(scores: &[f32], labels: &LabelSet) -> Result<Prediction, ClassifyError> {
    if scores.len() != labels.len() {
        return Err(ClassifyError::LabelMismatch {
            expected: labels.len(),
            actual: scores.len(),
        });
    }

    let (class_index, &top) = scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .ok_or_else(|| ClassifyError::Inference("model produced no scores".to_string()))?;

    let sum: f32 = scores.iter().sum();
    let is_distribution =
        scores.iter().all(|&p| (0.0..=1.0).contains(&p)) && (sum - 1.0).abs() < 1e-3;

    let confidence = if is_distribution {
        top
    } else {
        let denom: f32 = scores.iter().map(|&s| (s - top).exp()).sum();
        1.0 / denom
    };

    let label = labels
        .get(class_index)
        .cloned()
        .ok_or(ClassifyError::LabelMismatch {
            expected: labels.len(),
            actual: scores.len(),
        })?;

    Ok(Prediction {
        label,
        class_index,
        confidence,
    })
}

/// Resolve the default model directory.
pub fn default_model_dir() -> PathBuf {
    let data_home = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".local/share")
        });
    data_home.join("glimpse/models")
}

/// Resolve paths for the ONNX model and its label file.
///
/// An empty model path uses the default location; an empty labels path uses
/// `imagenet_class_index.json` next to the model.
pub fn resolve_classifier_paths(model_path: &str, labels_path: &str) -> (PathBuf, PathBuf) {
    let model = if model_path.is_empty() {
        default_model_dir().join("vgg16.onnx")
    } else {
        PathBuf::from(model_path)
    };

    let labels = if labels_path.is_empty() {
        model.with_file_name("imagenet_class_index.json")
    } else {
        PathBuf::from(labels_path)
    };

    (model, labels)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(r: u8, g: u8, b: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([r, g, b])))
    }

    fn labels(names: &[&str]) -> LabelSet {
        LabelSet::parse_lines(&names.join("\n"))
    }

    #[test]
    fn test_model_not_found_returns_error() {
        let config = OnnxClassifierConfig {
            model_path: PathBuf::from("/nonexistent/vgg16.onnx"),
            labels_path: PathBuf::from("/nonexistent/imagenet_class_index.json"),
            input_size: 224,
            preprocessing: Preprocessing::Caffe,
            layout: TensorLayout::Nhwc,
            intra_threads: 1,
        };

        match OnnxClassifier::new(config).unwrap_err() {
            ClassifyError::ModelNotFound { path } => {
                assert!(path.contains("nonexistent"), "path was: {path}");
            }
            other => panic!("Expected ModelNotFound, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lazy_reports_load_error_on_first_use() {
        let config = OnnxClassifierConfig::from(&ClassifierConfig {
            model_path: "/nonexistent/vgg16.onnx".to_string(),
            ..ClassifierConfig::default()
        });
        let lazy = OnnxClassifier::lazy(config);

        assert_eq!(lazy.name(), "vgg16");
        assert!(!lazy.is_loaded());
        let err = lazy.classify(solid(0, 0, 0)).await.unwrap_err();
        assert!(matches!(err, ClassifyError::ModelNotFound { .. }));
    }

    #[test]
    fn test_preprocess_caffe_nhwc_shape_and_values() {
        let tensor = preprocess(&solid(255, 128, 0), 224, Preprocessing::Caffe, TensorLayout::Nhwc);
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);

        // BGR order, mean subtracted, no scaling
        let px = [tensor[[0, 10, 20, 0]], tensor[[0, 10, 20, 1]], tensor[[0, 10, 20, 2]]];
        assert!((px[0] - (0.0 - 103.939)).abs() < 1e-3);
        assert!((px[1] - (128.0 - 116.779)).abs() < 1e-3);
        assert!((px[2] - (255.0 - 123.68)).abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_torch_nchw_shape_and_values() {
        let tensor = preprocess(&solid(255, 0, 0), 224, Preprocessing::Torch, TensorLayout::Nchw);
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);

        let red = tensor[[0, 0, 5, 5]];
        let green = tensor[[0, 1, 5, 5]];
        assert!((red - (1.0 - 0.485) / 0.229).abs() < 1e-4);
        assert!((green - (0.0 - 0.456) / 0.224).abs() < 1e-4);
    }

    #[test]
    fn test_preprocess_respects_input_size() {
        let tensor = preprocess(&solid(1, 2, 3), 32, Preprocessing::Caffe, TensorLayout::Nchw);
        assert_eq!(tensor.shape(), &[1, 3, 32, 32]);
    }

    #[test]
    fn test_decode_top1_from_probabilities() {
        let set = labels(&["tench", "goldfish", "golden_retriever"]);
        let prediction = decode_top1(&[0.1, 0.2, 0.7], &set).unwrap();
        assert_eq!(prediction.label.as_str(), "golden_retriever");
        assert_eq!(prediction.class_index, 2);
        assert!((prediction.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_decode_top1_from_logits_uses_softmax() {
        let set = labels(&["tench", "goldfish"]);
        let prediction = decode_top1(&[2.0, 0.0], &set).unwrap();
        assert_eq!(prediction.label.as_str(), "tench");
        let expected = 1.0 / (1.0 + (-2.0f32).exp());
        assert!((prediction.confidence - expected).abs() < 1e-5);
    }

    #[test]
    fn test_decode_top1_label_mismatch() {
        let set = labels(&["tench", "goldfish"]);
        match decode_top1(&[0.1, 0.2, 0.7], &set) {
            Err(ClassifyError::LabelMismatch { expected, actual }) => {
                assert_eq!((expected, actual), (2, 3));
            }
            other => panic!("Expected LabelMismatch, got: {other:?}"),
        }
    }

    #[test]
    fn test_default_model_dir_contains_glimpse() {
        let dir = default_model_dir();
        assert!(
            dir.to_string_lossy().contains("glimpse/models"),
            "Expected glimpse/models in path, got: {}",
            dir.display()
        );
    }

    #[test]
    fn test_resolve_paths_default() {
        let (model, labels) = resolve_classifier_paths("", "");
        assert!(model.to_string_lossy().ends_with("vgg16.onnx"));
        assert!(labels.to_string_lossy().ends_with("imagenet_class_index.json"));
        assert_eq!(model.parent(), labels.parent());
    }

    #[test]
    fn test_resolve_paths_custom() {
        let (model, labels) = resolve_classifier_paths("/opt/models/resnet50.onnx", "");
        assert_eq!(model, PathBuf::from("/opt/models/resnet50.onnx"));
        assert_eq!(labels, PathBuf::from("/opt/models/imagenet_class_index.json"));

        let (_, labels) = resolve_classifier_paths("/opt/models/resnet50.onnx", "/etc/synset.txt");
        assert_eq!(labels, PathBuf::from("/etc/synset.txt"));
    }
}
