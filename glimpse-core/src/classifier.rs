//! Classifier adapter: image in, label out
//!
//! The `Classifier` trait hides the pretrained model behind a single call.
//! `LazyClassifier` defers model construction to first use and guarantees it
//! happens once, even when the first requests arrive concurrently.

use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::models::Prediction;

// ============================================================================
// Classifier trait
// ============================================================================

/// Abstraction over image classification models.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a decoded image, returning the top-1 prediction.
    async fn classify(&self, image: DynamicImage) -> Result<Prediction, ClassifyError>;

    /// Model name for logging and health output.
    fn name(&self) -> &str;

    /// Whether the model is ready without further loading.
    fn is_loaded(&self) -> bool {
        true
    }
}

// ============================================================================
// Error types
// ============================================================================

/// Anything that can go wrong between upload bytes and a label.
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("image data is empty")]
    EmptyImage,

    #[error("unsupported image format")]
    UnsupportedFormat,

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("ONNX model not found at {path}")]
    ModelNotFound { path: String },

    #[error("label file not found at {path}")]
    LabelsNotFound { path: String },

    #[error("invalid label file: {0}")]
    Labels(String),

    #[error("model produced {actual} scores but {expected} labels are loaded")]
    LabelMismatch { expected: usize, actual: usize },

    #[error("ONNX inference error: {0}")]
    Inference(String),

    #[error("model load failed: {0}")]
    Load(String),
}

/// Decode an uploaded byte buffer, sniffing the format from magic bytes.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ClassifyError> {
    if bytes.is_empty() {
        return Err(ClassifyError::EmptyImage);
    }

    let format = image::guess_format(bytes).map_err(|_| ClassifyError::UnsupportedFormat)?;

    image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ClassifyError::Decode(e.to_string()))
}

// ============================================================================
// LazyClassifier
// ============================================================================

type Loader = dyn Fn() -> Result<Arc<dyn Classifier>, ClassifyError> + Send + Sync;

/// Builds the wrapped classifier on first use and reuses it afterwards.
///
/// A failed load is not cached; the next call runs the loader again.
pub struct LazyClassifier {
    name: String,
    loader: Arc<Loader>,
    cell: OnceCell<Arc<dyn Classifier>>,
}

impl std::fmt::Debug for LazyClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyClassifier")
            .field("name", &self.name)
            .field("loaded", &self.cell.initialized())
            .finish_non_exhaustive()
    }
}

impl LazyClassifier {
    /// `loader` is blocking and runs on the blocking thread pool.
    pub fn new<F>(name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Classifier>, ClassifyError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            loader: Arc::new(loader),
            cell: OnceCell::new(),
        }
    }

    /// Return the loaded classifier, constructing it if needed.
    pub async fn get(&self) -> Result<&Arc<dyn Classifier>, ClassifyError> {
        self.cell
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                let start = Instant::now();

                let classifier = tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| ClassifyError::Load(format!("spawn_blocking join error: {e}")))?
                    .inspect_err(|e| {
                        tracing::error!(name = %self.name, error = %e, "Classifier load failed");
                    })?;

                tracing::info!(
                    name = %self.name,
                    took_ms = start.elapsed().as_millis() as u64,
                    "Classifier loaded"
                );
                Ok::<_, ClassifyError>(classifier)
            })
            .await
    }
}

#[async_trait]
impl Classifier for LazyClassifier {
    async fn classify(&self, image: DynamicImage) -> Result<Prediction, ClassifyError> {
        self.get().await?.classify(image).await
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Label;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedClassifier(&'static str);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, _image: DynamicImage) -> Result<Prediction, ClassifyError> {
            Ok(Prediction {
                label: Label::new(self.0),
                class_index: 0,
                confidence: 1.0,
            })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([200, 30, 30])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_valid_png() {
        let img = decode_image(&png_bytes()).expect("valid PNG should decode");
        assert_eq!((img.width(), img.height()), (8, 8));
    }

    #[test]
    fn test_decode_empty_bytes() {
        assert!(matches!(decode_image(&[]), Err(ClassifyError::EmptyImage)));
    }

    #[test]
    fn test_decode_text_is_unsupported() {
        let result = decode_image(b"definitely not an image");
        assert!(matches!(result, Err(ClassifyError::UnsupportedFormat)));
    }

    #[test]
    fn test_decode_truncated_png_fails() {
        let bytes = png_bytes();
        let result = decode_image(&bytes[..24]);
        match result {
            Err(ClassifyError::Decode(msg)) => assert!(!msg.is_empty()),
            other => panic!("Expected Decode error, got: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lazy_classifier_loads_once_under_concurrency() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let lazy = Arc::new(LazyClassifier::new("fixed", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Ok(Arc::new(FixedClassifier("tabby")) as Arc<dyn Classifier>)
        }));

        assert!(!lazy.is_loaded());

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let lazy = Arc::clone(&lazy);
            tasks.spawn(async move {
                let img = DynamicImage::new_rgb8(4, 4);
                lazy.classify(img).await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            let prediction = joined.unwrap().unwrap();
            assert_eq!(prediction.label.as_str(), "tabby");
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1, "model must be built exactly once");
        assert!(lazy.is_loaded());
    }

    #[tokio::test]
    async fn test_lazy_classifier_retries_after_failed_load() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let lazy = LazyClassifier::new("flaky", move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ClassifyError::ModelNotFound {
                    path: "/missing.onnx".to_string(),
                })
            } else {
                Ok(Arc::new(FixedClassifier("tabby")) as Arc<dyn Classifier>)
            }
        });

        let first = lazy.classify(DynamicImage::new_rgb8(4, 4)).await;
        assert!(matches!(first, Err(ClassifyError::ModelNotFound { .. })));
        assert!(!lazy.is_loaded());

        let second = lazy.classify(DynamicImage::new_rgb8(4, 4)).await;
        assert_eq!(second.unwrap().label.as_str(), "tabby");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(lazy.name(), "flaky");
    }
}
