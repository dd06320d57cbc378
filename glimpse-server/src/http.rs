//! Glimpse HTTP API
//!
//! Axum-based HTTP server that classifies uploaded images and attaches
//! Wikipedia facts for the predicted label.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function. The inner functions are directly testable without axum
//! dispatch machinery.
//!
//! Endpoints:
//! - POST /classify: multipart image upload → `{prediction, facts}`
//! - GET  /health  : classifier and fact source status
//! - GET  /version : server version info

use std::sync::Arc;
use std::time::Instant;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use glimpse_core::{
    decode_image, Classifier, ClassifyError, ClassifyResponse, FactSource, GlimpseConfig,
    GlimpseError, OnnxClassifier, OnnxClassifierConfig, Prediction, WikipediaClient,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::Instrument;
use uuid::Uuid;

use crate::upload::{read_image_upload, ImageUpload, UploadError};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub classifier: Arc<dyn Classifier>,
    pub facts: Arc<dyn FactSource>,
    pub config: GlimpseConfig,
}

impl HttpState {
    /// Wire the ONNX classifier and Wikipedia client from config.
    ///
    /// With `classifier.preload` the model is loaded here so a bad model path
    /// fails startup instead of the first request.
    pub async fn from_config(config: GlimpseConfig) -> Result<Self, GlimpseError> {
        let classifier = OnnxClassifier::lazy(OnnxClassifierConfig::from(&config.classifier));
        if config.classifier.preload {
            classifier.get().await?;
        }

        let facts = WikipediaClient::new(config.facts.clone())?;

        Ok(Self {
            classifier: Arc::new(classifier),
            facts: Arc::new(facts),
            config,
        })
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let body_limit = state.config.http.max_upload_bytes;
    Router::new()
        .route("/classify", post(classify_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), GlimpseError> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Glimpse HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Decode and classify raw upload bytes. Decoding runs on the blocking pool.
pub async fn classify_bytes(
    classifier: &dyn Classifier,
    bytes: Bytes,
) -> Result<Prediction, ClassifyError> {
    let image = tokio::task::spawn_blocking(move || decode_image(&bytes))
        .await
        .map_err(|e| ClassifyError::Decode(format!("spawn_blocking join error: {e}")))??;

    classifier.classify(image).await
}

/// Inner classify: validation result in, (status_code, json_body) out.
pub async fn classify_inner(
    state: &HttpState,
    upload: Result<ImageUpload, UploadError>,
) -> (StatusCode, serde_json::Value) {
    let upload = match upload {
        Ok(u) => u,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected upload");
            return e.into_http();
        }
    };

    let start = Instant::now();
    tracing::info!(
        filename = %upload.filename,
        content_type = upload.content_type.as_deref().unwrap_or("-"),
        bytes = upload.bytes.len(),
        "Classifying upload"
    );

    let prediction = match classify_bytes(state.classifier.as_ref(), upload.bytes).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "Prediction failed");
            return (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": format!("Prediction failed: {e}") }),
            );
        }
    };

    let facts = state
        .facts
        .lookup_facts(prediction.label.as_str(), state.config.facts.max_facts)
        .await;

    tracing::info!(
        label = %prediction.label,
        class_index = prediction.class_index,
        confidence = prediction.confidence,
        facts = facts.len(),
        took_ms = start.elapsed().as_millis() as u64,
        "Classification complete"
    );

    let response = ClassifyResponse {
        prediction: prediction.label,
        facts,
    };
    match serde_json::to_value(&response) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": e.to_string() }),
        ),
    }
}

/// Inner health: reports classifier and fact source state (no IO).
pub fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "classifier": state.classifier.name(),
            "model_loaded": state.classifier.is_loaded(),
            "facts_source": state.facts.name(),
        }),
    )
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "glimpse/1",
    })
}

// ============================================================================
// Axum handler wrappers (thin, delegating to inner functions)
// ============================================================================

pub async fn classify_handler(
    State(state): State<Arc<HttpState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> impl IntoResponse {
    let span = tracing::info_span!("classify", request_id = %Uuid::new_v4());
    let (status, body) = async {
        let upload = match multipart {
            Ok(m) => read_image_upload(m).await,
            Err(rejection) => Err(UploadError::from(rejection)),
        };
        classify_inner(&state, upload).await
    }
    .instrument(span)
    .await;
    (status, Json(body))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state);
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

// ============================================================================
// Unit Tests calling inner functions directly
// ============================================================================
