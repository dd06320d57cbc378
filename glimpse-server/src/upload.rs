//! Multipart upload extraction and field-level validation for `POST /classify`.

use std::collections::BTreeMap;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::Multipart;
use axum::http::StatusCode;
use bytes::Bytes;
use thiserror::Error;

/// Form field carrying the image file.
pub const IMAGE_FIELD: &str = "image";

pub const NO_FILE: &str = "No file was submitted.";
pub const NOT_A_FILE: &str =
    "The submitted data was not a file. Check the encoding type on the form.";
pub const EMPTY_FILE: &str = "The submitted file is empty.";

/// A validated image upload, held in memory.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Field name → list of messages.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("invalid upload: {0:?}")]
    Invalid(FieldErrors),

    #[error("Multipart form parse error - {0}")]
    Parse(String),

    #[error("Upload too large: {0}")]
    TooLarge(String),
}

impl UploadError {
    fn field(name: &str, message: &str) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(name.to_string(), vec![message.to_string()]);
        UploadError::Invalid(errors)
    }

    /// Status code and JSON body reported to the client.
    pub fn into_http(self) -> (StatusCode, serde_json::Value) {
        match self {
            UploadError::Invalid(errors) => (StatusCode::BAD_REQUEST, serde_json::json!(errors)),
            UploadError::Parse(_) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "detail": self.to_string() }),
            ),
            UploadError::TooLarge(_) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                serde_json::json!({ "detail": self.to_string() }),
            ),
        }
    }
}

impl From<MultipartRejection> for UploadError {
    fn from(rejection: MultipartRejection) -> Self {
        UploadError::Parse(rejection.body_text())
    }
}

impl From<MultipartError> for UploadError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            UploadError::TooLarge(e.body_text())
        } else {
            UploadError::Parse(e.body_text())
        }
    }
}

/// Pull the `image` file out of a multipart body.
///
/// Other fields are ignored. The first `image` field wins.
pub async fn read_image_upload(mut multipart: Multipart) -> Result<ImageUpload, UploadError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;

        let Some(filename) = filename else {
            return Err(UploadError::field(IMAGE_FIELD, NOT_A_FILE));
        };
        if bytes.is_empty() {
            return Err(UploadError::field(IMAGE_FIELD, EMPTY_FILE));
        }

        return Ok(ImageUpload {
            filename,
            content_type,
            bytes,
        });
    }

    Err(UploadError::field(IMAGE_FIELD, NO_FILE))
}
