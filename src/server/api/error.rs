//! API error types and response mapping.
//!
//! Request-validation failures are reported in a structured envelope:
//! `{"message": "Invalid data", "exception": {type, loc, msg, input}}`.
//! Storage errors map to the plain bodies clients of this protocol expect.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::checksum::ChecksumError;
use crate::store::StoreError;

/// The `exception` object inside a validation envelope.
#[derive(Debug, Serialize)]
pub struct ValidationDetail {
    /// Machine-readable error class.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Where in the request the offending value sits, e.g.
    /// `["path", "checksum"]` or `["body", 2]`.
    pub loc: Vec<Value>,
    /// Human-readable message.
    pub msg: String,
    /// The offending input, echoed back.
    pub input: Value,
}

/// Errors surfaced by the API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request failed validation.
    #[error("Invalid data")]
    Validation(ValidationDetail),

    /// The buffer does not exist, after all fallbacks and promises.
    #[error("Not found")]
    NotFound,

    /// The uploaded body hashed to a different digest.
    #[error("Incorrect checksum")]
    IncorrectChecksum,

    /// The client disconnected mid-upload.
    #[error("client disconnected")]
    Disconnect,

    /// A storage-layer failure with a client-facing message.
    #[error("{0}")]
    Storage(String),

    /// Anything else; not customized for clients.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Wraps any error as an internal (500) failure.
    pub fn internal<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Internal(err.into())
    }

    /// Envelope for a checksum that failed to parse out of the request path.
    pub fn invalid_path_checksum(err: &ChecksumError, input: &str) -> Self {
        Self::Validation(ValidationDetail {
            kind: "value_error",
            loc: vec![Value::from("path"), Value::from("checksum")],
            msg: format!("Value error, {err}"),
            input: Value::from(input),
        })
    }

    /// Envelope for a checksum that failed to parse at `index` of the body
    /// array.
    pub fn invalid_body_checksum(err: &ChecksumError, index: usize, input: &Value) -> Self {
        Self::Validation(ValidationDetail {
            kind: "value_error",
            loc: vec![Value::from("body"), Value::from(index)],
            msg: format!("Value error, {err}"),
            input: input.clone(),
        })
    }

    /// Envelope for a body-array element that is not a string.
    pub fn invalid_body_type(index: usize, input: &Value) -> Self {
        Self::Validation(ValidationDetail {
            kind: "string_type",
            loc: vec![Value::from("body"), Value::from(index)],
            msg: String::from("Input should be a valid string"),
            input: input.clone(),
        })
    }

    /// Envelope for a body that is not a JSON array.
    pub fn invalid_body_shape(input: Value) -> Self {
        Self::Validation(ValidationDetail {
            kind: "list_type",
            loc: vec![Value::from("body")],
            msg: String::from("Input should be a valid list"),
            input,
        })
    }

    /// Envelope for a body that is not valid JSON at all.
    pub fn invalid_body_json(input: &str) -> Self {
        Self::Validation(ValidationDetail {
            kind: "json_invalid",
            loc: vec![Value::from("body")],
            msg: String::from("Invalid JSON"),
            input: Value::from(input),
        })
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            StoreError::NotAFile(_)
            | StoreError::Corruption { .. }
            | StoreError::ReadOnlyLayout => Self::Storage(err.to_string()),
            StoreError::Io(err) => Self::Internal(err.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(detail) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"message": "Invalid data", "exception": detail})),
            )
                .into_response(),
            Self::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            Self::IncorrectChecksum => {
                (StatusCode::BAD_REQUEST, "Incorrect checksum").into_response()
            }
            Self::Disconnect => StatusCode::BAD_REQUEST.into_response(),
            Self::Storage(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"message": message})),
            )
                .into_response(),
            Self::Internal(err) => {
                tracing::error!("internal error: {err:#}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
