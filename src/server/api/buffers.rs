//! Buffer API handlers.

use axum::Json;
use axum::body::Body;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::Request;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::Response;
use serde_json::Value;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::info;

use super::AppState;
use super::error::ApiError;
use crate::checksum::Checksum;
use crate::store::CHUNK_SIZE;
use crate::store::IngestOutcome;

/// Liveness probe.
pub async fn healthcheck() -> &'static str {
    "OK"
}

/// Serves a buffer's bytes, verified against its checksum.
///
/// # Errors
///
/// 404 when the buffer does not exist, 400 on validation failure or detected
/// corruption.
pub async fn get_file(
    State(state): State<AppState>,
    Path(checksum): Path<String>,
) -> Result<Response, ApiError> {
    let checksum = parse_path_checksum(&checksum)?;
    info!("GET {checksum}");

    state
        .store
        .inflight()
        .wait_until_absent(std::slice::from_ref(&checksum))
        .await;
    let (path, meta) = state.store.open_verified(&checksum).await?;

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        // Deleted between verification and open; for the client that is a
        // plain miss.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound);
        }
        Err(err) => return Err(ApiError::internal(err)),
    };

    let modified = meta.modified().map_err(ApiError::internal)?;
    let modified_secs = modified
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let body = Body::from_stream(ReaderStream::with_capacity(file, CHUNK_SIZE));
    Response::builder()
        .header(
            header::CONTENT_TYPE,
            mime_guess::from_path(checksum.as_str())
                .first_or_octet_stream()
                .as_ref(),
        )
        .header(header::CONTENT_LENGTH, meta.len())
        .header(header::LAST_MODIFIED, httpdate::fmt_http_date(modified))
        .header(header::ETAG, format!("W/\"{}-{}\"", meta.len(), modified_secs))
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{checksum}\""),
        )
        .body(body)
        .map_err(ApiError::internal)
}

/// Ingests a streaming upload whose bytes must hash to the path checksum.
///
/// # Errors
///
/// 400 on validation failure, checksum mismatch, or client disconnect.
pub async fn put_file(
    State(state): State<AppState>,
    Path(checksum): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let checksum = parse_path_checksum(&checksum)?;
    let body = request.into_body().into_data_stream();

    match state.store.ingest(&checksum, body).await? {
        IngestOutcome::Stored => Ok((StatusCode::OK, "OK").into_response()),
        IngestOutcome::AlreadyStored => Ok(StatusCode::CREATED.into_response()),
        IngestOutcome::Busy => Ok(StatusCode::ACCEPTED.into_response()),
        IngestOutcome::ChecksumMismatch => Err(ApiError::IncorrectChecksum),
        IngestOutcome::Disconnect => Err(ApiError::Disconnect),
    }
}

/// Announces an upcoming upload of the path checksum.
///
/// # Errors
///
/// 400 on validation failure.
pub async fn promise(
    State(state): State<AppState>,
    Path(checksum): Path<String>,
) -> Result<Response, ApiError> {
    let checksum = parse_path_checksum(&checksum)?;
    let ttl = state.store.promises().add(&checksum);
    info!("PROMISE {checksum}");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"checksum": checksum, "expires_in": ttl.as_secs_f64()})),
    )
        .into_response())
}

/// Batched existence query: the body is a JSON array of checksums, the
/// response an array of the same length with `0` for absent buffers and the
/// file size (or a truthy sentinel for promised buffers) otherwise.
///
/// # Errors
///
/// 400 with a validation envelope naming the offending body position.
pub async fn has_buffers(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Vec<u64>>, ApiError> {
    let text = std::str::from_utf8(&body)
        .map_err(|_| ApiError::invalid_body_json(&String::from_utf8_lossy(&body)))?;
    let value: Value =
        serde_json::from_str(text).map_err(|_| ApiError::invalid_body_json(text))?;
    let Value::Array(items) = value else {
        return Err(ApiError::invalid_body_shape(value));
    };

    let mut checksums = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let Value::String(text) = item else {
            return Err(ApiError::invalid_body_type(index, item));
        };
        let checksum = Checksum::parse(text)
            .map_err(|err| ApiError::invalid_body_checksum(&err, index, item))?;
        checksums.push(checksum);
    }

    Ok(Json(state.store.sizes(&checksums).await))
}

/// Parses a checksum path segment, mapping failures to the envelope.
fn parse_path_checksum(input: &str) -> Result<Checksum, ApiError> {
    Checksum::parse(input).map_err(|err| ApiError::invalid_path_checksum(&err, input))
}
