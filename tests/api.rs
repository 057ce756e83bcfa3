//! API integration tests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::body::Bytes;
use axum::http::Request;
use axum::http::StatusCode;
use hashserver::checksum::Checksum;
use hashserver::checksum::ChecksumAlgorithm;
use hashserver::layout::ExtraDir;
use hashserver::layout::Layout;
use hashserver::layout::PREFIX_MARKER;
use hashserver::server::AppState;
use hashserver::server::create_router;
use hashserver::store::Store;
use http_body_util::BodyExt;
use serde_json::Value;
use serde_json::json;
use tower::ServiceExt;

/// A small buffer used across the tests.
const HELLO: &[u8] = b"Hello world!\n";

/// The SHA3-256 checksum of [`HELLO`].
const HELLO_CHECKSUM: &str = "6825d69119b014b3d5ac9b17ce68bf98b66190c5e34397781b3776dca9c23539";

/// A valid checksum no buffer hashes to in these tests.
const OTHER_CHECKSUM: &str = "6825d69119b014b3d5ac9b17ce68bf98b66190c5e34397781b3776dca9c23530";

/// A hex string that is too short to be a checksum.
const SHORT_CHECKSUM: &str = "6825d69119b014b3d5ac9b17ce68bf98b66190c5e34397781b";

/// A checksum-length string with non-hex characters.
const NON_HEX_CHECKSUM: &str = "xx25d69119b014b3d5ac9b17ce68bf98b66190c5e34397781b3776dca9c23539";

/// Builds a store over `dir` with a short lock timeout.
fn store(dir: &Path, layout: Layout, extras: Vec<ExtraDir>) -> Arc<Store> {
    Arc::new(Store::new(
        dir.to_path_buf(),
        layout,
        extras,
        Duration::from_secs(1),
        ChecksumAlgorithm::Sha3_256,
    ))
}

/// Builds the router around a store.
fn app(store: Arc<Store>, writable: bool) -> Router {
    create_router(AppState::new(store), writable)
}

/// Sends a request and collects the response status and body.
async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

/// GET a path.
async fn get(app: &Router, uri: &str) -> (StatusCode, Bytes) {
    send(
        app,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await
}

/// PUT a body under a checksum path.
async fn put(app: &Router, uri: &str, body: &[u8]) -> (StatusCode, Bytes) {
    send(
        app,
        Request::builder()
            .method("PUT")
            .uri(uri)
            .body(Body::from(body.to_vec()))
            .unwrap(),
    )
    .await
}

/// Queries `/has` with a JSON body.
async fn has(app: &Router, body: Value) -> (StatusCode, Bytes) {
    send(
        app,
        Request::builder()
            .method("GET")
            .uri("/has")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn healthcheck_returns_ok() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), false);

    let (status, body) = get(&app, "/healthcheck").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn missing_buffer_returns_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), false);

    let start = Instant::now();
    let (status, body) = get(&app, &format!("/{OTHER_CHECKSUM}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(&body[..], b"Not found");
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn existing_buffer_is_served_with_headers() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(HELLO_CHECKSUM), HELLO).unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), false);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/{HELLO_CHECKSUM}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers["content-disposition"],
        format!("attachment; filename=\"{HELLO_CHECKSUM}\"")
    );
    assert_eq!(headers["content-length"], "13");
    assert_eq!(headers["content-type"], "application/octet-stream");
    assert!(headers.contains_key("last-modified"));
    assert!(headers.contains_key("etag"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], HELLO);
}

#[tokio::test]
async fn wrong_length_checksum_is_rejected_with_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), false);

    let (status, body) = get(&app, &format!("/{SHORT_CHECKSUM}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let envelope: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        envelope,
        json!({
            "message": "Invalid data",
            "exception": {
                "type": "value_error",
                "loc": ["path", "checksum"],
                "msg": "Value error, Wrong length",
                "input": SHORT_CHECKSUM,
            }
        })
    );
}

#[tokio::test]
async fn non_hex_checksum_is_rejected_with_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), false);

    let (status, body) = get(&app, &format!("/{NON_HEX_CHECKSUM}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let envelope: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(envelope["message"], "Invalid data");
    assert_eq!(envelope["exception"]["type"], "value_error");
    assert_eq!(envelope["exception"]["loc"], json!(["path", "checksum"]));
    assert_eq!(envelope["exception"]["input"], NON_HEX_CHECKSUM);
    assert!(
        envelope["exception"]["msg"]
            .as_str()
            .unwrap()
            .contains("non-hexadecimal")
    );
}

#[tokio::test]
async fn put_then_get_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), true);
    let content = b"This is a buffer\nthat is used\nfor testing purposes";
    let checksum = ChecksumAlgorithm::Sha3_256.checksum(content);

    let (status, body) = put(&app, &format!("/{checksum}"), content).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"OK");

    let (status, body) = get(&app, &format!("/{checksum}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], content);
}

#[tokio::test]
async fn put_publishes_under_prefix_layout() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(store(dir.path(), Layout::Prefix, Vec::new()), true);
    let content = b"prefixed content";
    let checksum = ChecksumAlgorithm::Sha3_256.checksum(content);

    let (status, _) = put(&app, &format!("/{checksum}"), content).await;
    assert_eq!(status, StatusCode::OK);

    let published = dir
        .path()
        .join(checksum.prefix())
        .join(checksum.as_str());
    assert_eq!(std::fs::read(published).unwrap(), content);

    let (status, body) = get(&app, &format!("/{checksum}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], content);
}

#[tokio::test]
async fn repeated_put_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), true);
    let content = b"stored once";
    let checksum = ChecksumAlgorithm::Sha3_256.checksum(content);

    let (status, _) = put(&app, &format!("/{checksum}"), content).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = put(&app, &format!("/{checksum}"), content).await;
    assert_eq!(status, StatusCode::CREATED);

    assert_eq!(
        std::fs::read(dir.path().join(checksum.as_str())).unwrap(),
        content
    );
}

#[tokio::test]
async fn mismatched_upload_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), true);

    let (status, body) = put(&app, &format!("/{OTHER_CHECKSUM}"), HELLO).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(&body[..], b"Incorrect checksum");
    assert!(!dir.path().join(OTHER_CHECKSUM).exists());
}

#[tokio::test]
async fn read_only_server_has_no_put_route() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), false);

    let (status, _) = put(&app, &format!("/{HELLO_CHECKSUM}"), HELLO).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn corrupt_buffer_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let content = b"a much longer buffer whose file on disk got truncated";
    let checksum = ChecksumAlgorithm::Sha3_256.checksum(content);
    let path = dir.path().join(checksum.as_str());
    std::fs::write(&path, &content[..10]).unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), false);

    let (status, body) = get(&app, &format!("/{checksum}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let envelope: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        envelope,
        json!({
            "message": format!(
                "File corruption: file at path {} does not have the correct SHA3-256 checksum.",
                path.display()
            )
        })
    );
}

#[tokio::test]
async fn has_reports_sizes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(HELLO_CHECKSUM), HELLO).unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), false);

    let (status, body) = has(&app, json!([HELLO_CHECKSUM, OTHER_CHECKSUM])).await;
    assert_eq!(status, StatusCode::OK);
    let sizes: Vec<u64> = serde_json::from_slice(&body).unwrap();
    assert_eq!(sizes, vec![13, 0]);
}

#[tokio::test]
async fn has_names_the_invalid_body_position() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), false);

    let (status, body) = has(
        &app,
        json!([HELLO_CHECKSUM, OTHER_CHECKSUM, SHORT_CHECKSUM]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let envelope: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        envelope,
        json!({
            "message": "Invalid data",
            "exception": {
                "type": "value_error",
                "loc": ["body", 2],
                "msg": "Value error, Wrong length",
                "input": SHORT_CHECKSUM,
            }
        })
    );
}

#[tokio::test]
async fn has_rejects_non_string_elements() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), false);

    let (status, body) = has(&app, json!([HELLO_CHECKSUM, 42])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let envelope: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(envelope["exception"]["type"], "string_type");
    assert_eq!(envelope["exception"]["loc"], json!(["body", 1]));
}

#[tokio::test]
async fn has_rejects_non_array_body() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), false);

    let (status, body) = has(&app, json!({"checksums": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let envelope: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(envelope["exception"]["type"], "list_type");
}

#[tokio::test]
async fn promise_endpoint_registers_and_has_reports_it() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), true);

    let (status, body) = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri(format!("/promise/{OTHER_CHECKSUM}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let promise: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(promise["checksum"], OTHER_CHECKSUM);
    assert_eq!(promise["expires_in"], 600.0);

    let (status, body) = has(&app, json!([OTHER_CHECKSUM])).await;
    assert_eq!(status, StatusCode::OK);
    let sizes: Vec<u64> = serde_json::from_slice(&body).unwrap();
    assert_eq!(sizes, vec![1]);
}

#[tokio::test]
async fn promised_get_waits_for_the_upload() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), true);
    let content = b"arrives late";
    let checksum = ChecksumAlgorithm::Sha3_256.checksum(content);

    let (status, _) = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri(format!("/promise/{checksum}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let reader = {
        let app = app.clone();
        let uri = format!("/{checksum}");
        tokio::spawn(async move { get(&app, &uri).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!reader.is_finished());

    let (status, _) = put(&app, &format!("/{checksum}"), content).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("pending GET should complete once the upload lands")
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], content);
}

#[tokio::test]
async fn extra_directory_is_consulted_after_primary() {
    let primary = tempfile::tempdir().unwrap();
    let extra = tempfile::tempdir().unwrap();
    std::fs::write(extra.path().join(HELLO_CHECKSUM), HELLO).unwrap();

    let extras = vec![ExtraDir::discover(extra.path().to_path_buf()).await];
    let app = app(store(primary.path(), Layout::Flat, extras), false);

    let (status, body) = get(&app, &format!("/{HELLO_CHECKSUM}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], HELLO);

    let (status, body) = has(&app, json!([HELLO_CHECKSUM])).await;
    assert_eq!(status, StatusCode::OK);
    let sizes: Vec<u64> = serde_json::from_slice(&body).unwrap();
    assert_eq!(sizes, vec![13]);
}

#[tokio::test]
async fn marker_file_switches_extra_directory_to_prefix() {
    let primary = tempfile::tempdir().unwrap();
    let extra = tempfile::tempdir().unwrap();
    std::fs::write(extra.path().join(PREFIX_MARKER), b"").unwrap();
    let checksum = Checksum::parse(HELLO_CHECKSUM).unwrap();
    let subdir = extra.path().join(checksum.prefix());
    std::fs::create_dir_all(&subdir).unwrap();
    std::fs::write(subdir.join(HELLO_CHECKSUM), HELLO).unwrap();

    let extras = vec![ExtraDir::discover(extra.path().to_path_buf()).await];
    let app = app(store(primary.path(), Layout::Flat, extras), false);

    let (status, body) = get(&app, &format!("/{HELLO_CHECKSUM}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], HELLO);
}

#[tokio::test]
async fn vault_layout_searches_subdirectories() {
    let dir = tempfile::tempdir().unwrap();
    let subdir = dir.path().join("dependent").join("big");
    std::fs::create_dir_all(&subdir).unwrap();
    std::fs::write(subdir.join(HELLO_CHECKSUM), HELLO).unwrap();
    let app = app(store(dir.path(), Layout::Vault, Vec::new()), false);

    let (status, body) = get(&app, &format!("/{HELLO_CHECKSUM}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], HELLO);

    let (status, body) = has(&app, json!([HELLO_CHECKSUM])).await;
    assert_eq!(status, StatusCode::OK);
    let sizes: Vec<u64> = serde_json::from_slice(&body).unwrap();
    assert_eq!(sizes, vec![13]);
}

#[tokio::test]
async fn fresh_lock_delays_a_missing_lookup() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".LOCK"), b"").unwrap();
    let app = app(store(dir.path(), Layout::Flat, Vec::new()), false);

    let start = Instant::now();
    let (status, _) = get(&app, &format!("/{OTHER_CHECKSUM}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    // The one-second lock timeout must elapse before the second resolution.
    assert!(start.elapsed() >= Duration::from_millis(900));
    assert!(start.elapsed() < Duration::from_secs(10));
}
