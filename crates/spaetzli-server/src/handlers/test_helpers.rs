use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use spaetzli_core::DirectoryMirror;
use tower::ServiceExt;

use crate::config::ServerConfig;
use crate::state::{backups_dir, AppState};

pub const TEST_API_KEY: &str = "test-key";
pub const MULTIPART_BOUNDARY: &str = "spaetzli-test-boundary";

/// Create a wired-up router and AppState backed by a temp directory.
pub fn setup_app(limit_of_devices: usize) -> (Router, AppState, tempfile::TempDir) {
    setup_app_with(|config| config.limits.limit_of_devices = limit_of_devices)
}

pub fn setup_app_with(
    configure: impl FnOnce(&mut ServerConfig),
) -> (Router, AppState, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("create tempdir");
    let mut config = ServerConfig::default();
    config.server.data_dir = tmp.path().to_string_lossy().into_owned();
    configure(&mut config);

    let mirror = DirectoryMirror::new(backups_dir(tmp.path())).expect("create backups dir");
    let state = AppState::new(config, Arc::new(mirror));
    let router = super::router(state.clone());
    (router, state, tmp)
}

/// Send a request carrying the API key plus any extra headers.
pub async fn authed_request(
    router: Router,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Body,
) -> axum::response::Response {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("API-KEY", TEST_API_KEY);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    router.oneshot(builder.body(body).unwrap()).await.unwrap()
}

pub async fn unauthed_request(
    router: Router,
    method: &str,
    path: &str,
) -> axum::response::Response {
    let req = Request::builder()
        .method(method)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    router.oneshot(req).await.unwrap()
}

pub async fn authed_get(router: Router, path: &str) -> axum::response::Response {
    authed_request(router, "GET", path, &[], Body::empty()).await
}

/// Send an authenticated request with a JSON body.
pub async fn authed_json(
    router: Router,
    method: &str,
    path: &str,
    body: serde_json::Value,
) -> axum::response::Response {
    authed_request(
        router,
        method,
        path,
        &[("Content-Type", "application/json")],
        Body::from(body.to_string()),
    )
    .await
}

/// Build a multipart body the way the rotki client posts backup ranges.
pub fn multipart_body(chunk: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in fields {
        out.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    out.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"chunk_data\"; filename=\"backup.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    out.extend_from_slice(chunk);
    out.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    out
}

/// POST one backup range. `content_range` is sent verbatim when present.
pub async fn post_backup_range(
    router: Router,
    chunk: &[u8],
    fields: &[(&str, &str)],
    content_range: Option<&str>,
) -> axum::response::Response {
    let content_type = format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}");
    let mut headers = vec![("Content-Type", content_type.as_str())];
    if let Some(range) = content_range {
        headers.push(("Content-Range", range));
    }
    authed_request(
        router,
        "POST",
        "/nest/1/backup/range",
        &headers,
        Body::from(multipart_body(chunk, fields)),
    )
    .await
}

/// Read full response body into `Vec<u8>`.
pub async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("collect body")
        .to_vec()
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

/// Assert response has expected status.
pub fn assert_status(response: &axum::response::Response, expected: StatusCode) {
    assert_eq!(
        response.status(),
        expected,
        "expected {expected}, got {}",
        response.status()
    );
}
