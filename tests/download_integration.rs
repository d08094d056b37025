//! Integration tests for downloads and decode-and-persist calls.
//!
//! These tests verify the full file flow with mock HTTP servers and a
//! temporary download directory.

mod support;
use support::socket_guard::start_mock_server_or_skip;

use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use courier_core::{
    ApiClient, ApiErrorKind, CallResult, PermissionGate, RequestDescriptor, SessionConfig,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Denied;

#[async_trait]
impl PermissionGate for Denied {
    async fn has_storage_permission(&self) -> bool {
        false
    }
}

fn client_for(server: &MockServer, dir: &TempDir) -> ApiClient {
    let client = ApiClient::new();
    client
        .setup(SessionConfig::new(server.uri()).with_download_dir(dir.path()))
        .unwrap();
    client
}

/// Helper to mount a file endpoint with a content-disposition filename.
async fn mount_file(server: &MockServer, route: &str, filename: &str, content: &[u8]) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "content-disposition",
                    format!("attachment; filename=\"{filename}\"").as_str(),
                )
                .set_body_bytes(content.to_vec()),
        )
        .mount(server)
        .await;
}

async fn saved_path(client: &ApiClient, descriptor: RequestDescriptor<PathBuf>) -> PathBuf {
    match client.call(&descriptor, None).await {
        CallResult::Success(Some(path)) => path,
        other => panic!("expected saved path, got {other:?}"),
    }
}

// ==================== Download Tests ====================

#[tokio::test]
async fn test_download_uses_content_disposition_filename() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();
    let content = b"This is the complete file content.\nLine 2.\nLine 3.";
    mount_file(&server, "/files/7", "report.pdf", content).await;

    let client = client_for(&server, &temp_dir);
    let path = saved_path(
        &client,
        RequestDescriptor::download("/files/7").output::<PathBuf>().build(),
    )
    .await;

    assert_eq!(path, temp_dir.path().join("report.pdf"));
    assert_eq!(std::fs::read(&path).unwrap(), content);
}

#[tokio::test]
async fn test_download_explicit_name_wins() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();
    mount_file(&server, "/files/7", "report.pdf", b"data").await;

    let client = client_for(&server, &temp_dir);
    let descriptor = RequestDescriptor::download("/files/7")
        .download_file_name("renamed.pdf")
        .output::<PathBuf>()
        .build();
    let path = saved_path(&client, descriptor).await;

    assert_eq!(path, temp_dir.path().join("renamed.pdf"));
}

#[tokio::test]
async fn test_download_collisions_get_numbered_suffix() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();
    mount_file(&server, "/files/7", "report.pdf", b"new").await;
    std::fs::write(temp_dir.path().join("report.pdf"), b"old").unwrap();

    let client = client_for(&server, &temp_dir);
    let descriptor = RequestDescriptor::download("/files/7").output::<PathBuf>().build();

    let first = saved_path(&client, descriptor.clone()).await;
    let second = saved_path(&client, descriptor).await;

    assert_eq!(first, temp_dir.path().join("report (1).pdf"));
    assert_eq!(second, temp_dir.path().join("report (2).pdf"));
    assert_eq!(
        std::fs::read(temp_dir.path().join("report.pdf")).unwrap(),
        b"old"
    );
}

#[tokio::test]
async fn test_download_without_name_fails_unknown() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"anonymous".to_vec()))
        .mount(&server)
        .await;

    let client = client_for(&server, &temp_dir);
    let result = client
        .call(
            &RequestDescriptor::download("/files/x").output::<PathBuf>().build(),
            None,
        )
        .await;

    assert_eq!(result.error().unwrap().kind(), ApiErrorKind::Unknown);
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_download_http_error_leaves_no_file() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server, &temp_dir);
    let descriptor = RequestDescriptor::download("/files/gone")
        .download_file_name("gone.bin")
        .output::<PathBuf>()
        .build();
    let result = client.call(&descriptor, None).await;

    let error = result.error().unwrap();
    assert_eq!(error.kind(), ApiErrorKind::Network);
    assert_eq!(error.status(), Some(404));
    assert!(!temp_dir.path().join("gone.bin").exists());
}

#[tokio::test]
async fn test_download_permission_denied_skips_transport() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = ApiClient::builder().permission_gate(Denied).build();
    client
        .setup(SessionConfig::new(server.uri()).with_download_dir(temp_dir.path()))
        .unwrap();
    let descriptor = RequestDescriptor::download("/files/7")
        .download_file_name("x.bin")
        .output::<PathBuf>()
        .build();
    let result = client.call(&descriptor, None).await;

    assert_eq!(
        result.error().unwrap().kind(),
        ApiErrorKind::PermissionDenied
    );
}

// ==================== Decode-and-Persist Tests ====================

#[tokio::test]
async fn test_decode_and_persist_writes_decoded_bytes() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/documents/3/content"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": STANDARD.encode(b"%PDF-1.7 body")})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, &temp_dir);
    let descriptor = RequestDescriptor::get("/documents/3/content")
        .file_decode()
        .download_file_name("invoice.pdf")
        .output::<PathBuf>()
        .build();
    let path = saved_path(&client, descriptor).await;

    assert_eq!(path, temp_dir.path().join("invoice.pdf"));
    assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7 body");
}

#[tokio::test]
async fn test_decode_and_persist_non_200_is_unknown() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = client_for(&server, &temp_dir);
    let descriptor = RequestDescriptor::get("/documents/3/content")
        .file_decode()
        .download_file_name("invoice.pdf")
        .output::<PathBuf>()
        .build();
    let result = client.call(&descriptor, None).await;

    let error = result.error().unwrap();
    assert_eq!(error.kind(), ApiErrorKind::Unknown);
    assert_eq!(error.status(), Some(403));
    assert!(!temp_dir.path().join("invoice.pdf").exists());
}

#[tokio::test]
async fn test_decode_and_persist_rejects_invalid_base64() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": "***"})))
        .mount(&server)
        .await;

    let client = client_for(&server, &temp_dir);
    let descriptor = RequestDescriptor::get("/documents/3/content")
        .file_decode()
        .download_file_name("invoice.pdf")
        .output::<PathBuf>()
        .build();
    let result = client.call(&descriptor, None).await;

    assert_eq!(
        result.error().unwrap().kind(),
        ApiErrorKind::InvalidResponse
    );
}
