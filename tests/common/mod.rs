//! Shared helpers for HTTP-level tests

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use serde_json::json;
use tempfile::TempDir;
use tower::ServiceExt;

use chunked_upload_server::config::{ChunkBackend, Config};
use chunked_upload_server::routes;
use chunked_upload_server::state::AppState;
use chunked_upload_server::upload::DigestAlgorithm;

pub const BOUNDARY: &str = "----chunked-upload-test-boundary";
pub const LANDING_PAGE: &str = "<html><body>Chunked Upload</body></html>";

/// A router over a fresh upload root
pub struct TestApp {
    pub dir: TempDir,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_backend(ChunkBackend::Local)
    }

    pub fn with_backend(backend: ChunkBackend) -> Self {
        let dir = TempDir::new().unwrap();
        let index_file = dir.path().join("index.html");
        std::fs::write(&index_file, LANDING_PAGE).unwrap();

        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();

        let mut config = Config::default();
        config.upload.root = uploads;
        config.upload.index_file = index_file;
        config.upload.cleanup_grace = Duration::ZERO;
        config.upload.digest = DigestAlgorithm::Md5;
        config.upload.chunk_backend = backend;

        let router = routes::app(AppState::new(config));
        Self { dir, router }
    }

    pub fn uploads(&self) -> std::path::PathBuf {
        self.dir.path().join("uploads")
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Response<Body>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        (response.status(), response)
    }

    /// Post one chunk with metadata first, returning status and body text
    pub async fn upload_chunk(
        &self,
        file_name: &str,
        fingerprint: &str,
        index: i64,
        total: i64,
        data: &[u8],
    ) -> (StatusCode, String) {
        let metadata = metadata(file_name, fingerprint, index, total);
        let request = multipart_request(&[Part::json(&metadata), Part::chunk(data)]);
        let (status, response) = self.send(request).await;
        (status, body_text(response).await)
    }
}

pub fn metadata(file_name: &str, fingerprint: &str, index: i64, total: i64) -> String {
    json!({
        "file_name": file_name,
        "file_md5": fingerprint,
        "chunk_index": index,
        "chunk_total": total,
    })
    .to_string()
}

pub fn md5_hex(data: &[u8]) -> String {
    DigestAlgorithm::Md5.digest_bytes(data)
}

pub struct Part<'a> {
    name: &'a str,
    file_name: Option<&'a str>,
    data: &'a [u8],
}

impl<'a> Part<'a> {
    pub fn json(metadata: &'a str) -> Self {
        Self {
            name: "json",
            file_name: None,
            data: metadata.as_bytes(),
        }
    }

    pub fn chunk(data: &'a [u8]) -> Self {
        Self {
            name: "chunk",
            file_name: Some("blob"),
            data,
        }
    }
}

pub fn multipart_request(parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part.file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    part.name, file_name
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    part.name
                )
                .as_bytes(),
            ),
        }
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    post_multipart(body)
}

/// Metadata followed by a chunk field that is cut off before its boundary
pub fn truncated_request(metadata: &str, partial_chunk: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"json\"\r\n\r\n{m}\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"chunk\"; filename=\"blob\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n",
        b = BOUNDARY,
        m = metadata
    )
    .into_bytes();
    body.extend_from_slice(partial_chunk);

    post_multipart(body)
}

pub fn post_multipart(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn dir_entries(path: &Path) -> usize {
    std::fs::read_dir(path).map_or(0, |entries| entries.count())
}
