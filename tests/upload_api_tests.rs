//! End-to-end tests for the `/upload` endpoint

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};

use chunked_upload_server::config::ChunkBackend;
use common::*;

#[tokio::test]
async fn test_report_upload_scenario() {
    let app = TestApp::new();
    let chunks: [&[u8]; 3] = [b"%PDF-", b"1.7\n%", b"%EOF\n"];
    let fingerprint = md5_hex(&chunks.concat());

    let (status, body) = app.upload_chunk("report.pdf", &fingerprint, 0, 3, chunks[0]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"progress":1}"#);

    let (status, body) = app.upload_chunk("report.pdf", &fingerprint, 2, 3, chunks[2]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"progress":2}"#);

    // Retry of chunk 0 does not advance progress
    let (status, body) = app.upload_chunk("report.pdf", &fingerprint, 0, 3, chunks[0]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"progress":2}"#);

    let (status, body) = app.upload_chunk("report.pdf", &fingerprint, 1, 3, chunks[1]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"progress":3,"status":"completed"}"#);

    let artifact = std::fs::read(app.uploads().join("report.pdf")).unwrap();
    assert_eq!(artifact.len(), 15);
    assert_eq!(artifact, chunks.concat());
    assert!(!app.uploads().join(&fingerprint).exists());
}

#[tokio::test]
async fn test_response_is_json() {
    let app = TestApp::new();
    let request = multipart_request(&[
        Part::json(&metadata("a.bin", "abc123", 0, 2)),
        Part::chunk(b"data"),
    ]);

    let (status, response) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
}

#[tokio::test]
async fn test_chunk_before_metadata_is_buffered() {
    let app = TestApp::new();
    let data = b"only chunk";
    let fingerprint = md5_hex(data);
    let meta = metadata("single.txt", &fingerprint, 0, 1);

    let request = multipart_request(&[Part::chunk(data), Part::json(&meta)]);
    let (status, response) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body_text(response).await, r#"{"progress":1,"status":"completed"}"#);
    assert_eq!(std::fs::read(app.uploads().join("single.txt")).unwrap(), data);
}

#[tokio::test]
async fn test_assembly_independent_of_arrival_order() {
    let app = TestApp::new();
    let chunks: Vec<Vec<u8>> = (0..5u8).map(|i| vec![b'a' + i; 7]).collect();
    let fingerprint = md5_hex(&chunks.concat());

    for index in 0..5 {
        app.upload_chunk("ascending.bin", &fingerprint, index, 5, &chunks[index as usize])
            .await;
    }
    // The fingerprint is free again once the first upload completed
    for index in [3, 0, 4, 2, 1] {
        app.upload_chunk("shuffled.bin", &fingerprint, index, 5, &chunks[index as usize])
            .await;
    }

    let ascending = std::fs::read(app.uploads().join("ascending.bin")).unwrap();
    let shuffled = std::fs::read(app.uploads().join("shuffled.bin")).unwrap();
    assert_eq!(ascending, chunks.concat());
    assert_eq!(ascending, shuffled);
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let app = TestApp::new();
    let total = 6;
    let chunks: Vec<Vec<u8>> = (0..total).map(|i| vec![i as u8; 3]).collect();
    let fingerprint = md5_hex(&chunks.concat());

    let mut last = 0;
    for index in [5, 5, 1, 0, 1, 3, 2, 0, 4] {
        let (status, body) = app
            .upload_chunk("seq.bin", &fingerprint, index, total, &chunks[index as usize])
            .await;
        assert_eq!(status, StatusCode::OK);

        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        let progress = value["progress"].as_i64().unwrap();
        assert!(progress >= last, "progress went from {} to {}", last, progress);
        assert!(progress <= total);
        last = progress;
    }
    assert_eq!(last, total);
}

#[tokio::test]
async fn test_integrity_mismatch_is_server_error() {
    let app = TestApp::new();

    app.upload_chunk("bad.bin", "abc123", 0, 2, b"hello").await;
    let (status, body) = app.upload_chunk("bad.bin", "abc123", 1, 2, b"world").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("Integrity mismatch"), "body: {}", body);
    // Evidence is preserved
    assert_eq!(std::fs::read(app.uploads().join("bad.bin")).unwrap(), b"helloworld");
    assert_eq!(dir_entries(&app.uploads().join("abc123")), 2);
}

#[tokio::test]
async fn test_memory_backend_upload() {
    let app = TestApp::with_backend(ChunkBackend::Memory);
    let fingerprint = md5_hex(b"in memory");

    app.upload_chunk("mem.txt", &fingerprint, 1, 2, b"memory").await;
    let (status, body) = app.upload_chunk("mem.txt", &fingerprint, 0, 2, b"in ").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"progress":2,"status":"completed"}"#);
    assert_eq!(std::fs::read(app.uploads().join("mem.txt")).unwrap(), b"in memory");
}

// ============================================================================
// Rejected requests
// ============================================================================

#[tokio::test]
async fn test_missing_metadata() {
    let app = TestApp::new();
    let (status, response) = app.send(multipart_request(&[Part::chunk(b"data")])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "Missing JSON metadata");
}

#[tokio::test]
async fn test_invalid_metadata() {
    let app = TestApp::new();
    let request = multipart_request(&[Part::json("{not json"), Part::chunk(b"data")]);
    let (status, response) = app.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.starts_with("Invalid JSON metadata"));
}

#[tokio::test]
async fn test_missing_chunk_field() {
    let app = TestApp::new();
    let meta = metadata("a.bin", "abc123", 0, 1);
    let (status, response) = app.send(multipart_request(&[Part::json(&meta)])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "Missing chunk field");
}

#[tokio::test]
async fn test_out_of_range_index_touches_nothing() {
    let app = TestApp::new();

    for (index, total) in [(3, 3), (-1, 3), (0, 0)] {
        let (status, _) = app.upload_chunk("a.bin", "abc123", index, total, b"x").await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "index {} of {}", index, total);
    }
    assert_eq!(dir_entries(&app.uploads()), 0);
}

#[tokio::test]
async fn test_path_traversal_rejected() {
    let app = TestApp::new();

    let (status, _) = app.upload_chunk("a.bin", "../escape", 0, 1, b"x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.upload_chunk("../escape.bin", "abc123", 0, 1, b"x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(dir_entries(&app.uploads()), 0);
}

#[tokio::test]
async fn test_truncated_body_is_bad_request() {
    let app = TestApp::new();
    let fingerprint = md5_hex(b"whole chunk");
    let meta = metadata("cut.bin", &fingerprint, 0, 1);

    let (status, response) = app.send(truncated_request(&meta, b"whole")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.starts_with("Failed to parse form"));
    assert_eq!(dir_entries(&app.uploads().join(&fingerprint)), 0);

    // Nothing was counted, so the full chunk still completes the upload
    let (status, body) = app.upload_chunk("cut.bin", &fingerprint, 0, 1, b"whole chunk").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"progress":1,"status":"completed"}"#);
}

#[tokio::test]
async fn test_file_name_of_live_container_rejected() {
    let app = TestApp::new();
    app.upload_chunk("first.bin", "abc123", 0, 2, b"half").await;

    let (status, _) = app.upload_chunk("abc123", "def456", 0, 1, b"x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!app.uploads().join("def456").exists());
    assert_eq!(dir_entries(&app.uploads().join("abc123")), 1);
}

#[tokio::test]
async fn test_fingerprint_of_existing_artifact_rejected() {
    let app = TestApp::new();
    std::fs::write(app.uploads().join("abc123"), b"earlier artifact").unwrap();

    let (status, _) = app.upload_chunk("other.bin", "abc123", 0, 2, b"x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        std::fs::read(app.uploads().join("abc123")).unwrap(),
        b"earlier artifact"
    );
}

#[tokio::test]
async fn test_wrong_method() {
    let app = TestApp::new();
    let request = Request::builder()
        .method(Method::GET)
        .uri("/upload")
        .body(Body::empty())
        .unwrap();

    let (status, response) = app.send(request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body_text(response).await, "Method not allowed");
}

// ============================================================================
// Cross-origin handling
// ============================================================================

#[tokio::test]
async fn test_options_short_circuits() {
    let app = TestApp::new();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/upload")
        .body(Body::empty())
        .unwrap();

    let (status, response) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);

    let headers = response.headers().clone();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_METHODS],
        "GET, POST, PUT, DELETE, OPTIONS"
    );
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    assert!(body_text(response).await.is_empty());
}

#[tokio::test]
async fn test_cors_headers_on_errors() {
    let app = TestApp::new();
    let (status, response) = app.send(multipart_request(&[Part::chunk(b"data")])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}
