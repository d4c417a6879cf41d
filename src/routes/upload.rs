//! Upload Routes
//!
//! `POST /upload` accepts a multipart body with a `json` metadata field and a
//! `chunk` payload field. When the metadata arrives first the payload is
//! streamed straight into the chunk store; otherwise it is buffered until the
//! metadata shows up.

use std::io;

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    response::{IntoResponse, Response},
    routing::{post, MethodRouter},
    Json,
};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;

use crate::state::AppState;
use crate::upload::{UploadError, UploadInfo, UploadResponse};

// ============================================================================
// Error Response
// ============================================================================

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Upload failed");
        } else {
            tracing::warn!(error = %self, "Upload rejected");
        }

        (status, self.to_string()).into_response()
    }
}

impl From<MultipartError> for UploadError {
    fn from(e: MultipartError) -> Self {
        UploadError::BadRequest(format!("Failed to parse form: {}", e.body_text()))
    }
}

/// A chunk stream that broke inside the multipart parser is a malformed
/// request, not a storage failure
fn blame_request_body(error: UploadError) -> UploadError {
    if let UploadError::StorageFault { source, .. } = &error {
        if let Some(e) = source
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<MultipartError>())
        {
            return UploadError::BadRequest(format!("Failed to parse form: {}", e.body_text()));
        }
    }
    error
}

// ============================================================================
// Router
// ============================================================================

/// Method router for `/upload`; anything but POST is rejected
pub fn route() -> MethodRouter<AppState> {
    post(upload).fallback(method_not_allowed)
}

async fn method_not_allowed() -> UploadError {
    UploadError::MethodNotAllowed
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /upload
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, UploadError> {
    let coordinator = state.coordinator();
    let mut info: Option<UploadInfo> = None;
    let mut buffered = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "json" => {
                let text = field.text().await?;
                let parsed: UploadInfo = serde_json::from_str(&text).map_err(|e| {
                    UploadError::BadRequest(format!("Invalid JSON metadata: {}", e))
                })?;
                tracing::debug!(?parsed, "Parsed upload metadata");
                info = Some(parsed);
            }
            "chunk" => match info.take() {
                Some(info) => {
                    let request = info.validate()?;
                    let reader =
                        StreamReader::new(field.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));
                    tokio::pin!(reader);
                    let outcome = coordinator
                        .handle_chunk(&request, reader)
                        .await
                        .map_err(blame_request_body)?;
                    return Ok(Json(outcome.into()));
                }
                None => buffered = Some(field.bytes().await?),
            },
            _ => {}
        }
    }

    let info = info.ok_or_else(|| UploadError::BadRequest("Missing JSON metadata".to_string()))?;
    let chunk = buffered
        .ok_or_else(|| UploadError::BadRequest("Missing chunk field".to_string()))?;
    let request = info.validate()?;

    let outcome = coordinator
        .handle_chunk(&request, io::Cursor::new(chunk))
        .await?;
    Ok(Json(outcome.into()))
}
