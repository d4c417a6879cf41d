//! Upload types for the chunked upload protocol

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// File Identity
// ============================================================================

/// Client-supplied content fingerprint naming one logical upload.
///
/// The fingerprint doubles as the name of the chunk container on disk, so it
/// is restricted to a single safe path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileIdentity(String);

impl FileIdentity {
    /// Parse a fingerprint, rejecting anything that is not a plain path component
    pub fn parse(raw: &str) -> Result<Self, UploadError> {
        if !is_plain_component(raw) || raw.starts_with('.') {
            return Err(UploadError::BadRequest(format!(
                "Invalid file_md5: {:?}",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_plain_component(raw: &str) -> bool {
    !raw.is_empty()
        && raw != "."
        && raw != ".."
        && !raw.contains(&['/', '\\', '\0'][..])
}

// ============================================================================
// Request Types
// ============================================================================

/// Metadata carried in the `json` multipart field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInfo {
    /// Name of the assembled file
    pub file_name: String,

    /// Fingerprint of the complete file
    pub file_md5: String,

    /// Index of the chunk carried by this request
    pub chunk_index: i64,

    /// Declared number of chunks
    pub chunk_total: i64,
}

impl UploadInfo {
    /// Validate the wire metadata before anything touches storage
    pub fn validate(self) -> Result<ChunkRequest, UploadError> {
        if self.chunk_total <= 0 {
            return Err(UploadError::BadRequest(format!(
                "chunk_total must be positive, got {}",
                self.chunk_total
            )));
        }
        if self.chunk_index < 0 || self.chunk_index >= self.chunk_total {
            return Err(UploadError::BadRequest(format!(
                "chunk_index {} out of range 0..{}",
                self.chunk_index, self.chunk_total
            )));
        }

        let identity = FileIdentity::parse(&self.file_md5)?;

        if !is_plain_component(&self.file_name) {
            return Err(UploadError::BadRequest(format!(
                "Invalid file_name: {:?}",
                self.file_name
            )));
        }
        if self.file_name == identity.as_str() {
            return Err(UploadError::BadRequest(
                "file_name must differ from file_md5".to_string(),
            ));
        }

        let chunk_index = usize::try_from(self.chunk_index)
            .map_err(|_| UploadError::BadRequest("chunk_index too large".to_string()))?;
        let chunk_total = usize::try_from(self.chunk_total)
            .map_err(|_| UploadError::BadRequest("chunk_total too large".to_string()))?;

        Ok(ChunkRequest {
            identity,
            file_name: self.file_name,
            chunk_index,
            chunk_total,
        })
    }
}

/// A validated chunk upload request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub identity: FileIdentity,
    pub file_name: String,
    pub chunk_index: usize,
    pub chunk_total: usize,
}

// ============================================================================
// Response Types
// ============================================================================

/// Result of handling one chunk request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Chunk stored (or already present); more chunks are expected
    InProgress { progress: usize },

    /// This request completed the file and the artifact passed verification
    Completed { progress: usize, bytes: u64 },
}

impl UploadOutcome {
    pub fn progress(&self) -> usize {
        match self {
            Self::InProgress { progress } | Self::Completed { progress, .. } => *progress,
        }
    }
}

/// JSON body returned for a chunk upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub progress: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UploadStatus>,
}

impl From<UploadOutcome> for UploadResponse {
    fn from(outcome: UploadOutcome) -> Self {
        match outcome {
            UploadOutcome::InProgress { progress } => Self {
                progress,
                status: None,
            },
            UploadOutcome::Completed { progress, .. } => Self {
                progress,
                status: Some(UploadStatus::Completed),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Completed,
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Storage error: {context}: {source}")]
    StorageFault {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing chunk {index} for {identity}")]
    MissingChunk { identity: String, index: usize },

    #[error("Integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
}

impl UploadError {
    /// Build a `map_err` adapter that wraps an I/O error with context
    pub fn storage(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| Self::StorageFault { context, source }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::StorageFault { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingChunk { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IntegrityMismatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn info(index: i64, total: i64) -> UploadInfo {
        UploadInfo {
            file_name: "report.pdf".to_string(),
            file_md5: "abc123".to_string(),
            chunk_index: index,
            chunk_total: total,
        }
    }

    #[test]
    fn test_validate_accepts_in_range() {
        let request = info(2, 3).validate().unwrap();
        assert_eq!(request.identity.as_str(), "abc123");
        assert_eq!(request.chunk_index, 2);
        assert_eq!(request.chunk_total, 3);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(matches!(info(3, 3).validate(), Err(UploadError::BadRequest(_))));
        assert!(matches!(info(-1, 3).validate(), Err(UploadError::BadRequest(_))));
        assert!(matches!(info(0, 0).validate(), Err(UploadError::BadRequest(_))));
    }

    #[test]
    fn test_validate_rejects_unsafe_names() {
        for bad in ["", ".", "..", "../etc", "a/b", ".hidden"] {
            let mut request = info(0, 1);
            request.file_md5 = bad.to_string();
            assert!(request.validate().is_err(), "fingerprint {:?} accepted", bad);
        }

        let mut request = info(0, 1);
        request.file_name = "../escape.bin".to_string();
        assert!(request.validate().is_err());

        let mut request = info(0, 1);
        request.file_name = "abc123".to_string();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_response_serialization() {
        let progress = serde_json::to_string(&UploadResponse::from(UploadOutcome::InProgress {
            progress: 2,
        }))
        .unwrap();
        assert_eq!(progress, r#"{"progress":2}"#);

        let done = serde_json::to_string(&UploadResponse::from(UploadOutcome::Completed {
            progress: 3,
            bytes: 15,
        }))
        .unwrap();
        assert_eq!(done, r#"{"progress":3,"status":"completed"}"#);
    }

    #[test]
    fn test_status_codes() {
        use axum::http::StatusCode;
        assert_eq!(
            UploadError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            UploadError::MissingChunk {
                identity: "abc".into(),
                index: 1
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
