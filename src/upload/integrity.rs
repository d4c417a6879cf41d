//! Whole-file integrity verification
//!
//! The default digest is MD5, matching the `file_md5` fingerprint clients
//! send. It detects accidental corruption only; deployments that need tamper
//! resistance switch to SHA-256 without changing the verifier's interface.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use super::types::UploadError;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Digest used to fingerprint assembled files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    fn hasher(self) -> Hasher {
        match self {
            Self::Md5 => Hasher::Md5(md5::Context::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    /// Lowercase hex digest of an in-memory buffer
    pub fn digest_bytes(self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finish()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => f.write_str("md5"),
            Self::Sha256 => f.write_str("sha256"),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(format!("unknown digest algorithm: {}", other)),
        }
    }
}

enum Hasher {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(ctx) => ctx.consume(data),
            Self::Sha256(hasher) => hasher.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            Self::Md5(ctx) => format!("{:x}", ctx.compute()),
            Self::Sha256(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

/// Computes and checks digests of assembled artifacts
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityVerifier {
    algorithm: DigestAlgorithm,
}

impl IntegrityVerifier {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Stream the file at `path` through the digest
    pub async fn digest(&self, path: &Path) -> Result<String, UploadError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(UploadError::storage(format!(
                "Failed to open {} for verification",
                path.display()
            )))?;

        let mut hasher = self.algorithm.hasher();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(UploadError::storage(format!(
                    "Failed to read {} for verification",
                    path.display()
                )))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(hasher.finish())
    }

    /// Check the digest of `path` against `expected` (hex, case-insensitive)
    pub async fn verify(&self, path: &Path, expected: &str) -> Result<(), UploadError> {
        let actual = self.digest(path).await?;
        if actual.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(UploadError::IntegrityMismatch {
                expected: expected.to_string(),
                actual,
            })
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
