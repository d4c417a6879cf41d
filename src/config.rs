//! Configuration management for the upload server

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::upload::DigestAlgorithm;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Holds one chunk directory per fingerprint plus the assembled files
    pub root: PathBuf,
    /// Landing page served at `/`
    pub index_file: PathBuf,
    pub max_request_bytes: usize,
    pub cleanup_grace: Duration,
    pub digest: DigestAlgorithm,
    pub chunk_backend: ChunkBackend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkBackend {
    Local,
    Memory,
}

impl FromStr for ChunkBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown chunk backend: {}", other)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            upload: UploadConfig {
                root: PathBuf::from("./uploads"),
                index_file: PathBuf::from("static/index.html"),
                max_request_bytes: 64 * 1024 * 1024,
                cleanup_grace: Duration::from_millis(500),
                digest: DigestAlgorithm::Md5,
                chunk_backend: ChunkBackend::Local,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source, defaulting unset keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var(&lookup, "SERVER_PORT")?.unwrap_or(defaults.server.port),
            },
            upload: UploadConfig {
                root: lookup("UPLOAD_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.upload.root),
                index_file: lookup("UPLOAD_INDEX_FILE")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.upload.index_file),
                max_request_bytes: parse_var(&lookup, "UPLOAD_MAX_REQUEST_BYTES")?
                    .unwrap_or(defaults.upload.max_request_bytes),
                cleanup_grace: parse_var::<u64, _>(&lookup, "UPLOAD_CLEANUP_GRACE_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.upload.cleanup_grace),
                digest: parse_var(&lookup, "UPLOAD_DIGEST")?.unwrap_or(defaults.upload.digest),
                chunk_backend: parse_var(&lookup, "UPLOAD_CHUNK_BACKEND")?
                    .unwrap_or(defaults.upload.chunk_backend),
            },
        })
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                name,
                value,
                reason: e.to_string(),
            }),
    }
}
