//! Chunked Upload Server Library
//!
//! Clients split a file into numbered chunks and post them independently, in
//! any order and with retries. The server stores each chunk once, counts
//! progress per file fingerprint, and when the last chunk lands reassembles
//! the file and checks it against the fingerprint.
//!
//! # Modules
//!
//! - `upload`: chunk storage, progress tracking, merging and verification
//! - `routes`: axum router for `/upload`, `/health` and the landing page
//! - `config`: environment-driven configuration
//! - `state`: shared application state

pub mod config;
pub mod routes;
pub mod state;
pub mod upload;
