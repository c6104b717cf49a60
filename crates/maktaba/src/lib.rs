//! Core types for the Maktaba book export and retrieval platform.
//!
//! This crate holds everything the adapter and service crates share:
//!
//! - [`Error`] / [`Result`]: the workspace-wide error taxonomy
//! - [`retry`]: exponential-backoff retry for upstream calls
//! - [`config`]: environment-based configuration helpers
//! - [`types`]: the domain model (processed books, pages, chunks)
//!
//! Adapter crates (`maktaba-s3`, `maktaba-milvus`, …) return
//! [`Result`] directly rather than wrapping their own error enums; the
//! HTTP layers map [`ErrorKind`] onto status codes.

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use retry::{with_retry, with_retry_if, RetryPolicy};

/// Format the current UTC time the way job records and error bodies expect.
///
/// Example output: `2025-03-14 09:26:53 UTC`.
#[must_use]
pub fn now_utc_string() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
