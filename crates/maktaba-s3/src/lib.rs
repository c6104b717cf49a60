//! Object store adapter for S3-compatible storage.
//!
//! One bucket holds everything the platform persists durably, under a
//! stable key layout:
//!
//! - `raw/<book_id>/<filename>`: one object per exported HTML page
//! - `metadata/<book_id>.json`: the processed metadata document
//! - `embeddings/<book_id>.jsonl`: one JSON record per embedded chunk
//!
//! Public URLs are `https://<bucket>.<endpoint_host>/<key>`, the
//! Backblaze-B2 style virtual-host form.

mod keys;
mod store;
mod zip_bundle;

pub use keys::{embeddings_key, metadata_key, raw_key, raw_prefix};
pub use store::{ObjectStore, S3Config};
pub use zip_bundle::build_zip;
