//! Environment-based configuration helpers.
//!
//! Services read their configuration from the environment at startup and
//! fail fast on missing required values. The helpers here keep the call
//! sites short; the per-service config structs live next to the binaries
//! that use them.

use std::str::FromStr;

use crate::error::{Error, Result};

/// Read an environment variable, treating empty strings as unset.
#[must_use]
pub fn env_string(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

/// Read a required environment variable.
pub fn env_required(name: &str) -> Result<String> {
    env_string(name)
        .ok_or_else(|| Error::config(format!("{name} environment variable is required")))
}

/// Read and parse an environment variable, falling back to `default`
/// when unset. Unparseable values are an error rather than silently
/// ignored.
pub fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env_string(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::config(format!("{name} has an invalid value: {raw}"))),
        None => Ok(default),
    }
}

/// Well-known environment variable names shared by the services.
pub mod env_vars {
    pub const CATALOG_DB_PATH: &str = "CATALOG_DB_PATH";

    pub const S3_ENDPOINT: &str = "S3_ENDPOINT";
    pub const S3_ACCESS_KEY: &str = "S3_ACCESS_KEY";
    pub const S3_SECRET_KEY: &str = "S3_SECRET_KEY";
    pub const S3_BUCKET: &str = "S3_BUCKET";

    pub const POSTGRES_URL: &str = "POSTGRES_URL";

    pub const MILVUS_URI: &str = "MILVUS_URI";
    pub const MILVUS_TOKEN: &str = "MILVUS_TOKEN";
    pub const MILVUS_COLLECTION: &str = "MILVUS_COLLECTION";
    pub const MILVUS_PARTITION: &str = "MILVUS_PARTITION";

    pub const EMBEDDINGS_API_URL: &str = "EMBEDDINGS_API_URL";
    pub const EMBEDDINGS_API_KEY: &str = "EMBEDDINGS_API_KEY";

    pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";

    pub const EXPORT_SCRIPT: &str = "EXPORT_SCRIPT";
    pub const EXPORT_WORKERS: &str = "EXPORT_WORKERS";

    pub const ALLOWED_ORIGINS: &str = "ALLOWED_ORIGINS";
}
