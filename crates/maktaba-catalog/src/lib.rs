//! Read-only access to the embedded catalogue database.
//!
//! The catalogue is a SQLite file produced by the upstream crawler. It
//! holds `category`, `author`, `book`, and `author_book` tables; this
//! crate only ever reads it. The operational relational store is a
//! separate adapter (`maktaba-postgres`) and the two never share a
//! connection.
//!
//! All queries are synchronous; async callers wrap them in
//! `tokio::task::spawn_blocking`. A fresh read-only connection is opened
//! per call, which keeps the store `Send + Sync + Clone` without
//! connection pooling.

mod store;
mod types;

pub use store::CatalogStore;
pub use types::{BookFilter, CatalogAuthor, CatalogBook, CatalogCategory};
