//! Milvus vector store adapter.
//!
//! Talks to Milvus over its v2 RESTful API. The gRPC Rust SDK predates
//! sparse vectors and hybrid search, and this collection needs both, so
//! the adapter drives the HTTP surface directly with `reqwest`.
//!
//! The collection schema and index definitions are side-car JSON
//! documents under `schema/`; defaults are bundled into the binary and
//! can be overridden by path at startup.
//!
//! # Example
//!
//! ```rust,no_run
//! use maktaba_milvus::{MilvusConfig, MilvusStore};
//!
//! # async fn example() -> maktaba::Result<()> {
//! let store = MilvusStore::connect(MilvusConfig {
//!     uri: "http://localhost:19530".into(),
//!     token: None,
//!     collection: "islamic_library".into(),
//!     schema_path: None,
//!     index_params_path: None,
//! })?;
//! store.ensure_collection().await?;
//! store.ensure_partition("_default").await?;
//! # Ok(())
//! # }
//! ```

mod ranker;
mod search;
mod store;

pub use ranker::Ranker;
pub use search::{HybridSearchRequest, SearchEmbedding, SearchHit, OUTPUT_FIELDS};
pub use store::{MilvusConfig, MilvusStore, MAX_TEXT_LENGTH, UPSERT_BATCH_SIZE};
