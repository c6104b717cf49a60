//! The query-side service: rewrite, retrieve, answer.
//!
//! `POST /query` runs the full pipeline: query rewriting against an
//! LLM, dense+sparse embedding of the optimized query, hybrid search
//! over the vector store, and a final grounded answer, streamed back as
//! newline-delimited JSON when requested.

pub mod ask;
pub mod categories;
pub mod gemini;
pub mod models;
pub mod rewriter;
pub mod server;

pub use server::{build_router, AppState};
