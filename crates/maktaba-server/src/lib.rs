//! The export service: catalogue browsing, export jobs, deletes, and
//! ZIP downloads over one axum app.

pub mod models;
pub mod server;

pub use server::{build_router, AppState};
