//! Request and response shapes for the `/query` surface.

use maktaba::{Error, Result};
use maktaba_milvus::{Ranker, SearchHit};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_top_k() -> usize {
    15
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    8000
}

fn default_reranker() -> String {
    "Weighted".to_string()
}

fn default_reranker_params() -> Vec<Value> {
    vec![Value::from(1.0), Value::from(1.0)]
}

/// `POST /query` body.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_reranker")]
    pub reranker: String,
    #[serde(default = "default_reranker_params")]
    pub reranker_params: Vec<Value>,
}

impl QueryRequest {
    /// Validate the request and build the fusion ranker. Runs before
    /// any upstream call.
    pub fn validate(&self) -> Result<Ranker> {
        let query = self.query.trim();
        if query.is_empty() {
            return Err(Error::validation("query must not be empty"));
        }
        if self.top_k == 0 || self.top_k > 100 {
            return Err(Error::validation("top_k must be in 1..=100"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::validation("temperature must be in [0, 2]"));
        }
        if self.max_tokens == 0 || self.max_tokens > 65_536 {
            return Err(Error::validation("max_tokens must be in 1..=65536"));
        }
        Ranker::from_request(&self.reranker, &self.reranker_params)
    }
}

/// One retrieved source, as returned to clients and fed to the answer
/// model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceData {
    pub distance: f32,
    pub id: i64,
    pub book_id: i64,
    pub book_name: String,
    pub order: i64,
    pub author: String,
    pub category: String,
    pub part_title: String,
    pub start_page_id: i64,
    pub page_offset: i64,
    pub page_num_range: Vec<i64>,
    pub text: String,
}

impl SourceData {
    /// Build from a fused search hit, defaulting absent fields.
    #[must_use]
    pub fn from_hit(hit: &SearchHit) -> Self {
        Self {
            distance: hit.distance,
            id: hit.get_i64("id").unwrap_or_default(),
            book_id: hit.get_i64("book_id").unwrap_or_default(),
            book_name: hit.get_str("book_name").unwrap_or_default().to_string(),
            order: hit.get_i64("order").unwrap_or_default(),
            author: hit.get_str("author").unwrap_or_default().to_string(),
            category: hit.get_str("category").unwrap_or_default().to_string(),
            part_title: hit.get_str("part_title").unwrap_or_default().to_string(),
            start_page_id: hit.get_i64("start_page_id").unwrap_or_default(),
            page_offset: hit.get_i64("page_offset").unwrap_or_default(),
            page_num_range: hit
                .fields
                .get("page_num_range")
                .and_then(Value::as_array)
                .map(|values| values.iter().filter_map(Value::as_i64).collect())
                .unwrap_or_default(),
            text: hit.get_str("text").unwrap_or_default().to_string(),
        }
    }
}

/// Non-streaming `/query` response.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub response: String,
    pub sources: Vec<SourceData>,
    pub optimized_query: String,
    pub subqueries: Vec<String>,
    pub request_id: String,
}

/// First NDJSON line of a streaming response.
#[derive(Debug, Clone, Serialize)]
pub struct StreamMetadataChunk<'a> {
    pub r#type: &'static str,
    pub sources: &'a [SourceData],
    pub optimized_query: &'a str,
    pub subqueries: &'a [String],
    pub request_id: &'a str,
}

/// Incremental NDJSON line carrying a piece of the answer.
#[derive(Debug, Clone, Serialize)]
pub struct StreamContentChunk<'a> {
    pub r#type: &'static str,
    pub delta: &'a str,
}

/// Terminal NDJSON line.
#[derive(Debug, Clone, Serialize)]
pub struct StreamDoneChunk {
    pub r#type: &'static str,
}

/// Error body shared by both services.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub request_id: String,
    pub timestamp: String,
}

/// Health/readiness body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub version: &'static str,
}

impl HealthResponse {
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            status: "healthy",
            timestamp: maktaba::now_utc_string(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    #[must_use]
    pub fn ready() -> Self {
        Self {
            status: "ready",
            timestamp: maktaba::now_utc_string(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
