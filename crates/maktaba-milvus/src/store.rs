//! The REST client for collection management, upserts, and search.

use std::path::PathBuf;

use maktaba::types::{chunk_primary_id, EmbeddedChunk};
use maktaba::{Error, Result};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::search::{HybridSearchRequest, SearchHit};

/// Milvus VARCHAR ceiling for the `text` field, in characters.
pub const MAX_TEXT_LENGTH: usize = 65_535;

/// Records per upsert request.
pub const UPSERT_BATCH_SIZE: usize = 12_000;

const DEFAULT_FIELDS: &str = include_str!("../schema/collection_fields.json");
const DEFAULT_INDEX_PARAMS: &str = include_str!("../schema/index_params.json");

/// Connection settings for the vector store.
#[derive(Debug, Clone)]
pub struct MilvusConfig {
    /// Base URI, e.g. `http://localhost:19530`.
    pub uri: String,
    pub token: Option<String>,
    pub collection: String,
    /// Override the bundled collection field definitions.
    pub schema_path: Option<PathBuf>,
    /// Override the bundled index definitions.
    pub index_params_path: Option<PathBuf>,
}

/// Vector store adapter over the Milvus v2 RESTful API.
#[derive(Clone)]
pub struct MilvusStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    collection: String,
    fields: Value,
    index_params: Value,
}

impl MilvusStore {
    /// Build the client and load the side-car schema documents. No
    /// network traffic happens here; `ensure_collection` does the first
    /// round-trip.
    pub fn connect(config: MilvusConfig) -> Result<Self> {
        if config.uri.is_empty() {
            return Err(Error::config("Milvus URI is required"));
        }

        let fields = load_sidecar(config.schema_path.as_deref(), DEFAULT_FIELDS)?;
        let index_params = load_sidecar(config.index_params_path.as_deref(), DEFAULT_INDEX_PARAMS)?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config.uri.trim_end_matches('/').to_string(),
            token: config.token,
            collection: config.collection,
            fields,
            index_params,
        })
    }

    #[must_use]
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::storage(format!("Milvus request to {path} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api(format!("Milvus returned {status}: {text}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::api(format!("Milvus response parse failed: {e}")))?;
        let code = payload.get("code").and_then(Value::as_i64).unwrap_or(0);
        if code != 0 {
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(Error::api(format!("Milvus error {code}: {message}")));
        }
        Ok(payload)
    }

    // ============== Collection management ==============

    pub async fn has_collection(&self) -> Result<bool> {
        let payload = self
            .post(
                "/v2/vectordb/collections/has",
                json!({ "collectionName": self.collection }),
            )
            .await?;
        Ok(payload["data"]["has"].as_bool().unwrap_or(false))
    }

    /// Create the collection from the side-car schema when it does not
    /// already exist.
    pub async fn ensure_collection(&self) -> Result<()> {
        if self.has_collection().await? {
            debug!(collection = %self.collection, "Collection already exists");
            return Ok(());
        }

        info!(collection = %self.collection, "Creating collection");
        self.post(
            "/v2/vectordb/collections/create",
            json!({
                "collectionName": self.collection,
                "schema": {
                    "autoId": false,
                    "enableDynamicField": true,
                    "fields": self.fields,
                },
                "indexParams": self.index_params,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn list_partitions(&self) -> Result<Vec<String>> {
        let payload = self
            .post(
                "/v2/vectordb/partitions/list",
                json!({ "collectionName": self.collection }),
            )
            .await?;
        let partitions = payload["data"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(partitions)
    }

    pub async fn ensure_partition(&self, partition: &str) -> Result<()> {
        if self.list_partitions().await?.iter().any(|p| p == partition) {
            return Ok(());
        }
        info!(partition, "Creating partition");
        self.post(
            "/v2/vectordb/partitions/create",
            json!({
                "collectionName": self.collection,
                "partitionName": partition,
            }),
        )
        .await?;
        Ok(())
    }

    // ============== Upsert and delete ==============

    /// Upsert embedded chunks in batches. Idempotent under retry: the
    /// primary keys are deterministic, so a replayed batch replaces
    /// rather than duplicates.
    pub async fn upsert_chunks(&self, chunks: &[EmbeddedChunk], partition: &str) -> Result<usize> {
        self.upsert_chunks_batched(chunks, partition, UPSERT_BATCH_SIZE)
            .await
    }

    pub async fn upsert_chunks_batched(
        &self,
        chunks: &[EmbeddedChunk],
        partition: &str,
        batch_size: usize,
    ) -> Result<usize> {
        if chunks.is_empty() {
            warn!("No chunks to upsert");
            return Ok(0);
        }

        self.ensure_collection().await?;
        self.ensure_partition(partition).await?;

        let book_id = chunks[0].chunk.book_id;
        info!(
            book_id,
            total_chunks = chunks.len(),
            partition,
            "Starting vector store upsert"
        );

        let mut total = 0usize;
        for batch in chunks.chunks(batch_size.max(1)) {
            let records: Vec<Value> = batch.iter().map(prepare_record).collect();
            self.post(
                "/v2/vectordb/entities/upsert",
                json!({
                    "collectionName": self.collection,
                    "partitionName": partition,
                    "data": records,
                }),
            )
            .await?;
            total += batch.len();
            debug!(book_id, batch_size = batch.len(), total_so_far = total, "Upserted batch");
        }

        info!(book_id, total_upserted = total, "Vector store upsert completed");
        Ok(total)
    }

    /// Delete every chunk of one book. Returns false (without error)
    /// when the collection does not exist or the delete is rejected.
    pub async fn delete_by_book_id(&self, book_id: i64, partition: &str) -> Result<bool> {
        if !self.has_collection().await? {
            debug!(book_id, "Collection does not exist, nothing to delete");
            return Ok(false);
        }

        let result = self
            .post(
                "/v2/vectordb/entities/delete",
                json!({
                    "collectionName": self.collection,
                    "partitionName": partition,
                    "filter": format!("book_id == {book_id}"),
                }),
            )
            .await;

        match result {
            Ok(_) => {
                info!(book_id, partition, "Deleted book chunks from vector store");
                Ok(true)
            }
            Err(e) => {
                warn!(book_id, error = %e, "Failed to delete book from vector store");
                Ok(false)
            }
        }
    }

    // ============== Hybrid search ==============

    /// Run a hybrid dense+sparse search per embedding and return the
    /// fused rows, flattened across embeddings. Validation must have
    /// happened before this call.
    pub async fn hybrid_search(&self, request: &HybridSearchRequest) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();

        for embedding in &request.embeddings {
            let body = json!({
                "collectionName": self.collection,
                "partitionNames": request.partition_names,
                "search": [
                    {
                        "data": [&embedding.dense],
                        "annsField": "dense_vector",
                        "limit": request.k,
                        "params": { "nprobe": embedding.n_probe },
                    },
                    {
                        "data": [&embedding.sparse],
                        "annsField": "sparse_vector",
                        "limit": request.k,
                        "params": { "drop_ratio_search": embedding.drop_ratio_search },
                    },
                ],
                "rerank": request.ranker.to_rerank_clause(),
                "limit": request.k,
                "outputFields": request.output_fields,
            });

            let payload = self.post("/v2/vectordb/entities/advanced_search", body).await?;
            if let Some(rows) = payload["data"].as_array() {
                for row in rows {
                    let hit: SearchHit = serde_json::from_value(row.clone())
                        .map_err(|e| Error::api(format!("malformed search hit: {e}")))?;
                    hits.push(hit);
                }
            }
        }

        debug!(hit_count = hits.len(), "Hybrid search completed");
        Ok(hits)
    }
}

fn load_sidecar(path: Option<&std::path::Path>, bundled: &str) -> Result<Value> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?,
        None => bundled.to_string(),
    };
    serde_json::from_str(&raw)
        .map_err(|e| Error::config(format!("invalid schema side-car document: {e}")))
}

/// Truncate to a character count, never splitting a code point.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

fn prepare_record(chunk: &EmbeddedChunk) -> Value {
    let c = &chunk.chunk;
    json!({
        "id": chunk_primary_id(c.book_id, c.order),
        "book_id": c.book_id,
        "book_name": &c.book_name,
        "order": c.order,
        "author": &c.author,
        "category": &c.category,
        "part_title": c.part_title.as_deref().unwrap_or_default(),
        "start_page_id": c.start_page_id.unwrap_or(0),
        "page_offset": c.page_offset.unwrap_or(0),
        "page_num_range": c.page_num_range.unwrap_or([0, 0]),
        "text": truncate_chars(&c.text, MAX_TEXT_LENGTH),
        "dense_vector": &chunk.dense_vector,
        "sparse_vector": &chunk.sparse_vector,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranker::Ranker;
    use crate::search::SearchEmbedding;
    use maktaba::types::{MatchedChunk, SparseVector};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_chunk(book_id: i64, order: i64) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: MatchedChunk {
                order,
                book_id,
                book_name: "Example".into(),
                author: "النووي".into(),
                category: "الفقه".into(),
                text: "نص التجربة".into(),
                part_title: Some("الجزء الأول".into()),
                start_page_id: Some(1),
                page_offset: Some(0),
                page_num_range: Some([3, 4]),
            },
            dense_vector: vec![0.1; 4],
            sparse_vector: [(2u32, 0.4f32)].into_iter().collect::<SparseVector>(),
        }
    }

    async fn store_for(server: &MockServer) -> MilvusStore {
        MilvusStore::connect(MilvusConfig {
            uri: server.uri(),
            token: None,
            collection: "islamic_library".into(),
            schema_path: None,
            index_params_path: None,
        })
        .unwrap()
    }

    fn ok_body(data: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": data }))
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("abc", 10), "abc");
        // Arabic letters are multi-byte; count characters, not bytes.
        assert_eq!(truncate_chars("سلام", 2), "سل");
    }

    #[test]
    fn test_prepare_record_shape() {
        let record = prepare_record(&sample_chunk(42, 7));
        assert_eq!(record["id"], 420_000_007_i64);
        assert_eq!(record["order"], 7);
        assert_eq!(record["page_num_range"], json!([3, 4]));
        assert_eq!(record["sparse_vector"], json!({ "2": 0.4 }));
    }

    #[test]
    fn test_prepare_record_defaults_missing_pages() {
        let mut chunk = sample_chunk(1, 0);
        chunk.chunk.start_page_id = None;
        chunk.chunk.page_offset = None;
        chunk.chunk.page_num_range = None;
        chunk.chunk.part_title = None;
        let record = prepare_record(&chunk);
        assert_eq!(record["start_page_id"], 0);
        assert_eq!(record["page_num_range"], json!([0, 0]));
        assert_eq!(record["part_title"], "");
    }

    #[tokio::test]
    async fn test_ensure_collection_creates_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/has"))
            .respond_with(ok_body(json!({ "has": false })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/create"))
            .and(body_partial_json(json!({ "collectionName": "islamic_library" })))
            .respond_with(ok_body(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        store.ensure_collection().await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_collection_skips_when_present() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/has"))
            .respond_with(ok_body(json!({ "has": true })))
            .mount(&server)
            .await;
        // No create mock mounted: a create call would 404 and error.
        let store = store_for(&server).await;
        store.ensure_collection().await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_batches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/has"))
            .respond_with(ok_body(json!({ "has": true })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/partitions/list"))
            .respond_with(ok_body(json!(["_default"])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/upsert"))
            .respond_with(ok_body(json!({ "upsertCount": 2 })))
            .expect(2)
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let chunks: Vec<_> = (0..3).map(|i| sample_chunk(42, i)).collect();
        let total = store
            .upsert_chunks_batched(&chunks, "_default", 2)
            .await
            .unwrap();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_collection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/has"))
            .respond_with(ok_body(json!({ "has": false })))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        assert!(!store.delete_by_book_id(42, "_default").await.unwrap());
    }

    #[tokio::test]
    async fn test_hybrid_search_sends_rerank_and_parses_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/advanced_search"))
            .and(body_partial_json(json!({
                "rerank": { "strategy": "weighted" },
                "limit": 5,
            })))
            .respond_with(ok_body(json!([
                { "distance": 0.91, "book_id": 42, "book_name": "Example", "text": "نص" },
                { "distance": 0.80, "book_id": 43, "book_name": "Other", "text": "آخر" },
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let request = HybridSearchRequest {
            embeddings: vec![SearchEmbedding::new(vec![0.1; 4], SparseVector::new())],
            k: 5,
            ranker: Ranker::Weighted { dense: 0.5, sparse: 0.5 },
            partition_names: vec![],
            output_fields: vec!["book_id".into(), "book_name".into(), "text".into()],
        };
        let hits = store.hybrid_search(&request).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].get_i64("book_id"), Some(42));
        assert!(hits[0].distance > hits[1].distance);
    }

    #[tokio::test]
    async fn test_api_error_code_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/has"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 1100,
                "message": "collection name is invalid",
            })))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let err = store.has_collection().await.unwrap_err();
        assert!(err.to_string().contains("1100"));
    }
}
