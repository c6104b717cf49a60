//! Remote dense embedder over a BGE-M3 inference endpoint.

use std::time::Duration;

use async_trait::async_trait;
use maktaba::types::SparseVector;
use maktaba::{with_retry_if, Error, Result, RetryPolicy};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{DenseEmbedder, ProgressFn};

/// The inference endpoint used in production deployments.
pub const DEFAULT_EMBEDDINGS_API_URL: &str =
    "https://api.deepinfra.com/v1/inference/BAAI/bge-m3-multi";

/// Texts per request; the endpoint times out on larger payloads.
const MAX_BATCH_SIZE: usize = 100;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP client for the embedding endpoint.
///
/// Retries up to three times with exponential backoff starting at five
/// seconds, and only on timeouts and dropped connections; a 4xx from
/// the endpoint surfaces immediately.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    batch_size: usize,
    retry_policy: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
    dense: bool,
    sparse: bool,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
    /// Full-vocabulary sparse rows; nonzero entries become the sparse
    /// vector.
    #[serde(default)]
    sparse: Option<Vec<Vec<f32>>>,
}

impl RemoteEmbedder {
    #[must_use]
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            batch_size: MAX_BATCH_SIZE,
            retry_policy: RetryPolicy::exponential(3).with_initial_delay(Duration::from_secs(5)),
        }
    }

    /// Lower the batch size (it is capped at the endpoint limit).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    async fn call(&self, texts: &[String], want_sparse: bool) -> Result<EmbedResponse> {
        let request = EmbedRequest {
            inputs: texts,
            dense: true,
            sparse: want_sparse,
        };

        let response = with_retry_if(&self.retry_policy, Error::is_transient, || async {
            let response = self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
                .map_err(classify_transport_error)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::api(format!(
                    "embedding endpoint returned {status}: {body}"
                )));
            }
            response
                .json::<EmbedResponse>()
                .await
                .map_err(|e| Error::api(format!("embedding response parse failed: {e}")))
        })
        .await?;

        if response.embeddings.len() != texts.len() {
            return Err(Error::api(format!(
                "embedding endpoint returned {} vectors for {} inputs",
                response.embeddings.len(),
                texts.len()
            )));
        }
        Ok(response)
    }

    /// Embed a query, returning its dense and sparse sides together.
    pub async fn embed_query(&self, text: &str) -> Result<(Vec<f32>, SparseVector)> {
        let texts = vec![text.to_string()];
        let mut response = self.call(&texts, true).await?;

        let dense = response
            .embeddings
            .pop()
            .ok_or_else(|| Error::api("embedding endpoint returned no vectors"))?;
        let sparse = response
            .sparse
            .and_then(|mut rows| rows.pop())
            .map(|row| densify_to_sparse(&row))
            .unwrap_or_default();
        Ok((dense, sparse))
    }
}

#[async_trait]
impl DenseEmbedder for RemoteEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let response = self.call(batch, false).await?;
            all.extend(response.embeddings);
            debug!(embedded = all.len(), total = texts.len(), "Embedding progress");
            if let Some(progress) = progress {
                progress(all.len());
            }
        }

        Ok(all)
    }
}

fn classify_transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        Error::timeout(format!("embedding request failed: {err}"))
    } else {
        Error::api(format!("embedding request failed: {err}"))
    }
}

/// Convert a full-vocabulary row into `{index: weight}` over its
/// nonzero entries.
fn densify_to_sparse(row: &[f32]) -> SparseVector {
    row.iter()
        .enumerate()
        .filter(|(_, &weight)| weight != 0.0)
        .map(|(index, &weight)| (index as u32, weight))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn embedder_for(server: &MockServer) -> RemoteEmbedder {
        RemoteEmbedder::new(format!("{}/embed", server.uri()), "test-key")
    }

    #[test]
    fn test_densify_to_sparse() {
        let sparse = densify_to_sparse(&[0.0, 0.5, 0.0, 1.25]);
        assert_eq!(sparse.len(), 2);
        assert_eq!(sparse.0.get(&1), Some(&0.5));
        assert_eq!(sparse.0.get(&3), Some(&1.25));
    }

    #[tokio::test]
    async fn test_embed_batches_and_reports_progress() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(|req: &Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                let n = body["inputs"].as_array().unwrap().len();
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "embeddings": vec![vec![0.1f32; 4]; n],
                }))
            })
            .expect(2)
            .mount(&server)
            .await;

        let embedder = embedder_for(&server).with_batch_size(2);
        let texts: Vec<String> = (0..3).map(|i| format!("نص {i}")).collect();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let progress = move |n: usize| {
            seen_clone.store(n, Ordering::SeqCst);
        };

        let vectors = embedder.embed(&texts, Some(&progress)).await.unwrap();
        assert_eq!(vectors.len(), 3);
        // The last progress report covers every text.
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_embed_query_returns_both_sides() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .and(body_partial_json(serde_json::json!({ "sparse": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2]],
                "sparse": [[0.0, 0.7, 0.0]],
            })))
            .mount(&server)
            .await;

        let embedder = embedder_for(&server);
        let (dense, sparse) = embedder.embed_query("ما حكم الوضوء؟").await.unwrap();
        assert_eq!(dense, vec![0.1, 0.2]);
        assert_eq!(sparse.0.get(&1), Some(&0.7));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = embedder_for(&server);
        let err = embedder
            .embed(&["x".to_string()], None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn test_vector_count_mismatch_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1]],
            })))
            .mount(&server)
            .await;

        let embedder = embedder_for(&server);
        let err = embedder
            .embed(&["a".to_string(), "b".to_string()], None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2 inputs"));
    }
}
