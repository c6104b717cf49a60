//! The axum application: routes, middleware, and the `/query` pipeline.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use maktaba::{Error, ErrorKind, Result};
use maktaba_embeddings::RemoteEmbedder;
use maktaba_milvus::{HybridSearchRequest, MilvusStore, SearchEmbedding, OUTPUT_FIELDS};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::ask::AskClient;
use crate::models::{
    ErrorResponse, HealthResponse, QueryRequest, QueryResponse, SourceData, StreamContentChunk,
    StreamDoneChunk, StreamMetadataChunk,
};
use crate::rewriter::QueryRewriter;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Everything the handlers share.
pub struct AppState {
    pub rewriter: QueryRewriter,
    pub ask: AskClient,
    pub embedder: RemoteEmbedder,
    pub vectors: MilvusStore,
    /// Partition names fetched from the vector store at startup.
    pub partitions: Vec<String>,
}

/// Build the gateway router over shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/query", post(query_handler))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .with_state(state)
}

/// Ensure every request carries an id and echo it on the response.
async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(generate_request_id);

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
        let mut response = next.run(request).await;
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
        response
    } else {
        next.run(request).await
    }
}

fn generate_request_id() -> String {
    format!("req_{}", chrono::Utc::now().timestamp_millis())
}

fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(generate_request_id)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

async fn ready_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    match state.vectors.list_partitions().await {
        Ok(_) => Json(HealthResponse::ready()).into_response(),
        Err(err) => {
            let request_id = request_id_from(&headers);
            error!(error = %err, "Readiness check failed");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &format!("Service not ready: {err}"),
                &request_id,
            )
        }
    }
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Response {
    let request_id = request_id_from(&headers);
    match run_query(&state, request, &request_id).await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, request_id = %request_id, "Query pipeline failed");
            error_response(status_for(&err), &err.to_string(), &request_id)
        }
    }
}

async fn run_query(
    state: &Arc<AppState>,
    request: QueryRequest,
    request_id: &str,
) -> Result<Response> {
    // Validation happens before anything touches an upstream service.
    let ranker = request.validate()?;

    info!(query = %request.query, stream = request.stream, request_id, "Starting query pipeline");

    let rewritten = state.rewriter.rewrite(&request.query).await?;
    let subqueries = rewritten.sub_queries.clone().unwrap_or_default();

    let (dense, sparse) = state.embedder.embed_query(&rewritten.optimized_query).await?;

    let search = HybridSearchRequest {
        embeddings: vec![SearchEmbedding::new(dense, sparse)],
        k: request.top_k,
        ranker,
        partition_names: Vec::new(),
        output_fields: OUTPUT_FIELDS.iter().map(|f| (*f).to_string()).collect(),
    };
    search.validate(&state.partitions)?;

    let hits = state.vectors.hybrid_search(&search).await?;
    let sources: Vec<SourceData> = hits.iter().map(SourceData::from_hit).collect();
    info!(sources = sources.len(), request_id, "Retrieval complete");

    if request.stream {
        stream_response(state, request, rewritten.optimized_query, subqueries, sources, request_id)
            .await
    } else {
        let answer = state
            .ask
            .ask(&request.query, &sources, request.temperature, request.max_tokens)
            .await?;
        Ok(Json(QueryResponse {
            response: answer,
            sources,
            optimized_query: rewritten.optimized_query,
            subqueries,
            request_id: request_id.to_string(),
        })
        .into_response())
    }
}

async fn stream_response(
    state: &Arc<AppState>,
    request: QueryRequest,
    optimized_query: String,
    subqueries: Vec<String>,
    sources: Vec<SourceData>,
    request_id: &str,
) -> Result<Response> {
    let metadata_line = ndjson_line(&StreamMetadataChunk {
        r#type: "metadata",
        sources: &sources,
        optimized_query: &optimized_query,
        subqueries: &subqueries,
        request_id,
    })?;

    let mut deltas = state
        .ask
        .ask_stream(&request.query, &sources, request.temperature, request.max_tokens)
        .await?;

    let body_stream = async_stream::stream! {
        yield Ok::<Bytes, Infallible>(Bytes::from(metadata_line));
        while let Some(delta) = deltas.next().await {
            match delta {
                Ok(text) => {
                    let chunk = StreamContentChunk { r#type: "content", delta: &text };
                    if let Ok(line) = ndjson_line(&chunk) {
                        yield Ok(Bytes::from(line));
                    }
                }
                Err(err) => {
                    error!(error = %err, "Answer stream broke mid-flight");
                    break;
                }
            }
        }
        if let Ok(line) = ndjson_line(&StreamDoneChunk { r#type: "done" }) {
            yield Ok(Bytes::from(line));
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(body_stream))
        .map_err(|e| Error::other(format!("failed to build streaming response: {e}")))
}

fn ndjson_line<T: serde::Serialize>(value: &T) -> Result<String> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

fn status_for(err: &Error) -> StatusCode {
    match err.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Storage => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = ErrorResponse {
        error: message.to_string(),
        request_id: request_id.to_string(),
        timestamp: maktaba::now_utc_string(),
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::GeminiClient;
    use axum::body::to_bytes;
    use axum::http::Request as HttpRequest;
    use maktaba_milvus::MilvusConfig;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn state_with_mocks(server: &MockServer) -> Arc<AppState> {
        let gemini =
            GeminiClient::new("key", "gemini-2.5-flash").with_api_base(server.uri());
        let embedder = RemoteEmbedder::new(format!("{}/embed", server.uri()), "key");
        let vectors = MilvusStore::connect(MilvusConfig {
            uri: server.uri(),
            token: None,
            collection: "islamic_library".into(),
            schema_path: None,
            index_params_path: None,
        })
        .unwrap();

        Arc::new(AppState {
            rewriter: QueryRewriter::new(gemini.clone()),
            ask: AskClient::new(gemini),
            embedder,
            vectors,
            partitions: vec!["_default".to_string()],
        })
    }

    fn gemini_text(text: &str) -> Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    }

    fn milvus_rows(n: usize) -> Value {
        let rows: Vec<Value> = (0..n)
            .map(|i| {
                json!({
                    "distance": 0.9 - i as f32 * 0.05,
                    "id": 420_000_000i64 + i as i64,
                    "book_id": 42,
                    "book_name": "المجموع",
                    "order": i,
                    "author": "النووي",
                    "category": "الفقه الشافعي",
                    "part_title": "الجزء الأول",
                    "start_page_id": 1,
                    "page_offset": 0,
                    "page_num_range": [3, 4],
                    "text": format!("نص المصدر {i}"),
                })
            })
            .collect();
        json!({ "code": 0, "data": rows })
    }

    async fn mount_pipeline_mocks(server: &MockServer, k: usize) {
        // Rewriter (JSON mode).
        Mock::given(method("POST"))
            .and(path_regex(r":generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_text(
                r#"[{"optimized_query":"حكم الوضوء","sub_queries":["نواقض الوضوء"]}]"#,
            )))
            .mount(server)
            .await;
        // Query embedding.
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "embeddings": [[0.1, 0.2, 0.3]],
                "sparse": [[0.0, 0.4]],
            })))
            .mount(server)
            .await;
        // Hybrid search.
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/advanced_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(milvus_rows(k)))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_health() {
        let server = MockServer::start().await;
        let app = build_router(state_with_mocks(&server).await);
        let response = app
            .oneshot(HttpRequest::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // The middleware stamps a request id even on probes.
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_ready_reports_503_when_vector_store_down() {
        let server = MockServer::start().await;
        // No partitions/list mock mounted: the call 404s.
        let app = build_router(state_with_mocks(&server).await);
        let response = app
            .oneshot(HttpRequest::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_invalid_reranker_is_400_before_any_upstream_call() {
        let server = MockServer::start().await;
        // Nothing mounted: any upstream call would fail the test via 404
        // surfacing as a 5xx instead of the expected 400.
        let app = build_router(state_with_mocks(&server).await);

        let body = json!({
            "query": "ما حكم الوضوء؟",
            "reranker": "RRF",
            "reranker_params": [0.5, 0.5],
        });
        let response = app
            .oneshot(
                HttpRequest::post("/query")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let error: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(error["error"].as_str().unwrap().contains("RRF"));
        assert!(error["request_id"].is_string());
        assert!(error["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_query_non_streaming() {
        let server = MockServer::start().await;
        mount_pipeline_mocks(&server, 3).await;
        let app = build_router(state_with_mocks(&server).await);

        let body = json!({ "query": "ما حكم الوضوء؟", "top_k": 3 });
        let response = app
            .oneshot(
                HttpRequest::post("/query")
                    .header("content-type", "application/json")
                    .header(REQUEST_ID_HEADER, "req_test_1")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "req_test_1"
        );

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(payload["sources"].as_array().unwrap().len(), 3);
        assert_eq!(payload["optimized_query"], "حكم الوضوء");
        assert_eq!(payload["subqueries"][0], "نواقض الوضوء");
        assert_eq!(payload["request_id"], "req_test_1");
        // The non-streaming answer is the model text itself.
        assert!(payload["response"].is_string());
    }

    #[tokio::test]
    async fn test_query_streaming_ndjson_framing() {
        let server = MockServer::start().await;
        mount_pipeline_mocks(&server, 5).await;
        // Streaming answer over SSE.
        let sse = format!(
            "data: {}\n\ndata: {}\n\n",
            gemini_text("الوضوء "),
            gemini_text("واجب للصلاة.")
        );
        Mock::given(method("POST"))
            .and(path_regex(r":streamGenerateContent$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let app = build_router(state_with_mocks(&server).await);
        let body = json!({
            "query": "ما حكم الوضوء؟",
            "top_k": 5,
            "stream": true,
            "reranker": "Weighted",
            "reranker_params": [0.5, 0.5],
        });
        let response = app
            .oneshot(
                HttpRequest::post("/query")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-ndjson"
        );

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert!(lines.len() >= 3);
        assert_eq!(lines[0]["type"], "metadata");
        assert_eq!(lines[0]["sources"].as_array().unwrap().len(), 5);
        assert_eq!(lines.last().unwrap()["type"], "done");
        let content_lines: Vec<&Value> =
            lines.iter().filter(|l| l["type"] == "content").collect();
        assert!(!content_lines.is_empty());
        let answer: String = content_lines
            .iter()
            .map(|l| l["delta"].as_str().unwrap())
            .collect();
        assert_eq!(answer, "الوضوء واجب للصلاة.");
    }
}
