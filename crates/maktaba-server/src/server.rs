//! Routes and handlers for the export service.

use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use maktaba::types::BookExportPlan;
use maktaba::{Error, ErrorKind, Result};
use maktaba_catalog::{BookFilter, CatalogStore};
use maktaba_export::{Exporter, JobManager};
use maktaba_milvus::MilvusStore;
use maktaba_postgres::LibraryStore;
use maktaba_s3::ObjectStore;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::models::{
    BookResponse, BooksQuery, DeleteBatchRequest, DeleteResponse, ErrorResponse, ExportRequest,
    HealthResponse, IdsQuery, JobSubmitResponse, JobsQuery, ListResponse, Pagination, SearchQuery,
    plan_from_catalog,
};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared service handles.
pub struct AppState {
    pub catalog: CatalogStore,
    pub objects: ObjectStore,
    pub library: LibraryStore,
    pub vectors: MilvusStore,
    pub jobs: JobManager,
    pub exporter: Arc<Exporter>,
}

/// Build the export-service router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/categories", get(list_categories))
        .route("/categories/:id", get(get_category))
        .route("/authors", get(list_authors))
        .route("/authors/:id", get(get_author))
        .route("/books", get(list_books).delete(delete_books))
        .route("/books/:id", get(get_book).delete(delete_book))
        .route("/export/books", post(export_books))
        .route("/export/books/:id", post(export_single_book))
        .route("/jobs", get(list_jobs))
        .route("/jobs/dlq", get(get_dlq).delete(clear_dlq))
        .route("/jobs/dlq/:index/retry", post(retry_dlq_entry))
        .route("/jobs/:id", get(get_job))
        .route("/download/books", get(download_books))
        .route("/download/metadata", get(download_metadata))
        .route("/download/embeddings", get(download_embeddings))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .with_state(state)
}

async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("req_{}", chrono::Utc::now().timestamp_millis()));

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
        let mut response = next.run(request).await;
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
        response
    } else {
        next.run(request).await
    }
}

fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("req_{}", chrono::Utc::now().timestamp_millis()))
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

fn error_response(err: &Error, request_id: &str) -> Response {
    let body = ErrorResponse {
        error: err.to_string(),
        request_id: request_id.to_string(),
        timestamp: maktaba::now_utc_string(),
    };
    (status_for(err), Json(body)).into_response()
}

/// Run a blocking catalogue query off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::other(format!("catalogue task failed: {e}")))?
}

macro_rules! try_or_respond {
    ($headers:expr, $result:expr) => {
        match $result {
            Ok(value) => value,
            Err(err) => {
                let request_id = request_id_from($headers);
                error!(error = %err, request_id = %request_id, "Request failed");
                return error_response(&err, &request_id);
            }
        }
    };
}

// ============== Health ==============

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::new("healthy"))
}

async fn ready_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let library_ok = state.library.get_all_exported_book_ids().await;
    let vectors_ok = state.vectors.has_collection().await;
    match (library_ok, vectors_ok) {
        (Ok(_), Ok(_)) => Json(HealthResponse::new("ready")).into_response(),
        (Err(err), _) | (_, Err(err)) => {
            let request_id = request_id_from(&headers);
            error_response(
                &Error::storage(format!("Service not ready: {err}")),
                &request_id,
            )
        }
    }
}

// ============== Catalogue browsing ==============

async fn list_categories(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Response {
    let catalog = state.catalog.clone();
    let limit = query.page().limit();
    let offset = query.page().offset();
    let (items, total) = try_or_respond!(
        &headers,
        blocking(move || match query.q.as_deref() {
            Some(q) => catalog.search_categories(q, Some(limit), Some(offset)),
            None => catalog.get_all_categories(Some(limit), Some(offset)),
        })
        .await
    );
    Json(ListResponse { items, total, limit, offset }).into_response()
}

async fn get_category(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    let catalog = state.catalog.clone();
    let category = try_or_respond!(&headers, blocking(move || catalog.get_category(id)).await);
    match category {
        Some(category) => Json(category).into_response(),
        None => {
            let request_id = request_id_from(&headers);
            error_response(&Error::not_found(format!("category {id} not found")), &request_id)
        }
    }
}

async fn list_authors(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Response {
    let catalog = state.catalog.clone();
    let limit = query.page().limit();
    let offset = query.page().offset();
    let (items, total) = try_or_respond!(
        &headers,
        blocking(move || match query.q.as_deref() {
            Some(q) => catalog.search_authors(q, Some(limit), Some(offset)),
            None => catalog.get_all_authors(Some(limit), Some(offset)),
        })
        .await
    );
    Json(ListResponse { items, total, limit, offset }).into_response()
}

async fn get_author(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    let catalog = state.catalog.clone();
    let result = try_or_respond!(
        &headers,
        blocking(move || {
            let author = catalog.get_author(id)?;
            let books = catalog.get_author_books(id)?;
            Ok(author.map(|author| (author, books)))
        })
        .await
    );
    match result {
        Some((author, books)) => Json(serde_json::json!({
            "author": author,
            "books": books,
        }))
        .into_response(),
        None => {
            let request_id = request_id_from(&headers);
            error_response(&Error::not_found(format!("author {id} not found")), &request_id)
        }
    }
}

async fn list_books(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BooksQuery>,
) -> Response {
    let exported_ids = try_or_respond!(&headers, state.library.get_all_exported_book_ids().await);

    let catalog = state.catalog.clone();
    let limit = query.page().limit();
    let offset = query.page().offset();
    let filter = BookFilter {
        query: query.q.clone(),
        category_id: query.category_id,
        author_id: query.author_id,
        hidden: query.hidden,
        has_toc: None,
        exported: query.exported,
    };
    let ids_for_filter = exported_ids.clone();
    let (books, total) = try_or_respond!(
        &headers,
        blocking(move || {
            catalog.search_books(&filter, Some(&ids_for_filter), Some(limit), Some(offset))
        })
        .await
    );

    let items: Vec<BookResponse> = books
        .into_iter()
        .map(|book| BookResponse {
            exported: exported_ids.contains(&book.book_id),
            book,
        })
        .collect();
    Json(ListResponse { items, total, limit, offset }).into_response()
}

async fn get_book(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    let catalog = state.catalog.clone();
    let book = try_or_respond!(&headers, blocking(move || catalog.get_book(id)).await);
    let Some(book) = book else {
        let request_id = request_id_from(&headers);
        return error_response(&Error::not_found(format!("book {id} not found")), &request_id);
    };
    let exported = try_or_respond!(&headers, state.library.book_exists(id).await);
    Json(BookResponse { book, exported }).into_response()
}

// ============== Export submission ==============

async fn resolve_plans(state: &AppState, book_ids: Vec<i64>) -> Result<Vec<BookExportPlan>> {
    if book_ids.is_empty() {
        return Err(Error::validation("at least one book id is required"));
    }
    let catalog = state.catalog.clone();
    blocking(move || {
        let mut plans = Vec::with_capacity(book_ids.len());
        for book_id in book_ids {
            let book = catalog
                .get_book(book_id)?
                .ok_or_else(|| Error::not_found(format!("book {book_id} not found")))?;
            plans.push(plan_from_catalog(&book));
        }
        Ok(plans)
    })
    .await
}

/// Resolve the request's book set: explicit ids win, otherwise the
/// catalogue filter is evaluated server-side.
async fn resolve_export_ids(state: &AppState, request: ExportRequest) -> Result<Vec<i64>> {
    if !request.book_ids.is_empty() {
        return Ok(request.book_ids);
    }
    let Some(filter) = request.filter else {
        return Err(Error::validation("either book_ids or filter is required"));
    };

    let exported_ids = if filter.needs_exported_ids() {
        Some(state.library.get_all_exported_book_ids().await?)
    } else {
        None
    };
    let catalog = state.catalog.clone();
    blocking(move || catalog.find_book_ids(&filter, exported_ids.as_ref())).await
}

async fn export_books(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ExportRequest>,
) -> Response {
    let book_ids = try_or_respond!(&headers, resolve_export_ids(&state, request).await);
    let plans = try_or_respond!(&headers, resolve_plans(&state, book_ids).await);
    let total_books = plans.len();
    let job_id = state.jobs.submit_job(plans);
    info!(job_id = %job_id, total_books, "Export job accepted");
    (
        StatusCode::ACCEPTED,
        Json(JobSubmitResponse { job_id, total_books }),
    )
        .into_response()
}

async fn export_single_book(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    let plans = try_or_respond!(&headers, resolve_plans(&state, vec![id]).await);
    let job_id = state.jobs.submit_job(plans);
    info!(job_id = %job_id, book_id = id, "Export job accepted");
    (
        StatusCode::ACCEPTED,
        Json(JobSubmitResponse { job_id, total_books: 1 }),
    )
        .into_response()
}

// ============== Jobs and DLQ ==============

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobsQuery>,
) -> Response {
    let limit = query.page().limit();
    let offset = query.page().offset();
    let (jobs, total) = state
        .jobs
        .list_jobs(query.status, limit as usize, offset as usize);
    Json(serde_json::json!({
        "jobs": jobs,
        "total": total,
        "limit": limit,
        "offset": offset,
    }))
    .into_response()
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    match state.jobs.get_job(&id) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => {
            let request_id = request_id_from(&headers);
            error_response(&Error::not_found(format!("job {id} not found")), &request_id)
        }
    }
}

async fn get_dlq(
    State(state): State<Arc<AppState>>,
    Query(page): Query<Pagination>,
) -> Response {
    let limit = page.limit();
    let offset = page.offset();
    let (entries, total) = state.jobs.get_dlq(limit as usize, offset as usize);
    Json(serde_json::json!({
        "entries": entries,
        "total": total,
        "limit": limit,
        "offset": offset,
    }))
    .into_response()
}

async fn retry_dlq_entry(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(index): Path<usize>,
) -> Response {
    match state.jobs.retry_dlq_entry(index) {
        Some(job_id) => (
            StatusCode::ACCEPTED,
            Json(JobSubmitResponse { job_id, total_books: 1 }),
        )
            .into_response(),
        None => {
            let request_id = request_id_from(&headers);
            error_response(
                &Error::not_found(format!("dead-letter entry {index} not found")),
                &request_id,
            )
        }
    }
}

async fn clear_dlq(State(state): State<Arc<AppState>>) -> Response {
    state.jobs.clear_dlq();
    StatusCode::NO_CONTENT.into_response()
}

// ============== Deletes ==============

async fn delete_book(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    let deleted = try_or_respond!(&headers, state.exporter.delete_book(id).await);
    if deleted {
        Json(DeleteResponse { book_id: id, deleted }).into_response()
    } else {
        let request_id = request_id_from(&headers);
        error_response(
            &Error::not_found(format!("book {id} has no exported data")),
            &request_id,
        )
    }
}

async fn delete_books(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<DeleteBatchRequest>,
) -> Response {
    if request.book_ids.is_empty() {
        let request_id = request_id_from(&headers);
        return error_response(
            &Error::validation("at least one book id is required"),
            &request_id,
        );
    }
    let mut results = Vec::with_capacity(request.book_ids.len());
    for book_id in request.book_ids {
        let deleted = try_or_respond!(&headers, state.exporter.delete_book(book_id).await);
        results.push(DeleteResponse { book_id, deleted });
    }
    Json(results).into_response()
}

// ============== Downloads ==============

fn zip_response(bytes: Vec<u8>, filename: &str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}

async fn download_books(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<IdsQuery>,
) -> Response {
    let ids = try_or_respond!(&headers, query.parse());
    let (bytes, filename) =
        try_or_respond!(&headers, state.objects.download_books_as_zip(&ids).await);
    zip_response(bytes, &filename)
}

async fn download_metadata(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<IdsQuery>,
) -> Response {
    let ids = try_or_respond!(&headers, query.parse());
    let (bytes, filename) =
        try_or_respond!(&headers, state.objects.download_metadata_as_zip(&ids).await);
    zip_response(bytes, &filename)
}

async fn download_embeddings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<IdsQuery>,
) -> Response {
    let ids = try_or_respond!(&headers, query.parse());
    let (bytes, filename) =
        try_or_respond!(&headers, state.objects.download_embeddings_as_zip(&ids).await);
    zip_response(bytes, &filename)
}
