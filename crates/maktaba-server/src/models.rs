//! Request/response shapes for the export service.

use maktaba::types::{BookExportPlan, TocEntry};
use maktaba::{Error, Result};
use maktaba_catalog::CatalogBook;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Pagination defaults shared by the list endpoints.
pub const DEFAULT_LIMIT: u64 = 50;
pub const MAX_LIMIT: u64 = 500;

/// Clamp an optional `limit` to the allowed ceiling.
#[must_use]
pub fn effective_limit(limit: Option<u64>) -> u64 {
    limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
}

/// Common `limit`/`offset` query parameters.
///
/// Query structs repeat these two fields instead of embedding this
/// struct: `serde_urlencoded` cannot flatten into typed fields.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Pagination {
    /// Effective limit, clamped to the ceiling.
    #[must_use]
    pub fn limit(&self) -> u64 {
        effective_limit(self.limit)
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset.unwrap_or(0)
    }
}

/// `GET /books` query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BooksQuery {
    pub q: Option<String>,
    pub category_id: Option<i64>,
    pub author_id: Option<i64>,
    pub hidden: Option<i64>,
    pub exported: Option<bool>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl BooksQuery {
    #[must_use]
    pub fn page(&self) -> Pagination {
        Pagination { limit: self.limit, offset: self.offset }
    }
}

/// Search query parameter for categories and authors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SearchQuery {
    #[must_use]
    pub fn page(&self) -> Pagination {
        Pagination { limit: self.limit, offset: self.offset }
    }
}

/// Paged list envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

/// A catalogue book plus its export status.
#[derive(Debug, Clone, Serialize)]
pub struct BookResponse {
    #[serde(flatten)]
    pub book: CatalogBook,
    pub exported: bool,
}

/// `POST /export/books` body: an explicit id list, or a catalogue
/// filter resolved server-side.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub book_ids: Vec<i64>,
    #[serde(default)]
    pub filter: Option<maktaba_catalog::BookFilter>,
}

/// `202 Accepted` body for submitted jobs.
#[derive(Debug, Clone, Serialize)]
pub struct JobSubmitResponse {
    pub job_id: String,
    pub total_books: usize,
}

/// `DELETE /books` body.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteBatchRequest {
    pub book_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub book_id: i64,
    pub deleted: bool,
}

/// `GET /jobs` query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobsQuery {
    pub status: Option<maktaba_export::JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl JobsQuery {
    #[must_use]
    pub fn page(&self) -> Pagination {
        Pagination { limit: self.limit, offset: self.offset }
    }
}

/// `ids=1,2,3` query parameter for the download endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct IdsQuery {
    pub ids: String,
}

impl IdsQuery {
    /// Parse the comma-separated id list, rejecting garbage.
    pub fn parse(&self) -> Result<Vec<i64>> {
        let ids: Vec<i64> = self
            .ids
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<i64>()
                    .map_err(|_| Error::validation(format!("invalid book id: {part}")))
            })
            .collect::<Result<_>>()?;
        if ids.is_empty() {
            return Err(Error::validation("at least one book id is required"));
        }
        Ok(ids)
    }
}

/// Error body shared with the gateway.
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
    pub fn new(status: &'static str) -> Self {
        Self {
            status,
            timestamp: maktaba::now_utc_string(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Build an export plan from a catalogue row, parsing the stored ToC
/// JSON. An unreadable ToC is dropped with a warning rather than
/// failing the export.
#[must_use]
pub fn plan_from_catalog(book: &CatalogBook) -> BookExportPlan {
    let table_of_contents = book.table_of_contents.as_deref().and_then(|raw| {
        match serde_json::from_str::<Vec<TocEntry>>(raw) {
            Ok(entries) if entries.is_empty() => None,
            Ok(entries) => Some(entries),
            Err(err) => {
                warn!(book_id = book.book_id, error = %err, "Unparseable table of contents");
                None
            }
        }
    });

    BookExportPlan {
        book_id: book.book_id,
        book_name: book.book_name.clone(),
        author_name: book.author_name.clone(),
        category_name: book.category_name.clone(),
        author_id: book.author_id,
        category_id: book.category_id,
        table_of_contents,
    }
}
