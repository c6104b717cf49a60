//! The per-book export sequence.

use std::sync::Arc;

use async_trait::async_trait;
use maktaba::types::BookExportPlan;
use maktaba::{Error, Result};
use maktaba_embeddings::DenseEmbedder;
use maktaba_html::{process_book_html, BookIdentity, RawHtmlAcquirer};
use maktaba_milvus::MilvusStore;
use maktaba_postgres::LibraryStore;
use maktaba_s3::ObjectStore;
use tracing::info;

use crate::pipeline::{chunk_and_match, embed_chunks, to_jsonl};

/// Progress signals emitted while a book is exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The pipeline entered a new step: `exporting`, `chunking`,
    /// `embedding`.
    Step(&'static str),
    /// Chunking finished with this many chunks.
    ChunkingDone(usize),
    /// This many chunks have dense vectors so far.
    EmbeddingProgress(usize),
}

/// Callback receiving [`ProgressEvent`]s; invoked from the worker task.
pub type ProgressCallback = dyn Fn(ProgressEvent) + Send + Sync;

/// What a finished export reports back to the job record.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
    pub raw_files_count: usize,
    pub metadata_url: String,
    pub total_chunks: usize,
}

/// The seam the job manager schedules against; [`Exporter`] is the
/// production implementation.
#[async_trait]
pub trait BookExporter: Send + Sync {
    async fn export_book(
        &self,
        plan: &BookExportPlan,
        progress: &ProgressCallback,
    ) -> Result<ExportOutcome>;
}

/// Wires the adapters into the per-book export sequence:
/// delete-if-exists, acquire, process, persist, chunk, embed, upsert.
pub struct Exporter {
    acquirer: RawHtmlAcquirer,
    object_store: ObjectStore,
    library: LibraryStore,
    vectors: MilvusStore,
    embedder: Arc<dyn DenseEmbedder>,
    partition: String,
}

impl Exporter {
    #[must_use]
    pub fn new(
        acquirer: RawHtmlAcquirer,
        object_store: ObjectStore,
        library: LibraryStore,
        vectors: MilvusStore,
        embedder: Arc<dyn DenseEmbedder>,
        partition: impl Into<String>,
    ) -> Self {
        Self {
            acquirer,
            object_store,
            library,
            vectors,
            embedder,
            partition: partition.into(),
        }
    }

    /// Remove every trace of a book from the three stores. Called
    /// before re-export and by the delete endpoints.
    pub async fn delete_book(&self, book_id: i64) -> Result<bool> {
        let s3_deleted = self.object_store.delete_book(book_id).await?;
        let pg_deleted = self.library.delete_book(book_id).await?;
        let milvus_deleted = self.vectors.delete_by_book_id(book_id, &self.partition).await?;
        Ok(s3_deleted || pg_deleted || milvus_deleted)
    }
}

#[async_trait]
impl BookExporter for Exporter {
    async fn export_book(
        &self,
        plan: &BookExportPlan,
        progress: &ProgressCallback,
    ) -> Result<ExportOutcome> {
        let book_id = plan.book_id;

        // A previous export (complete or failed) is wiped first, so the
        // rest of the sequence always writes onto a clean slate.
        if self.object_store.book_exists(book_id).await? {
            info!(book_id, "Deleting existing book before re-export");
            self.delete_book(book_id).await?;
        }

        progress(ProgressEvent::Step("exporting"));
        let files = self.acquirer.export_to_memory(book_id).await?;

        let html_contents: Vec<String> = files
            .iter()
            .filter(|(name, _)| {
                let lower = name.to_ascii_lowercase();
                lower.ends_with(".htm") || lower.ends_with(".html")
            })
            .map(|(_, content)| String::from_utf8_lossy(content).into_owned())
            .collect();

        let processed = process_book_html(
            &html_contents,
            BookIdentity {
                book_id,
                book_name: plan.book_name.clone(),
                author_name: plan.author_name.clone(),
                category_name: plan.category_name.clone(),
                table_of_contents: plan.table_of_contents.clone(),
            },
        )?;

        let raw_urls = self.object_store.upload_raw_files(book_id, &files).await?;
        let metadata_url = self.object_store.upload_metadata(book_id, &processed).await?;
        self.library
            .upsert_book(&processed, plan.author_id, plan.category_id)
            .await?;

        progress(ProgressEvent::Step("chunking"));
        let (matched, _stats) = chunk_and_match(&processed);
        if matched.is_empty() {
            return Err(Error::api(format!(
                "chunker produced zero chunks for book {book_id}"
            )));
        }
        progress(ProgressEvent::ChunkingDone(matched.len()));

        progress(ProgressEvent::Step("embedding"));
        let embed_progress = |embedded: usize| {
            progress(ProgressEvent::EmbeddingProgress(embedded));
        };
        let embedded = embed_chunks(matched, self.embedder.as_ref(), Some(&embed_progress)).await?;

        let jsonl = to_jsonl(&embedded)?;
        self.object_store.upload_embeddings_jsonl(book_id, jsonl).await?;
        self.vectors.upsert_chunks(&embedded, &self.partition).await?;

        info!(
            book_id,
            raw_files = raw_urls.len(),
            chunks = embedded.len(),
            "Book exported"
        );
        Ok(ExportOutcome {
            raw_files_count: raw_urls.len(),
            metadata_url,
            total_chunks: embedded.len(),
        })
    }
}
