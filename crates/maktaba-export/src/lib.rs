//! Export orchestration: the per-book pipeline and the job manager
//! that schedules it.
//!
//! [`Exporter`] runs one book end to end: delete any previous export,
//! acquire the raw HTML, process it, persist raw pages and metadata,
//! chunk and match, embed, and upsert to the vector store. Each attempt
//! starts by deleting what a previous attempt may have left behind, so
//! partial failures heal on retry.
//!
//! [`JobManager`] runs many books through a bounded worker pool, with
//! per-book progress, a dead-letter queue, and retry from the DLQ.

mod jobs;
mod orchestrator;
mod pipeline;

pub use jobs::{
    BookJobResult, BookStatus, DeadLetterEntry, JobManager, JobSnapshot, JobStatus,
    DEFAULT_EXPORT_WORKERS,
};
pub use orchestrator::{BookExporter, ExportOutcome, Exporter, ProgressCallback, ProgressEvent};
pub use pipeline::{chunk_and_match, embed_chunks, to_jsonl};
