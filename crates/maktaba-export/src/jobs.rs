//! Bounded-worker job manager with a dead-letter queue.
//!
//! All mutable job state lives behind one coarse mutex; worker tasks
//! take the lock only for short, synchronous updates. Jobs are held in
//! memory for the lifetime of the process and are not persisted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use maktaba::types::BookExportPlan;
use maktaba::now_utc_string;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

use crate::orchestrator::{BookExporter, ProgressEvent};

/// Default worker-pool width.
pub const DEFAULT_EXPORT_WORKERS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    CompletedWithErrors,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Per-book progress and result, as exposed to polling clients.
#[derive(Debug, Clone, Serialize)]
pub struct BookJobResult {
    pub book_id: i64,
    pub status: BookStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_embedded: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_files_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_url: Option<String>,
}

impl BookJobResult {
    fn pending(book_id: i64) -> Self {
        Self {
            book_id,
            status: BookStatus::Pending,
            current_step: None,
            total_chunks: None,
            chunks_embedded: None,
            started_at: None,
            completed_at: None,
            elapsed_seconds: None,
            error: None,
            raw_files_count: None,
            metadata_url: None,
        }
    }
}

/// Deep-copied view of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub total_books: usize,
    pub completed_books: usize,
    pub failed_books: usize,
    pub progress: f64,
    pub books: Vec<BookJobResult>,
    pub created_at: String,
    pub updated_at: String,
}

/// A terminal per-book failure, kept until retried or cleared.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterEntry {
    pub job_id: String,
    pub book_id: i64,
    pub error: String,
    pub failed_at: String,
}

struct JobState {
    job_id: String,
    status: JobStatus,
    created_at: String,
    updated_at: String,
    /// Submission counter; disambiguates jobs created within the same
    /// second when listing newest-first.
    seq: u64,
    book_order: Vec<i64>,
    books: HashMap<i64, BookJobResult>,
    plans: HashMap<i64, BookExportPlan>,
    started: HashMap<i64, Instant>,
}

impl JobState {
    fn snapshot(&self) -> JobSnapshot {
        let mut books: Vec<BookJobResult> = Vec::with_capacity(self.book_order.len());
        for book_id in &self.book_order {
            if let Some(result) = self.books.get(book_id) {
                let mut result = result.clone();
                if result.status == BookStatus::InProgress {
                    if let Some(started) = self.started.get(book_id) {
                        result.elapsed_seconds = Some(round1(started.elapsed().as_secs_f64()));
                    }
                }
                books.push(result);
            }
        }

        let completed = books.iter().filter(|b| b.status == BookStatus::Completed).count();
        let failed = books.iter().filter(|b| b.status == BookStatus::Failed).count();
        let total = books.len();
        let progress = if total > 0 {
            (completed + failed) as f64 / total as f64
        } else {
            0.0
        };

        JobSnapshot {
            job_id: self.job_id.clone(),
            status: self.status,
            total_books: total,
            completed_books: completed,
            failed_books: failed,
            progress: (progress * 10_000.0).round() / 10_000.0,
            books,
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

struct ManagerState {
    jobs: HashMap<String, JobState>,
    dlq: Vec<DeadLetterEntry>,
    next_seq: u64,
}

struct Inner {
    exporter: Arc<dyn BookExporter>,
    workers: Arc<Semaphore>,
    state: Mutex<ManagerState>,
}

/// Schedules book exports over a bounded worker pool.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    #[must_use]
    pub fn new(exporter: Arc<dyn BookExporter>, workers: usize) -> Self {
        info!(workers, "Job manager initialized");
        Self {
            inner: Arc::new(Inner {
                exporter,
                workers: Arc::new(Semaphore::new(workers.max(1))),
                state: Mutex::new(ManagerState {
                    jobs: HashMap::new(),
                    dlq: Vec::new(),
                    next_seq: 0,
                }),
            }),
        }
    }

    // ============== Public API ==============

    /// Register a job and dispatch it. Returns immediately with the
    /// job id.
    pub fn submit_job(&self, plans: Vec<BookExportPlan>) -> String {
        let job_id = Uuid::new_v4().to_string();
        let now = now_utc_string();

        let state = JobState {
            job_id: job_id.clone(),
            status: JobStatus::Pending,
            created_at: now.clone(),
            updated_at: now,
            seq: 0,
            book_order: plans.iter().map(|p| p.book_id).collect(),
            books: plans
                .iter()
                .map(|p| (p.book_id, BookJobResult::pending(p.book_id)))
                .collect(),
            plans: plans.into_iter().map(|p| (p.book_id, p)).collect(),
            started: HashMap::new(),
        };

        {
            let mut manager = self.inner.state.lock();
            let mut state = state;
            state.seq = manager.next_seq;
            manager.next_seq += 1;
            manager.jobs.insert(job_id.clone(), state);
        }

        let inner = Arc::clone(&self.inner);
        let task_job_id = job_id.clone();
        tokio::spawn(async move {
            run_job(inner, task_job_id).await;
        });

        info!(job_id = %job_id, "Job submitted");
        job_id
    }

    pub fn get_job(&self, job_id: &str) -> Option<JobSnapshot> {
        self.inner.state.lock().jobs.get(job_id).map(JobState::snapshot)
    }

    /// Jobs newest-first, optionally filtered by status.
    pub fn list_jobs(
        &self,
        status_filter: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> (Vec<JobSnapshot>, usize) {
        let manager = self.inner.state.lock();
        let mut jobs: Vec<&JobState> = manager
            .jobs
            .values()
            .filter(|job| status_filter.map_or(true, |s| job.status == s))
            .collect();
        jobs.sort_by(|a, b| b.seq.cmp(&a.seq));

        let total = jobs.len();
        let page = jobs
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(JobState::snapshot)
            .collect();
        (page, total)
    }

    pub fn get_dlq(&self, limit: usize, offset: usize) -> (Vec<DeadLetterEntry>, usize) {
        let manager = self.inner.state.lock();
        let total = manager.dlq.len();
        let page = manager.dlq.iter().skip(offset).take(limit).cloned().collect();
        (page, total)
    }

    /// Remove a DLQ entry by index and re-submit its book as a fresh
    /// single-book job, re-hydrating the original plan when the source
    /// job is still known.
    pub fn retry_dlq_entry(&self, index: usize) -> Option<String> {
        let plan = {
            let mut manager = self.inner.state.lock();
            if index >= manager.dlq.len() {
                return None;
            }
            let entry = manager.dlq.remove(index);
            manager
                .jobs
                .get(&entry.job_id)
                .and_then(|job| job.plans.get(&entry.book_id).cloned())
                .unwrap_or_else(|| BookExportPlan::bare(entry.book_id))
        };
        Some(self.submit_job(vec![plan]))
    }

    pub fn clear_dlq(&self) {
        self.inner.state.lock().dlq.clear();
    }

    pub fn dlq_len(&self) -> usize {
        self.inner.state.lock().dlq.len()
    }
}

async fn run_job(inner: Arc<Inner>, job_id: String) {
    let book_ids: Vec<i64> = {
        let mut manager = inner.state.lock();
        let Some(job) = manager.jobs.get_mut(&job_id) else {
            return;
        };
        job.status = JobStatus::InProgress;
        job.updated_at = now_utc_string();
        job.book_order.clone()
    };

    let mut tasks = JoinSet::new();
    for book_id in book_ids {
        let inner = Arc::clone(&inner);
        let job_id = job_id.clone();
        tasks.spawn(async move {
            // The semaphore is the pool: at most `workers` books run at
            // once, FIFO across all jobs.
            let _permit = inner.workers.acquire().await;
            export_single_book(&inner, &job_id, book_id).await;
        });
    }
    while tasks.join_next().await.is_some() {}

    let mut manager = inner.state.lock();
    if let Some(job) = manager.jobs.get_mut(&job_id) {
        let completed = job.books.values().filter(|b| b.status == BookStatus::Completed).count();
        let failed = job.books.values().filter(|b| b.status == BookStatus::Failed).count();
        let total = job.books.len();

        job.status = if completed == total {
            JobStatus::Completed
        } else if failed == total {
            JobStatus::Failed
        } else {
            JobStatus::CompletedWithErrors
        };
        job.updated_at = now_utc_string();
        info!(
            job_id = %job_id,
            status = ?job.status,
            completed,
            failed,
            "Job finished"
        );
    }
}

async fn export_single_book(inner: &Arc<Inner>, job_id: &str, book_id: i64) {
    let plan = {
        let mut manager = inner.state.lock();
        let Some(job) = manager.jobs.get_mut(job_id) else {
            return;
        };
        let Some(plan) = job.plans.get(&book_id).cloned() else {
            return;
        };
        if let Some(book) = job.books.get_mut(&book_id) {
            book.status = BookStatus::InProgress;
            book.started_at = Some(now_utc_string());
            book.current_step = Some("exporting".to_string());
        }
        job.started.insert(book_id, Instant::now());
        job.updated_at = now_utc_string();
        plan
    };

    let progress_inner = Arc::clone(inner);
    let progress_job_id = job_id.to_string();
    let progress = move |event: ProgressEvent| {
        let mut manager = progress_inner.state.lock();
        let Some(job) = manager.jobs.get_mut(&progress_job_id) else {
            return;
        };
        if let Some(book) = job.books.get_mut(&book_id) {
            match event {
                ProgressEvent::Step(step) => book.current_step = Some(step.to_string()),
                ProgressEvent::ChunkingDone(total) => {
                    book.total_chunks = Some(total);
                    book.chunks_embedded = Some(0);
                }
                ProgressEvent::EmbeddingProgress(embedded) => {
                    book.chunks_embedded = Some(embedded);
                }
            }
        }
        job.updated_at = now_utc_string();
    };

    let result = inner.exporter.export_book(&plan, &progress).await;

    let mut manager = inner.state.lock();
    let Some(job) = manager.jobs.get_mut(job_id) else {
        return;
    };
    let elapsed = job
        .started
        .get(&book_id)
        .map(|started| round1(started.elapsed().as_secs_f64()));

    match result {
        Ok(outcome) => {
            if let Some(book) = job.books.get_mut(&book_id) {
                book.status = BookStatus::Completed;
                book.raw_files_count = Some(outcome.raw_files_count);
                book.metadata_url = Some(outcome.metadata_url);
                book.total_chunks = Some(outcome.total_chunks);
                book.completed_at = Some(now_utc_string());
                book.current_step = None;
                book.elapsed_seconds = elapsed;
            }
            job.updated_at = now_utc_string();
            info!(book_id, job_id = %job_id, "Book exported successfully");
        }
        Err(err) => {
            let message = err.to_string();
            error!(book_id, job_id = %job_id, error = %message, "Book export failed");
            if let Some(book) = job.books.get_mut(&book_id) {
                book.status = BookStatus::Failed;
                book.error = Some(message.clone());
                book.completed_at = Some(now_utc_string());
                book.current_step = None;
                book.elapsed_seconds = elapsed;
            }
            job.updated_at = now_utc_string();
            manager.dlq.push(DeadLetterEntry {
                job_id: job_id.to_string(),
                book_id,
                error: message,
                failed_at: now_utc_string(),
            });
        }
    }
}
