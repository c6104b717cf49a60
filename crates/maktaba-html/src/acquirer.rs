//! Out-of-process extractor invocation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use maktaba::{Error, Result};
use serde_json::Value;
use tokio::process::Command;
use tracing::info;

/// Hard ceiling on one extractor run.
const EXTRACTOR_TIMEOUT: Duration = Duration::from_secs(3600);

/// Runs the extractor script (`bash <script> --stdout <book_id>`) and
/// parses its JSON output into in-memory page files.
#[derive(Debug, Clone)]
pub struct RawHtmlAcquirer {
    script: PathBuf,
    work_dir: Option<PathBuf>,
    timeout: Duration,
}

impl RawHtmlAcquirer {
    #[must_use]
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            work_dir: None,
            timeout: EXTRACTOR_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Export one book's raw HTML pages directly to memory. Returns the
    /// files keyed by name, sorted (`001.htm`, `002.htm`, …).
    pub async fn export_to_memory(&self, book_id: i64) -> Result<BTreeMap<String, Vec<u8>>> {
        info!(book_id, script = %self.script.display(), "Running extractor");

        let mut command = Command::new("bash");
        command
            .arg(&self.script)
            .arg("--stdout")
            .arg(book_id.to_string())
            .kill_on_drop(true);
        if let Some(dir) = &self.work_dir {
            command.current_dir(dir);
        }

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "extractor for book {book_id} exceeded {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::api(format!("failed to launch extractor for book {book_id}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                "unknown error".to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::api(format!(
                "export failed for book {book_id}: {detail}"
            )));
        }

        let payload: Value = serde_json::from_slice(&output.stdout).map_err(|e| {
            Error::api(format!("failed to parse export output for book {book_id}: {e}"))
        })?;

        let mut files = BTreeMap::new();
        if let Some(map) = payload.get("files").and_then(Value::as_object) {
            for (name, content) in map {
                if let Some(content) = content.as_str() {
                    files.insert(name.clone(), content.as_bytes().to_vec());
                }
            }
        }

        info!(book_id, file_count = files.len(), "Extractor finished");
        Ok(files)
    }
}
