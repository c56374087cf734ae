use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::core::errors::{LogError, LogResult};
use crate::core::types::TranslationRecord;
use crate::utils::Metrics;

/// Append-only JSON log of completed translations.
///
/// The whole log is a single pretty-printed JSON array that is rewritten on
/// every append. Appends from concurrent relays and pollers are serialized
/// through one async mutex so no write is lost between read and rewrite.
#[derive(Clone)]
pub struct TranslationLog {
    inner: Arc<LogInner>,
}

struct LogInner {
    path: PathBuf,
    write_lock: Mutex<()>,
    metrics: Metrics,
}

impl TranslationLog {
    pub fn new(path: impl Into<PathBuf>, metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(LogInner {
                path: path.into(),
                write_lock: Mutex::new(()),
                metrics,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Load the raw entries. An absent or unparseable file reads as empty.
    pub async fn load_raw(&self) -> Vec<Value> {
        let data = match tokio::fs::read_to_string(&self.inner.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.inner.path.display(), error = %e, "Failed to read translation log, treating as empty");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<Value>>(&data) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.inner.path.display(), error = %e, "Translation log is corrupt, treating as empty");
                Vec::new()
            }
        }
    }

    /// Typed view of the log; entries of an unknown shape are skipped.
    pub async fn records(&self) -> Vec<TranslationRecord> {
        self.load_raw()
            .await
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect()
    }

    /// Append one record and return the new number of entries.
    pub async fn append(&self, record: &TranslationRecord) -> LogResult<usize> {
        let entry = serde_json::to_value(record)?;

        let _guard = self.inner.write_lock.lock().await;

        let mut entries = self.load_raw().await;
        entries.push(entry);
        let json = serde_json::to_string_pretty(&entries)?;

        self.write_atomically(json.as_bytes()).await?;

        debug!(path = %self.inner.path.display(), entries = entries.len(), "Translation log updated");
        Ok(entries.len())
    }

    /// Append without surfacing failures to the caller.
    ///
    /// Failures are logged and counted in the service metrics.
    pub async fn append_best_effort(&self, record: TranslationRecord) {
        match self.append(&record).await {
            Ok(_) => self.inner.metrics.record_log_write(true),
            Err(e) => {
                error!(error = %e, "Failed to save translation record");
                self.inner.metrics.record_log_write(false);
            }
        }
    }

    /// Hold the write lock; appends stay pending until the guard drops.
    #[cfg(test)]
    pub(crate) async fn hold_write_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.write_lock.lock().await
    }

    // Write to a sibling temp file, then rename over the log so a crash
    // mid-write never leaves a truncated file behind.
    async fn write_atomically(&self, bytes: &[u8]) -> LogResult<()> {
        let path = &self.inner.path;
        let write_failed = |source| LogError::WriteFailed {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
        }

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        tokio::fs::write(&tmp_path, bytes).await.map_err(write_failed)?;
        tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
        Ok(())
    }
}
