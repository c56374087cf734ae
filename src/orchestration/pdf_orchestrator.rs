// PDF task orchestration: submission, client-driven polling and cancellation

use anyhow::Result;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{ArtifactResult, TaskError, TaskResult};
use crate::core::types::{
    ArtifactRole, DocumentMetrics, DocumentRecord, PdfTaskMetadata, SubmittedTask, TaskStatus,
    TranslationRecord,
};
use crate::orchestration::task_registry::TaskRegistry;
use crate::services::pdf::{CancelOutcome, DocumentUpload, PdfWorkerClient, RemoteStatus};
use crate::services::storage::artifact_store::{validate_task_id, ArtifactStore};
use crate::services::storage::TranslationLog;
use crate::utils::{round_to, Metrics};

/// Message reported to the client when the worker gives up on a task
pub const TRANSLATION_FAILED_MESSAGE: &str = "PDF translation failed";

/// Coordinates document tasks between the client, the worker and local storage.
///
/// Owns no background loop: every status query is one round-trip to the
/// worker, triggered by a client poll.
pub struct PdfOrchestrator {
    config: Arc<Config>,
    worker: PdfWorkerClient,
    artifacts: ArtifactStore,
    registry: TaskRegistry,
    log: TranslationLog,
    metrics: Metrics,
}

impl PdfOrchestrator {
    pub fn new(config: Arc<Config>, log: TranslationLog, metrics: Metrics) -> Result<Self> {
        let worker = PdfWorkerClient::new(Arc::clone(&config))?;
        let artifacts = ArtifactStore::new(&config.storage.pdf_dir)?;

        Ok(Self {
            config,
            worker,
            artifacts,
            registry: TaskRegistry::new(),
            log,
            metrics,
        })
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Forward a document to the worker and start tracking it.
    #[instrument(skip(self, upload), fields(filename = %upload.filename))]
    pub async fn submit(&self, upload: DocumentUpload) -> TaskResult<SubmittedTask> {
        if upload.bytes.is_empty() {
            return Err(TaskError::MissingFile);
        }

        let task_id = self.worker.submit(&upload).await?;
        validate_task_id(&task_id).map_err(|e| TaskError::InvalidResponse(e.to_string()))?;
        info!(task_id = %task_id, "Task submitted successfully");

        let submitted_at = Local::now();
        let original_name = ArtifactStore::artifact_name(&submitted_at, &task_id, ArtifactRole::Original);
        let original_file = match self.artifacts.save(&original_name, &upload.bytes).await {
            Ok(_) => Some(original_name),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Failed to save original PDF");
                None
            }
        };

        self.registry.insert(PdfTaskMetadata {
            task_id: task_id.clone(),
            filename: upload.filename,
            source_lang: upload.source_lang,
            target_lang: upload.target_lang,
            pages: upload.pages,
            submitted_at,
            started: Instant::now(),
            original_file,
            total_pages: None,
        });
        self.metrics.record_task_submitted();

        Ok(SubmittedTask {
            task_id,
            status: "submitted",
        })
    }

    /// One poll of a task's state.
    #[instrument(skip(self))]
    pub async fn poll(&self, task_id: &str) -> TaskResult<TaskStatus> {
        validate_task_id(task_id).map_err(|_| TaskError::InvalidTaskId(task_id.to_string()))?;

        match self.worker.status(task_id).await? {
            RemoteStatus::NotFound => {
                if self.registry.take(task_id).is_some() {
                    info!(task_id, "Task no longer known to the worker, treating as cancelled");
                    self.metrics.record_task_cancelled();
                }
                Ok(TaskStatus::Cancelled)
            }
            RemoteStatus::Progress { current, total } => Ok(self.progress(task_id, current, total)),
            RemoteStatus::Success => {
                self.complete(task_id).await;
                Ok(TaskStatus::Success {
                    task_id: task_id.to_string(),
                    mono_url: artifact_url(task_id, ArtifactRole::Mono),
                    dual_url: artifact_url(task_id, ArtifactRole::Dual),
                })
            }
            RemoteStatus::Failure => {
                if self.registry.take(task_id).is_some() {
                    self.metrics.record_task_failed();
                }
                error!(task_id, "Translation failed on the worker");
                Ok(TaskStatus::Failure {
                    error: TRANSLATION_FAILED_MESSAGE.to_string(),
                })
            }
            RemoteStatus::Other(state) => {
                warn!(task_id, state = %state, "Unknown task state");
                Ok(TaskStatus::Unknown { state })
            }
        }
    }

    fn progress(&self, task_id: &str, current: u32, total: u32) -> TaskStatus {
        self.registry.note_progress(task_id, total);

        let progress = if total == 0 {
            0.0
        } else {
            round_to(current as f64 / total as f64 * 100.0, 1)
        };

        let (elapsed, estimated_remaining) = match self.registry.get(task_id) {
            Some(metadata) => {
                let elapsed = metadata.started.elapsed().as_secs_f64();
                let remaining = if current > 0 {
                    (elapsed / current as f64 * total as f64 - elapsed).max(0.0)
                } else {
                    0.0
                };
                (Some(round_to(elapsed, 1)), Some(round_to(remaining, 0)))
            }
            None => (None, None),
        };

        info!(task_id, current, total, progress, "Progress");
        TaskStatus::Progress {
            current,
            total,
            progress,
            elapsed,
            estimated_remaining,
        }
    }

    /// Fetch missing results and record the task, on every SUCCESS poll.
    ///
    /// Downloads are skipped once the artifacts exist; the log record is
    /// written only by the poller that removes the metadata entry.
    async fn complete(&self, task_id: &str) {
        let timestamp = self.registry.submitted_at(task_id).unwrap_or_else(Local::now);

        let mono_file = self.ensure_artifact(task_id, ArtifactRole::Mono, &timestamp).await;
        let dual_file = self.ensure_artifact(task_id, ArtifactRole::Dual, &timestamp).await;

        let Some(metadata) = self.registry.take(task_id) else {
            return;
        };
        self.metrics.record_task_succeeded();

        let total_time = round_to(metadata.started.elapsed().as_secs_f64(), 1);
        info!(task_id, total_time, "Translation completed successfully");

        if !self.config.save_translations() {
            return;
        }

        let record = TranslationRecord::Document(DocumentRecord {
            timestamp: Local::now(),
            task_id: metadata.task_id,
            filename: metadata.filename,
            source_lang: metadata.source_lang,
            target_lang: metadata.target_lang,
            pages: metadata.pages,
            metrics: DocumentMetrics {
                total_time,
                total_pages: metadata.total_pages,
                mono_file,
                dual_file,
                original_file: metadata.original_file,
            },
        });
        // Detached so the poll response never waits on the log rewrite
        let log = self.log.clone();
        tokio::spawn(async move {
            log.append_best_effort(record).await;
        });
    }

    /// File name of the stored artifact, downloading it first if needed.
    /// Download failures are tolerated and yield `None`.
    async fn ensure_artifact(
        &self,
        task_id: &str,
        role: ArtifactRole,
        timestamp: &DateTime<Local>,
    ) -> Option<String> {
        if let Ok(Some(path)) = self.artifacts.find(task_id, role) {
            return file_name(&path);
        }

        let bytes = match self.worker.download(task_id, role).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(task_id, %role, error = %e, "Failed to download result");
                self.metrics.record_artifact_download(false);
                return None;
            }
        };

        let name = ArtifactStore::artifact_name(timestamp, task_id, role);
        match self.artifacts.save(&name, &bytes).await {
            Ok(_) => {
                self.metrics.record_artifact_download(true);
                Some(name)
            }
            Err(e) => {
                warn!(task_id, %role, error = %e, "Failed to store result");
                self.metrics.record_artifact_download(false);
                None
            }
        }
    }

    /// Cancel a task on the worker and forget it locally.
    #[instrument(skip(self))]
    pub async fn cancel(&self, task_id: &str) -> TaskResult<CancelOutcome> {
        validate_task_id(task_id).map_err(|_| TaskError::InvalidTaskId(task_id.to_string()))?;

        let outcome = self.worker.delete(task_id).await?;
        self.registry.take(task_id);
        self.metrics.record_task_cancelled();
        info!(task_id, ?outcome, "Task cancelled");
        Ok(outcome)
    }

    /// Path of a stored artifact, if one exists.
    pub fn artifact(&self, task_id: &str, role: ArtifactRole) -> ArtifactResult<Option<PathBuf>> {
        self.artifacts.find(task_id, role)
    }
}

/// Client-facing download route of an artifact
pub fn artifact_url(task_id: &str, role: ArtifactRole) -> String {
    format!("/api/translate-pdf/{}/{}", task_id, role)
}

fn file_name(path: &std::path::Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        orchestrator: Arc<PdfOrchestrator>,
        log: TranslationLog,
        metrics: Metrics,
        dir: TempDir,
    }

    fn harness(server: &MockServer) -> Harness {
        let dir = TempDir::new().unwrap();
        let mut map = HashMap::new();
        map.insert("PDF_TRANSLATE_ENDPOINT".to_string(), server.uri());
        map.insert(
            "PDF_DIR".to_string(),
            dir.path().join("pdfs").display().to_string(),
        );
        map.insert(
            "TRANSLATIONS_FILE".to_string(),
            dir.path().join("translations.json").display().to_string(),
        );
        let config = Arc::new(Config::from_lookup(|key| map.get(key).cloned()).unwrap());

        let metrics = Metrics::new();
        let log = TranslationLog::new(&config.storage.translations_file, metrics.clone());
        let orchestrator =
            Arc::new(PdfOrchestrator::new(config, log.clone(), metrics.clone()).unwrap());
        Harness {
            orchestrator,
            log,
            metrics,
            dir,
        }
    }

    fn upload() -> DocumentUpload {
        DocumentUpload {
            filename: "paper.pdf".into(),
            bytes: Bytes::from_static(b"%PDF-1.4 original"),
            source_lang: "en".into(),
            target_lang: "ja".into(),
            pages: None,
        }
    }

    /// Wait for detached log appends to land.
    async fn wait_for_records(log: &TranslationLog, count: usize) -> Vec<TranslationRecord> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let records = log.records().await;
            if records.len() >= count || tokio::time::Instant::now() >= deadline {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn mount_submit(server: &MockServer, task_id: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/translate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": task_id})))
            .mount(server)
            .await;
    }

    fn state(state: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({"state": state}))
    }

    fn progress(n: u32, total: u32) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "state": "PROGRESS",
            "info": {"n": n, "total": total}
        }))
    }

    #[tokio::test]
    async fn test_submit_progress_success_lifecycle() {
        let server = MockServer::start().await;
        mount_submit(&server, "task-1").await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/task-1"))
            .respond_with(progress(1, 3))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/task-1"))
            .respond_with(progress(3, 3))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/task-1"))
            .respond_with(state("SUCCESS"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/task-1/mono"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mono".to_vec()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/task-1/dual"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"dual".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness(&server);
        let orch = &h.orchestrator;

        let submitted = orch.submit(upload()).await.unwrap();
        assert_eq!(submitted.task_id, "task-1");
        assert_eq!(submitted.status, "submitted");
        assert!(orch.artifact("task-1", ArtifactRole::Original).unwrap().is_some());

        match orch.poll("task-1").await.unwrap() {
            TaskStatus::Progress {
                current,
                total,
                progress,
                elapsed,
                estimated_remaining,
            } => {
                assert_eq!((current, total), (1, 3));
                assert_eq!(progress, 33.3);
                assert!(elapsed.is_some());
                assert!(estimated_remaining.is_some());
            }
            other => panic!("expected progress, got {:?}", other),
        }

        match orch.poll("task-1").await.unwrap() {
            TaskStatus::Progress { progress, .. } => assert_eq!(progress, 100.0),
            other => panic!("expected progress, got {:?}", other),
        }

        let first = orch.poll("task-1").await.unwrap();
        let second = orch.poll("task-1").await.unwrap();
        assert_eq!(
            first,
            TaskStatus::Success {
                task_id: "task-1".into(),
                mono_url: "/api/translate-pdf/task-1/mono".into(),
                dual_url: "/api/translate-pdf/task-1/dual".into(),
            }
        );
        assert_eq!(first, second);

        let mono = orch.artifact("task-1", ArtifactRole::Mono).unwrap().unwrap();
        assert_eq!(std::fs::read(mono).unwrap(), b"mono");
        assert!(orch.artifact("task-1", ArtifactRole::Dual).unwrap().is_some());

        let records = wait_for_records(&h.log, 1).await;
        assert_eq!(records.len(), 1);
        match &records[0] {
            TranslationRecord::Document(record) => {
                assert_eq!(record.task_id, "task-1");
                assert_eq!(record.filename, "paper.pdf");
                assert_eq!(record.metrics.total_pages, Some(3));
                assert!(record.metrics.mono_file.as_deref().unwrap().ends_with("_task-1_mono.pdf"));
                assert!(record.metrics.dual_file.as_deref().unwrap().ends_with("_task-1_dual.pdf"));
                assert!(record.metrics.original_file.as_deref().unwrap().ends_with("_task-1_original.pdf"));
            }
            other => panic!("unexpected record {:?}", other),
        }

        assert!(orch.registry().is_empty());
        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.tasks_submitted, 1);
        assert_eq!(snapshot.tasks_succeeded, 1);
        assert_eq!(snapshot.artifact_downloads, 2);
        assert!(h.dir.path().join("pdfs").is_dir());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_success_polls_write_one_record() {
        let server = MockServer::start().await;
        mount_submit(&server, "task-2").await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/task-2"))
            .respond_with(state("SUCCESS"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/task-2/mono"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mono".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/task-2/dual"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"dual".to_vec()))
            .mount(&server)
            .await;

        let h = harness(&server);
        h.orchestrator.submit(upload()).await.unwrap();

        let pollers: Vec<_> = (0..4)
            .map(|_| {
                let orch = Arc::clone(&h.orchestrator);
                tokio::spawn(async move { orch.poll("task-2").await.unwrap() })
            })
            .collect();
        let mut responses = Vec::new();
        for poller in pollers {
            responses.push(poller.await.unwrap());
        }

        assert!(responses.iter().all(|r| *r == responses[0]));
        assert!(matches!(responses[0], TaskStatus::Success { .. }));
        assert_eq!(wait_for_records(&h.log, 1).await.len(), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.log.records().await.len(), 1);
        assert_eq!(h.metrics.snapshot().tasks_succeeded, 1);
    }

    #[tokio::test]
    async fn test_partial_artifacts_are_tolerated() {
        let server = MockServer::start().await;
        mount_submit(&server, "task-3").await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/task-3"))
            .respond_with(state("SUCCESS"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/task-3/mono"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mono".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/task-3/dual"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let h = harness(&server);
        h.orchestrator.submit(upload()).await.unwrap();

        let status = h.orchestrator.poll("task-3").await.unwrap();
        assert!(matches!(status, TaskStatus::Success { .. }));

        let records = wait_for_records(&h.log, 1).await;
        assert_eq!(records.len(), 1);
        match &records[0] {
            TranslationRecord::Document(record) => {
                assert!(record.metrics.mono_file.is_some());
                assert!(record.metrics.dual_file.is_none());
            }
            other => panic!("unexpected record {:?}", other),
        }
        assert_eq!(h.metrics.snapshot().artifact_download_failures, 1);
    }

    #[tokio::test]
    async fn test_success_poll_does_not_wait_on_log() {
        let server = MockServer::start().await;
        mount_submit(&server, "task-9").await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/task-9"))
            .respond_with(state("SUCCESS"))
            .mount(&server)
            .await;

        let h = harness(&server);
        h.orchestrator.submit(upload()).await.unwrap();

        let busy = h.log.hold_write_lock().await;
        let status = tokio::time::timeout(Duration::from_secs(3), h.orchestrator.poll("task-9"))
            .await
            .expect("poll waited on the translation log")
            .unwrap();
        assert!(matches!(status, TaskStatus::Success { .. }));
        assert!(h.log.records().await.is_empty());

        drop(busy);
        assert_eq!(wait_for_records(&h.log, 1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_success_ignores_other_tasks_with_id_suffix() {
        let server = MockServer::start().await;
        mount_submit(&server, "1").await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/1"))
            .respond_with(state("SUCCESS"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/1/mono"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mine".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness(&server);
        std::fs::write(
            h.dir.path().join("pdfs").join("20240101_000000_21_mono.pdf"),
            b"someone else",
        )
        .unwrap();
        h.orchestrator.submit(upload()).await.unwrap();

        let status = h.orchestrator.poll("1").await.unwrap();
        assert!(matches!(status, TaskStatus::Success { .. }));

        let mono = h.orchestrator.artifact("1", ArtifactRole::Mono).unwrap().unwrap();
        assert_eq!(std::fs::read(mono).unwrap(), b"mine");
    }

    #[tokio::test]
    async fn test_not_found_maps_to_cancelled() {
        let server = MockServer::start().await;
        mount_submit(&server, "task-4").await;

        let h = harness(&server);
        h.orchestrator.submit(upload()).await.unwrap();
        assert!(h.orchestrator.registry().contains("task-4"));

        // No status mock mounted: wiremock answers 404
        assert_eq!(h.orchestrator.poll("task-4").await.unwrap(), TaskStatus::Cancelled);
        assert!(!h.orchestrator.registry().contains("task-4"));

        // Without local metadata the answer is the same
        assert_eq!(h.orchestrator.poll("never-seen").await.unwrap(), TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_failure_and_unknown_states() {
        let server = MockServer::start().await;
        mount_submit(&server, "task-5").await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/task-5"))
            .respond_with(state("FAILURE"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/task-6"))
            .respond_with(state("PENDING"))
            .mount(&server)
            .await;

        let h = harness(&server);
        h.orchestrator.submit(upload()).await.unwrap();

        assert_eq!(
            h.orchestrator.poll("task-5").await.unwrap(),
            TaskStatus::Failure {
                error: TRANSLATION_FAILED_MESSAGE.into()
            }
        );
        assert!(h.orchestrator.registry().is_empty());
        assert!(h.log.records().await.is_empty());

        assert_eq!(
            h.orchestrator.poll("task-6").await.unwrap(),
            TaskStatus::Unknown {
                state: "PENDING".into()
            }
        );
    }

    #[tokio::test]
    async fn test_progress_with_zero_total() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/translate/task-7"))
            .respond_with(progress(0, 0))
            .mount(&server)
            .await;

        let h = harness(&server);
        assert_eq!(
            h.orchestrator.poll("task-7").await.unwrap(),
            TaskStatus::Progress {
                current: 0,
                total: 0,
                progress: 0.0,
                elapsed: None,
                estimated_remaining: None,
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_outcomes() {
        let server = MockServer::start().await;
        mount_submit(&server, "task-8").await;
        Mock::given(method("DELETE"))
            .and(path("/v1/translate/task-8"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/translate/stuck"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let h = harness(&server);
        h.orchestrator.submit(upload()).await.unwrap();

        assert_eq!(
            h.orchestrator.cancel("task-8").await.unwrap(),
            CancelOutcome::Deleted
        );
        assert!(h.orchestrator.registry().is_empty());

        assert_eq!(
            h.orchestrator.cancel("gone").await.unwrap(),
            CancelOutcome::AlreadyGone
        );
        assert!(matches!(
            h.orchestrator.cancel("stuck").await,
            Err(TaskError::CancelRejected { status: 500, .. })
        ));
        assert!(matches!(
            h.orchestrator.cancel("../x").await,
            Err(TaskError::InvalidTaskId(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_failures_track_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let h = harness(&server);
        assert!(matches!(
            h.orchestrator.submit(upload()).await,
            Err(TaskError::MissingTaskId)
        ));
        assert!(matches!(
            h.orchestrator.submit(upload()).await,
            Err(TaskError::SubmitRejected { status: 502, .. })
        ));
        assert!(h.orchestrator.registry().is_empty());

        let empty = DocumentUpload {
            bytes: Bytes::new(),
            ..upload()
        };
        let before = server.received_requests().await.unwrap().len();
        assert!(matches!(
            h.orchestrator.submit(empty).await,
            Err(TaskError::MissingFile)
        ));
        assert_eq!(server.received_requests().await.unwrap().len(), before);
    }
}
