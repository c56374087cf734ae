use anyhow::Context;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::core::config::Config;
use crate::core::errors::{TaskError, TaskResult};
use crate::core::types::ArtifactRole;
use crate::services::translation::prompt::{build_document_prompt, document_languages};

/// A document as received from the client, ready to forward to the worker.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub filename: String,
    pub bytes: Bytes,
    pub source_lang: String,
    pub target_lang: String,
    pub pages: Option<serde_json::Value>,
}

/// JSON parameter block of the submission
#[derive(Debug, Serialize)]
struct TranslateParams<'a> {
    lang_in: &'a str,
    lang_out: &'a str,
    service: &'a str,
    thread: u32,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pages: Option<&'a serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    state: String,
    #[serde(default)]
    info: Option<ProgressInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct ProgressInfo {
    #[serde(default)]
    n: u32,
    #[serde(default)]
    total: u32,
}

/// Task state as reported by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Progress { current: u32, total: u32 },
    Success,
    Failure,
    /// Any state string the worker uses that has no mapping here
    Other(String),
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Deleted,
    AlreadyGone,
}

/// HTTP client for the remote PDF translation worker.
///
/// Every call is a single request with a short timeout; downloads get their
/// own longer timeout.
pub struct PdfWorkerClient {
    config: Arc<Config>,
    http_client: reqwest::Client,
}

impl PdfWorkerClient {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.pdf.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create PDF worker HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn task_url(&self, task_id: &str) -> String {
        format!("{}/v1/translate/{}", self.config.pdf.endpoint, task_id)
    }

    /// Upload a document and return the worker-assigned task id.
    #[instrument(skip(self, upload), fields(filename = %upload.filename, bytes = upload.bytes.len()))]
    pub async fn submit(&self, upload: &DocumentUpload) -> TaskResult<String> {
        let (lang_in, lang_out) = document_languages(&upload.source_lang, &upload.target_lang);
        let params = TranslateParams {
            lang_in,
            lang_out,
            service: &self.config.pdf.service,
            thread: self.config.pdf.threads,
            prompt: build_document_prompt(lang_in, lang_out),
            pages: upload.pages.as_ref(),
        };
        let data = serde_json::to_string(&params)
            .map_err(|e| TaskError::InvalidResponse(e.to_string()))?;

        let file_part = Part::bytes(upload.bytes.to_vec())
            .file_name(upload.filename.clone())
            .mime_str("application/pdf")?;
        let form = Form::new().part("file", file_part).text("data", data);

        let url = format!("{}/v1/translate", self.config.pdf.endpoint);
        info!(url = %url, lang_in, lang_out, "Submitting PDF translation task");

        let response = self.http_client.post(&url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TaskError::SubmitRejected {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TaskError::InvalidResponse(e.to_string()))?;

        match body.get("id") {
            Some(serde_json::Value::String(id)) if !id.is_empty() => Ok(id.clone()),
            Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
            _ => Err(TaskError::MissingTaskId),
        }
    }

    /// Query the worker once for the task's state.
    pub async fn status(&self, task_id: &str) -> TaskResult<RemoteStatus> {
        let response = self.http_client.get(self.task_url(task_id)).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(RemoteStatus::NotFound);
        }
        if !status.is_success() {
            return Err(TaskError::StatusQueryFailed {
                task_id: task_id.to_string(),
                status: status.as_u16(),
            });
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| TaskError::InvalidResponse(e.to_string()))?;
        debug!(task_id, state = %body.state, "Worker task state");

        Ok(match body.state.as_str() {
            "PROGRESS" => {
                let info = body.info.unwrap_or_default();
                RemoteStatus::Progress {
                    current: info.n,
                    total: info.total,
                }
            }
            "SUCCESS" => RemoteStatus::Success,
            "FAILURE" => RemoteStatus::Failure,
            _ => RemoteStatus::Other(body.state),
        })
    }

    /// Fetch one result variant of a finished task.
    pub async fn download(&self, task_id: &str, role: ArtifactRole) -> TaskResult<Bytes> {
        let url = format!("{}/{}", self.task_url(task_id), role);
        let response = self
            .http_client
            .get(&url)
            .timeout(self.config.pdf.download_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TaskError::DownloadFailed {
                task_id: task_id.to_string(),
                role: role.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.bytes().await?)
    }

    /// Ask the worker to drop a task. A task the worker no longer knows is
    /// already cancelled as far as the caller is concerned.
    pub async fn delete(&self, task_id: &str) -> TaskResult<CancelOutcome> {
        let response = self.http_client.delete(self.task_url(task_id)).send().await?;

        match response.status() {
            status if status.is_success() => Ok(CancelOutcome::Deleted),
            StatusCode::NOT_FOUND => Ok(CancelOutcome::AlreadyGone),
            status => Err(TaskError::CancelRejected {
                task_id: task_id.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}
