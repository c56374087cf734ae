// Error types for the relay, the task orchestrator and the persistence layer
//
// Using thiserror so every failure carries enough context to be logged once
// and, where it reaches a client, rendered as a readable message.

use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of a single text-translation relay.
///
/// The `Display` text of each variant is exactly what the client receives
/// in its `{error}` event.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Cannot connect to the LLM server at {endpoint}")]
    ConnectionRefused { endpoint: String },

    #[error("The LLM server at {endpoint} is unreachable")]
    HostUnreachable { endpoint: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {reason}")]
    UpstreamStatus { status: u16, reason: String },

    #[error("Upstream stream failed: {0}")]
    Transport(String),

    #[error("No text to translate")]
    EmptyText,

    /// The client hung up; nothing more can be sent to it.
    #[error("Client disconnected")]
    ClientDisconnected,
}

impl RelayError {
    /// Classify a reqwest failure into the connectivity taxonomy.
    ///
    /// Refused and unreachable hosts are told apart by the I/O error buried
    /// in the source chain; any other connect failure (DNS included) is a
    /// generic network error.
    pub fn from_reqwest(err: reqwest::Error, endpoint: &str) -> Self {
        Self::classify(io_error_kind(&err), err.is_connect(), err.to_string(), endpoint)
    }

    fn classify(
        kind: Option<io::ErrorKind>,
        is_connect: bool,
        message: String,
        endpoint: &str,
    ) -> Self {
        match kind {
            Some(io::ErrorKind::ConnectionRefused) => RelayError::ConnectionRefused {
                endpoint: endpoint.to_string(),
            },
            Some(io::ErrorKind::HostUnreachable) | Some(io::ErrorKind::NetworkUnreachable) => {
                RelayError::HostUnreachable {
                    endpoint: endpoint.to_string(),
                }
            }
            _ if is_connect => RelayError::Network(message),
            _ => RelayError::Transport(message),
        }
    }

    pub fn client_message(&self) -> String {
        self.to_string()
    }
}

fn io_error_kind(err: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source: Option<&(dyn StdError + 'static)> = StdError::source(err);
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = current.source();
    }
    None
}

/// Failures of document submission, polling and cancellation.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("No PDF file was uploaded")]
    MissingFile,

    #[error("Invalid page selection: {0}")]
    InvalidPages(String),

    #[error("Invalid task id: {0:?}")]
    InvalidTaskId(String),

    #[error("Failed to submit translation task: HTTP {status} {reason}")]
    SubmitRejected { status: u16, reason: String },

    #[error("Translation worker did not return a task id")]
    MissingTaskId,

    #[error("Failed to query task {task_id}: HTTP {status}")]
    StatusQueryFailed { task_id: String, status: u16 },

    #[error("Failed to cancel task {task_id}: HTTP {status}")]
    CancelRejected { task_id: String, status: u16 },

    #[error("Failed to download {role} result for task {task_id}: HTTP {status}")]
    DownloadFailed {
        task_id: String,
        role: String,
        status: u16,
    },

    #[error("Invalid response from translation worker: {0}")]
    InvalidResponse(String),

    #[error("Translation worker request failed: {0}")]
    WorkerUnavailable(#[from] reqwest::Error),
}

/// Translation log persistence errors
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Failed to write translation log {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize translation log: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Artifact store errors
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Failed to create artifact directory {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write artifact {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid artifact lookup pattern: {0}")]
    InvalidPattern(#[from] glob::PatternError),

    #[error("Invalid task id: {0:?}")]
    InvalidTaskId(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not a valid URL: {value}")]
    InvalidEndpoint { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("Environment variable {name} has an invalid value: {value}")]
    InvalidValue { name: &'static str, value: String },
}

pub type RelayResult<T> = Result<T, RelayError>;
pub type TaskResult<T> = Result<T, TaskError>;
pub type LogResult<T> = Result<T, LogError>;
pub type ArtifactResult<T> = Result<T, ArtifactError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
