// Shared request, event and record types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::core::language;

/// Text translation request body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextTranslationRequest {
    #[serde(default)]
    pub text: String,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    /// Fixed direction such as `en-ja`; overrides both language tags
    pub direction: Option<String>,
}

impl TextTranslationRequest {
    pub fn new(text: impl Into<String>, source_lang: &str, target_lang: &str) -> Self {
        Self {
            text: text.into(),
            source_lang: Some(source_lang.to_string()),
            target_lang: Some(target_lang.to_string()),
            direction: None,
        }
    }

    /// Source and target language codes, defaulting to `auto`.
    pub fn language_pair(&self) -> (String, String) {
        if let Some(pair) = self.direction.as_deref().and_then(split_direction) {
            return pair;
        }

        (
            self.source_lang.clone().unwrap_or_else(|| "auto".to_string()),
            self.target_lang.clone().unwrap_or_else(|| "auto".to_string()),
        )
    }
}

// Codes may contain '-' themselves (ja-easy, zh-tw), so try every split
// point and keep the first one where both halves are known codes.
fn split_direction(direction: &str) -> Option<(String, String)> {
    direction
        .match_indices('-')
        .map(|(idx, _)| (&direction[..idx], &direction[idx + 1..]))
        .find(|(src, dst)| {
            language::display_name(src).is_some() && language::display_name(dst).is_some()
        })
        .map(|(src, dst)| (src.to_string(), dst.to_string()))
}

/// Event forwarded to the browser over the text-translation event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Token(String),
    Done,
    Error(String),
}

impl ClientEvent {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ClientEvent::Token(token) => serde_json::json!({ "token": token }),
            ClientEvent::Done => serde_json::json!({ "done": true }),
            ClientEvent::Error(message) => serde_json::json!({ "error": message }),
        }
    }
}

/// Metrics snapshot stored with a text translation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMetrics {
    pub token_count: u64,
    pub time_to_first_token: f64,
    pub total_time: f64,
    pub tokens_per_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRecord {
    pub timestamp: DateTime<Local>,
    pub source_lang: String,
    pub target_lang: String,
    pub input: String,
    pub output: String,
    pub metrics: TextMetrics,
}

/// Metrics snapshot stored with a document translation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetrics {
    pub total_time: f64,
    pub total_pages: Option<u32>,
    pub mono_file: Option<String>,
    pub dual_file: Option<String>,
    pub original_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub timestamp: DateTime<Local>,
    pub task_id: String,
    pub filename: String,
    pub source_lang: String,
    pub target_lang: String,
    pub pages: Option<serde_json::Value>,
    pub metrics: DocumentMetrics,
}

/// One entry of the append-only translation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TranslationRecord {
    #[serde(rename = "text")]
    Text(TextRecord),
    #[serde(rename = "pdf")]
    Document(DocumentRecord),
}

/// Process-lifetime bookkeeping for a submitted document task
#[derive(Debug, Clone)]
pub struct PdfTaskMetadata {
    pub task_id: String,
    pub filename: String,
    pub source_lang: String,
    pub target_lang: String,
    pub pages: Option<serde_json::Value>,
    pub submitted_at: DateTime<Local>,
    pub started: Instant,
    pub original_file: Option<String>,
    /// Last page total reported by the worker
    pub total_pages: Option<u32>,
}

/// Client-visible state of a document task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskStatus {
    Progress {
        current: u32,
        total: u32,
        progress: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        elapsed: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_remaining: Option<f64>,
    },
    Success {
        task_id: String,
        mono_url: String,
        dual_url: String,
    },
    Failure {
        error: String,
    },
    Cancelled,
    Unknown {
        state: String,
    },
}

/// Response to a successful document submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmittedTask {
    pub task_id: String,
    pub status: &'static str,
}

/// Role tag of a stored PDF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactRole {
    Original,
    Mono,
    Dual,
}

impl ArtifactRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactRole::Original => "original",
            ArtifactRole::Mono => "mono",
            ArtifactRole::Dual => "dual",
        }
    }

    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "original" => Some(ArtifactRole::Original),
            "mono" => Some(ArtifactRole::Mono),
            "dual" => Some(ArtifactRole::Dual),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
