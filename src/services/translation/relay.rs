use anyhow::{Context, Result};
use chrono::Local;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{RelayError, RelayResult};
use crate::core::types::{ClientEvent, TextRecord, TextTranslationRequest, TranslationRecord};
use crate::services::storage::TranslationLog;
use crate::services::translation::prompt::build_text_prompt;
use crate::services::translation::stream::{Flow, StreamState, StreamStep};
use crate::utils::Metrics;

/// Buffered client events per relay before the upstream read waits on the client
const CLIENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    stream: bool,
}

/// Relays a streamed chat completion to one client at a time.
///
/// Each call to [`StreamRelay::spawn`] runs an independent relay task with
/// its own `StreamState`; the relay itself only holds shared, read-only
/// collaborators.
pub struct StreamRelay {
    config: Arc<Config>,
    http_client: reqwest::Client,
    log: TranslationLog,
    metrics: Metrics,
}

impl StreamRelay {
    pub fn new(config: Arc<Config>, log: TranslationLog, metrics: Metrics) -> Result<Self> {
        // No overall timeout: a translation may stream for minutes. The read
        // timeout bounds each wait for the next chunk instead.
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(config.llm.read_timeout)
            .build()
            .context("Failed to create LLM HTTP client")?;

        Ok(Self {
            config,
            http_client,
            log,
            metrics,
        })
    }

    /// Start relaying `request` and return the receiving end of its event stream.
    ///
    /// The stream ends when the relay task finishes, whatever the outcome.
    pub fn spawn(self: &Arc<Self>, request: TextTranslationRequest) -> mpsc::Receiver<ClientEvent> {
        let (tx, rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            relay.run(request, tx).await;
        });
        rx
    }

    /// Relay one request to completion, sending client events through `tx`.
    ///
    /// `tx` is dropped before the translation is persisted, so the client sees
    /// the end of its stream without waiting on the log write.
    #[instrument(skip_all, fields(text_len = request.text.len()))]
    pub async fn run(&self, request: TextTranslationRequest, tx: mpsc::Sender<ClientEvent>) {
        self.metrics.record_relay_started();
        let (source_lang, target_lang) = request.language_pair();
        info!(
            source = %source_lang,
            target = %target_lang,
            endpoint = %self.config.llm.endpoint,
            "Text translation request"
        );

        let mut state = StreamState::new(Instant::now(), self.config.llm.failure_sentinel.clone());

        let outcome = self
            .relay(&request.text, &source_lang, &target_lang, &mut state, &tx)
            .await;
        let relayed = outcome.is_ok();
        match outcome {
            Ok(()) => {}
            Err(RelayError::ClientDisconnected) => {
                info!(tokens = state.token_count(), "Client disconnected, stopping relay");
            }
            Err(err) => {
                error!(error = %err, "Text translation relay failed");
                self.metrics.record_relay_failed();
                let _ = tx.send(ClientEvent::Error(err.client_message())).await;
            }
        }
        drop(tx);

        let (output, completion) = state.into_parts();
        let Some(completion) = completion else {
            if relayed {
                warn!("Upstream stream ended without a completion signal");
            }
            return;
        };
        self.metrics.record_relay_completed(&completion.metrics);

        if !self.config.save_translations() || output.is_empty() {
            return;
        }

        let record = TranslationRecord::Text(TextRecord {
            timestamp: Local::now(),
            source_lang,
            target_lang,
            input: request.text,
            output,
            metrics: completion.metrics.to_record(),
        });
        self.log.append_best_effort(record).await;
    }

    async fn relay(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        state: &mut StreamState,
        tx: &mpsc::Sender<ClientEvent>,
    ) -> RelayResult<()> {
        if text.trim().is_empty() {
            return Err(RelayError::EmptyText);
        }

        let endpoint = &self.config.llm.endpoint;
        let url = format!("{}/v1/chat/completions", endpoint);
        let body = ChatCompletionRequest {
            model: &self.config.llm.model,
            messages: vec![ChatMessage {
                role: "user",
                content: build_text_prompt(text, source_lang, target_lang),
            }],
            stop: Some(self.config.llm.stop_tokens.as_slice()).filter(|stop| !stop.is_empty()),
            stream: true,
        };

        debug!(url = %url, "Sending request to LLM");
        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::from_reqwest(e, endpoint))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| RelayError::from_reqwest(e, endpoint))?;
            debug!(bytes = chunk.len(), "Received chunk");

            let step = state.push_chunk(&chunk, Instant::now());
            let flow = step.flow;
            forward(step, tx).await?;
            if flow == Flow::Abort {
                return Ok(());
            }
        }

        forward(state.finish(Instant::now()), tx).await
    }
}

async fn forward(step: StreamStep, tx: &mpsc::Sender<ClientEvent>) -> RelayResult<()> {
    for event in step.events {
        tx.send(event)
            .await
            .map_err(|_| RelayError::ClientDisconnected)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(endpoint: &str, dir: &TempDir, extra: &[(&str, &str)]) -> Arc<Config> {
        let mut map: HashMap<String, String> = HashMap::new();
        map.insert("LLM_ENDPOINT".into(), endpoint.into());
        map.insert(
            "TRANSLATIONS_FILE".into(),
            dir.path().join("translations.json").display().to_string(),
        );
        for (k, v) in extra {
            map.insert(k.to_string(), v.to_string());
        }
        Arc::new(Config::from_lookup(|key| map.get(key).cloned()).unwrap())
    }

    async fn run_relay(config: Arc<Config>, text: &str) -> (Vec<ClientEvent>, TranslationLog) {
        let log = TranslationLog::new(&config.storage.translations_file, Metrics::new());
        let relay = StreamRelay::new(config, log.clone(), Metrics::new()).unwrap();

        let (tx, mut rx) = mpsc::channel(256);
        relay
            .run(TextTranslationRequest::new(text, "en", "ja"), tx)
            .await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (events, log)
    }

    fn sse_body(lines: &[&str]) -> String {
        lines.iter().map(|l| format!("data: {}\n\n", l)).collect()
    }

    #[tokio::test]
    async fn test_relay_streams_tokens_and_saves_once() {
        let server = MockServer::start().await;
        let body = sse_body(&[
            r#"{"choices":[{"delta":{"content":"こん"}}]}"#,
            r#"{"choices":[{"delta":{"content":"にちは"}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ]);
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "plamo-2-translate",
                "stream": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (events, log) = run_relay(test_config(&server.uri(), &dir, &[]), "Hello").await;

        assert_eq!(
            events,
            vec![
                ClientEvent::Token("こん".into()),
                ClientEvent::Token("にちは".into()),
                ClientEvent::Done,
            ]
        );

        let records = log.records().await;
        assert_eq!(records.len(), 1);
        match &records[0] {
            TranslationRecord::Text(record) => {
                assert_eq!(record.input, "Hello");
                assert_eq!(record.output, "こんにちは");
                assert_eq!(record.source_lang, "en");
                assert_eq!(record.target_lang, "ja");
                assert_eq!(record.metrics.token_count, 2);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_relay_respects_save_switch() {
        let server = MockServer::start().await;
        let body = sse_body(&[r#"{"choices":[{"delta":{"content":"A"}}]}"#, "[DONE]"]);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let config = test_config(&server.uri(), &dir, &[("SAVE_TRANSLATIONS", "false")]);
        let (events, log) = run_relay(config, "Hello").await;

        assert_eq!(events.last(), Some(&ClientEvent::Done));
        assert!(log.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_relay_stops_reading_at_done() {
        let server = MockServer::start().await;
        let body = sse_body(&[
            r#"{"choices":[{"delta":{"content":"A"}}]}"#,
            "[DONE]",
            r#"{"choices":[{"delta":{"content":"late"}}]}"#,
        ]);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (events, log) = run_relay(test_config(&server.uri(), &dir, &[]), "Hello").await;

        assert_eq!(events, vec![ClientEvent::Token("A".into()), ClientEvent::Done]);
        let records = log.records().await;
        assert_eq!(records.len(), 1);
        match &records[0] {
            TranslationRecord::Text(record) => assert_eq!(record.output, "A"),
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_relay_failure_sentinel_saves_partial_output() {
        let server = MockServer::start().await;
        let body = sse_body(&[
            r#"{"choices":[{"delta":{"content":"Part"}}]}"#,
            r#"{"choices":[{"delta":{"content":"<|fail|>"}}]}"#,
            r#"{"choices":[{"delta":{"content":"ignored"}}]}"#,
            "[DONE]",
        ]);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let config = test_config(&server.uri(), &dir, &[("LLM_FAILURE_SENTINEL", "<|fail|>")]);
        let (events, log) = run_relay(config, "Hello").await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ClientEvent::Token("Part".into()));
        assert!(matches!(events[1], ClientEvent::Error(_)));

        let records = log.records().await;
        assert_eq!(records.len(), 1);
        match &records[0] {
            TranslationRecord::Text(record) => assert_eq!(record.output, "Part"),
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_relay_reports_upstream_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (events, log) = run_relay(test_config(&server.uri(), &dir, &[]), "Hello").await;

        assert_eq!(
            events,
            vec![ClientEvent::Error("HTTP 500: Internal Server Error".into())]
        );
        assert!(log.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_relay_reports_unreachable_upstream() {
        let dir = TempDir::new().unwrap();
        let (events, _) = run_relay(test_config("http://127.0.0.1:1", &dir, &[]), "Hello").await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            ClientEvent::Error(message) => assert!(message.contains("Cannot connect")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_relay_rejects_empty_text() {
        let dir = TempDir::new().unwrap();
        let (events, _) = run_relay(test_config("http://127.0.0.1:1", &dir, &[]), "   ").await;
        assert_eq!(events, vec![ClientEvent::Error("No text to translate".into())]);
    }
}
