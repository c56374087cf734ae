// Incremental decoding of an upstream chat-completion event stream
//
// The transport hands us byte chunks whose boundaries have nothing to do with
// event boundaries. `LineBuffer` turns them back into complete lines and
// `StreamState` turns lines into client events, tracking everything needed to
// finalize the stream exactly once.

use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::core::types::ClientEvent;
use crate::utils::StreamMetrics;

pub const DATA_PREFIX: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";

pub const NO_OUTPUT_MESSAGE: &str = "Translation failed: the model produced no output";
pub const FAILURE_SENTINEL_MESSAGE: &str = "Translation failed: the model reported an error";

/// Reassembles newline-terminated lines from arbitrarily split byte chunks.
///
/// Works on raw bytes so a multi-byte UTF-8 character split across two
/// chunks is decoded only once it is complete.
#[derive(Debug, Default)]
pub struct LineBuffer {
    carry: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.carry[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            lines.push(String::from_utf8_lossy(&self.carry[start..end]).into_owned());
            start = end + 1;
        }
        self.carry.drain(..start);

        lines
    }

    /// Take whatever was never newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        Some(rest)
    }

    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

/// Whether the relay should keep reading upstream data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Continue,
    /// Stop reading; the stream has been terminated early.
    Abort,
}

/// Result of feeding data into a `StreamState`
#[derive(Debug, Default, PartialEq)]
pub struct StreamStep {
    pub events: Vec<ClientEvent>,
    pub flow: Flow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// `data: [DONE]`
    Done,
    /// `finish_reason: "stop"`
    Finished,
    /// The model embedded the failure sentinel in its output
    FailureSentinel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Completion {
    pub reason: CompletionReason,
    pub metrics: StreamMetrics,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Per-request relay state. Owned by exactly one relay and dropped with it.
#[derive(Debug)]
pub struct StreamState {
    lines: LineBuffer,
    output: String,
    token_count: u64,
    start: Instant,
    first_token_at: Option<Instant>,
    failure_sentinel: Option<String>,
    completion: Option<Completion>,
}

impl StreamState {
    pub fn new(start: Instant, failure_sentinel: Option<String>) -> Self {
        Self {
            lines: LineBuffer::default(),
            output: String::new(),
            token_count: 0,
            start,
            first_token_at: None,
            failure_sentinel,
            completion: None,
        }
    }

    /// Feed one transport chunk.
    pub fn push_chunk(&mut self, chunk: &[u8], now: Instant) -> StreamStep {
        let mut step = StreamStep::default();
        for line in self.lines.push(chunk) {
            if self.process_line(&line, now, &mut step.events) == Flow::Abort {
                step.flow = Flow::Abort;
                break;
            }
        }
        step
    }

    /// Handle the unterminated remainder once the upstream body is exhausted.
    ///
    /// Only the `[DONE]` sentinel is honored here; a partial JSON payload left
    /// behind by a dropped connection is not decoded.
    pub fn finish(&mut self, now: Instant) -> StreamStep {
        let mut step = StreamStep::default();
        let Some(rest) = self.lines.finish() else {
            return step;
        };
        debug!(remaining = %rest, "Processing unterminated stream remainder");

        if data_payload(&rest) == Some(DONE_SENTINEL)
            && self.finalize(CompletionReason::Done, now)
        {
            step.events.push(ClientEvent::Done);
        }
        step
    }

    fn process_line(&mut self, line: &str, now: Instant, events: &mut Vec<ClientEvent>) -> Flow {
        let Some(payload) = data_payload(line) else {
            return Flow::Continue;
        };

        // Nothing after `[DONE]` is read, even if the connection stays open
        if payload == DONE_SENTINEL {
            if self.finalize(CompletionReason::Done, now) {
                events.push(ClientEvent::Done);
            }
            return Flow::Abort;
        }

        let chunk: CompletionChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, payload = %payload, "Skipping malformed stream payload");
                return Flow::Continue;
            }
        };

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Flow::Continue;
        };

        if let Some(content) = choice
            .delta
            .and_then(|delta| delta.content)
            .filter(|content| !content.is_empty())
        {
            if self.accept_content(content, now, events) == Flow::Abort {
                return Flow::Abort;
            }
        }

        if choice.finish_reason.as_deref() == Some("stop")
            && self.finalize(CompletionReason::Finished, now)
        {
            if self.token_count == 0 {
                warn!("Upstream finished before generating any tokens");
                events.push(ClientEvent::Error(NO_OUTPUT_MESSAGE.to_string()));
            } else {
                events.push(ClientEvent::Done);
            }
        }

        Flow::Continue
    }

    /// Forward a content fragment, stopping at the failure sentinel.
    ///
    /// The sentinel may be split across fragments, so the search also covers
    /// the end of the output forwarded so far. A sentinel prefix that already
    /// reached the client is cut from the saved output.
    fn accept_content(&mut self, content: String, now: Instant, events: &mut Vec<ClientEvent>) -> Flow {
        let Some(sentinel) = self.failure_sentinel.clone() else {
            self.accept_token(content, now, events);
            return Flow::Continue;
        };

        let mut tail_start = self
            .output
            .len()
            .saturating_sub(sentinel.len().saturating_sub(1));
        while !self.output.is_char_boundary(tail_start) {
            tail_start -= 1;
        }
        let tail_len = self.output.len() - tail_start;
        let window = format!("{}{}", &self.output[tail_start..], content);

        let Some(idx) = window.find(&sentinel) else {
            self.accept_token(content, now, events);
            return Flow::Continue;
        };

        if idx >= tail_len {
            let before = &content[..idx - tail_len];
            if !before.is_empty() {
                self.accept_token(before.to_string(), now, events);
            }
        } else {
            self.output.truncate(tail_start + idx);
        }
        warn!(tokens = self.token_count, "Failure sentinel found in model output");
        self.finalize(CompletionReason::FailureSentinel, now);
        events.push(ClientEvent::Error(FAILURE_SENTINEL_MESSAGE.to_string()));
        Flow::Abort
    }

    fn accept_token(&mut self, token: String, now: Instant, events: &mut Vec<ClientEvent>) {
        self.token_count += 1;
        self.first_token_at.get_or_insert(now);
        self.output.push_str(&token);
        debug!(n = self.token_count, token = ?token, "Token");
        events.push(ClientEvent::Token(token));
    }

    /// First call wins; later triggers are no-ops and return false.
    fn finalize(&mut self, reason: CompletionReason, now: Instant) -> bool {
        if self.completion.is_some() {
            return false;
        }

        let metrics = StreamMetrics::compute(self.token_count, self.start, self.first_token_at, now);
        info!(
            reason = ?reason,
            tokens = metrics.token_count,
            ttft_s = metrics.time_to_first_token.as_secs_f64(),
            total_s = metrics.total_time.as_secs_f64(),
            tokens_per_sec = metrics.tokens_per_sec,
            "Stream finalized"
        );
        self.completion = Some(Completion { reason, metrics });
        true
    }

    pub fn completion(&self) -> Option<&Completion> {
        self.completion.as_ref()
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn token_count(&self) -> u64 {
        self.token_count
    }

    /// Accumulated output together with the completion, if the stream was finalized.
    pub fn into_parts(self) -> (String, Option<Completion>) {
        (self.output, self.completion)
    }
}

fn data_payload(line: &str) -> Option<&str> {
    line.trim().strip_prefix(DATA_PREFIX).map(str::trim)
}
