// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Assemble request payloads, drive one streamed turn, and maintain the
//! conversation's snapshot/rollback invariant (spec §4.5).

use std::io::Write;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use twiddle_config::Config;

use crate::accumulator::ToolCallAccumulator;
use crate::errors::ModelError;
use crate::sse::{dispatch_chunk, SseDecoder};
use crate::types::{Message, Role, ToolCall, Usage};

/// The description of one callable tool, shaped for the request payload.
/// Kept independent of `twiddle-tools::ToolSchema` so `twiddle-model` has no
/// dependency on the tools crate (the dependency runs the other way).
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// Full JSON Schema object: `{type:"object", properties:{...}, required:[...]}`.
    pub parameters: Value,
}

/// A point-in-time marker of the conversation's length, used to roll back
/// an in-progress turn on failure (spec §3 Snapshot, §9).
pub struct Snapshot {
    len: usize,
}

/// The ordered, append-only (within a turn) list of conversation messages.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot { len: self.messages.len() }
    }

    /// Truncate back to a prior snapshot, discarding everything appended
    /// since (spec §8 property 5: snapshot atomicity).
    pub fn rollback(&mut self, snapshot: &Snapshot) {
        self.messages.truncate(snapshot.len);
    }

    /// Scan from the end for the first assistant message with an
    /// undispatched tool call; returns `(message_index, call)` and leaves
    /// the counter untouched — callers increment it via
    /// [`Conversation::mark_tool_call_processed`] once dispatch begins.
    pub fn next_pending_tool_call(&self) -> Option<(usize, ToolCall)> {
        self.messages
            .iter()
            .enumerate()
            .rev()
            .find(|(_, m)| m.has_pending_tool_calls())
            .and_then(|(i, m)| m.next_pending_tool_call().cloned().map(|c| (i, c)))
    }

    pub fn mark_tool_call_processed(&mut self, message_index: usize) {
        if let Some(m) = self.messages.get_mut(message_index) {
            m.processed_tool_calls += 1;
        }
    }
}

/// Drives one OpenAI-compatible streamed chat turn (spec §6.1) and owns the
/// conversation it mutates (spec §5: "the Conversation is exclusively owned
/// by the Chat Client").
pub struct ChatClient {
    base_url: String,
    path: String,
    model: String,
    api_key: Zeroizing<String>,
    temperature: Option<f32>,
    max_completion_tokens: Option<u32>,
    system_prompt: String,
    tool_context: Option<String>,
    tools: Vec<ToolDescriptor>,
    conversation: Conversation,
    last_rtt: Duration,
}

const DEFAULT_PATH: &str = "/v1/chat/completions";
const MIN_TIMEOUT: Duration = Duration::from_millis(750);
const MAX_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_ERROR_BODY: usize = 2 * 1024;

impl ChatClient {
    pub fn new(config: &Config, tools: Vec<ToolDescriptor>) -> Result<Self, ModelError> {
        let api_key = config
            .require_api_key()
            .map_err(|e| ModelError::UpstreamRejected(e.to_string()))?
            .to_string();
        Ok(Self {
            base_url: config.base_url.clone(),
            path: DEFAULT_PATH.to_string(),
            model: config.model.clone(),
            api_key: Zeroizing::new(api_key),
            temperature: None,
            max_completion_tokens: None,
            system_prompt: String::new(),
            tool_context: None,
            tools,
            conversation: Conversation::new(),
            last_rtt: MAX_TIMEOUT,
        })
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn set_tool_context(&mut self, ctx: impl Into<String>) {
        self.tool_context = Some(ctx.into());
    }

    pub fn set_temperature(&mut self, t: f32) {
        self.temperature = Some(t);
    }

    pub fn set_max_completion_tokens(&mut self, n: u32) {
        self.max_completion_tokens = Some(n);
    }

    /// Append a tool-result message. The executor is the only other owner
    /// of conversation-shaped state, and it hands results back through
    /// this single choke point (spec §5).
    pub fn push_tool_message(&mut self, msg: Message) {
        self.conversation.push(msg);
    }

    pub fn next_pending_tool_call(&self) -> Option<(usize, ToolCall)> {
        self.conversation.next_pending_tool_call()
    }

    pub fn mark_tool_call_processed(&mut self, message_index: usize) {
        self.conversation.mark_tool_call_processed(message_index);
    }

    /// Drive one streamed turn. If `user_text` is `Some`, it is pushed onto
    /// the conversation as the first step inside the transaction (so a
    /// failure rolls it back along with everything else appended this
    /// turn); pass `None` for a follow-up turn after tool dispatch, where
    /// the tool messages were already appended via `push_tool_message`.
    pub async fn respond(
        &mut self,
        user_text: Option<String>,
        writer: &mut dyn Write,
    ) -> Result<Usage, ModelError> {
        let snapshot = self.conversation.snapshot();
        if let Some(text) = user_text {
            self.conversation.push(Message::user(text));
        }

        match self.respond_inner(writer).await {
            Ok(usage) => Ok(usage),
            Err(e) => {
                self.conversation.rollback(&snapshot);
                Err(e)
            }
        }
    }

    async fn respond_inner(&mut self, writer: &mut dyn Write) -> Result<Usage, ModelError> {
        let mut attempt = 0u32;
        loop {
            match self.try_once(writer).await {
                Ok(outcome) => return Ok(outcome),
                Err(TurnError::Retryable(msg)) if attempt == 0 => {
                    attempt += 1;
                    let _ = writeln!(writer, "…retrying… ({msg})");
                    debug!(attempt, "retrying turn after retryable failure");
                }
                Err(TurnError::Retryable(msg)) => {
                    let _ = writeln!(writer, "error retry budget exhausted: {msg}");
                    return Err(ModelError::UpstreamUnavailable(msg));
                }
                Err(TurnError::Fatal(e)) => return Err(e),
            }
        }
    }

    async fn try_once(&mut self, writer: &mut dyn Write) -> Result<Usage, TurnError> {
        let payload = self.build_payload();
        let body = serde_json::to_vec(&payload).map_err(|e| TurnError::Fatal(ModelError::StreamFormat(e.to_string())))?;

        let url = format!("{}{}", self.base_url.trim_end_matches('/'), self.path);
        // Adaptive value bounds only read/write blocking (spec §4.5) — it is
        // a per-socket inactivity timeout, not a deadline on the whole
        // (streamed) turn, so it is applied via `read_timeout` on a
        // freshly-built client rather than `RequestBuilder::timeout`, which
        // would abort a still-streaming response once the total elapsed.
        let timeout = clamp(self.last_rtt.saturating_mul(4), MIN_TIMEOUT, MAX_TIMEOUT);
        let http = reqwest::Client::builder()
            .read_timeout(timeout)
            .build()
            .map_err(|e| TurnError::Fatal(ModelError::UpstreamUnavailable(e.to_string())))?;
        let start = Instant::now();
        let request = http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key.as_str()))
            .header("Content-Type", "application/json")
            .header("User-Agent", "twiddle/0.1")
            .header("Accept", "text/event-stream")
            .header("Connection", "keep-alive")
            .body(body);

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if is_retryable_transport(&e) => {
                return Err(TurnError::Retryable(e.to_string()));
            }
            Err(e) => return Err(TurnError::Fatal(ModelError::UpstreamUnavailable(e.to_string()))),
        };

        self.last_rtt = start.elapsed().max(Duration::from_millis(1));

        let status = response.status();
        if !status.is_success() {
            let status_name = status.canonical_reason().unwrap_or_else(|| status.as_str());
            let body_text = response.text().await.unwrap_or_default();
            let truncated: String = body_text.chars().take(MAX_ERROR_BODY).collect();
            if truncated.is_empty() {
                let _ = writeln!(writer, "error {status_name}");
            } else {
                let _ = writeln!(writer, "error {status_name}: {truncated}");
            }
            if is_retryable_status(status.as_u16()) {
                return Err(TurnError::Retryable(format!("status {status_name}")));
            }
            return Err(TurnError::Fatal(ModelError::UpstreamRejected(status.to_string())));
        }

        self.stream_body(response, writer).await.map_err(TurnError::Fatal)
    }

    async fn stream_body(
        &mut self,
        response: reqwest::Response,
        writer: &mut dyn Write,
    ) -> Result<Usage, ModelError> {
        use futures::StreamExt;

        let mut decoder = SseDecoder::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut transcript = String::new();
        let mut usage = Usage::default();

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ModelError::UpstreamUnavailable(e.to_string()))?;
            let events = decoder.feed(&chunk)?;
            for event in events {
                let dispatch = dispatch_chunk(&event);
                for text in dispatch.text {
                    emit(writer, &text);
                    transcript.push_str(&text);
                }
                for frag in dispatch.tool_call_fragments {
                    if let Some(id) = &frag.id {
                        accumulator.set_id(frag.index, id)?;
                    }
                    if let Some(name) = &frag.name {
                        accumulator.set_name(frag.index, name)?;
                    }
                    if let Some(args) = &frag.arguments {
                        accumulator.append_arguments(frag.index, args)?;
                    }
                }
                if let Some(u) = dispatch.usage {
                    usage = u;
                }
            }
            if decoder.is_finished() {
                break;
            }
        }

        let tool_calls = accumulator.take()?;
        let content = if transcript.is_empty() { None } else { Some(transcript) };
        self.conversation.push(Message::assistant(content, tool_calls));
        Ok(usage)
    }

    fn build_payload(&self) -> Value {
        let mut messages = Vec::with_capacity(self.conversation.len() + 2);
        messages.push(json!({"role": "system", "content": self.system_prompt}));
        if let Some(ctx) = &self.tool_context {
            messages.push(json!({"role": "system", "content": ctx}));
        }
        for m in self.conversation.messages() {
            messages.push(message_to_json(m));
        }

        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut payload = json!({
            "model": self.model,
            "stream": true,
            "stream_options": {"include_usage": true},
            "parallel_tool_calls": false,
            "tools": tools,
            "messages": messages,
        });
        if let Some(t) = self.temperature {
            payload["temperature"] = json!(t);
        }
        if let Some(n) = self.max_completion_tokens {
            payload["max_completion_tokens"] = json!(n);
        }
        payload
    }
}

enum TurnError {
    Retryable(String),
    Fatal(ModelError),
}

fn message_to_json(m: &Message) -> Value {
    match m.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id,
            "name": m.tool_name,
            "content": m.content.clone().unwrap_or_default(),
        }),
        Role::Assistant => {
            let content = if m.content_is_null {
                Value::Null
            } else {
                json!(m.content.clone().unwrap_or_default())
            };
            let mut obj = json!({"role": "assistant", "content": content});
            if !m.tool_calls.is_empty() {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {"name": c.name, "arguments": c.arguments_json},
                        })
                    })
                    .collect();
                obj["tool_calls"] = json!(calls);
            }
            obj
        }
        Role::User => json!({
            "role": "user",
            "content": m.content.clone().unwrap_or_default(),
        }),
    }
}

fn emit(writer: &mut dyn Write, text: &str) {
    let _ = writer.write_all(text.as_bytes());
    if text.contains('\n') {
        let _ = writer.flush();
    }
}

fn clamp(d: Duration, min: Duration, max: Duration) -> Duration {
    d.clamp(min, max)
}

fn is_retryable_status(code: u16) -> bool {
    matches!(code, 408 | 429 | 502 | 503 | 504)
}

fn is_retryable_transport(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;

    #[test]
    fn conversation_snapshot_rollback_restores_length() {
        let mut conv = Conversation::new();
        conv.push(Message::user("hi"));
        let snap = conv.snapshot();
        conv.push(Message::user("more"));
        conv.push(Message::assistant(Some("ok".into()), vec![]));
        conv.rollback(&snap);
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn next_pending_tool_call_scans_from_end() {
        let mut conv = Conversation::new();
        let call = ToolCall { id: "a".into(), name: "read_file".into(), arguments_json: "{}".into() };
        conv.push(Message::assistant(None, vec![call.clone()]));
        let (idx, found) = conv.next_pending_tool_call().unwrap();
        assert_eq!(idx, 0);
        assert_eq!(found.id, "a");
        conv.mark_tool_call_processed(idx);
        assert!(conv.next_pending_tool_call().is_none());
    }

    #[test]
    fn message_to_json_marks_null_content_for_tool_only_turn() {
        let call = ToolCall { id: "a".into(), name: "read_file".into(), arguments_json: "{}".into() };
        let msg = Message::assistant(None, vec![call]);
        let v = message_to_json(&msg);
        assert!(v["content"].is_null());
        assert_eq!(v["tool_calls"][0]["function"]["name"], "read_file");
    }

    #[test]
    fn message_to_json_tool_role_carries_call_id() {
        let msg = Message::tool("a", Some("read_file".into()), "result text");
        let v = message_to_json(&msg);
        assert_eq!(v["tool_call_id"], "a");
        assert_eq!(v["content"], "result text");
    }

    #[test]
    fn retryable_status_set_matches_spec() {
        for code in [408, 429, 502, 503, 504] {
            assert!(is_retryable_status(code));
        }
        for code in [400, 401, 403, 404, 500] {
            assert!(!is_retryable_status(code));
        }
    }

    #[test]
    fn adaptive_timeout_clamps_to_bounds() {
        assert_eq!(clamp(Duration::from_millis(10), MIN_TIMEOUT, MAX_TIMEOUT), MIN_TIMEOUT);
        assert_eq!(clamp(Duration::from_secs(100), MIN_TIMEOUT, MAX_TIMEOUT), MAX_TIMEOUT);
        assert_eq!(clamp(Duration::from_secs(2), MIN_TIMEOUT, MAX_TIMEOUT), Duration::from_secs(2));
    }
}
