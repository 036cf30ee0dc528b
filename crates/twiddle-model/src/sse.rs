// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Parse the SSE byte stream into JSON events (spec §4.3) and dispatch each
//! event into text deltas, tool-call fragments, and usage snapshots.

use serde_json::Value;

use crate::errors::ModelError;
use crate::types::Usage;

/// Bound on one SSE event's accumulated `data:` payload.
const MAX_EVENT_BYTES: usize = 16 * 1024;

/// Incremental SSE framer. Feed it raw transport bytes as they arrive;
/// it yields complete JSON event objects and tracks the `[DONE]` sentinel.
pub struct SseDecoder {
    /// Leftover bytes not yet terminated by `\n`. Starts at the line
    /// buffer's expected common size (spec §4.3: "starts stack-allocated
    /// (512 bytes) and spills to heap") — a `Vec` pre-sized to 512 gives
    /// the same amortized-no-realloc behavior without an extra dependency.
    pending: Vec<u8>,
    event_payload: String,
    finished: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(512),
            event_payload: String::new(),
            finished: false,
        }
    }

    /// `true` once the `[DONE]` sentinel has been observed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed a chunk of transport bytes; returns the JSON objects of every
    /// event completed by this chunk, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Value>, ModelError> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        loop {
            let Some(nl) = self.pending.iter().position(|&b| b == b'\n') else {
                break;
            };
            let mut line: Vec<u8> = self.pending.drain(..=nl).collect();
            line.pop(); // trailing \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            self.process_line(&line, &mut events)?;
        }
        Ok(events)
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<Value>) -> Result<(), ModelError> {
        if let Some(rest) = line.strip_prefix("data:") {
            let payload = rest.strip_prefix(' ').unwrap_or(rest);
            if !self.event_payload.is_empty() {
                self.event_payload.push('\n');
            }
            self.event_payload.push_str(payload);
            if self.event_payload.len() > MAX_EVENT_BYTES {
                return Err(ModelError::StreamFormat(format!(
                    "SSE event exceeded {MAX_EVENT_BYTES} bytes"
                )));
            }
            return Ok(());
        }

        if line.is_empty() {
            if self.event_payload.is_empty() {
                return Ok(());
            }
            let payload = std::mem::take(&mut self.event_payload);
            if payload == "[DONE]" {
                self.finished = true;
                return Ok(());
            }
            let value: Value = serde_json::from_str(&payload)
                .map_err(|e| ModelError::StreamFormat(format!("invalid SSE JSON: {e}")))?;
            if !value.is_object() {
                return Err(ModelError::StreamFormat(
                    "SSE payload was not a JSON object".into(),
                ));
            }
            events.push(value);
        }
        // Any other line (`event:`, `id:`, `:` comments) is ignored.
        Ok(())
    }
}

/// A partially- or fully-populated tool-call delta extracted from one
/// `choices[].delta.tool_calls[]` element.
#[derive(Debug, Default, Clone)]
pub struct ToolCallFragment {
    pub index: Option<u32>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Everything one parsed SSE event contributed.
#[derive(Debug, Default)]
pub struct ChunkDispatch {
    pub text: Vec<String>,
    pub tool_call_fragments: Vec<ToolCallFragment>,
    pub usage: Option<Usage>,
}

/// Dispatch one parsed SSE JSON object per spec §4.3's per-event rules.
pub fn dispatch_chunk(value: &Value) -> ChunkDispatch {
    let mut out = ChunkDispatch::default();

    if let Some(choices) = value.get("choices").and_then(Value::as_array) {
        for choice in choices {
            let Some(delta) = choice.get("delta") else {
                continue;
            };
            if let Some(text) = delta.as_str() {
                out.text.push(text.to_string());
                continue;
            }
            if delta.is_object() {
                // `tool_calls` and `content` are independent checks (spec
                // §4.3) — a delta carrying both must emit the text AND
                // forward the fragments, not just one of the two.
                if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                    for tc in tool_calls {
                        out.tool_call_fragments.push(parse_tool_call_fragment(tc));
                    }
                }
                if let Some(content) = delta.get("content") {
                    walk_content(content, &mut out.text);
                } else if let Some(text) = delta.get("output_text").and_then(Value::as_str) {
                    out.text.push(text.to_string());
                }
            }
        }
    }

    if let Some(usage) = value.get("usage").filter(|u| u.is_object()) {
        out.usage = Some(Usage {
            prompt_tokens: coerce_u64(usage.get("prompt_tokens")).unwrap_or(0),
            completion_tokens: coerce_u64(usage.get("completion_tokens")).unwrap_or(0),
            total_tokens: coerce_u64(usage.get("total_tokens")).unwrap_or(0),
            valid: true,
        });
    }

    out
}

fn parse_tool_call_fragment(tc: &Value) -> ToolCallFragment {
    let index = tc.get("index").and_then(Value::as_u64).map(|i| i as u32);
    let id = tc.get("id").and_then(Value::as_str).map(str::to_string);
    let function = tc.get("function");
    let name = function
        .and_then(|f| f.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let arguments = function
        .and_then(|f| f.get("arguments"))
        .and_then(Value::as_str)
        .map(str::to_string);
    ToolCallFragment {
        index,
        id,
        name,
        arguments,
    }
}

/// Recursively walk the `content` field's three shapes (plain string,
/// array of string/object, or bare object) and push every text fragment
/// found, in order (spec §4.3 "content walker").
fn walk_content(content: &Value, out: &mut Vec<String>) {
    match content {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    Value::Object(_) => {
                        if let Some(text) = item.get("text").and_then(Value::as_str) {
                            out.push(text.to_string());
                        } else if let Some(nested) = item.get("content") {
                            walk_content(nested, out);
                        }
                    }
                    _ => {}
                }
            }
        }
        Value::Object(_) => {
            if let Some(text) = content.get("text").and_then(Value::as_str) {
                out.push(text.to_string());
            }
        }
        _ => {}
    }
}

fn coerce_u64(v: Option<&Value>) -> Option<u64> {
    let v = v?;
    if let Some(u) = v.as_u64() {
        return Some(u);
    }
    if let Some(f) = v.as_f64() {
        return Some(f.trunc() as u64);
    }
    if let Some(s) = v.as_str() {
        return s.parse().ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_text_delta_and_done() {
        let mut dec = SseDecoder::new();
        let events = dec
            .feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n")
            .unwrap();
        assert_eq!(events.len(), 1);
        let dispatch = dispatch_chunk(&events[0]);
        assert_eq!(dispatch.text, vec!["hi".to_string()]);
        assert!(dec.is_finished());
    }

    #[test]
    fn chunk_boundary_mid_line_is_buffered() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b"data: {\"choices\":[{\"delta\":{\"con").unwrap();
        assert!(events.is_empty());
        let events = dec.feed(b"tent\":\"hel\"}}]}\n\n").unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn multiline_data_joined_with_newline() {
        let mut dec = SseDecoder::new();
        let events = dec
            .feed(b"data: {\"choices\":[{\"delta\":\ndata: {\"content\":\"x\"}}]}\n\n")
            .unwrap();
        assert_eq!(events.len(), 1);
        let dispatch = dispatch_chunk(&events[0]);
        assert_eq!(dispatch.text, vec!["x".to_string()]);
    }

    #[test]
    fn oversize_event_is_stream_format_error() {
        let mut dec = SseDecoder::new();
        let big = "a".repeat(20 * 1024);
        let chunk = format!("data: {big}\n");
        let err = dec.feed(chunk.as_bytes()).unwrap_err();
        assert!(matches!(err, ModelError::StreamFormat(_)));
    }

    #[test]
    fn tool_call_fragment_parsed_with_index_and_partial_args() {
        let v: Value = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"read_file","arguments":"{\""}}]}}]}"#,
        )
        .unwrap();
        let dispatch = dispatch_chunk(&v);
        assert_eq!(dispatch.tool_call_fragments.len(), 1);
        let frag = &dispatch.tool_call_fragments[0];
        assert_eq!(frag.index, Some(0));
        assert_eq!(frag.id.as_deref(), Some("a"));
        assert_eq!(frag.name.as_deref(), Some("read_file"));
    }

    #[test]
    fn usage_fields_coerced_from_numeric_string() {
        let v: Value = serde_json::from_str(
            r#"{"usage":{"prompt_tokens":"10","completion_tokens":5.9,"total_tokens":15}}"#,
        )
        .unwrap();
        let dispatch = dispatch_chunk(&v);
        let usage = dispatch.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
        assert!(usage.valid);
    }

    #[test]
    fn content_array_with_nested_content_recurses() {
        let v: Value = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":[{"content":[{"text":"deep"}]}]}}]}"#,
        )
        .unwrap();
        let dispatch = dispatch_chunk(&v);
        assert_eq!(dispatch.text, vec!["deep".to_string()]);
    }

    #[test]
    fn delta_with_both_tool_calls_and_content_emits_both() {
        let v: Value = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"thinking…","tool_calls":[{"index":0,"id":"a","function":{"name":"read_file","arguments":"{}"}}]}}]}"#,
        )
        .unwrap();
        let dispatch = dispatch_chunk(&v);
        assert_eq!(dispatch.text, vec!["thinking…".to_string()]);
        assert_eq!(dispatch.tool_call_fragments.len(), 1);
        assert_eq!(dispatch.tool_call_fragments[0].id.as_deref(), Some("a"));
    }
}
