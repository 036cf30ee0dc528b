// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The conversation data model (spec §3): `Message`, `ToolCall`, `Usage`,
//! `ContextUsage`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A fully reconstructed tool invocation. Once complete, `(id, name)` is
/// immutable — the accumulator enforces this during streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments_json: String,
}

/// One entry in the conversation.
///
/// A single struct covers all three roles rather than an enum-per-role,
/// mirroring the spec's "tagged variant" description: fields that don't
/// apply to a role (e.g. `tool_calls` on a `tool` message) are simply left
/// at their default.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    /// Text content. `None` with `content_is_null = false` means "empty
    /// string content"; `content_is_null = true` means the assistant spoke
    /// only through tool calls (spec §4.5 finalization).
    pub content: Option<String>,
    pub content_is_null: bool,
    /// Assistant-only: tool calls emitted in this turn.
    pub tool_calls: Vec<ToolCall>,
    /// Assistant-only: how many of `tool_calls` have been dispatched so far.
    pub processed_tool_calls: usize,
    /// Tool-only: the call this message answers.
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(text.into()),
            content_is_null: false,
            tool_calls: Vec::new(),
            processed_tool_calls: 0,
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        // System messages reuse the `user`-shaped wire entry; the chat
        // client is responsible for placing them first (spec §4.5).
        Self::user(text)
    }

    /// Assistant turn that produced text and/or tool calls.
    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        let content_is_null = content.is_none() && !tool_calls.is_empty();
        Self {
            role: Role::Assistant,
            content,
            content_is_null,
            tool_calls,
            processed_tool_calls: 0,
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, tool_name: Option<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            content_is_null: false,
            tool_calls: Vec::new(),
            processed_tool_calls: 0,
            tool_call_id: Some(tool_call_id.into()),
            tool_name,
        }
    }

    /// Index (within `tool_calls`) of the next call to dispatch, or `None`
    /// if this message has none pending.
    pub fn next_pending_tool_call(&self) -> Option<&ToolCall> {
        if self.role != Role::Assistant {
            return None;
        }
        self.tool_calls.get(self.processed_tool_calls)
    }

    pub fn has_pending_tool_calls(&self) -> bool {
        self.role == Role::Assistant && self.processed_tool_calls < self.tool_calls.len()
    }
}

/// Token usage reported by the server for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// `true` only when the server sent a complete `usage` object this turn.
    pub valid: bool,
}

/// Derived view of how much of the model's context window remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextUsage {
    pub used_tokens: u64,
    pub limit_tokens: u64,
    pub remaining_hundredths: u64,
}

impl ContextUsage {
    /// `remaining_hundredths = floor((limit − used) * 10000 / limit)` when
    /// `used < limit`, else `0` (spec §3, §8 property 4).
    pub fn compute(used_tokens: u64, limit_tokens: u64) -> Self {
        let remaining_hundredths = if limit_tokens > 0 && used_tokens < limit_tokens {
            (limit_tokens - used_tokens) * 10_000 / limit_tokens
        } else {
            0
        };
        Self {
            used_tokens,
            limit_tokens,
            remaining_hundredths,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_usage_matches_boundary_examples() {
        let cu = ContextUsage::compute(1000, 4000);
        assert_eq!(cu.remaining_hundredths, 7500);
        let cu = ContextUsage::compute(3000, 2000);
        assert_eq!(cu.remaining_hundredths, 0);
    }

    #[test]
    fn context_usage_used_equals_limit_is_zero() {
        let cu = ContextUsage::compute(2000, 2000);
        assert_eq!(cu.remaining_hundredths, 0);
    }

    #[test]
    fn assistant_with_tool_calls_and_no_text_is_null_content() {
        let call = ToolCall {
            id: "a".into(),
            name: "read_file".into(),
            arguments_json: "{}".into(),
        };
        let msg = Message::assistant(None, vec![call]);
        assert!(msg.content_is_null);
    }

    #[test]
    fn pending_tool_call_tracks_processed_counter() {
        let call = ToolCall {
            id: "a".into(),
            name: "read_file".into(),
            arguments_json: "{}".into(),
        };
        let mut msg = Message::assistant(None, vec![call]);
        assert!(msg.has_pending_tool_calls());
        msg.processed_tool_calls += 1;
        assert!(!msg.has_pending_tool_calls());
    }
}
