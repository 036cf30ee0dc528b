// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The session runner (spec §4.10): drives one user prompt across
//! alternating model-streaming and tool-dispatch rounds until the model
//! stops emitting tool calls.

use std::io::Write;

use serde_json::{json, Value};
use tracing::{debug, warn};
use twiddle_config::ApprovalPolicy;
use twiddle_model::{ChatClient, Message, ToolCall, Usage};
use twiddle_sandbox::Sandbox;
use twiddle_tools::{ToolError, ToolInvocation, ToolResult};

use crate::errors::SessionError;

/// Drives one long-lived conversation. Owns the sandbox; the chat client
/// owns the conversation it mutates (spec §5).
pub struct Session {
    client: ChatClient,
    sandbox: Sandbox,
    approval_policy: ApprovalPolicy,
    /// `TWIDDLE_DEBUG` (spec §6.5): echo the raw tool result JSON after the
    /// one-line summary.
    debug: bool,
}

impl Session {
    pub fn new(client: ChatClient, sandbox: Sandbox, approval_policy: ApprovalPolicy, debug: bool) -> Self {
        Self { client, sandbox, approval_policy, debug }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Run one user prompt to completion. `approve` is called once per
    /// escalation request with the requesting tool id; it owns reading the
    /// yes/no answer (e.g. from stdin) and returns `true` for an
    /// affirmative, case-insensitive `y`/`yes`.
    pub async fn run_turn(
        &mut self,
        user_text: String,
        writer: &mut dyn Write,
        mut approve: impl FnMut(&str, &mut dyn Write) -> bool,
    ) -> Result<Usage, SessionError> {
        let mut usage = self.client.respond(Some(user_text), writer).await?;

        loop {
            let mut dispatched_any = false;
            while let Some((index, call)) = self.client.next_pending_tool_call() {
                dispatched_any = true;
                self.client.mark_tool_call_processed(index);
                self.dispatch_one(&call, writer, &mut approve).await?;
            }
            if !dispatched_any {
                break;
            }
            debug!("all pending tool calls dispatched, re-entering model turn");
            usage = self.client.respond(None, writer).await?;
        }
        Ok(usage)
    }

    async fn dispatch_one(
        &mut self,
        call: &ToolCall,
        writer: &mut dyn Write,
        approve: &mut impl FnMut(&str, &mut dyn Write) -> bool,
    ) -> Result<(), SessionError> {
        if call.id.is_empty() || call.name.is_empty() || call.arguments_json.is_empty() {
            warn!(id = %call.id, name = %call.name, "malformed tool call envelope");
            let _ = writeln!(writer, "error: malformed tool call, abandoning prompt");
            return Err(SessionError::ToolEnvelopeInvalid(format!(
                "id={:?} name={:?}",
                call.id, call.name
            )));
        }
        let arguments: Value = match serde_json::from_str(&call.arguments_json) {
            Ok(v) => v,
            Err(e) => {
                let _ = writeln!(writer, "error: malformed tool call, abandoning prompt");
                return Err(SessionError::ToolEnvelopeInvalid(e.to_string()));
            }
        };

        let invocation = ToolInvocation {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        };

        let result = self.execute_with_escalation(&invocation, writer, approve).await;
        let line = summarize(&call.id, &result);
        let _ = writeln!(writer, "{line}");
        if self.debug {
            if let ToolResult::Success(value) = &result {
                let _ = writeln!(writer, "{value}");
            }
        }

        let content = match &result {
            ToolResult::Success(value) => serde_json::to_string(value).unwrap_or_default(),
            ToolResult::Failure(message) => serde_json::to_string(&json!({
                "status": "failure",
                "tool_id": call.id,
                "error": message,
            }))
            .unwrap_or_default(),
        };
        self.client
            .push_tool_message(Message::tool(call.id.clone(), Some(call.name.clone()), content));
        Ok(())
    }

    async fn execute_with_escalation(
        &mut self,
        invocation: &ToolInvocation,
        writer: &mut dyn Write,
        approve: &mut impl FnMut(&str, &mut dyn Write) -> bool,
    ) -> ToolResult {
        match twiddle_tools::execute(&self.sandbox, invocation).await {
            Ok(result) => result,
            Err(ToolError::WorkspaceWriteRequired) => self.escalate(invocation, writer, approve).await,
            Err(e) => ToolResult::Failure(twiddle_tools::errors::describe(&e)),
        }
    }

    async fn escalate(
        &mut self,
        invocation: &ToolInvocation,
        writer: &mut dyn Write,
        approve: &mut impl FnMut(&str, &mut dyn Write) -> bool,
    ) -> ToolResult {
        if self.approval_policy == ApprovalPolicy::Never || self.sandbox.workspace_write_denied_this_session() {
            return ToolResult::Failure("workspace write access is required for this tool".to_string());
        }

        let _ = writeln!(writer, "tool '{}' requires workspace write access — allow? [y/N]", invocation.name);
        if approve(&invocation.name, writer) {
            self.sandbox.enable_workspace_write();
            match twiddle_tools::execute(&self.sandbox, invocation).await {
                Ok(result) => result,
                Err(e) => ToolResult::Failure(twiddle_tools::errors::describe(&e)),
            }
        } else {
            self.sandbox.deny_workspace_write();
            ToolResult::Failure("workspace write access is required for this tool".to_string())
        }
    }
}

fn summarize(call_id: &str, result: &ToolResult) -> String {
    match result {
        ToolResult::Success(value) => match per_tool_summary(value) {
            Some(detail) => format!("tool:{call_id} success ({detail})"),
            None => format!("tool:{call_id} success"),
        },
        ToolResult::Failure(message) => format!("tool:{call_id} failure: {message}"),
    }
}

/// Schema-specific one-line summaries read from a success result's shape
/// rather than its tool name, since the executor hands back a bare value.
fn per_tool_summary(value: &Value) -> Option<String> {
    if let Some(entries) = value.get("entries").and_then(Value::as_array) {
        return Some(format!("{} entries", entries.len()));
    }
    if let Some(lines) = value.get("lines").and_then(Value::as_array) {
        return Some(format!("{} lines", lines.len()));
    }
    if let Some(results) = value.get("results").and_then(Value::as_array) {
        return Some(format!("{} matches", results.len()));
    }
    if let Some(n) = value.get("files_changed").and_then(Value::as_u64) {
        return Some(format!("{n} files changed"));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarizes_list_directory_success() {
        let value = json!({"entries": [1, 2, 3], "truncated": false});
        assert_eq!(summarize("1", &ToolResult::Success(value)), "tool:1 success (3 entries)");
    }

    #[test]
    fn summarizes_apply_patch_success() {
        let value = json!({"status": "success", "files_changed": 2, "changes": []});
        assert_eq!(summarize("1", &ToolResult::Success(value)), "tool:1 success (2 files changed)");
    }

    #[test]
    fn summarizes_failure() {
        let result = ToolResult::Failure("path not found: x".to_string());
        assert_eq!(summarize("1", &result), "tool:1 failure: path not found: x");
    }

    #[test]
    fn summarizes_success_with_no_known_shape() {
        let value = json!({"status": "ok"});
        assert_eq!(summarize("1", &ToolResult::Success(value)), "tool:1 success");
    }
}
