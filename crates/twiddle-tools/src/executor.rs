// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The tool executor (spec §4.9): looks up a schema, checks its permission
//! against the sandbox's current write policy, dispatches to the matching
//! core, and folds every recoverable failure into a `ToolResult::Failure`
//! so a bad tool call never aborts the turn.

use serde_json::Value;
use tracing::{debug, warn};
use twiddle_sandbox::Sandbox;

use crate::builtin::{ApplyPatchTool, ListDirectoryTool, ReadFileTool, SearchTool};
use crate::errors::{describe, ToolError};
use crate::registry;
use crate::tool::{ToolCore, ToolInvocation, ToolKind, ToolResult};

/// Dispatch one invocation. The only error this can return is
/// [`ToolError::WorkspaceWriteRequired`] — every other failure is folded
/// into `Ok(ToolResult::Failure(..))` because the caller's contract is to
/// inject a tool-result message back into the conversation regardless of
/// outcome, and only an escalation needs to interrupt that flow for the
/// approval handshake.
pub async fn execute(
    sandbox: &Sandbox,
    invocation: &ToolInvocation,
) -> Result<ToolResult, ToolError> {
    let schema = match registry::find(&invocation.name) {
        Some(s) => s,
        None => {
            warn!(tool = %invocation.name, "unknown tool requested");
            return Ok(ToolResult::Failure(describe(&ToolError::ToolNotFound(invocation.name.clone()))));
        }
    };

    if schema.required_permission == twiddle_sandbox::Permission::WorkspaceWrite
        && !sandbox.workspace_write_enabled()
    {
        debug!(tool = %invocation.name, "workspace write escalation required");
        return Err(ToolError::WorkspaceWriteRequired);
    }

    let outcome = dispatch(schema.kind, sandbox, &invocation.arguments).await;
    Ok(match outcome {
        Ok(value) => ToolResult::Success(value),
        Err(e) => {
            debug!(tool = %invocation.name, error = %e, "tool core returned an error");
            ToolResult::Failure(describe(&e))
        }
    })
}

async fn dispatch(kind: ToolKind, sandbox: &Sandbox, args: &Value) -> Result<Value, ToolError> {
    match kind {
        ToolKind::ListDirectory => ListDirectoryTool.run(sandbox, args).await,
        ToolKind::ReadFile => ReadFileTool.run(sandbox, args).await,
        ToolKind::Search => SearchTool.run(sandbox, args).await,
        ToolKind::ApplyPatch => ApplyPatchTool.run(sandbox, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use twiddle_sandbox::SandboxMode;

    fn sandbox(mode: SandboxMode) -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().unwrap();
        let sbx = Sandbox::new(dir.path(), mode).unwrap();
        (dir, sbx)
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failure_result_not_an_error() {
        let (_dir, sbx) = sandbox(SandboxMode::ReadOnly);
        let invocation = ToolInvocation {
            call_id: "1".into(),
            name: "shell".into(),
            arguments: json!({}),
        };
        let result = execute(&sbx, &invocation).await.unwrap();
        assert!(matches!(result, ToolResult::Failure(_)));
    }

    #[tokio::test]
    async fn apply_patch_under_read_only_requires_escalation() {
        let (_dir, sbx) = sandbox(SandboxMode::ReadOnly);
        let invocation = ToolInvocation {
            call_id: "1".into(),
            name: "apply_patch".into(),
            arguments: json!({"input": "*** Begin Patch\n*** End Patch\n"}),
        };
        let err = execute(&sbx, &invocation).await.unwrap_err();
        assert!(matches!(err, ToolError::WorkspaceWriteRequired));
    }

    #[tokio::test]
    async fn list_directory_under_read_only_succeeds() {
        let (_dir, sbx) = sandbox(SandboxMode::ReadOnly);
        let invocation = ToolInvocation {
            call_id: "1".into(),
            name: "list_directory".into(),
            arguments: json!({}),
        };
        let result = execute(&sbx, &invocation).await.unwrap();
        assert!(matches!(result, ToolResult::Success(_)));
    }
}
