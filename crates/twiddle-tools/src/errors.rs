// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;
use twiddle_sandbox::SandboxError;

/// Every named failure kind a tool core or the executor can raise (spec §7:
/// Sandbox/Filesystem, Tool-specific, Policy).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("path escapes sandbox root: {0}")]
    PathOutsideSandbox(String),
    #[error("not a directory: {0}")]
    PathNotDirectory(String),
    #[error("not a file: {0}")]
    PathNotFile(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("io error: {0}")]
    IoFailure(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("offset exceeds file length")]
    OffsetExceedsLength,
    #[error("anchor line exceeds file length")]
    AnchorExceedsLength,
    #[error("no entries requested")]
    NoEntriesRequested,
    #[error("required binary not available: {0}")]
    BinaryUnavailable(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("tool output exceeded its limit")]
    ToolLimitExceeded,
    #[error("invalid patch: {0}")]
    InvalidPatch(String),
    #[error("patch conflict: {0}")]
    PatchConflict(String),
    #[error("absolute paths are not permitted here: {0}")]
    AbsolutePathForbidden(String),

    #[error("unknown tool: {0}")]
    ToolNotFound(String),
    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),
    #[error("workspace write access is required for this tool")]
    WorkspaceWriteRequired,
}

impl From<SandboxError> for ToolError {
    fn from(e: SandboxError) -> Self {
        match e {
            SandboxError::PathNotFound(p) => ToolError::PathNotFound(p.display().to_string()),
            SandboxError::PermissionDenied(p) => ToolError::PermissionDenied(p.display().to_string()),
            SandboxError::PathOutsideSandbox(p) => {
                ToolError::PathOutsideSandbox(p.display().to_string())
            }
            SandboxError::InvalidSandbox(p) => ToolError::IoFailure(p.display().to_string()),
        }
    }
}

/// Render a short, human-readable failure message for the `{status:
/// "failure", error}` envelope the executor injects back into the
/// conversation (spec §4.9 step 4).
pub fn describe(err: &ToolError) -> String {
    err.to_string()
}
