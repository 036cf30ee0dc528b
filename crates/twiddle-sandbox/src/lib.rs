// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Path containment: canonicalize a user-supplied path and verify it stays
//! under the sandbox root before any tool touches the filesystem.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a tool is allowed to do to the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    ReadOnly,
    WorkspaceWrite,
    DangerFullAccess,
}

impl SandboxMode {
    fn workspace_write_enabled(self) -> bool {
        !matches!(self, SandboxMode::ReadOnly)
    }
}

/// The strength of access a tool schema demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    ReadOnly,
    WorkspaceWrite,
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox root '{0}' is not a usable directory")]
    InvalidSandbox(PathBuf),
    #[error("path not found: {0}")]
    PathNotFound(PathBuf),
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("path escapes sandbox root: {0}")]
    PathOutsideSandbox(PathBuf),
}

/// A canonicalized root directory plus the write policy in effect for it.
///
/// `workspace_write_enabled` tracks `mode != ReadOnly`, but once a session
/// escalates (see the approval handshake in `twiddle-core`) it can flip true
/// even under a `ReadOnly` *configured* mode — the invariant is therefore
/// re-checked at construction only; callers mutate the flag directly via
/// [`Sandbox::enable_workspace_write`].
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    mode: SandboxMode,
    workspace_write_enabled: bool,
    workspace_write_denied_this_session: bool,
}

impl Sandbox {
    /// Canonicalize `root` and build a sandbox rooted there.
    pub fn new(root: impl AsRef<Path>, mode: SandboxMode) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        let canonical = std::fs::canonicalize(root)
            .map_err(|_| SandboxError::InvalidSandbox(root.to_path_buf()))?;
        if !canonical.is_dir() {
            return Err(SandboxError::InvalidSandbox(canonical));
        }
        // Strip a trailing separator; canonicalize never adds one except for
        // the filesystem root itself, which we leave untouched.
        Ok(Self {
            root: canonical,
            mode,
            workspace_write_enabled: mode.workspace_write_enabled(),
            workspace_write_denied_this_session: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> SandboxMode {
        self.mode
    }

    pub fn workspace_write_enabled(&self) -> bool {
        self.workspace_write_enabled
    }

    pub fn workspace_write_denied_this_session(&self) -> bool {
        self.workspace_write_denied_this_session
    }

    /// Flip the escalation flag on for the remainder of the process.
    pub fn enable_workspace_write(&mut self) {
        self.workspace_write_enabled = true;
    }

    /// Record that the user declined an escalation request; short-circuits
    /// future requests without re-prompting.
    pub fn deny_workspace_write(&mut self) {
        self.workspace_write_denied_this_session = true;
    }

    /// Resolve `user_path` (absolute or relative to the root) to a canonical
    /// absolute path guaranteed to live under the sandbox root.
    ///
    /// Canonicalizes the *final* path (following symlinks) so that a symlink
    /// planted inside the sandbox cannot be used to escape it.
    pub fn resolve(&self, user_path: impl AsRef<Path>) -> Result<PathBuf, SandboxError> {
        let user_path = user_path.as_ref();
        let joined = if user_path.is_absolute() {
            user_path.to_path_buf()
        } else {
            self.root.join(user_path)
        };
        let canonical = match std::fs::canonicalize(&joined) {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SandboxError::PathNotFound(joined));
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(SandboxError::PermissionDenied(joined));
            }
            Err(_) => return Err(SandboxError::PathNotFound(joined)),
        };
        if self.contains(&canonical) {
            Ok(canonical)
        } else {
            Err(SandboxError::PathOutsideSandbox(canonical))
        }
    }

    /// Predicate for paths that may not yet exist on disk (e.g. the target
    /// of `Add File` in a patch). Compares byte-prefixes of `candidate`
    /// against the root without touching the filesystem.
    pub fn within(&self, candidate: impl AsRef<Path>) -> bool {
        let candidate = candidate.as_ref();
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let normalized = normalize_lexically(&joined);
        self.contains(&normalized)
    }

    fn contains(&self, candidate: &Path) -> bool {
        let root = self.root.as_os_str().as_encoded_bytes();
        let cand = candidate.as_os_str().as_encoded_bytes();
        if cand == root {
            return true;
        }
        cand.len() > root.len() && cand.starts_with(root) && cand[root.len()] == b'/'
    }
}

/// Resolve `.` and `..` components without touching the filesystem (no
/// symlink following — used only for not-yet-existing patch targets, which
/// is why `Sandbox::resolve` is preferred whenever the path already exists).
fn normalize_lexically(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
