// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The patch applier (spec §4.8): parses a sentinel-framed add/delete/update
//! patch and applies it atomically against the sandbox.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use twiddle_sandbox::Sandbox;

use crate::errors::ToolError;
use crate::tool::ToolCore;

const MAX_SOURCE_BYTES: u64 = 8 * 1024 * 1024;

const BEGIN: &str = "*** Begin Patch";
const END: &str = "*** End Patch";
const ADD_PREFIX: &str = "*** Add File: ";
const DELETE_PREFIX: &str = "*** Delete File: ";
const UPDATE_PREFIX: &str = "*** Update File: ";
const MOVE_PREFIX: &str = "*** Move to: ";
const EOF_MARKER: &str = "*** End of File";

pub struct ApplyPatchTool;

#[async_trait]
impl ToolCore for ApplyPatchTool {
    async fn run(&self, sandbox: &Sandbox, args: &Value) -> Result<Value, ToolError> {
        let input = args
            .get("input")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidPayload("input is required".into()))?;
        let workdir = resolve_workdir(sandbox, args.get("workdir").and_then(Value::as_str))?;

        let operations = parse_patch(input)?;
        let mut changes = Vec::new();
        for op in operations {
            let change = apply_operation(sandbox, &workdir, op)?;
            changes.push(change);
        }

        Ok(json!({
            "status": "success",
            "files_changed": changes.len(),
            "changes": changes,
        }))
    }
}

fn resolve_workdir(sandbox: &Sandbox, workdir: Option<&str>) -> Result<PathBuf, ToolError> {
    match workdir {
        None => Ok(sandbox.root().to_path_buf()),
        Some(w) => {
            let candidate = Path::new(w);
            if candidate.is_absolute() {
                if sandbox.within(candidate) {
                    Ok(candidate.to_path_buf())
                } else {
                    Err(ToolError::PathOutsideSandbox(w.to_string()))
                }
            } else if sandbox.within(sandbox.root().join(candidate)) {
                Ok(sandbox.root().join(candidate))
            } else {
                Err(ToolError::PathOutsideSandbox(w.to_string()))
            }
        }
    }
}

#[derive(Debug)]
enum LineKind {
    Context,
    Insert,
    Delete,
}

#[derive(Debug)]
struct Chunk {
    context_hint: Option<String>,
    old_lines: Vec<String>,
    new_lines: Vec<String>,
    eof: bool,
}

#[derive(Debug)]
enum Operation {
    Add { path: String, contents: String },
    Delete { path: String },
    Update { path: String, move_to: Option<String>, chunks: Vec<Chunk> },
}

fn parse_patch(input: &str) -> Result<Vec<Operation>, ToolError> {
    let lines: Vec<&str> = input.lines().collect();
    if lines.len() < 2 || lines.first() != Some(&BEGIN) || lines.last() != Some(&END) {
        return Err(ToolError::InvalidPatch("missing Begin/End Patch sentinels".into()));
    }

    let body = &lines[1..lines.len() - 1];
    let mut operations = Vec::new();
    let mut i = 0;
    while i < body.len() {
        let line = body[i];
        if let Some(path) = line.strip_prefix(ADD_PREFIX) {
            let mut contents = String::new();
            i += 1;
            while i < body.len() && body[i].starts_with('+') {
                contents.push_str(&body[i][1..]);
                contents.push('\n');
                i += 1;
            }
            operations.push(Operation::Add { path: path.to_string(), contents });
        } else if let Some(path) = line.strip_prefix(DELETE_PREFIX) {
            operations.push(Operation::Delete { path: path.to_string() });
            i += 1;
        } else if let Some(path) = line.strip_prefix(UPDATE_PREFIX) {
            i += 1;
            let move_to = if i < body.len() {
                body[i].strip_prefix(MOVE_PREFIX).map(|dest| {
                    i += 1;
                    dest.to_string()
                })
            } else {
                None
            };
            let mut chunks = Vec::new();
            while i < body.len() && body[i].starts_with("@@") {
                let context_hint = {
                    let hint = body[i][2..].trim();
                    if hint.is_empty() {
                        None
                    } else {
                        Some(hint.to_string())
                    }
                };
                i += 1;
                let mut old_lines = Vec::new();
                let mut new_lines = Vec::new();
                let mut eof = false;
                while i < body.len() {
                    let l = body[i];
                    if l.starts_with("@@") || l.starts_with(ADD_PREFIX) || l.starts_with(DELETE_PREFIX)
                        || l.starts_with(UPDATE_PREFIX)
                    {
                        break;
                    }
                    if l == EOF_MARKER {
                        eof = true;
                        i += 1;
                        break;
                    }
                    match l.as_bytes().first() {
                        Some(b' ') => {
                            old_lines.push(l[1..].to_string());
                            new_lines.push(l[1..].to_string());
                        }
                        Some(b'+') => new_lines.push(l[1..].to_string()),
                        Some(b'-') => old_lines.push(l[1..].to_string()),
                        _ => {
                            old_lines.push(l.to_string());
                            new_lines.push(l.to_string());
                        }
                    }
                    i += 1;
                }
                chunks.push(Chunk { context_hint, old_lines, new_lines, eof });
            }
            operations.push(Operation::Update { path: path.to_string(), move_to, chunks });
        } else if line.trim().is_empty() {
            i += 1;
        } else {
            return Err(ToolError::InvalidPatch(format!("unrecognized patch line: {line}")));
        }
    }

    if operations.is_empty() {
        return Err(ToolError::InvalidPatch("patch contains no operations".into()));
    }
    Ok(operations)
}

fn resolve_target(sandbox: &Sandbox, workdir: &Path, rel: &str) -> Result<PathBuf, ToolError> {
    let candidate = workdir.join(rel);
    if sandbox.within(&candidate) {
        Ok(candidate)
    } else {
        Err(ToolError::PathOutsideSandbox(rel.to_string()))
    }
}

fn apply_operation(sandbox: &Sandbox, workdir: &Path, op: Operation) -> Result<Value, ToolError> {
    match op {
        Operation::Add { path, contents } => {
            let target = resolve_target(sandbox, workdir, &path)?;
            if target.exists() {
                return Err(ToolError::PatchConflict(format!("{path} already exists")));
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ToolError::IoFailure(e.to_string()))?;
            }
            std::fs::write(&target, contents).map_err(|e| ToolError::IoFailure(e.to_string()))?;
            Ok(json!({"path": path, "workspace_path": target.display().to_string(), "kind": "add"}))
        }
        Operation::Delete { path } => {
            let target = resolve_target(sandbox, workdir, &path)?;
            if !target.exists() {
                return Err(ToolError::PatchConflict(format!("{path} does not exist")));
            }
            std::fs::remove_file(&target).map_err(|e| ToolError::IoFailure(e.to_string()))?;
            Ok(json!({"path": path, "workspace_path": target.display().to_string(), "kind": "delete"}))
        }
        Operation::Update { path, move_to, chunks } => {
            let target = resolve_target(sandbox, workdir, &path)?;
            let metadata = std::fs::metadata(&target).map_err(|e| ToolError::IoFailure(e.to_string()))?;
            if metadata.len() > MAX_SOURCE_BYTES {
                return Err(ToolError::IoFailure(format!("{path} exceeds the 8 MiB source cap")));
            }
            let source = std::fs::read_to_string(&target).map_err(|e| ToolError::IoFailure(e.to_string()))?;
            let trailing_newline = source.ends_with('\n');
            let mut merged: Vec<String> = source.lines().map(str::to_string).collect();

            let mut cursor = 0usize;
            for chunk in &chunks {
                cursor = apply_chunk(&mut merged, cursor, chunk)?;
            }

            let mut out = merged.join("\n");
            if trailing_newline {
                out.push('\n');
            }

            let dest = match &move_to {
                Some(dest) => resolve_target(sandbox, workdir, dest)?,
                None => target.clone(),
            };
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ToolError::IoFailure(e.to_string()))?;
            }
            std::fs::write(&dest, out).map_err(|e| ToolError::IoFailure(e.to_string()))?;
            if dest != target {
                std::fs::remove_file(&target).map_err(|e| ToolError::IoFailure(e.to_string()))?;
            }

            Ok(json!({
                "path": path,
                "workspace_path": dest.display().to_string(),
                "kind": "update",
                "move_to": move_to,
            }))
        }
    }
}

fn apply_chunk(merged: &mut Vec<String>, cursor: usize, chunk: &Chunk) -> Result<usize, ToolError> {
    let mut search_from = cursor;
    if let Some(hint) = &chunk.context_hint {
        match find_line(merged, hint, search_from) {
            Some(idx) => search_from = idx + 1,
            None => return Err(ToolError::PatchConflict(format!("context hint not found: {hint}"))),
        }
    }

    let match_idx = if chunk.eof {
        let candidate = merged.len().saturating_sub(chunk.old_lines.len());
        if candidate >= search_from && matches_at(merged, candidate, &chunk.old_lines, MatchPass::Exact) {
            Some(candidate)
        } else {
            find_window(merged, &chunk.old_lines, search_from)
        }
    } else {
        find_window(merged, &chunk.old_lines, search_from)
    };

    let match_idx = match_idx.ok_or_else(|| ToolError::PatchConflict("chunk did not match source".into()))?;

    merged.splice(match_idx..match_idx + chunk.old_lines.len(), chunk.new_lines.clone());
    Ok(match_idx + chunk.new_lines.len())
}

#[derive(Clone, Copy)]
enum MatchPass {
    Exact,
    TrimEnd,
    TrimBoth,
}

fn normalize(pass: MatchPass, s: &str) -> String {
    match pass {
        MatchPass::Exact => s.to_string(),
        MatchPass::TrimEnd => s.trim_end().to_string(),
        MatchPass::TrimBoth => s.trim().to_string(),
    }
}

fn matches_at(merged: &[String], idx: usize, old_lines: &[String], pass: MatchPass) -> bool {
    if idx + old_lines.len() > merged.len() {
        return false;
    }
    old_lines.iter().enumerate().all(|(offset, expected)| {
        normalize(pass, &merged[idx + offset]) == normalize(pass, expected)
    })
}

fn find_window(merged: &[String], old_lines: &[String], from: usize) -> Option<usize> {
    if old_lines.is_empty() {
        return Some(from.min(merged.len()));
    }
    for pass in [MatchPass::Exact, MatchPass::TrimEnd, MatchPass::TrimBoth] {
        for start in from..=merged.len().saturating_sub(old_lines.len()) {
            if matches_at(merged, start, old_lines, pass) {
                return Some(start);
            }
        }
    }
    None
}

fn find_line(merged: &[String], needle: &str, from: usize) -> Option<usize> {
    merged.iter().enumerate().skip(from).find(|(_, l)| l.as_str() == needle).map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use twiddle_sandbox::SandboxMode;

    fn sandbox() -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().unwrap();
        let sbx = Sandbox::new(dir.path(), SandboxMode::WorkspaceWrite).unwrap();
        (dir, sbx)
    }

    #[tokio::test]
    async fn rejects_missing_sentinels() {
        let (_dir, sbx) = sandbox();
        let tool = ApplyPatchTool;
        let err = tool.run(&sbx, &json!({"input": "not a patch"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidPatch(_)));
    }

    #[tokio::test]
    async fn adds_a_new_file() {
        let (dir, sbx) = sandbox();
        let tool = ApplyPatchTool;
        let patch = "*** Begin Patch\n*** Add File: new.txt\n+hello\n+world\n*** End Patch";
        let out = tool.run(&sbx, &json!({"input": patch})).await.unwrap();
        assert_eq!(out["files_changed"], 1);
        let contents = std::fs::read_to_string(dir.path().join("new.txt")).unwrap();
        assert_eq!(contents, "hello\nworld\n");
    }

    #[tokio::test]
    async fn add_conflicts_when_file_exists() {
        let (dir, sbx) = sandbox();
        std::fs::write(dir.path().join("exists.txt"), "x").unwrap();
        let tool = ApplyPatchTool;
        let patch = "*** Begin Patch\n*** Add File: exists.txt\n+y\n*** End Patch";
        let err = tool.run(&sbx, &json!({"input": patch})).await.unwrap_err();
        assert!(matches!(err, ToolError::PatchConflict(_)));
    }

    #[tokio::test]
    async fn deletes_a_file() {
        let (dir, sbx) = sandbox();
        std::fs::write(dir.path().join("gone.txt"), "x").unwrap();
        let tool = ApplyPatchTool;
        let patch = "*** Begin Patch\n*** Delete File: gone.txt\n*** End Patch";
        tool.run(&sbx, &json!({"input": patch})).await.unwrap();
        assert!(!dir.path().join("gone.txt").exists());
    }

    #[tokio::test]
    async fn updates_a_file_with_context_matching() {
        let (dir, sbx) = sandbox();
        std::fs::write(dir.path().join("f.txt"), "one\ntwo\nthree\n").unwrap();
        let tool = ApplyPatchTool;
        let patch = "*** Begin Patch\n*** Update File: f.txt\n@@\n one\n-two\n+TWO\n three\n*** End Patch";
        let out = tool.run(&sbx, &json!({"input": patch})).await.unwrap();
        assert_eq!(out["status"], "success");
        let contents = std::fs::read_to_string(dir.path().join("f.txt")).unwrap();
        assert_eq!(contents, "one\nTWO\nthree\n");
    }

    #[tokio::test]
    async fn update_then_inverse_patch_round_trips() {
        let (dir, sbx) = sandbox();
        std::fs::write(dir.path().join("f.txt"), "one\ntwo\nthree\n").unwrap();
        let tool = ApplyPatchTool;
        let forward = "*** Begin Patch\n*** Update File: f.txt\n@@\n one\n-two\n+TWO\n three\n*** End Patch";
        tool.run(&sbx, &json!({"input": forward})).await.unwrap();
        let backward = "*** Begin Patch\n*** Update File: f.txt\n@@\n one\n-TWO\n+two\n three\n*** End Patch";
        tool.run(&sbx, &json!({"input": backward})).await.unwrap();
        let contents = std::fs::read_to_string(dir.path().join("f.txt")).unwrap();
        assert_eq!(contents, "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn update_conflict_when_chunk_does_not_match() {
        let (dir, sbx) = sandbox();
        std::fs::write(dir.path().join("f.txt"), "one\ntwo\nthree\n").unwrap();
        let tool = ApplyPatchTool;
        let patch = "*** Begin Patch\n*** Update File: f.txt\n@@\n one\n-nope\n+NOPE\n three\n*** End Patch";
        let err = tool.run(&sbx, &json!({"input": patch})).await.unwrap_err();
        assert!(matches!(err, ToolError::PatchConflict(_)));
    }

    #[tokio::test]
    async fn update_with_move_to_relocates_the_file() {
        let (dir, sbx) = sandbox();
        std::fs::write(dir.path().join("old.txt"), "one\ntwo\n").unwrap();
        let tool = ApplyPatchTool;
        let patch = "*** Begin Patch\n*** Update File: old.txt\n*** Move to: new.txt\n@@\n one\n-two\n+TWO\n*** End Patch";
        tool.run(&sbx, &json!({"input": patch})).await.unwrap();
        assert!(!dir.path().join("old.txt").exists());
        let contents = std::fs::read_to_string(dir.path().join("new.txt")).unwrap();
        assert_eq!(contents, "one\nTWO\n");
    }
}
