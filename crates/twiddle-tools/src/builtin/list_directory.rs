// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The directory lister. Not spelled out in detail upstream — modeled on
//! the teacher's own directory walker, with the same noise exclusions and
//! a depth/limit pair instead of an unbounded recursive dump.

use async_trait::async_trait;
use serde_json::{json, Value};
use twiddle_sandbox::Sandbox;

use crate::errors::ToolError;
use crate::tool::ToolCore;

const DEFAULT_DEPTH: usize = 1;
const MAX_DEPTH: usize = 5;
const DEFAULT_LIMIT: usize = 200;

const EXCLUDED: &[&str] = &[".git", "target", "node_modules"];

pub struct ListDirectoryTool;

#[async_trait]
impl ToolCore for ListDirectoryTool {
    async fn run(&self, sandbox: &Sandbox, args: &Value) -> Result<Value, ToolError> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let depth = args
            .get("depth")
            .and_then(Value::as_u64)
            .map(|d| d as usize)
            .unwrap_or(DEFAULT_DEPTH)
            .clamp(1, MAX_DEPTH);
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIMIT)
            .max(1);

        let root = sandbox.resolve(path)?;
        if !root.is_dir() {
            return Err(ToolError::PathNotDirectory(root.display().to_string()));
        }

        let mut entries = Vec::new();
        let mut truncated = false;
        walk(sandbox, &root, &root, 1, depth, limit, &mut entries, &mut truncated);

        Ok(json!({"entries": entries, "truncated": truncated}))
    }
}

fn walk(
    sandbox: &Sandbox,
    base: &std::path::Path,
    dir: &std::path::Path,
    level: usize,
    max_depth: usize,
    limit: usize,
    out: &mut Vec<Value>,
    truncated: &mut bool,
) {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    let mut children: Vec<_> = read_dir.flatten().collect();
    children.sort_by_key(|e| e.file_name());

    for entry in children {
        if out.len() >= limit {
            *truncated = true;
            return;
        }
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if EXCLUDED.contains(&name_str.as_ref()) {
            continue;
        }
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let rel = entry.path().strip_prefix(base).unwrap_or(&entry.path()).to_path_buf();
        let kind = if file_type.is_dir() {
            "directory"
        } else if file_type.is_symlink() {
            "symlink"
        } else {
            "file"
        };
        out.push(json!({"path": rel.display().to_string(), "kind": kind}));

        if file_type.is_dir() && level < max_depth {
            // Re-resolve through the sandbox so a symlinked subtree can't
            // be walked past the root boundary.
            if let Ok(resolved) = sandbox.resolve(entry.path().strip_prefix(sandbox.root()).unwrap_or(&entry.path())) {
                walk(sandbox, base, &resolved, level + 1, max_depth, limit, out, truncated);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twiddle_sandbox::SandboxMode;

    #[tokio::test]
    async fn lists_files_and_excludes_noise_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "y").unwrap();

        let sbx = Sandbox::new(dir.path(), SandboxMode::ReadOnly).unwrap();
        let tool = ListDirectoryTool;
        let out = tool.run(&sbx, &json!({"depth": 2})).await.unwrap();
        let entries = out["entries"].as_array().unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e["path"].as_str().unwrap()).collect();
        assert!(names.contains(&"a.txt"));
        assert!(names.contains(&"sub"));
        assert!(!names.iter().any(|n| n.contains(".git")));
    }

    #[tokio::test]
    async fn rejects_a_path_that_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();
        let sbx = Sandbox::new(dir.path(), SandboxMode::ReadOnly).unwrap();
        let tool = ListDirectoryTool;
        let err = tool.run(&sbx, &json!({"path": "f.txt"})).await.unwrap_err();
        assert!(matches!(err, ToolError::PathNotDirectory(_)));
    }

    #[tokio::test]
    async fn truncates_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{i}.txt")), "x").unwrap();
        }
        let sbx = Sandbox::new(dir.path(), SandboxMode::ReadOnly).unwrap();
        let tool = ListDirectoryTool;
        let out = tool.run(&sbx, &json!({"limit": 2})).await.unwrap();
        assert_eq!(out["entries"].as_array().unwrap().len(), 2);
        assert_eq!(out["truncated"], true);
    }
}
