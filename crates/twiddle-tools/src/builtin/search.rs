// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The search adapter (spec §4.7): shells out to ripgrep or ast-grep,
//! parses their JSON-lines output, and assembles match records with
//! surrounding context read back from the source files.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;
use twiddle_sandbox::Sandbox;

use crate::errors::ToolError;
use crate::tool::ToolCore;

const OUTPUT_CAP: usize = 512 * 1024;
const DEFAULT_LIMIT: usize = 200;
const MAX_LIMIT: usize = 2000;
const MAX_PATHS: usize = 16;
const MAX_GLOBS: usize = 32;

pub struct SearchTool;

#[async_trait]
impl ToolCore for SearchTool {
    async fn run(&self, sandbox: &Sandbox, args: &Value) -> Result<Value, ToolError> {
        let params = Params::parse(args)?;
        let roots = params.resolve_roots(sandbox)?;

        let (results, stats, truncated, notes) = match params.engine.as_str() {
            "ast-grep" => run_ast_grep(&params, &roots).await?,
            _ => run_ripgrep(&params, &roots).await?,
        };

        let results = attach_context(sandbox, &params, results)?;

        Ok(json!({
            "engine": params.engine,
            "results": results,
            "truncated": truncated,
            "stats": stats,
            "notes": notes,
        }))
    }
}

struct Params {
    pattern: String,
    engine: String,
    paths: Vec<String>,
    include_globs: Vec<String>,
    exclude_globs: Vec<String>,
    case_sensitive: bool,
    regex: bool,
    context_before: u64,
    context_after: u64,
    limit: usize,
    ast_language: Option<String>,
}

impl Params {
    fn parse(args: &Value) -> Result<Self, ToolError> {
        let pattern = args
            .get("pattern")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ToolError::InvalidPayload("pattern must be non-empty".into()))?
            .to_string();

        let engine = args
            .get("engine")
            .and_then(Value::as_str)
            .unwrap_or("ripgrep")
            .to_string();
        if engine != "ripgrep" && engine != "ast-grep" {
            return Err(ToolError::InvalidPayload(format!("unknown engine '{engine}'")));
        }

        let paths = str_array(args, "paths");
        if paths.len() > MAX_PATHS {
            return Err(ToolError::InvalidPayload("too many paths".into()));
        }
        let include_globs = str_array(args, "include_globs");
        if include_globs.len() > MAX_GLOBS {
            return Err(ToolError::InvalidPayload("too many include_globs".into()));
        }
        let exclude_globs = str_array(args, "exclude_globs");
        if exclude_globs.len() > MAX_GLOBS {
            return Err(ToolError::InvalidPayload("too many exclude_globs".into()));
        }

        let case_sensitive = args.get("case_sensitive").and_then(Value::as_bool).unwrap_or(true);
        let regex = args.get("regex").and_then(Value::as_bool).unwrap_or(false);
        let context_before = args.get("context_before").and_then(Value::as_u64).unwrap_or(0).min(10);
        let context_after = args.get("context_after").and_then(Value::as_u64).unwrap_or(0).min(10);
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, MAX_LIMIT);
        let ast_language = args.get("ast_language").and_then(Value::as_str).map(str::to_string);

        Ok(Self {
            pattern,
            engine,
            paths,
            include_globs,
            exclude_globs,
            case_sensitive,
            regex,
            context_before,
            context_after,
            limit,
            ast_language,
        })
    }

    fn resolve_roots(&self, sandbox: &Sandbox) -> Result<Vec<std::path::PathBuf>, ToolError> {
        if self.paths.is_empty() {
            return Ok(vec![sandbox.root().to_path_buf()]);
        }
        self.paths.iter().map(|p| sandbox.resolve(p).map_err(Into::into)).collect()
    }
}

fn str_array(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

struct RawMatch {
    path: String,
    line: u64,
    column: u64,
    text: String,
    line_text: String,
    lines: Option<String>,
    replacement: Option<String>,
}

async fn run_child_capped(mut cmd: Command) -> Result<(Vec<u8>, Vec<u8>, i32), ToolError> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| ToolError::BinaryUnavailable(e.to_string()))?;
    debug!(pid = ?child.id(), "spawned search child process");

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| ToolError::CommandFailed("child stdout was not piped".to_string()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| ToolError::CommandFailed("child stderr was not piped".to_string()))?;
    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();

    let out_task = async {
        let mut chunk = [0u8; 8192];
        loop {
            let n = stdout.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            out_buf.extend_from_slice(&chunk[..n]);
            if out_buf.len() > OUTPUT_CAP {
                break;
            }
        }
    };
    let err_task = async {
        let mut chunk = [0u8; 8192];
        loop {
            let n = stderr.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            err_buf.extend_from_slice(&chunk[..n]);
            if err_buf.len() > OUTPUT_CAP {
                break;
            }
        }
    };
    tokio::join!(out_task, err_task);

    let overflowed = out_buf.len() > OUTPUT_CAP || err_buf.len() > OUTPUT_CAP;
    let status = child.wait().await.map_err(|e| ToolError::CommandFailed(e.to_string()))?;
    if overflowed {
        return Err(ToolError::ToolLimitExceeded);
    }
    Ok((out_buf, err_buf, status.code().unwrap_or(-1)))
}

async fn run_ripgrep(
    params: &Params,
    roots: &[std::path::PathBuf],
) -> Result<(Vec<RawMatch>, Value, bool, Vec<String>), ToolError> {
    let mut cmd = Command::new("rg");
    cmd.arg("--json")
        .arg("--color=never")
        .arg("--line-number")
        .arg("--column")
        .arg("--no-heading")
        .arg("--with-filename");
    if !params.case_sensitive {
        cmd.arg("--ignore-case");
    }
    if !params.regex {
        cmd.arg("--fixed-strings");
    }
    for g in &params.include_globs {
        cmd.arg("--glob").arg(g);
    }
    for g in &params.exclude_globs {
        cmd.arg("--glob").arg(format!("!{g}"));
    }
    cmd.arg("-e").arg(&params.pattern).arg("--");
    for root in roots {
        cmd.arg(root);
    }

    let (stdout, stderr, code) = run_child_capped(cmd).await?;
    if code >= 2 {
        return Err(ToolError::CommandFailed(String::from_utf8_lossy(&stderr).trim().to_string()));
    }

    let text = String::from_utf8_lossy(&stdout);
    let mut results = Vec::new();
    let mut truncated = false;
    'lines: for line in text.lines() {
        let Ok(obj) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if obj.get("type").and_then(Value::as_str) != Some("match") {
            continue;
        }
        let data = &obj["data"];
        let path = data["path"]["text"].as_str().unwrap_or_default().to_string();
        let line_no = data["line_number"].as_u64().unwrap_or(0);
        let line_text = data["lines"]["text"].as_str().unwrap_or_default().trim_end_matches('\n').to_string();
        for sm in data["submatches"].as_array().into_iter().flatten() {
            if results.len() >= params.limit {
                truncated = true;
                break 'lines;
            }
            let start = sm["start"].as_u64().unwrap_or(0);
            let matched = sm["match"]["text"].as_str().unwrap_or_default().to_string();
            results.push(RawMatch {
                path: path.clone(),
                line: line_no,
                column: start + 1,
                text: matched,
                line_text: line_text.clone(),
                lines: None,
                replacement: None,
            });
        }
    }
    let count = results.len();
    Ok((results, json!({"matches": count}), truncated, Vec::new()))
}

async fn run_ast_grep(
    params: &Params,
    roots: &[std::path::PathBuf],
) -> Result<(Vec<RawMatch>, Value, bool, Vec<String>), ToolError> {
    let build = |binary: &str| {
        let mut cmd = Command::new(binary);
        cmd.arg("run").arg("--json=stream").arg("-p").arg(&params.pattern);
        if let Some(lang) = &params.ast_language {
            cmd.arg("--lang").arg(lang);
        }
        for g in &params.include_globs {
            cmd.arg("--globs").arg(g);
        }
        for g in &params.exclude_globs {
            cmd.arg("--globs").arg(format!("!{g}"));
        }
        for root in roots {
            cmd.arg(root);
        }
        cmd
    };

    let (stdout, stderr, code) = match run_child_capped(build("sg")).await {
        Err(ToolError::BinaryUnavailable(_)) => {
            debug!("'sg' binary not found, falling back to 'ast-grep'");
            run_child_capped(build("ast-grep")).await?
        }
        other => other?,
    };
    if code >= 2 {
        return Err(ToolError::CommandFailed(String::from_utf8_lossy(&stderr).trim().to_string()));
    }

    let text = String::from_utf8_lossy(&stdout);
    let mut results = Vec::new();
    let mut truncated = false;
    for line in text.lines() {
        if results.len() >= params.limit {
            truncated = true;
            break;
        }
        let Ok(obj) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let path = obj["file"].as_str().unwrap_or_default().to_string();
        let line_no = obj["range"]["start"]["line"].as_u64().unwrap_or(0) + 1;
        let column = obj["range"]["start"]["column"].as_u64().unwrap_or(0) + 1;
        let match_text = obj["text"].as_str().unwrap_or_default().to_string();
        let lines = obj["lines"].as_str().map(str::to_string).or_else(|| Some(match_text.clone()));
        let replacement = obj["replacement"].as_str().map(str::to_string);
        results.push(RawMatch {
            path,
            line: line_no,
            column,
            text: match_text,
            line_text: lines.clone().unwrap_or_default(),
            lines,
            replacement,
        });
    }
    let count = results.len();
    Ok((results, json!({"matches": count}), truncated, Vec::new()))
}

fn attach_context(sandbox: &Sandbox, params: &Params, matches: Vec<RawMatch>) -> Result<Vec<Value>, ToolError> {
    let mut out = Vec::with_capacity(matches.len());
    for m in matches {
        let mut record = json!({
            "path": relative_to_sandbox(sandbox, &m.path),
            "line": m.line,
            "column": m.column,
            "match": m.text,
            "line_text": m.line_text,
        });
        if let Some(lines) = &m.lines {
            record["lines"] = json!(lines);
        }
        if let Some(replacement) = &m.replacement {
            record["replacement"] = json!(replacement);
        }
        if params.context_before > 0 || params.context_after > 0 {
            let (before, after) = gather_context(sandbox, &m.path, m.line, params.context_before, params.context_after)?;
            record["context_before"] = json!(before);
            record["context_after"] = json!(after);
        }
        out.push(record);
    }
    Ok(out)
}

fn relative_to_sandbox(sandbox: &Sandbox, path: &str) -> String {
    Path::new(path)
        .strip_prefix(sandbox.root())
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| path.to_string())
}

fn gather_context(
    sandbox: &Sandbox,
    path: &str,
    line: u64,
    before: u64,
    after: u64,
) -> Result<(Vec<String>, Vec<String>), ToolError> {
    let resolved = sandbox.resolve(path)?;
    let contents = std::fs::read_to_string(&resolved).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ToolError::PathNotFound(path.to_string()),
        std::io::ErrorKind::PermissionDenied => ToolError::PermissionDenied(path.to_string()),
        _ => ToolError::IoFailure(e.to_string()),
    })?;
    let all_lines: Vec<&str> = contents.lines().collect();
    let idx = line.saturating_sub(1) as usize;
    let start = idx.saturating_sub(before as usize);
    let end = (idx + after as usize + 1).min(all_lines.len());
    let before_lines = all_lines[start..idx.min(all_lines.len())].iter().map(|s| s.to_string()).collect();
    let after_start = (idx + 1).min(all_lines.len());
    let after_lines = all_lines[after_start..end].iter().map(|s| s.to_string()).collect();
    Ok((before_lines, after_lines))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_pattern() {
        let args = json!({"pattern": ""});
        let err = Params::parse(&args).unwrap_err();
        assert!(matches!(err, ToolError::InvalidPayload(_)));
    }

    #[test]
    fn rejects_unknown_engine() {
        let args = json!({"pattern": "x", "engine": "grep"});
        let err = Params::parse(&args).unwrap_err();
        assert!(matches!(err, ToolError::InvalidPayload(_)));
    }

    #[test]
    fn limit_clamped_to_max() {
        let args = json!({"pattern": "x", "limit": 999999});
        let params = Params::parse(&args).unwrap();
        assert_eq!(params.limit, MAX_LIMIT);
    }

    #[test]
    fn defaults_match_spec() {
        let args = json!({"pattern": "x"});
        let params = Params::parse(&args).unwrap();
        assert_eq!(params.engine, "ripgrep");
        assert!(params.case_sensitive);
        assert!(!params.regex);
        assert_eq!(params.limit, DEFAULT_LIMIT);
    }
}
