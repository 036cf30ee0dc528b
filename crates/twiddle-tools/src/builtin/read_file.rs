// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The indentation-aware file reader (spec §4.6): a plain line-range slice,
//! or a structural slice that expands outward from an anchor line while
//! staying within a bounded number of indentation levels.

use async_trait::async_trait;
use serde_json::{json, Value};
use twiddle_sandbox::Sandbox;

use crate::errors::ToolError;
use crate::tool::ToolCore;

const HARD_LINE_CAP: usize = 4000;
const DEFAULT_LIMIT: usize = 2000;
const MAX_LINE_LENGTH: usize = 500;
const TAB_WIDTH: usize = 4;

pub struct ReadFileTool;

#[async_trait]
impl ToolCore for ReadFileTool {
    async fn run(&self, sandbox: &Sandbox, args: &Value) -> Result<Value, ToolError> {
        let file_path = args
            .get("file_path")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidPayload("file_path is required".into()))?;
        let resolved = sandbox.resolve(file_path)?;
        if !resolved.is_file() {
            return Err(ToolError::PathNotFile(resolved.display().to_string()));
        }
        let bytes = std::fs::read(&resolved).map_err(|e| ToolError::IoFailure(e.to_string()))?;
        let text = String::from_utf8_lossy(&bytes);
        let raw_lines: Vec<&str> = split_lines(&text);
        let total_lines = raw_lines.len();

        let mode = args.get("mode").and_then(Value::as_str).unwrap_or("slice");
        match mode {
            "slice" => slice_mode(args, &raw_lines, total_lines),
            "indentation" => indentation_mode(args, &raw_lines, total_lines),
            other => Err(ToolError::InvalidPayload(format!("unknown mode '{other}'"))),
        }
    }
}

/// Split on `\n`, dropping one trailing empty element left by a final
/// newline (so a 3-line `"a\nb\nc\n"` file yields exactly 3 records).
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

fn render_line(number: usize, raw: &str) -> String {
    let truncated: String = raw.chars().take(MAX_LINE_LENGTH).collect();
    format!("L{number}: {truncated}")
}

fn as_usize(args: &Value, key: &str, default: usize) -> usize {
    args.get(key).and_then(Value::as_u64).map(|v| v as usize).unwrap_or(default)
}

fn slice_mode(args: &Value, raw_lines: &[&str], total_lines: usize) -> Result<Value, ToolError> {
    let offset = as_usize(args, "offset", 1).max(1);
    let limit = as_usize(args, "limit", DEFAULT_LIMIT).max(1);

    if offset > total_lines {
        return Err(ToolError::OffsetExceedsLength);
    }

    let start = offset - 1;
    let end = (start + limit).min(total_lines);
    let lines: Vec<String> = (start..end)
        .map(|i| render_line(i + 1, raw_lines[i]))
        .collect();
    let truncated = end < total_lines;

    Ok(json!({"mode": "slice", "lines": lines, "truncated": truncated}))
}

struct LineRecord<'a> {
    number: usize,
    raw: &'a str,
    indent: usize,
    effective_indent: usize,
}

fn own_indent(line: &str) -> usize {
    let mut indent = 0usize;
    for b in line.bytes() {
        match b {
            b' ' => indent += 1,
            b'\t' => indent += TAB_WIDTH,
            _ => return indent,
        }
    }
    indent
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_header_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('#') || trimmed.starts_with("//") || trimmed.starts_with("--")
}

fn build_records(raw_lines: &[&str], cap: usize) -> Vec<LineRecord<'_>> {
    let n = raw_lines.len().min(cap);
    let mut records = Vec::with_capacity(n);
    let mut last_nonblank_indent = 0usize;
    for (i, raw) in raw_lines.iter().take(n).enumerate() {
        let indent = own_indent(raw);
        let effective_indent = if is_blank(raw) {
            last_nonblank_indent
        } else {
            last_nonblank_indent = indent;
            indent
        };
        records.push(LineRecord {
            number: i + 1,
            raw,
            indent,
            effective_indent,
        });
    }
    records
}

fn indentation_mode(args: &Value, raw_lines: &[&str], total_lines: usize) -> Result<Value, ToolError> {
    let offset = as_usize(args, "offset", 1).max(1);
    let anchor_line = as_usize(args, "anchor_line", offset).max(1);
    let max_levels = as_usize(args, "max_levels", 0);
    let include_siblings = args.get("include_siblings").and_then(Value::as_bool).unwrap_or(false);
    let include_header = args.get("include_header").and_then(Value::as_bool).unwrap_or(true);
    let limit = as_usize(args, "limit", DEFAULT_LIMIT).max(1);

    let records = build_records(raw_lines, HARD_LINE_CAP);
    let parsed_total = records.len();

    if anchor_line > total_lines || anchor_line > parsed_total {
        return Err(ToolError::AnchorExceedsLength);
    }
    let anchor_idx = anchor_line - 1;

    let min_indent = if max_levels > 0 {
        records[anchor_idx].effective_indent.saturating_sub(max_levels * TAB_WIDTH)
    } else {
        0
    };

    let final_limit = limit.min(parsed_total);

    let mut start = anchor_idx;
    let mut end = anchor_idx;
    // Upward admits at most one plain sibling at `min_indent`; downward
    // admits none (spec §9 open question: the original under-admits one
    // line on the downward side — reproduced literally, not "fixed").
    let mut up_sibling_budget = 1usize;
    let down_sibling_budget = 0usize;
    let mut up_siblings_taken = 0usize;
    let mut down_siblings_taken = 0usize;
    let mut up_done = false;
    let mut down_done = false;

    loop {
        if (end - start + 1) >= final_limit {
            break;
        }
        let mut progressed = false;

        if !up_done {
            if start == 0 {
                up_done = true;
            } else {
                let candidate = &records[start - 1];
                let header_ok = include_header && is_header_comment(candidate.raw);
                if header_ok {
                    start -= 1;
                    up_done = true; // single unconditional grab of the header line
                    progressed = true;
                } else if candidate.effective_indent >= min_indent {
                    let is_boundary = candidate.effective_indent == min_indent;
                    if is_boundary && !include_siblings {
                        if up_siblings_taken >= up_sibling_budget {
                            up_done = true;
                        } else {
                            start -= 1;
                            up_siblings_taken += 1;
                            progressed = true;
                        }
                    } else {
                        start -= 1;
                        progressed = true;
                    }
                } else {
                    up_done = true;
                }
            }
        }

        if !down_done && (end - start + 1) < final_limit {
            if end + 1 >= parsed_total {
                down_done = true;
            } else {
                let candidate = &records[end + 1];
                if candidate.effective_indent >= min_indent {
                    let is_boundary = candidate.effective_indent == min_indent;
                    if is_boundary && !include_siblings {
                        if down_siblings_taken >= down_sibling_budget {
                            down_done = true;
                        } else {
                            end += 1;
                            down_siblings_taken += 1;
                            progressed = true;
                        }
                    } else {
                        end += 1;
                        progressed = true;
                    }
                } else {
                    down_done = true;
                }
            }
        }

        if up_done && down_done {
            break;
        }
        if !progressed {
            break;
        }
    }

    let cap_hit = (end - start + 1) >= final_limit;
    let truncated = cap_hit && (!up_done || !down_done);

    let mut slice: Vec<&LineRecord> = records[start..=end].iter().collect();
    while slice.first().is_some_and(|r| is_blank(r.raw)) {
        slice.remove(0);
    }
    while slice.last().is_some_and(|r| is_blank(r.raw)) {
        slice.pop();
    }

    let lines: Vec<String> = slice.iter().map(|r| render_line(r.number, r.raw)).collect();

    Ok(json!({"mode": "indentation", "lines": lines, "truncated": truncated}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sandbox_with(contents: &str) -> (tempfile::TempDir, Sandbox, &'static str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let sbx = Sandbox::new(dir.path(), twiddle_sandbox::SandboxMode::ReadOnly).unwrap();
        (dir, sbx, "f.txt")
    }

    #[tokio::test]
    async fn slice_mode_boundary_example() {
        let (_dir, sbx, name) = sandbox_with("a\nb\nc\n");
        let tool = ReadFileTool;
        let args = json!({"file_path": name, "mode": "slice", "offset": 1, "limit": 2});
        let out = tool.run(&sbx, &args).await.unwrap();
        assert_eq!(out["lines"], json!(["L1: a", "L2: b"]));
        assert_eq!(out["truncated"], true);
    }

    #[tokio::test]
    async fn slice_mode_offset_exceeds_length() {
        let (_dir, sbx, name) = sandbox_with("a\nb\n");
        let tool = ReadFileTool;
        let args = json!({"file_path": name, "mode": "slice", "offset": 10, "limit": 2});
        let err = tool.run(&sbx, &args).await.unwrap_err();
        assert!(matches!(err, ToolError::OffsetExceedsLength));
    }

    #[tokio::test]
    async fn indentation_mode_boundary_example() {
        let (_dir, sbx, name) = sandbox_with("# header\nfoo():\n  bar()\n  baz()\nqux()\n");
        let tool = ReadFileTool;
        let args = json!({
            "file_path": name,
            "mode": "indentation",
            "anchor_line": 3,
            "max_levels": 1,
            "include_siblings": false,
        });
        let out = tool.run(&sbx, &args).await.unwrap();
        assert_eq!(
            out["lines"],
            json!(["L1: # header", "L2: foo():", "L3:   bar()", "L4:   baz()"])
        );
    }

    #[tokio::test]
    async fn indentation_mode_anchor_exceeds_length() {
        let (_dir, sbx, name) = sandbox_with("a\nb\n");
        let tool = ReadFileTool;
        let args = json!({"file_path": name, "mode": "indentation", "anchor_line": 99});
        let err = tool.run(&sbx, &args).await.unwrap_err();
        assert!(matches!(err, ToolError::AnchorExceedsLength));
    }

    #[tokio::test]
    async fn slice_truncation_is_monotonic_in_limit() {
        let (_dir, sbx, name) = sandbox_with("a\nb\nc\nd\ne\n");
        let tool = ReadFileTool;
        let mut prev_len = 0;
        for limit in 1..=5 {
            let args = json!({"file_path": name, "mode": "slice", "offset": 1, "limit": limit});
            let out = tool.run(&sbx, &args).await.unwrap();
            let lines = out["lines"].as_array().unwrap();
            assert!(lines.len() >= prev_len);
            prev_len = lines.len();
            if limit >= 5 {
                assert_eq!(out["truncated"], false);
            }
        }
    }

    #[tokio::test]
    async fn line_length_truncated_to_500_code_points() {
        let long_line = "x".repeat(600);
        let (_dir, sbx, name) = sandbox_with(&format!("{long_line}\n"));
        let tool = ReadFileTool;
        let args = json!({"file_path": name, "mode": "slice", "offset": 1, "limit": 1});
        let out = tool.run(&sbx, &args).await.unwrap();
        let rendered = out["lines"][0].as_str().unwrap();
        // "L1: " prefix + 500 x's
        assert_eq!(rendered.len(), "L1: ".len() + 500);
    }

    /// Spec §9 open question: at `min_indent`, upward expansion admits one
    /// plain sibling before stopping, but downward expansion admits none —
    /// reproduced literally rather than symmetrized.
    #[tokio::test]
    async fn indentation_downward_sibling_boundary() {
        let (_dir, sbx, name) = sandbox_with("block:\n  a()\n  b()\nc()\nd()\n");
        let tool = ReadFileTool;
        let args = json!({
            "file_path": name,
            "mode": "indentation",
            "anchor_line": 2,
            "max_levels": 1,
            "include_siblings": false,
        });
        let out = tool.run(&sbx, &args).await.unwrap();
        assert_eq!(
            out["lines"],
            json!(["L1: block:", "L2:   a()", "L3:   b()"])
        );
    }
}
