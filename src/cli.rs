// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::Parser;

/// A sandboxed terminal coding agent.
#[derive(Parser, Debug)]
#[command(name = "twiddle", version, about)]
pub struct Cli {
    /// Run a single headless turn with this prompt text instead of entering
    /// the interactive REPL.
    #[arg(short = 'p', long = "prompt")]
    pub prompt: Option<String>,

    /// Run a single headless turn with the prompt read from this file
    /// (at most 512 KiB). Mutually exclusive with `--prompt` in effect —
    /// when both are given, `--prompt` wins.
    #[arg(long = "prompt-file")]
    pub prompt_file: Option<PathBuf>,
}

impl Cli {
    /// Resolve the headless prompt text, if any was requested.
    pub fn headless_prompt(&self) -> Option<Result<String, String>> {
        if let Some(text) = &self.prompt {
            return Some(Ok(text.clone()));
        }
        let path = self.prompt_file.as_ref()?;
        Some(read_prompt_file(path))
    }
}

const MAX_PROMPT_FILE_BYTES: u64 = 512 * 1024;

fn read_prompt_file(path: &std::path::Path) -> Result<String, String> {
    let meta = std::fs::metadata(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
    if meta.len() > MAX_PROMPT_FILE_BYTES {
        return Err(format!(
            "{} exceeds the {MAX_PROMPT_FILE_BYTES}-byte prompt file limit",
            path.display()
        ));
    }
    std::fs::read_to_string(path).map_err(|e| format!("reading {}: {e}", path.display()))
}
