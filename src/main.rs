// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, BufRead, Write};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use twiddle_core::Session;
use twiddle_model::{ChatClient, ContextUsage, ToolDescriptor};
use twiddle_sandbox::Sandbox;

const PROMPT: &str = "twiddle> ";
const EXIT_SENTINEL: &str = "exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();

    let config = twiddle_config::load().context("loading config")?;
    let cwd = std::env::current_dir().context("resolving current directory")?;
    let sandbox = Sandbox::new(&cwd, config.sandbox_mode).context("initializing sandbox")?;

    let tools: Vec<ToolDescriptor> = twiddle_tools::TOOL_SCHEMAS
        .iter()
        .map(|schema| ToolDescriptor {
            name: schema.id.to_string(),
            description: schema.summary.to_string(),
            parameters: schema.parameters_json(),
        })
        .collect();

    let debug = env_flag("TWIDDLE_DEBUG");
    let no_color = env_flag("NO_COLOR");
    let context_window = config.context_window;
    let approval_policy = config.approval_policy;

    let client = ChatClient::new(&config, tools).context("building chat client")?;
    let mut session = Session::new(client, sandbox, approval_policy, debug);

    match cli.headless_prompt() {
        Some(Ok(text)) => run_one_turn(&mut session, text, context_window, no_color).await,
        Some(Err(msg)) => {
            eprintln!("error: {msg}");
            std::process::exit(1);
        }
        None => run_repl(&mut session, context_window, no_color).await,
    }
}

async fn run_one_turn(
    session: &mut Session,
    text: String,
    context_window: u64,
    no_color: bool,
) -> anyhow::Result<()> {
    let mut stdout = io::stdout();
    match session.run_turn(text, &mut stdout, stdin_approval).await {
        Ok(usage) => {
            print_context_summary(&mut stdout, usage, context_window, no_color);
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_repl(session: &mut Session, context_window: u64, no_color: bool) -> anyhow::Result<()> {
    let mut stdout = io::stdout();
    let stdin = io::stdin();
    loop {
        print!("{PROMPT}");
        stdout.flush().ok();

        let mut line = String::new();
        let bytes_read = stdin.lock().read_line(&mut line).context("reading user input")?;
        if bytes_read == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.eq_ignore_ascii_case(EXIT_SENTINEL) {
            break;
        }

        match session.run_turn(trimmed.to_string(), &mut stdout, stdin_approval).await {
            Ok(usage) => print_context_summary(&mut stdout, usage, context_window, no_color),
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}

/// Read a yes/no line from stdin for an escalation prompt (spec §4.10).
fn stdin_approval(_tool_id: &str, writer: &mut dyn Write) -> bool {
    let _ = writer.flush();
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn print_context_summary(writer: &mut dyn Write, usage: twiddle_model::Usage, context_window: u64, no_color: bool) {
    if !usage.valid {
        return;
    }
    let context = ContextUsage::compute(usage.total_tokens, context_window);
    let remaining_pct = context.remaining_hundredths as f64 / 100.0;
    let line = format!("context: {remaining_pct:.2}% remaining");
    if no_color {
        let _ = writeln!(writer, "{line}");
    } else {
        let color = if remaining_pct < 10.0 {
            "\x1b[31m" // red
        } else if remaining_pct < 30.0 {
            "\x1b[33m" // yellow
        } else {
            "\x1b[32m" // green
        };
        let _ = writeln!(writer, "{color}{line}\x1b[0m");
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| !v.is_empty()).unwrap_or(false)
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
