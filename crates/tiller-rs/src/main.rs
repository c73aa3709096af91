//! Offline tools around the governor's policies.
//!
//! # Examples
//!
//! ```sh
//! # Compress a saved conversation as the pre-turn guard would
//! tiller compress conversation.json --budget 64000 --keep-last 2
//!
//! # Same, archiving originals under ./work/compressed_messages/
//! tiller compress conversation.json --config governor.json --archive-dir work
//!
//! # Parse a judge reply
//! tiller verdict reply.txt --kind completion
//! ```
//!
//! Logs go to stderr; set `RUST_LOG=debug` for per-message decisions.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tiller_rs::Message;
use tiller_rs::context::{CompressionReport, ContextBudgetGuard, MessageArchive, TokenCounter};
use tiller_rs::governor::GovernorConfig;
use tiller_rs::judge::verdict::{COMPLETION_VERDICT, PLAN_VERDICT};
use tiller_rs::store::{AgentIdentity, SharedStore};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "tiller", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the context budget guard over a conversation JSON file
    Compress {
        /// Conversation file (JSON array of messages), or `-` for stdin
        input: String,

        /// Governor config JSON; fields not given take their defaults
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the token budget
        #[arg(long)]
        budget: Option<usize>,

        /// Override how many recent user/tool messages stay verbatim
        #[arg(long)]
        keep_last: Option<usize>,

        /// Write archived originals under this directory
        #[arg(long)]
        archive_dir: Option<PathBuf>,

        /// Print only the report, not the conversation
        #[arg(long)]
        report_only: bool,
    },

    /// Parse a judge reply and print the verdict as JSON
    Verdict {
        /// Reply file, or `-` for stdin
        input: String,

        /// Which tag set to look for
        #[arg(long, value_enum, default_value_t = VerdictKind::Plan)]
        kind: VerdictKind,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum VerdictKind {
    Plan,
    Completion,
}

#[derive(Serialize)]
struct CompressOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    messages: Option<Vec<Message>>,
    report: Option<CompressionReport>,
}

fn read_input(input: &str) -> Result<String, String> {
    if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("failed to read stdin: {e}"))?;
        return Ok(buf);
    }
    std::fs::read_to_string(input).map_err(|e| format!("failed to read {input}: {e}"))
}

async fn compress(
    input: &str,
    config: Option<PathBuf>,
    budget: Option<usize>,
    keep_last: Option<usize>,
    archive_dir: Option<PathBuf>,
    report_only: bool,
) -> Result<String, String> {
    let mut config = match config {
        Some(path) => GovernorConfig::load(&path).map_err(|e| e.to_string())?,
        None => GovernorConfig::default(),
    };
    if let Some(budget) = budget {
        config = config.with_max_context_tokens(budget);
    }
    if let Some(n) = keep_last {
        config = config.with_keep_last_n(n);
    }
    if let Some(dir) = archive_dir {
        config = config.with_archive_dir(dir);
    }
    config.validate().map_err(|e| e.to_string())?;

    let messages: Vec<Message> = serde_json::from_str(&read_input(input)?)
        .map_err(|e| format!("failed to parse conversation: {e}"))?;

    let counter = TokenCounter::new(
        config.tokenizer.strategy,
        &config.tokenizer.model,
        config.tokenizer.chars_per_token,
    );
    let archive = MessageArchive::new(
        Arc::new(SharedStore::new()),
        AgentIdentity::new("tiller", "cli"),
        config.archive_dir.clone(),
    );
    let guard = ContextBudgetGuard::new(config.compression.clone(), counter, archive);
    let (messages, report) = guard.enforce(messages).await;

    let output = CompressOutput {
        messages: (!report_only).then_some(messages),
        report,
    };
    serde_json::to_string_pretty(&output).map_err(|e| e.to_string())
}

fn verdict(input: &str, kind: VerdictKind) -> Result<String, String> {
    let reply = read_input(input)?;
    let parser = match kind {
        VerdictKind::Plan => &*PLAN_VERDICT,
        VerdictKind::Completion => &*COMPLETION_VERDICT,
    };
    match parser.parse(&reply) {
        Some(v) => serde_json::to_string_pretty(&v).map_err(|e| e.to_string()),
        None => Err(format!(
            "no <{}> tag with a boolean value found",
            parser.tags().result
        )),
    }
}

async fn run(cli: Cli) -> Result<String, String> {
    match cli.command {
        Command::Compress {
            input,
            config,
            budget,
            keep_last,
            archive_dir,
            report_only,
        } => compress(&input, config, budget, keep_last, archive_dir, report_only).await,
        Command::Verdict { input, kind } => verdict(&input, kind),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
