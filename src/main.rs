use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

mod client;
mod cmd;
mod coord;
mod filter;
mod input;
mod settings;
mod utils;

use client::FileStore;
use cmd::{CreateArgs, DeleteArgs, GetArgs, ListArgs, PatchArgs, Session, WaitArgs};
use coord::ProgressMode;
use filter::FieldFilter;
use settings::{Settings, Threads};

/// intelq - query and manage a threat-intelligence object store
///
/// Command layout:
///   intelq get    <collection> <id>...|-      [-i PATTERN] [-x PATTERN] [--identifiers-only]
///   intelq list   <collection> [--limit N] [--cursor C] [--filter EXPR]
///   intelq delete <collection> <id>...|-
///   intelq patch  <collection> <id>...|-      --set KEY=VALUE... [--attrs-file PATH]
///   intelq create <collection> <file>...|-
///   intelq wait   <analysis>...|-             [--poll-interval SECS] [--timeout SECS]
///
/// Global flags / env:
///   -v / -vv / -vvv   More log output on stderr (RUST_LOG overrides)
///   -q / --quiet      Errors only, no live progress
///   -t / --threads    Concurrent requests (INTELQ_THREADS), must be >= 1
///   -i / --include    Field pattern to keep (repeatable, comma separated)
///   -x / --exclude    Field pattern to drop (repeatable, comma separated)
///   -s / --store      Store document (INTELQ_STORE), YAML or JSON
///   --silent          Print results only, no live progress
///
/// Field patterns use '.' between nested keys: '*' stays within one key,
/// '**' crosses keys. Examples: 'stats.*', '**.date', '{names,tags}'.
///
/// Examples:
///   intelq get files 44d88612fea8a8f36de82e1278abb02f -i 'size' -i 'names'
///   cat hashes.txt | intelq -t 10 get files -
///   intelq list urls --limit 20 --filter tag=phishing
///   intelq patch domains example.com --set reputation=-10 --set tag=null
#[derive(Parser, Debug)]
#[command(
    name = "intelq",
    version,
    author,
    about = "Query and manage a threat-intelligence object store",
    propagate_version = true,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Number of concurrent requests
    #[arg(
        short = 't',
        long,
        global = true,
        env = "INTELQ_THREADS",
        default_value_t = Threads::default()
    )]
    threads: Threads,

    /// Keep fields matching PATTERN
    #[arg(short = 'i', long, global = true, value_name = "PATTERN", value_delimiter = ',')]
    include: Vec<String>,

    /// Drop fields matching PATTERN
    #[arg(short = 'x', long, global = true, value_name = "PATTERN", value_delimiter = ',')]
    exclude: Vec<String>,

    /// Print object ids instead of whole objects
    #[arg(short = 'I', long = "identifiers-only", global = true)]
    identifiers_only: bool,

    /// Store document to operate on
    #[arg(
        short = 's',
        long,
        global = true,
        env = "INTELQ_STORE",
        default_value = "intelq.yaml"
    )]
    store: PathBuf,

    /// Simulated round-trip time per request, in milliseconds
    #[arg(long = "latency-ms", global = true, default_value_t = 0)]
    latency_ms: u64,

    /// No live progress, results only
    #[arg(long, global = true)]
    silent: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch objects by id, printed in argument order
    Get(GetArgs),

    /// Page through a collection
    List(ListArgs),

    /// Delete objects by id
    Delete(DeleteArgs),

    /// Set attributes on objects
    Patch(PatchArgs),

    /// Create objects from JSON/YAML files
    Create(CreateArgs),

    /// Wait for analyses to complete and print them
    Wait(WaitArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = utils::derive_level(cli.verbose, cli.quiet);
    utils::init_logging(level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let filter = FieldFilter::new(&cli.include, &cli.exclude).context("invalid field pattern")?;
    let settings = Settings {
        threads: cli.threads,
        filter,
        progress: ProgressMode::detect(cli.silent || cli.quiet),
        identifiers_only: cli.identifiers_only,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let store = FileStore::open(&cli.store)
        .with_context(|| format!("failed to open store {}", cli.store.display()))?
        .with_latency(Duration::from_millis(cli.latency_ms));
    let store = Arc::new(store);

    let cancel = CancellationToken::new();
    runtime.spawn(cancel_on_ctrl_c(cancel.clone()));

    let session = Session {
        settings,
        client: store.clone(),
        runtime: runtime.handle().clone(),
        cancel,
    };
    tracing::debug!(threads = %session.settings.threads, store = %cli.store.display(), "session ready");

    let outcome = match cli.command {
        Commands::Get(args) => cmd::execute_get(args, &session),
        Commands::List(args) => cmd::execute_list(args, &session),
        Commands::Delete(args) => cmd::execute_delete(args, &session),
        Commands::Patch(args) => cmd::execute_patch(args, &session),
        Commands::Create(args) => cmd::execute_create(args, &session),
        Commands::Wait(args) => cmd::execute_wait(args, &session),
    };

    // Mutations that went through are kept even when the command failed later.
    let saved = store.save();
    outcome?;
    saved.context("failed to save store")?;
    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("interrupted, cancelling outstanding requests");
        cancel.cancel();
    }
}
