/*!
`wait.rs`

Implements the `wait` subcommand: block until analyses finish, then print
them.

Each worker polls `analyses/<id>` every `--poll-interval` seconds until its
`status` attribute reads `completed`, showing
`Waiting for analysis completion...` plus one dot per poll in its progress
slot. Transient service errors are retried on the next poll; any other
error, or running past `--timeout`, ends that id with an error line.

Completed analyses are printed (filtered) as YAML, in completion order.
*/

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use thiserror::Error;
use tracing::debug;

use crate::client::{ClientError, Object, RemoteClient};
use crate::cmd::format::{failure_line, yaml_item};
use crate::cmd::shared::Session;
use crate::coord::WorkerSlot;
use crate::input;

/// Collection analyses live in.
pub const ANALYSES: &str = "analyses";

pub const DEFAULT_POLL_SECS: u64 = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

const WAITING: &str = "Waiting for analysis completion...";

/// CLI arguments for `intelq wait <analysis-id>...`
#[derive(Args, Debug)]
pub struct WaitArgs {
    /// Analysis ids, or '-' to read them from stdin
    #[arg(value_name = "ANALYSIS", required = true)]
    pub ids: Vec<String>,

    /// Seconds between two polls
    #[arg(long = "poll-interval", value_name = "SECS", default_value_t = DEFAULT_POLL_SECS)]
    pub poll_secs: u64,

    /// Give up on an analysis after this many seconds
    #[arg(long = "timeout", value_name = "SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("analysis not completed after {0:?}")]
    TimedOut(Duration),

    #[error("error retrieving analysis result")]
    Client(#[from] ClientError),
}

/// Poll pacing for [`wait_for_completion`].
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

pub fn execute_wait(args: WaitArgs, session: &Session) -> Result<()> {
    run_wait(args, session, &mut io::stdout())
}

fn run_wait<W: Write + Send>(args: WaitArgs, session: &Session, out: &mut W) -> Result<()> {
    let policy = PollPolicy {
        interval: Duration::from_secs(args.poll_secs.max(1)),
        timeout: Duration::from_secs(args.timeout_secs),
    };
    run_with_policy(input::keys_from_args(args.ids), policy, session, out)
}

fn run_with_policy<I, W>(ids: I, policy: PollPolicy, session: &Session, out: &mut W) -> Result<()>
where
    I: IntoIterator<Item = String>,
    W: Write + Send,
{
    let doer = |id: String, slot: &WorkerSlot| {
        let waited = session
            .block_on_cancellable(wait_for_completion(session.client.as_ref(), &id, policy, slot))
            .ok_or_else(|| anyhow!("cancelled"))
            .and_then(|done| done.map_err(anyhow::Error::from))
            .and_then(|analysis| yaml_item(&session.project(&analysis)));
        slot.clear();
        match waited {
            Ok(yaml) => yaml.trim_end().to_string(),
            Err(e) => failure_line(&id, &format!("{e:#}")),
        }
    };

    session
        .coordinator()
        .run(&doer, ids, out)
        .context("failed to write results")?;
    Ok(())
}

/// Poll one analysis until it completes.
pub async fn wait_for_completion(
    client: &dyn RemoteClient,
    id: &str,
    policy: PollPolicy,
    slot: &WorkerSlot,
) -> Result<Object, WaitError> {
    slot.set(WAITING);
    let poll = async {
        let mut ticker = tokio::time::interval(policy.interval);
        let mut dots = 0;
        loop {
            ticker.tick().await;
            dots += 1;
            slot.set(format!("{WAITING}{}", ".".repeat(dots)));
            match client.fetch(ANALYSES, id).await {
                Ok(analysis) if is_completed(&analysis) => return Ok(analysis),
                Ok(analysis) => {
                    debug!(%id, status = ?analysis.attribute("status"), "analysis pending");
                }
                Err(e) if e.is_transient() => debug!(%id, error = %e, "transient error, retrying"),
                Err(e) => return Err(WaitError::Client(e)),
            }
        }
    };

    tokio::time::timeout(policy.timeout, poll)
        .await
        .map_err(|_| WaitError::TimedOut(policy.timeout))?
}

fn is_completed(analysis: &Object) -> bool {
    analysis.attribute("status").and_then(|s| s.as_str()) == Some("completed")
}
