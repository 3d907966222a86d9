/*!
`delete.rs`

Implements the `delete` subcommand: remove objects by id, `--threads` at a
time. One result line per id, in completion order:

  <id> deleted
  <id> [<error>]
*/

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use crate::cmd::format::failure_line;
use crate::cmd::shared::Session;
use crate::coord::WorkerSlot;
use crate::input;

/// CLI arguments for `intelq delete <collection> <id>...`
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Collection holding the objects
    pub collection: String,

    /// Object ids, or '-' to read them from stdin
    #[arg(value_name = "ID", required = true)]
    pub ids: Vec<String>,
}

pub fn execute_delete(args: DeleteArgs, session: &Session) -> Result<()> {
    run_delete(args, session, &mut io::stdout())
}

fn run_delete<W: Write + Send>(args: DeleteArgs, session: &Session, out: &mut W) -> Result<()> {
    let collection = args.collection.as_str();
    let doer = |id: String, slot: &WorkerSlot| {
        slot.set(format!("deleting {id}"));
        match session.block_on_cancellable(session.client.delete(collection, &id)) {
            Some(Ok(())) => format!("{id} deleted"),
            Some(Err(e)) => failure_line(&id, &e),
            None => failure_line(&id, &"cancelled"),
        }
    };

    let summary = session
        .coordinator()
        .run(&doer, input::keys_from_args(args.ids), out)
        .context("failed to write results")?;
    debug!(submitted = summary.submitted, printed = summary.printed, "delete finished");
    Ok(())
}
