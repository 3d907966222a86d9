/*!
`create.rs`

Implements the `create` subcommand: one new object per JSON/YAML file.

Each worker reads its file in chunks, publishing
`<path> <pct>% <rate> KiB/s` to its progress slot, then submits the parsed
map. A top-level `_id` key becomes the object id; otherwise the service
assigns one.

Result lines, in completion order:
  <path> <new id>
  <path> [<error>]
*/

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use crate::client::Draft;
use crate::cmd::format::failure_line;
use crate::cmd::shared::{Session, parse_document};
use crate::coord::WorkerSlot;
use crate::input;
use crate::utils::TransferProgress;

const CHUNK_SIZE: usize = 64 * 1024;

/// CLI arguments for `intelq create <collection> <file>...`
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Collection to create the objects in
    pub collection: String,

    /// Object files (JSON or YAML), or '-' to read paths from stdin
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<String>,
}

pub fn execute_create(args: CreateArgs, session: &Session) -> Result<()> {
    run_create(args, session, &mut io::stdout())
}

fn run_create<W: Write + Send>(args: CreateArgs, session: &Session, out: &mut W) -> Result<()> {
    let collection = args.collection.as_str();
    let doer = |path: String, slot: &WorkerSlot| match create_one(session, collection, &path, slot) {
        Ok(id) => format!("{path} {id}"),
        Err(e) => {
            tracing::warn!(%path, error = %e, "create failed");
            failure_line(&path, &format!("{e:#}"))
        }
    };

    session
        .coordinator()
        .run(&doer, input::keys_from_args(args.files), out)
        .context("failed to write results")?;
    Ok(())
}

fn create_one(session: &Session, collection: &str, path: &str, slot: &WorkerSlot) -> Result<String> {
    let raw = read_with_progress(Path::new(path), slot)?;
    let attributes = parse_document(Path::new(path), &raw)?;
    let draft = Draft::from_map(attributes);

    let object = session
        .block_on_cancellable(session.client.create(collection, draft))
        .context("cancelled")??;
    Ok(object.id)
}

/// Read a whole file, reporting progress to `slot` after each chunk.
fn read_with_progress(path: &Path, slot: &WorkerSlot) -> Result<String> {
    let label = path.display().to_string();
    let mut file = File::open(path).with_context(|| format!("failed to open {label}"))?;
    let total = file.metadata().map(|m| m.len()).unwrap_or(0);

    let mut progress = TransferProgress::new(total);
    let mut data = Vec::with_capacity(total as usize);
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file
            .read(&mut chunk)
            .with_context(|| format!("failed to read {label}"))?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..n]);
        progress.advance(n as u64);
        slot.set(progress.snapshot().line(&label));
    }

    String::from_utf8(data).with_context(|| format!("{label} is not valid UTF-8"))
}
