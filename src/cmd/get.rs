/*!
`get.rs`

Implements the `get` subcommand: fetch objects by id and print them in the
order the ids were given.

Behavior:
  - Ids come from the command line, or from stdin (one per line) when the
    only id is `-`.
  - Up to `--threads` fetches run at once; output order is still the input
    order.
  - Found objects go to stdout as a YAML sequence, filtered through
    `--include` / `--exclude`. With `--identifiers-only` only their ids are
    printed.
  - Ids with no object behind them are reported on stderr, one line each,
    and do not stop the batch.
  - Any other service error aborts the whole batch; objects already printed
    stay printed.
*/

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::cmd::format::{not_found_line, yaml_item};
use crate::cmd::shared::Session;
use crate::coord::{OrderedFetch, Retrieved};
use crate::input;

/// CLI arguments for `intelq get <collection> <id>...`
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Collection to read from (files, urls, domains, analyses, ...)
    pub collection: String,

    /// Object ids, or '-' to read them from stdin
    #[arg(value_name = "ID", required = true)]
    pub ids: Vec<String>,
}

/// Entrypoint for `get` subcommand.
pub fn execute_get(args: GetArgs, session: &Session) -> Result<()> {
    let stdout = io::stdout();
    let stderr = io::stderr();
    run_get(args, session, &mut stdout.lock(), &mut stderr.lock())
}

fn run_get<O, E>(args: GetArgs, session: &Session, out: &mut O, err: &mut E) -> Result<()>
where
    O: Write,
    E: Write,
{
    let ids: Vec<String> = input::keys_from_args(args.ids).collect();
    let fetch = OrderedFetch::new(Arc::clone(&session.client), session.settings.threads)
        .with_cancellation(session.cancel.clone());

    // First write failure wins; later objects are dropped.
    let mut written: Result<()> = Ok(());
    let fetched = session.block_on(fetch.run(&args.collection, ids, |retrieved| {
        if written.is_ok() {
            written = print_retrieved(session, retrieved, out, err);
        }
    }));

    written?;
    let summary = fetched?;
    info!(
        collection = %args.collection,
        found = summary.found,
        not_found = summary.not_found,
        "get finished"
    );
    Ok(())
}

fn print_retrieved<O: Write, E: Write>(
    session: &Session,
    retrieved: Retrieved,
    out: &mut O,
    err: &mut E,
) -> Result<()> {
    match retrieved {
        Retrieved::Found(object) if session.settings.identifiers_only => {
            writeln!(out, "{}", object.id)?;
        }
        Retrieved::Found(object) => {
            out.write_all(yaml_item(&session.project(&object))?.as_bytes())?;
        }
        Retrieved::NotFound(marker) => {
            writeln!(err, "{}", not_found_line(&marker))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::shared::testing;
    use crate::filter::FieldFilter;
    use serde_json::{Map, Value, json};

    const DOC: &str = r#"
files:
  f1:
    attributes: {size: 10, names: [a.exe]}
  f2:
    attributes: {size: 20, names: [b.pdf]}
"#;

    fn get(session: &Session, ids: &[&str]) -> (Result<()>, String, String) {
        let args = GetArgs {
            collection: "files".into(),
            ids: ids.iter().map(|s| s.to_string()).collect(),
        };
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let result = run_get(args, session, &mut out, &mut err);
        (
            result,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn prints_objects_in_argument_order() {
        let (_rt, _store, session) = testing::session(DOC);
        console::set_colors_enabled_stderr(false);

        let (result, out, err) = get(&session, &["f2", "nope", "f1"]);
        result.unwrap();

        let objects: Vec<Map<String, Value>> = serde_yaml::from_str(&out).unwrap();
        let ids: Vec<_> = objects.iter().map(|o| o["_id"].clone()).collect();
        assert_eq!(ids, vec![json!("f2"), json!("f1")]);
        assert_eq!(objects[0]["size"], json!(20));
        assert_eq!(err.trim(), "files/nope not found");
    }

    #[test]
    fn identifiers_only() {
        let (_rt, _store, mut session) = testing::session(DOC);
        session.settings.identifiers_only = true;

        let (result, out, _) = get(&session, &["f1", "f2"]);
        result.unwrap();
        assert_eq!(out, "f1\nf2\n");
    }

    #[test]
    fn field_filter_applies() {
        let (_rt, _store, mut session) = testing::session(DOC);
        session.settings.filter = FieldFilter::new(["_id", "size"], Vec::<&str>::new()).unwrap();

        let (result, out, _) = get(&session, &["f1"]);
        result.unwrap();
        let objects: Vec<Value> = serde_yaml::from_str(&out).unwrap();
        assert_eq!(objects, vec![json!({"_id": "f1", "size": 10})]);
    }
}
