/*!
`patch.rs`

Implements the `patch` subcommand: apply the same attribute changes to one
or more objects.

Attribute sources (merged, later wins):
  --attrs-file attrs.(json|yaml)   root must be a map
  --set KEY=VALUE                  repeatable; dotted keys nest
                                   (`stats.harmless=0`)

`--set` values are coerced to the narrowest primitive they parse as
(null, integer, number, boolean, else string). A null value removes the
attribute. Nested maps are merged into the stored ones, so
`--set stats.harmless=0` leaves the other `stats` keys alone.

Result lines, in completion order:
  <id> patched
  <id> [<error>]
*/

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use crate::cmd::format::failure_line;
use crate::cmd::shared::{Session, build_attributes};
use crate::coord::WorkerSlot;
use crate::input;

/// CLI arguments for `intelq patch <collection> <id>... --set k=v`
#[derive(Args, Debug)]
pub struct PatchArgs {
    /// Collection holding the objects
    pub collection: String,

    /// Object ids, or '-' to read them from stdin
    #[arg(value_name = "ID", required = true)]
    pub ids: Vec<String>,

    /// Attribute to set (KEY=VALUE), repeatable
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub assignments: Vec<String>,

    /// Load attributes from file (JSON or YAML). --set overrides file entries
    #[arg(long = "attrs-file", value_name = "PATH")]
    pub attrs_file: Option<PathBuf>,
}

pub fn execute_patch(args: PatchArgs, session: &Session) -> Result<()> {
    run_patch(args, session, &mut io::stdout())
}

fn run_patch<W: Write + Send>(args: PatchArgs, session: &Session, out: &mut W) -> Result<()> {
    // Build once, fail before touching any object.
    let attributes = build_attributes(args.attrs_file.as_deref(), &args.assignments)?;
    debug!(keys = attributes.len(), "patch attributes ready");

    let collection = args.collection.as_str();
    let doer = |id: String, slot: &WorkerSlot| {
        slot.set(format!("patching {id}"));
        let call = session.client.patch(collection, &id, attributes.clone());
        match session.block_on_cancellable(call) {
            Some(Ok(())) => format!("{id} patched"),
            Some(Err(e)) => failure_line(&id, &e),
            None => failure_line(&id, &"cancelled"),
        }
    };

    session
        .coordinator()
        .run(&doer, input::keys_from_args(args.ids), out)
        .context("failed to write results")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RemoteClient;
    use crate::cmd::shared::testing;
    use serde_json::json;

    const DOC: &str = r#"
domains:
  a.com: {attributes: {reputation: 0, tag: old}}
  b.com: {attributes: {reputation: 0}}
  c.org: {attributes: {stats: {harmless: 3, malicious: 2}}}
"#;

    #[test]
    fn applies_coerced_values_to_every_id() {
        let (rt, store, session) = testing::session(DOC);
        let args = PatchArgs {
            collection: "domains".into(),
            ids: vec!["a.com".into(), "b.com".into(), "c.com".into()],
            assignments: vec!["reputation=-5".into(), "tag=null".into(), "safe=no".into()],
            attrs_file: None,
        };

        let mut out = Vec::new();
        run_patch(args, &session, &mut out).unwrap();

        let mut lines: Vec<String> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        lines.sort();
        assert_eq!(
            lines,
            vec![
                "a.com patched",
                "b.com patched",
                "c.com [domains/c.com not found]"
            ]
        );

        let a = rt.block_on(store.fetch("domains", "a.com")).unwrap();
        assert_eq!(a.attribute("reputation"), Some(&json!(-5)));
        assert_eq!(a.attribute("safe"), Some(&json!(false)));
        assert_eq!(a.attribute("tag"), None);
    }

    #[test]
    fn dotted_set_keeps_sibling_keys() {
        let (rt, store, session) = testing::session(DOC);
        let args = PatchArgs {
            collection: "domains".into(),
            ids: vec!["c.org".into()],
            assignments: vec!["stats.harmless=0".into()],
            attrs_file: None,
        };

        let mut out = Vec::new();
        run_patch(args, &session, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "c.org patched\n");

        let c = rt.block_on(store.fetch("domains", "c.org")).unwrap();
        assert_eq!(c.attribute("stats"), Some(&json!({"harmless": 0, "malicious": 2})));
    }

    #[test]
    fn nothing_to_patch_fails_up_front() {
        let (_rt, _store, session) = testing::session(DOC);
        let args = PatchArgs {
            collection: "domains".into(),
            ids: vec!["a.com".into()],
            assignments: vec![],
            attrs_file: None,
        };
        let mut out = Vec::new();
        assert!(run_patch(args, &session, &mut out).is_err());
        assert!(out.is_empty());
    }
}
