/*!
`list.rs`

Implements the `list` subcommand: page through a collection.

Behavior:
  - Walks pages of at most 40 objects until `--limit` objects were read or
    the collection is exhausted.
  - `--filter` is handed to the service untouched (the file store accepts
    `attr=value` or an id substring).
  - Output is the same YAML sequence / id list as `get`.
  - When the service says more objects remain, a `MORE WITH:` hint with the
    same invocation plus `--cursor=<next>` is printed to stderr.
*/

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{Map, Value};

use crate::client::{ListQuery, iterate};
use crate::cmd::format::{more_with_hint, yaml_list};
use crate::cmd::shared::Session;

/// CLI arguments for `intelq list <collection>`
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Collection to list
    pub collection: String,

    /// Maximum number of objects to print
    #[arg(short = 'n', long, default_value_t = 10)]
    pub limit: usize,

    /// Resume from a cursor returned by a previous listing
    #[arg(short = 'c', long)]
    pub cursor: Option<String>,

    /// Service-side filter expression
    #[arg(short = 'f', long)]
    pub filter: Option<String>,
}

impl ListArgs {
    /// Command line that reproduces this listing, minus the cursor.
    fn invocation(&self) -> String {
        let mut parts = vec![
            "intelq list".to_string(),
            format!("'{}'", self.collection),
            format!("--limit={}", self.limit),
        ];
        if let Some(filter) = &self.filter {
            parts.push(format!("--filter='{filter}'"));
        }
        parts.join(" ")
    }
}

/// Entry point for the list subcommand.
pub fn execute_list(args: ListArgs, session: &Session) -> Result<()> {
    let stdout = io::stdout();
    let stderr = io::stderr();
    run_list(args, session, &mut stdout.lock(), &mut stderr.lock())
}

fn run_list<O, E>(args: ListArgs, session: &Session, out: &mut O, err: &mut E) -> Result<()>
where
    O: Write,
    E: Write,
{
    let query = ListQuery {
        collection: args.collection.clone(),
        filter: args.filter.clone(),
        limit: args.limit,
        cursor: args.cursor.clone(),
    };

    let mut ids = Vec::new();
    let mut maps: Vec<Map<String, Value>> = Vec::new();
    let next = session
        .block_on(iterate(session.client.as_ref(), &query, |object| {
            if session.settings.identifiers_only {
                ids.push(object.id);
            } else {
                maps.push(session.project(&object));
            }
        }))
        .with_context(|| format!("listing '{}' failed", args.collection))?;

    for id in &ids {
        writeln!(out, "{id}")?;
    }
    if !maps.is_empty() {
        out.write_all(yaml_list(&maps)?.as_bytes())?;
    }
    out.flush()?;

    if let Some(cursor) = next {
        writeln!(err, "{}", more_with_hint(&args.invocation(), &cursor))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::shared::testing;

    const DOC: &str = r#"
urls:
  u1: {attributes: {tag: a}}
  u2: {attributes: {tag: b}}
  u3: {attributes: {tag: a}}
  u4: {attributes: {tag: a}}
"#;

    fn list(session: &Session, args: ListArgs) -> (String, String) {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        run_list(args, session, &mut out, &mut err).unwrap();
        (String::from_utf8(out).unwrap(), String::from_utf8(err).unwrap())
    }

    fn args(limit: usize, cursor: Option<&str>, filter: Option<&str>) -> ListArgs {
        ListArgs {
            collection: "urls".into(),
            limit,
            cursor: cursor.map(String::from),
            filter: filter.map(String::from),
        }
    }

    #[test]
    fn truncated_listing_prints_resume_hint() {
        let (_rt, _store, mut session) = testing::session(DOC);
        session.settings.identifiers_only = true;
        console::set_colors_enabled_stderr(false);

        let (out, err) = list(&session, args(2, None, None));
        assert_eq!(out, "u1\nu2\n");
        assert!(err.contains("MORE WITH:"));
        assert!(err.contains("intelq list 'urls' --limit=2 --cursor=2"));

        let (out, err) = list(&session, args(2, Some("2"), None));
        assert_eq!(out, "u3\nu4\n");
        assert!(err.is_empty());
    }

    #[test]
    fn filter_is_forwarded() {
        let (_rt, _store, session) = testing::session(DOC);
        let (out, err) = list(&session, args(10, None, Some("tag=a")));
        let objects: Vec<Map<String, Value>> = serde_yaml::from_str(&out).unwrap();
        let ids: Vec<_> = objects.iter().map(|o| o["_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["u1", "u3", "u4"]);
        assert!(err.is_empty());
    }

    #[test]
    fn empty_collection_prints_nothing() {
        let (_rt, _store, session) = testing::session(DOC);
        let mut a = args(5, None, None);
        a.collection = "domains".into();
        let (out, err) = list(&session, a);
        assert!(out.is_empty() && err.is_empty());
    }

    #[test]
    fn invocation_round_trips_flags() {
        let a = args(7, Some("3"), Some("tag=a"));
        assert_eq!(a.invocation(), "intelq list 'urls' --limit=7 --filter='tag=a'");
    }
}
