/*!
shared.rs - shared helpers for subcommands.

Focus:
  - Session: settings + remote client + runtime handle + cancellation token,
    built once in `main` and borrowed by every command
  - project: object -> filtered map handed to the renderer
  - attribute assembly for `patch`: KEY=VALUE parsing, primitive coercion,
    dotted-key insertion, JSON/YAML attribute files
*/

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::client::{Object, RemoteClient};
use crate::coord::Coordinator;
use crate::settings::Settings;

/* ---- Session ---- */

/// Everything a command needs besides its own arguments.
pub struct Session {
    pub settings: Settings,
    pub client: Arc<dyn RemoteClient>,
    pub runtime: Handle,
    pub cancel: CancellationToken,
}

impl Session {
    /// Worker pool configured from the session settings.
    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(self.settings.threads).progress(self.settings.progress)
    }

    /// Drive `fut` to completion from a synchronous context (main thread or
    /// an executor worker). Must not be called from inside the runtime.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Like [`Session::block_on`], but gives up with `None` once the session
    /// is cancelled.
    pub fn block_on_cancellable<F: Future>(&self, fut: F) -> Option<F::Output> {
        self.runtime.block_on(async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                out = fut => Some(out),
            }
        })
    }

    /// Flatten and filter an object for rendering.
    pub fn project(&self, object: &Object) -> Map<String, Value> {
        let map = object.to_map();
        if self.settings.filter.is_passthrough() {
            map
        } else {
            self.settings.filter.apply(&map)
        }
    }
}

/* ---- Attribute Assembly ---- */

/// Split `KEY=VALUE`. The key must be non-empty; the value may be.
pub fn parse_assignment(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        _ => bail!("expected KEY=VALUE, got '{raw}'"),
    }
}

/// Attempt to coerce a raw string into a JSON value using a primitive type hint.
pub fn coerce_value(raw: &str, type_hint: &str) -> Value {
    match type_hint {
        "integer" => raw
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        "number" => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        "boolean" => match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" => Value::Bool(true),
            "false" | "no" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        "null" if raw == "null" => Value::Null,
        _ => Value::String(raw.to_string()),
    }
}

/// Pick the narrowest primitive a `--set` value parses as:
/// null, integer, number, boolean, then string.
pub fn infer_value(raw: &str) -> Value {
    for hint in ["null", "integer", "number", "boolean"] {
        let value = coerce_value(raw, hint);
        if !value.is_string() {
            return value;
        }
    }
    Value::String(raw.to_string())
}

/// Insert `value` at a dotted path (`stats.harmless`), creating or replacing
/// intermediate maps as needed.
pub fn set_dotted(target: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(inner) = slot {
                set_dotted(inner, rest, value);
            }
        }
    }
}

/// Parse a JSON or YAML document (by extension) whose root is a map.
pub fn parse_document(path: &Path, raw: &str) -> Result<Map<String, Value>> {
    let yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    let value: Value = if yaml {
        let yaml_v: serde_yaml::Value =
            serde_yaml::from_str(raw).context("failed to parse YAML document")?;
        serde_json::to_value(yaml_v).context("failed to convert YAML to JSON")?
    } else {
        serde_json::from_str(raw).context("failed to parse JSON document")?
    };

    match value {
        Value::Object(map) => Ok(map),
        _ => bail!("{}: document root must be a map", path.display()),
    }
}

/// Attributes from an optional file, overridden by `KEY=VALUE` assignments.
pub fn build_attributes(file: Option<&Path>, assignments: &[String]) -> Result<Map<String, Value>> {
    let mut attributes = match file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read attributes file: {}", path.display()))?;
            parse_document(path, &raw)?
        }
        None => Map::new(),
    };

    for raw in assignments {
        let (key, value) = parse_assignment(raw)?;
        set_dotted(&mut attributes, key, infer_value(value));
    }

    if attributes.is_empty() {
        bail!("nothing to patch; pass --set KEY=VALUE or --attrs-file");
    }
    Ok(attributes)
}

/* ---- Test Support ---- */


/* ---- Tests (basic) ---- */
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerce_integer() {
        assert_eq!(coerce_value("42", "integer"), json!(42));
        assert_eq!(
            coerce_value("x42", "integer"),
            json!("x42"),
            "invalid integer remains string"
        );
    }

    #[test]
    fn coerce_boolean() {
        assert_eq!(coerce_value("true", "boolean"), json!(true));
        assert_eq!(coerce_value("No", "boolean"), json!(false));
        assert_eq!(coerce_value("maybe", "boolean"), json!("maybe"));
    }

    #[test]
    fn infer_narrowest_type() {
        assert_eq!(infer_value("7"), json!(7));
        assert_eq!(infer_value("-3"), json!(-3));
        assert_eq!(infer_value("2.5"), json!(2.5));
        assert_eq!(infer_value("yes"), json!(true));
        assert_eq!(infer_value("null"), Value::Null);
        assert_eq!(infer_value("1"), json!(1), "integers win over booleans");
        assert_eq!(infer_value("peexe"), json!("peexe"));
        assert_eq!(infer_value(""), json!(""));
    }

    #[test]
    fn assignment_parsing() {
        assert_eq!(parse_assignment("a=b=c").unwrap(), ("a", "b=c"));
        assert_eq!(parse_assignment(" k =").unwrap(), ("k", ""));
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=x").is_err());
    }

    #[test]
    fn dotted_keys_nest() {
        let mut map = Map::new();
        set_dotted(&mut map, "stats.harmless", json!(1));
        set_dotted(&mut map, "stats.malicious", json!(2));
        set_dotted(&mut map, "tag", json!("x"));
        assert_eq!(
            Value::Object(map.clone()),
            json!({"stats": {"harmless": 1, "malicious": 2}, "tag": "x"})
        );

        set_dotted(&mut map, "tag.inner", json!(true));
        assert_eq!(map.get("tag"), Some(&json!({"inner": true})));
    }

    #[test]
    fn attributes_file_then_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attrs.yaml");
        std::fs::write(&path, "reputation: 5\nlabels: [a, b]\n").unwrap();

        let attrs = build_attributes(Some(&path), &["reputation=9".into()]).unwrap();
        assert_eq!(attrs.get("reputation"), Some(&json!(9)));
        assert_eq!(attrs.get("labels"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn json_document_root_must_be_map() {
        let err = parse_document(Path::new("x.json"), "[1,2]").unwrap_err();
        assert!(err.to_string().contains("root must be a map"));
        let ok = parse_document(Path::new("x.json"), r#"{"a":1}"#).unwrap();
        assert_eq!(ok.get("a"), Some(&json!(1)));
    }

    #[test]
    fn empty_patch_rejected() {
        assert!(build_attributes(None, &[]).is_err());
    }
}
