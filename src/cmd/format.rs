/*!
format.rs

Text rendering for command output.

  - Objects are rendered as a YAML sequence, one element per object, so the
    output of several writes concatenates into a single valid document.
  - Side-stream lines (not-found markers, failures, the listing cursor hint)
    are styled for stderr through `console`, which drops styling when stderr
    is not a terminal or NO_COLOR is set.
*/

use anyhow::{Context, Result};
use console::style;
use serde_json::{Map, Value};

use crate::coord::NotFound;

/// YAML sequence holding `objects`.
pub fn yaml_list(objects: &[Map<String, Value>]) -> Result<String> {
    serde_yaml::to_string(objects).context("failed to render YAML")
}

/// One object as a single-element YAML sequence.
pub fn yaml_item(object: &Map<String, Value>) -> Result<String> {
    yaml_list(std::slice::from_ref(object))
}

/// Stderr line for a key the service has no object for.
pub fn not_found_line(marker: &NotFound) -> String {
    format!(
        "{} {}",
        style(format!("{}/{}", marker.collection, marker.key))
            .for_stderr()
            .yellow(),
        style("not found").for_stderr().dim()
    )
}

/// Result line for a handler that failed on `key`.
pub fn failure_line(key: &str, err: &dyn std::fmt::Display) -> String {
    format!("{key} [{err}]")
}

/// Hint printed after a truncated listing: the same invocation resumed at
/// `cursor`.
pub fn more_with_hint(invocation: &str, cursor: &str) -> String {
    format!(
        "\n{}\n{}",
        style("MORE WITH:").for_stderr().dim(),
        style(format!("{invocation} --cursor={cursor}"))
            .for_stderr()
            .dim()
    )
}
