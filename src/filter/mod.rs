//! Hierarchical field filter.
//!
//! The path of a value is the dot-joined chain of map keys leading to it;
//! sequence indices never show up in a path, so the elements of a sequence
//! live at the sequence's own path. A value is kept when its path matches at
//! least one include pattern and no exclude pattern. Maps and sequences that
//! end up empty after filtering are dropped by their parent.

pub mod glob;

use serde_json::{Map, Value};

pub use glob::{Pattern, PatternError, SEPARATOR};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl Default for FieldFilter {
    /// Keep everything.
    fn default() -> Self {
        Self {
            include: vec![Pattern::everything()],
            exclude: Vec::new(),
        }
    }
}

impl FieldFilter {
    /// Compile both pattern sets up front; an empty include set means `**`.
    pub fn new<I, E>(include: I, exclude: E) -> Result<Self, PatternError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let mut include = compile(include)?;
        if include.is_empty() {
            include.push(Pattern::everything());
        }
        let exclude = compile(exclude)?;
        Ok(Self { include, exclude })
    }

    /// True when no field can ever be dropped.
    pub fn is_passthrough(&self) -> bool {
        self.exclude.is_empty() && self.include.iter().any(|p| p.as_str() == "**")
    }

    pub fn keep(&self, path: &str) -> bool {
        self.include.iter().any(|p| p.matches(path)) && !self.exclude.iter().any(|p| p.matches(path))
    }

    /// Filter a top-level map. Its keys are paths of length one.
    pub fn apply(&self, map: &Map<String, Value>) -> Map<String, Value> {
        self.filter_map(map, None)
    }

    fn filter_map(&self, map: &Map<String, Value>, prefix: Option<&str>) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, value) in map {
            let path = match prefix {
                Some(prefix) => format!("{prefix}{SEPARATOR}{key}"),
                None => key.clone(),
            };
            if let Some(kept) = self.filter_value(&path, value) {
                out.insert(key.clone(), kept);
            }
        }
        out
    }

    fn filter_value(&self, path: &str, value: &Value) -> Option<Value> {
        match value {
            // An empty container has no deeper structure to select from;
            // it stands or falls with its own path.
            Value::Object(map) if map.is_empty() => self.keep(path).then(|| value.clone()),
            Value::Array(items) if items.is_empty() => self.keep(path).then(|| value.clone()),

            Value::Object(map) => {
                let filtered = self.filter_map(map, Some(path));
                (!filtered.is_empty()).then_some(Value::Object(filtered))
            }

            Value::Array(items) if items.iter().all(is_scalar) => {
                self.keep(path).then(|| value.clone())
            }
            Value::Array(items) => {
                let keep_scalars = self.keep(path);
                let filtered: Vec<Value> = items
                    .iter()
                    .filter_map(|item| {
                        if is_scalar(item) {
                            keep_scalars.then(|| item.clone())
                        } else {
                            self.filter_value(path, item)
                        }
                    })
                    .collect();
                (!filtered.is_empty()).then_some(Value::Array(filtered))
            }

            scalar => self.keep(path).then(|| scalar.clone()),
        }
    }
}

fn compile<P>(patterns: P) -> Result<Vec<Pattern>, PatternError>
where
    P: IntoIterator,
    P::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| Pattern::new(p.as_ref()))
        .collect()
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}
