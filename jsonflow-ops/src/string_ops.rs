//! String operations producing new fields

use jsonflow_core::path::{self, to_text};
use jsonflow_core::{Data, FlowError, Operator, Record, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_suffix() -> String {
    "...".to_string()
}

/// One string transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StringOp {
    /// Join every present source with `separator`
    Concat {
        /// Separator placed between sources
        #[serde(default)]
        separator: String,
    },
    /// Fill `{}` slots with the sources in order
    Format {
        /// Template with positional `{}` slots
        template: String,
    },
    /// Split the first source; `index` picks one part (negative counts from the end)
    Split {
        /// Separator; empty splits on whitespace
        #[serde(default)]
        sep: String,
        /// Part to keep; `None` keeps the whole list
        #[serde(default)]
        index: Option<i64>,
    },
    /// Replace every occurrence of `old` with `new`
    Replace {
        /// Pattern
        old: String,
        /// Replacement
        new: String,
    },
    /// Upper-case
    Upper,
    /// Lower-case
    Lower,
    /// Trim surrounding whitespace
    Strip,
    /// Truncate to `max_len` characters, appending `suffix` when cut
    Trim {
        /// Maximum length in characters, suffix included
        max_len: usize,
        /// Marker appended to truncated text
        #[serde(default = "default_suffix")]
        suffix: String,
    },
    /// Join an array source with `sep`
    Join {
        /// Separator
        #[serde(default)]
        sep: String,
    },
}

/// A string transformation reading `sources` and writing one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringOperation {
    /// Dotted source paths
    pub sources: Vec<String>,
    /// Transformation
    #[serde(flatten)]
    pub op: StringOp,
}

impl StringOperation {
    /// Build an operation.
    pub fn new<I, S>(sources: I, op: StringOp) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            op,
        }
    }

    /// Compute the result; `None` when no source is present.
    pub fn apply(&self, record: &Record) -> std::result::Result<Option<Value>, String> {
        let values: Vec<&Value> = self
            .sources
            .iter()
            .filter_map(|source| path::get(record, source))
            .collect();
        let Some(first) = values.first() else {
            return Ok(None);
        };
        let text = to_text(first);
        let result = match &self.op {
            StringOp::Concat { separator } => Value::String(
                values
                    .iter()
                    .map(|v| to_text(v))
                    .collect::<Vec<_>>()
                    .join(separator),
            ),
            StringOp::Format { template } => {
                let mut parts = template.split("{}");
                let mut out = parts.next().unwrap_or_default().to_string();
                let mut args = values.iter();
                for part in parts {
                    let arg = args
                        .next()
                        .ok_or_else(|| format!("template '{}' needs more sources", template))?;
                    out.push_str(&to_text(arg));
                    out.push_str(part);
                }
                Value::String(out)
            }
            StringOp::Split { sep, index } => {
                let parts: Vec<&str> = if sep.is_empty() {
                    text.split_whitespace().collect()
                } else {
                    text.split(sep.as_str()).collect()
                };
                match index {
                    None => Value::Array(parts.into_iter().map(|p| Value::String(p.into())).collect()),
                    Some(i) => {
                        let len = parts.len() as i64;
                        let idx = if *i < 0 { len + i } else { *i };
                        match (0..len).contains(&idx).then(|| parts[idx as usize]) {
                            Some(part) => Value::String(part.to_string()),
                            None => Value::Null,
                        }
                    }
                }
            }
            StringOp::Replace { old, new } => Value::String(text.replace(old.as_str(), new)),
            StringOp::Upper => Value::String(text.to_uppercase()),
            StringOp::Lower => Value::String(text.to_lowercase()),
            StringOp::Strip => Value::String(text.trim().to_string()),
            StringOp::Trim { max_len, suffix } => {
                if text.chars().count() <= *max_len {
                    Value::String(text)
                } else {
                    let keep = max_len.saturating_sub(suffix.chars().count());
                    let mut cut: String = text.chars().take(keep).collect();
                    cut.push_str(suffix);
                    Value::String(cut)
                }
            }
            StringOp::Join { sep } => match first {
                Value::Array(items) => Value::String(
                    items.iter().map(to_text).collect::<Vec<_>>().join(sep),
                ),
                other => Value::String(to_text(other)),
            },
        };
        Ok(Some(result))
    }
}

/// Applies string operations, writing each result to its target path.
#[derive(Debug, Clone, Default)]
pub struct JsonStringOperator {
    operations: Vec<(String, StringOperation)>,
}

impl JsonStringOperator {
    /// Apply `(target, operation)` pairs in order.
    pub fn new<I, S>(operations: I) -> Self
    where
        I: IntoIterator<Item = (S, StringOperation)>,
        S: Into<String>,
    {
        Self {
            operations: operations
                .into_iter()
                .map(|(target, op)| (target.into(), op))
                .collect(),
        }
    }

    /// Join `sources` into `target`.
    pub fn concat_fields<I, S>(sources: I, target: &str, separator: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new([(
            target,
            StringOperation::new(
                sources,
                StringOp::Concat {
                    separator: separator.to_string(),
                },
            ),
        )])
    }

    /// Fill `template` with `sources` into `target`.
    pub fn format_string<I, S>(sources: I, target: &str, template: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new([(
            target,
            StringOperation::new(
                sources,
                StringOp::Format {
                    template: template.to_string(),
                },
            ),
        )])
    }

    /// Configured operations.
    pub fn operations(&self) -> &[(String, StringOperation)] {
        &self.operations
    }
}

impl Operator for JsonStringOperator {
    fn name(&self) -> &str {
        "JsonStringOperator"
    }

    fn process_item(&self, mut record: Record) -> Result<Data> {
        for (target, operation) in &self.operations {
            let value = operation
                .apply(&record)
                .map_err(|message| FlowError::operator(self.name(), message))?;
            if let Some(value) = value {
                path::set(&mut record, target, value);
            }
        }
        Ok(Data::Record(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonflow_core::record;
    use serde_json::json;

    fn sample() -> Record {
        record(json!({
            "user": {"first_name": "John", "last_name": "Doe", "email": "john@example.com"},
            "title": "Learning JSON quickly",
            "tags": ["a", "b", "c"]
        }))
    }

    fn run(op: &JsonStringOperator) -> Record {
        op.process_item(sample()).unwrap().as_record().cloned().unwrap()
    }

    #[test]
    fn concat_and_format_helpers() {
        let rec = run(&JsonStringOperator::concat_fields(
            ["user.first_name", "user.last_name"],
            "user.full_name",
            " ",
        ));
        assert_eq!(rec["user"]["full_name"], "John Doe");

        let rec = run(&JsonStringOperator::format_string(
            ["user.first_name", "user.email"],
            "display",
            "{} <{}>",
        ));
        assert_eq!(rec["display"], "John <john@example.com>");
    }

    #[test]
    fn split_replace_trim_join() {
        let op = JsonStringOperator::new([
            (
                "domain",
                StringOperation::new(
                    ["user.email"],
                    StringOp::Split {
                        sep: "@".into(),
                        index: Some(-1),
                    },
                ),
            ),
            (
                "clean",
                StringOperation::new(
                    ["title"],
                    StringOp::Replace {
                        old: "JSON".into(),
                        new: "JavaScript Object Notation".into(),
                    },
                ),
            ),
            (
                "short",
                StringOperation::new(
                    ["title"],
                    StringOp::Trim {
                        max_len: 8,
                        suffix: "...".into(),
                    },
                ),
            ),
            ("joined", StringOperation::new(["tags"], StringOp::Join { sep: "|".into() })),
        ]);
        let rec = run(&op);
        assert_eq!(rec["domain"], "example.com");
        assert_eq!(rec["clean"], "Learning JavaScript Object Notation quickly");
        assert_eq!(rec["short"], "Learn...");
        assert_eq!(rec["joined"], "a|b|c");
    }

    #[test]
    fn missing_sources_leave_record_untouched() {
        let op = JsonStringOperator::new([("x", StringOperation::new(["nope"], StringOp::Upper))]);
        assert_eq!(run(&op), sample());
    }

    #[test]
    fn format_without_enough_sources_fails() {
        let op = JsonStringOperator::format_string(["title"], "x", "{} {}");
        assert!(op.process_item(sample()).is_err());
    }

    #[test]
    fn operations_deserialize_from_tagged_json() {
        let op: StringOperation =
            serde_json::from_value(json!({"sources": ["a"], "op": "trim", "max_len": 5})).unwrap();
        assert_eq!(
            op.op,
            StringOp::Trim {
                max_len: 5,
                suffix: "...".into()
            }
        );
    }
}
