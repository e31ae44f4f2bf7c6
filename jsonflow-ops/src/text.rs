//! Text normalization

use jsonflow_core::{path, Data, Operator, Record, Result};
use serde_json::Value;

/// Case folding applied by [`TextNormalizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseMode {
    /// Leave case untouched
    Keep,
    /// Lower-case (default)
    #[default]
    Lower,
    /// Upper-case
    Upper,
}

/// Text normalization options
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Fields to normalize; `None` means every top-level string field
    pub fields: Option<Vec<String>>,
    /// Trim leading and trailing whitespace
    pub strip: bool,
    /// Collapse runs of whitespace into a single space
    pub collapse_whitespace: bool,
    /// Case folding
    pub case: CaseMode,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            fields: None,
            strip: true,
            collapse_whitespace: true,
            case: CaseMode::Lower,
        }
    }
}

/// Normalizes string fields.
#[derive(Debug, Clone, Default)]
pub struct TextNormalizer {
    opts: NormalizeOptions,
}

impl TextNormalizer {
    /// Create a normalizer.
    pub fn new(opts: NormalizeOptions) -> Self {
        Self { opts }
    }

    /// Options in effect.
    pub fn options(&self) -> &NormalizeOptions {
        &self.opts
    }

    /// Normalize one string.
    pub fn normalize(&self, text: &str) -> String {
        let mut out = if self.opts.collapse_whitespace {
            let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if self.opts.strip {
                collapsed
            } else {
                // keep the outer whitespace untouched
                let lead = &text[..text.len() - text.trim_start().len()];
                let trail = &text[text.trim_end().len()..];
                if collapsed.is_empty() {
                    text.to_string()
                } else {
                    format!("{}{}{}", lead, collapsed, trail)
                }
            }
        } else if self.opts.strip {
            text.trim().to_string()
        } else {
            text.to_string()
        };
        match self.opts.case {
            CaseMode::Keep => {}
            CaseMode::Lower => out = out.to_lowercase(),
            CaseMode::Upper => out = out.to_uppercase(),
        }
        out
    }
}

impl Operator for TextNormalizer {
    fn name(&self) -> &str {
        "TextNormalizer"
    }

    fn description(&self) -> String {
        "Normalizes whitespace and case of text fields".to_string()
    }

    fn process_item(&self, mut record: Record) -> Result<Data> {
        match &self.opts.fields {
            Some(fields) => {
                for field in fields {
                    let normalized = match path::get(&record, field) {
                        Some(Value::String(text)) => self.normalize(text),
                        _ => continue,
                    };
                    path::set(&mut record, field, Value::String(normalized));
                }
            }
            None => {
                for value in record.values_mut() {
                    if let Value::String(text) = value {
                        *text = self.normalize(text);
                    }
                }
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

    #[test]
    fn normalizes_every_string_field_by_default() {
        let op = TextNormalizer::default();
        let out = op
            .process_item(record(json!({"text": "  Hello   WORLD ", "n": 3})))
            .unwrap();
        assert_eq!(out, Data::Record(record(json!({"text": "hello world", "n": 3}))));
    }

    #[test]
    fn restricts_to_named_fields() {
        let op = TextNormalizer::new(NormalizeOptions {
            fields: Some(vec!["a".into(), "nested.b".into()]),
            case: CaseMode::Upper,
            ..NormalizeOptions::default()
        });
        let out = op
            .process_item(record(json!({"a": " x ", "c": " y ", "nested": {"b": "z"}})))
            .unwrap();
        assert_eq!(
            out,
            Data::Record(record(json!({"a": "X", "c": " y ", "nested": {"b": "Z"}})))
        );
    }

    #[test]
    fn unicode_case_folding() {
        let op = TextNormalizer::default();
        assert_eq!(op.normalize("  ÄÖÜ  Straße "), "äöü straße");
    }
}
