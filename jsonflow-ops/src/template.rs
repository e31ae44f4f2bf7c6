//! String templates with `{path|filter}` placeholders
//!
//! Supported filters: `upper`, `lower`, `title`, `length`, `join:<sep>`.
//! Missing values render as empty strings; `{{` and `}}` are literal braces.

use jsonflow_core::path::{self, to_text};
use jsonflow_core::{Data, FlowError, Operator, Record, Result};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    Upper,
    Lower,
    Title,
    Length,
    Join(String),
}

impl Filter {
    fn parse(spec: &str) -> std::result::Result<Self, String> {
        if let Some(sep) = spec.strip_prefix("join:") {
            return Ok(Filter::Join(sep.to_string()));
        }
        match spec.trim() {
            "upper" => Ok(Filter::Upper),
            "lower" => Ok(Filter::Lower),
            "title" => Ok(Filter::Title),
            "length" => Ok(Filter::Length),
            "join" => Ok(Filter::Join(", ".to_string())),
            other => Err(format!("unknown template filter '{}'", other)),
        }
    }

    fn apply(&self, value: Value) -> Value {
        match self {
            Filter::Upper => Value::String(to_text(&value).to_uppercase()),
            Filter::Lower => Value::String(to_text(&value).to_lowercase()),
            Filter::Title => Value::String(title_case(&to_text(&value))),
            Filter::Length => Value::from(match &value {
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                Value::Null => 0,
                other => to_text(other).chars().count(),
            }),
            Filter::Join(sep) => match value {
                Value::Array(items) => Value::String(
                    items.iter().map(to_text).collect::<Vec<_>>().join(sep),
                ),
                other => other,
            },
        }
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Text(String),
    Placeholder { path: String, filters: Vec<Filter> },
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    pieces: Vec<Piece>,
}

impl Template {
    /// Parse `source`, rejecting unbalanced braces and unknown filters.
    pub fn parse(source: &str) -> Result<Self> {
        let invalid =
            |reason: String| FlowError::Config(format!("invalid template '{}': {}", source, reason));
        let mut pieces = Vec::new();
        let mut text = String::new();
        let mut chars = source.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    text.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    text.push('}');
                }
                '{' => {
                    let mut inner = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => inner.push(ch),
                            None => return Err(invalid("unclosed '{'".to_string())),
                        }
                    }
                    if !text.is_empty() {
                        pieces.push(Piece::Text(std::mem::take(&mut text)));
                    }
                    let mut parts = inner.split('|');
                    let path = parts.next().unwrap_or_default().trim().to_string();
                    if path.is_empty() {
                        return Err(invalid("empty placeholder".to_string()));
                    }
                    let filters = parts
                        .map(Filter::parse)
                        .collect::<std::result::Result<Vec<_>, _>>()
                        .map_err(invalid)?;
                    pieces.push(Piece::Placeholder { path, filters });
                }
                '}' => return Err(invalid("unmatched '}'".to_string())),
                other => text.push(other),
            }
        }
        if !text.is_empty() {
            pieces.push(Piece::Text(text));
        }
        Ok(Self {
            source: source.to_string(),
            pieces,
        })
    }

    /// Template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render against a record.
    pub fn render(&self, record: &Record) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Placeholder { path: p, filters } => {
                    let Some(mut value) = path::get_all(record, p) else {
                        continue;
                    };
                    for filter in filters {
                        value = filter.apply(value);
                    }
                    out.push_str(&to_text(&value));
                }
            }
        }
        out
    }
}

/// Renders templates into target paths.
#[derive(Debug, Clone, Default)]
pub struct JsonTemplateOperator {
    templates: Vec<(String, Template)>,
}

impl JsonTemplateOperator {
    /// Parse `(target, template)` pairs.
    pub fn parse<'a, I>(templates: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let templates = templates
            .into_iter()
            .map(|(target, source)| Ok((target.to_string(), Template::parse(source)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { templates })
    }
}

impl Operator for JsonTemplateOperator {
    fn name(&self) -> &str {
        "JsonTemplateOperator"
    }

    fn process_item(&self, mut record: Record) -> Result<Data> {
        for (target, template) in &self.templates {
            let rendered = template.render(&record);
            path::set(&mut record, target, Value::String(rendered));
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
            "user": {"first_name": "john", "email": "john@example.com"},
            "order": {"id": 42, "status": "in transit"},
            "items": [{"name": "pen"}, {"name": "cup"}],
            "names": ["pen", "cup"]
        }))
    }

    #[test]
    fn placeholders_and_filters() {
        let op = JsonTemplateOperator::parse([
            ("label", "{user.first_name|upper} <{user.email}>"),
            ("summary", "#{order.id}: {order.status|title}, {items|length} items"),
            ("list", "{names|join:, }"),
            ("missing", "[{user.phone}]"),
            ("braces", "{{literal}}"),
        ])
        .unwrap();
        let rec = op.process_item(sample()).unwrap().as_record().cloned().unwrap();
        assert_eq!(rec["label"], "JOHN <john@example.com>");
        assert_eq!(rec["summary"], "#42: In Transit, 2 items");
        assert_eq!(rec["list"], "pen, cup");
        assert_eq!(rec["missing"], "[]");
        assert_eq!(rec["braces"], "{literal}");
    }

    #[test]
    fn wildcard_placeholder() {
        let template = Template::parse("{items[*].name|join:/}").unwrap();
        assert_eq!(template.render(&sample()), "pen/cup");
    }

    #[test]
    fn rejects_bad_templates() {
        assert!(Template::parse("{open").is_err());
        assert!(Template::parse("close}").is_err());
        assert!(Template::parse("{a|shout}").is_err());
        assert!(Template::parse("{}").is_err());
    }
}
