//! Field selection and path based edits

use crate::expr::Expression;
use jsonflow_core::path::{self, Segment};
use jsonflow_core::{Data, Operator, Record, Result};
use serde_json::{Map, Value};

/// A value written by an operator: a constant or something computed from
/// the record.
#[derive(Debug, Clone)]
pub enum ValueSource {
    /// Constant value
    Literal(Value),
    /// Expression or closure evaluated against the input record
    Computed(Expression),
}

impl ValueSource {
    /// Resolve against `record` on behalf of `operator`.
    pub fn resolve(&self, operator: &str, record: &Record) -> Result<Value> {
        match self {
            ValueSource::Literal(value) => Ok(value.clone()),
            ValueSource::Computed(expr) => expr.evaluate_for(operator, record),
        }
    }
}

impl From<Value> for ValueSource {
    fn from(value: Value) -> Self {
        ValueSource::Literal(value)
    }
}

impl From<Expression> for ValueSource {
    fn from(expr: Expression) -> Self {
        ValueSource::Computed(expr)
    }
}

/// Field selection options
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Dotted paths to keep; empty keeps every field
    pub fields: Vec<String>,
    /// Dotted paths dropped from the input before selection
    pub exclude: Vec<String>,
    /// Write selected fields as top-level keys joined with `_`
    pub flatten: bool,
    /// Prefix for flattened keys
    pub prefix: String,
    /// Value for selected fields that are missing; `None` skips them
    pub default: Option<Value>,
}

/// Keeps a subset of fields, optionally flattening nested paths.
///
/// Applying the same selector twice yields the same record.
#[derive(Debug, Clone, Default)]
pub struct JsonFieldSelector {
    opts: SelectOptions,
}

impl JsonFieldSelector {
    /// Create a selector.
    pub fn new(opts: SelectOptions) -> Self {
        Self { opts }
    }

    /// Keep only `fields`.
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(SelectOptions {
            fields: fields.into_iter().map(Into::into).collect(),
            ..SelectOptions::default()
        })
    }

    /// Options in effect.
    pub fn options(&self) -> &SelectOptions {
        &self.opts
    }

    /// Top-level key a flattened path is written to.
    pub fn flat_key(&self, field: &str) -> String {
        let joined = path::parse_path(field)
            .into_iter()
            .map(|segment| match segment {
                Segment::Key(key) => key,
                Segment::Wildcard => "all".to_string(),
            })
            .collect::<Vec<_>>()
            .join("_");
        format!("{}{}", self.opts.prefix, joined)
    }

    fn place(&self, out: &mut Record, field: &str, value: Value) {
        if self.opts.flatten {
            out.insert(self.flat_key(field), value);
        } else {
            path::set(out, field, value);
        }
    }
}

impl Operator for JsonFieldSelector {
    fn name(&self) -> &str {
        "JsonFieldSelector"
    }

    fn description(&self) -> String {
        format!("Selects fields {:?}", self.opts.fields)
    }

    fn process_item(&self, mut record: Record) -> Result<Data> {
        for field in &self.opts.exclude {
            path::remove(&mut record, field);
        }
        if self.opts.fields.is_empty() {
            return Ok(Data::Record(record));
        }
        let mut out = Map::new();
        for field in &self.opts.fields {
            if let Some(value) = path::get_all(&record, field) {
                self.place(&mut out, field, value);
            } else if let Some(value) = self
                .opts
                .flatten
                .then(|| record.get(&self.flat_key(field)))
                .flatten()
            {
                // already flattened by an earlier pass
                out.insert(self.flat_key(field), value.clone());
            } else if let Some(default) = &self.opts.default {
                self.place(&mut out, field, default.clone());
            }
        }
        Ok(Data::Record(out))
    }
}

/// Copies values found at source paths into target paths.
#[derive(Debug, Clone)]
pub struct JsonPathExtractor {
    paths: Vec<(String, String)>,
    default_value: Value,
    keep_original: bool,
}

impl JsonPathExtractor {
    /// Extract `(target, source)` pairs into a fresh record.
    pub fn new<I, T, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = (T, S)>,
        T: Into<String>,
        S: Into<String>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|(target, source)| (target.into(), source.into()))
                .collect(),
            default_value: Value::Null,
            keep_original: false,
        }
    }

    /// Value written when a source path is missing (default null).
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = value;
        self
    }

    /// Write extracted values into the input record instead of a fresh one.
    pub fn keep_original(mut self, keep: bool) -> Self {
        self.keep_original = keep;
        self
    }
}

impl Operator for JsonPathExtractor {
    fn name(&self) -> &str {
        "JsonPathExtractor"
    }

    fn process_item(&self, record: Record) -> Result<Data> {
        let mut out = if self.keep_original {
            record.clone()
        } else {
            Map::new()
        };
        for (target, source) in &self.paths {
            let value = path::get_all(&record, source).unwrap_or_else(|| self.default_value.clone());
            path::set(&mut out, target, value);
        }
        Ok(Data::Record(out))
    }
}

/// Writes values at paths, creating intermediate objects.
#[derive(Debug, Clone)]
pub struct JsonPathUpdater {
    updates: Vec<(String, ValueSource)>,
}

impl JsonPathUpdater {
    /// Apply `(path, value)` updates in order.
    pub fn new<I, P, V>(updates: I) -> Self
    where
        I: IntoIterator<Item = (P, V)>,
        P: Into<String>,
        V: Into<ValueSource>,
    {
        Self {
            updates: updates
                .into_iter()
                .map(|(p, v)| (p.into(), v.into()))
                .collect(),
        }
    }
}

impl Operator for JsonPathUpdater {
    fn name(&self) -> &str {
        "JsonPathUpdater"
    }

    fn process_item(&self, mut record: Record) -> Result<Data> {
        for (target, source) in &self.updates {
            let value = source.resolve(self.name(), &record)?;
            if !path::set(&mut record, target, value) {
                return Err(jsonflow_core::FlowError::operator(
                    self.name(),
                    format!("cannot write to path '{}'", target),
                ));
            }
        }
        Ok(Data::Record(record))
    }
}

/// Removes object keys or array elements by path. Missing paths are ignored.
#[derive(Debug, Clone)]
pub struct JsonPathRemover {
    paths: Vec<String>,
}

impl JsonPathRemover {
    /// Remove `paths` in order.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl Operator for JsonPathRemover {
    fn name(&self) -> &str {
        "JsonPathRemover"
    }

    fn process_item(&self, mut record: Record) -> Result<Data> {
        for target in &self.paths {
            path::remove(&mut record, target);
        }
        Ok(Data::Record(record))
    }
}

/// Merges a static object and computed entries into every record.
#[derive(Debug, Clone)]
pub struct JsonMerger {
    data: Record,
    computed: Vec<(String, Expression)>,
    deep: bool,
}

impl JsonMerger {
    /// Merge `data` (shallow) into every record.
    pub fn new(data: Record) -> Self {
        Self {
            data,
            computed: Vec::new(),
            deep: false,
        }
    }

    /// Merge nested objects key by key instead of replacing them.
    pub fn deep(mut self, deep: bool) -> Self {
        self.deep = deep;
        self
    }

    /// Add a top-level entry computed from the input record.
    pub fn with_computed(mut self, key: impl Into<String>, expr: Expression) -> Self {
        self.computed.push((key.into(), expr));
        self
    }
}

/// Merge `source` into `target`, recursing into objects present on both sides.
pub fn deep_merge(target: &mut Record, source: &Record) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming)
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

impl Operator for JsonMerger {
    fn name(&self) -> &str {
        "JsonMerger"
    }

    fn process_item(&self, mut record: Record) -> Result<Data> {
        let computed = self
            .computed
            .iter()
            .map(|(key, expr)| Ok((key.clone(), expr.evaluate_for(self.name(), &record)?)))
            .collect::<Result<Vec<_>>>()?;
        if self.deep {
            deep_merge(&mut record, &self.data);
        } else {
            for (key, value) in &self.data {
                record.insert(key.clone(), value.clone());
            }
        }
        record.extend(computed);
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
            "id": 1,
            "user": {"name": "Ada", "email": "ada@example.com", "profile": {"age": 36}},
            "items": [{"name": "a", "price": 10}, {"name": "b", "price": 20}]
        }))
    }

    fn out(data: Data) -> Record {
        data.as_record().cloned().unwrap()
    }

    #[test]
    fn selector_keeps_nested_structure() {
        let op = JsonFieldSelector::fields(["id", "user.name", "missing"]);
        let rec = out(op.process_item(sample()).unwrap());
        assert_eq!(rec, record(json!({"id": 1, "user": {"name": "Ada"}})));
    }

    #[test]
    fn selector_flattens_with_prefix_and_default() {
        let op = JsonFieldSelector::new(SelectOptions {
            fields: vec!["id".into(), "user.profile.age".into(), "user.phone".into()],
            flatten: true,
            prefix: "data_".into(),
            default: Some(json!("n/a")),
            ..SelectOptions::default()
        });
        let once = out(op.process_item(sample()).unwrap());
        assert_eq!(
            once,
            record(json!({"data_id": 1, "data_user_profile_age": 36, "data_user_phone": "n/a"}))
        );
        let twice = out(op.process_item(once.clone()).unwrap());
        assert_eq!(once, twice);
    }

    #[test]
    fn selector_excludes() {
        let op = JsonFieldSelector::new(SelectOptions {
            exclude: vec!["user.email".into(), "items".into()],
            ..SelectOptions::default()
        });
        let rec = out(op.process_item(sample()).unwrap());
        assert!(!rec.contains_key("items"));
        assert_eq!(rec["user"], json!({"name": "Ada", "profile": {"age": 36}}));
    }

    #[test]
    fn extractor_uses_default_for_missing_paths() {
        let op = JsonPathExtractor::new([
            ("user_name", "user.name"),
            ("first_item", "items.0.name"),
            ("prices", "items[*].price"),
            ("nope", "user.phone"),
        ])
        .with_default(json!("unknown"));
        let rec = out(op.process_item(sample()).unwrap());
        assert_eq!(
            rec,
            record(json!({
                "user_name": "Ada",
                "first_item": "a",
                "prices": [10, 20],
                "nope": "unknown"
            }))
        );
    }

    #[test]
    fn extractor_can_keep_original() {
        let op = JsonPathExtractor::new([("name", "user.name")]).keep_original(true);
        let rec = out(op.process_item(sample()).unwrap());
        assert_eq!(rec["name"], "Ada");
        assert_eq!(rec["id"], 1);
    }

    #[test]
    fn updater_writes_literals_and_computed_values() {
        let op = JsonPathUpdater::new([
            ("user.profile.skills", ValueSource::from(json!(["rust"]))),
            (
                "user.shout",
                ValueSource::from(Expression::parse("upper(user.name)").unwrap()),
            ),
        ]);
        let rec = out(op.process_item(sample()).unwrap());
        assert_eq!(rec["user"]["profile"]["skills"], json!(["rust"]));
        assert_eq!(rec["user"]["shout"], "ADA");
    }

    #[test]
    fn remover_drops_keys_and_elements() {
        let op = JsonPathRemover::new(["user.email", "items.0", "not.there"]);
        let rec = out(op.process_item(sample()).unwrap());
        assert!(rec["user"].get("email").is_none());
        assert_eq!(rec["items"], json!([{"name": "b", "price": 20}]));
    }

    #[test]
    fn merger_shallow_and_deep() {
        let data = record(json!({"user": {"role": "admin"}, "source": "import"}));
        let shallow = JsonMerger::new(data.clone());
        let rec = out(shallow.process_item(sample()).unwrap());
        assert_eq!(rec["user"], json!({"role": "admin"}));

        let deep = JsonMerger::new(data)
            .deep(true)
            .with_computed("item_count", Expression::parse("len(items)").unwrap());
        let rec = out(deep.process_item(sample()).unwrap());
        assert_eq!(rec["user"]["name"], "Ada");
        assert_eq!(rec["user"]["role"], "admin");
        assert_eq!(rec["item_count"], 2);
        assert_eq!(rec["source"], "import");
    }
}
