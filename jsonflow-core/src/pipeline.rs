//! Ordered operator chains with passthrough and collection-mode policy
//!
//! A [`Pipeline`] threads a record through its operators in order. Two
//! policies wrap the chain:
//!
//! - **Passthrough fields**: keys copied from the original input onto every
//!   output record after the chain finishes, overwriting whatever the
//!   operators produced for them.
//! - **Collection mode**: how collections (top-level input or mid-chain
//!   expansions) are handed to the next operator. In [`CollectionMode::Flatten`]
//!   every element runs independently and an expansion ends that element's
//!   chain immediately; in [`CollectionMode::Nested`] the collection is fed
//!   whole to each following operator.

use crate::config::FlowConfig;
use crate::data::{Data, Record};
use crate::error::{FlowError, Result};
use crate::operator::Operator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Tracing target for operator I/O events.
pub const TRACING_TARGET: &str = "jsonflow_core::pipeline";

/// Policy for collections flowing through a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionMode {
    /// Process elements independently; expansion exits the element's chain
    #[default]
    Flatten,
    /// Thread the whole collection through each operator
    Nested,
}

impl CollectionMode {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionMode::Flatten => "flatten",
            CollectionMode::Nested => "nested",
        }
    }
}

impl fmt::Display for CollectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionMode {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flatten" => Ok(CollectionMode::Flatten),
            "nested" => Ok(CollectionMode::Nested),
            other => Err(FlowError::Config(format!(
                "invalid collection mode '{}' (expected 'flatten' or 'nested')",
                other
            ))),
        }
    }
}

/// Values of passthrough fields captured from an original input record.
struct PassthroughSnapshot(Vec<(String, Value)>);

impl PassthroughSnapshot {
    fn apply(&self, record: &mut Record) {
        for (key, value) in &self.0 {
            record.insert(key.clone(), value.clone());
        }
    }
}

/// An ordered chain of operators.
pub struct Pipeline {
    operators: Vec<Box<dyn Operator>>,
    passthrough_fields: Vec<String>,
    collection_mode: CollectionMode,
    config: FlowConfig,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field(
                "operators",
                &self.operators.iter().map(|op| op.name()).collect::<Vec<_>>(),
            )
            .field("passthrough_fields", &self.passthrough_fields)
            .field("collection_mode", &self.collection_mode)
            .finish()
    }
}

impl Pipeline {
    /// Create a pipeline in flatten mode with no passthrough fields.
    pub fn new(operators: Vec<Box<dyn Operator>>) -> Self {
        Self {
            operators,
            passthrough_fields: Vec::new(),
            collection_mode: CollectionMode::Flatten,
            config: FlowConfig::default(),
        }
    }

    /// Append an operator.
    pub fn add<O: Operator + 'static>(&mut self, operator: O) -> &mut Self {
        self.operators.push(Box::new(operator));
        self
    }

    /// Append an already boxed operator.
    pub fn add_boxed(&mut self, operator: Box<dyn Operator>) -> &mut Self {
        self.operators.push(operator);
        self
    }

    /// Builder form of [`Pipeline::set_passthrough_fields`].
    pub fn with_passthrough_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_passthrough_fields(fields);
        self
    }

    /// Replace the passthrough field set. Duplicates are ignored.
    pub fn set_passthrough_fields<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.passthrough_fields.clear();
        for field in fields {
            let field = field.into();
            if !self.passthrough_fields.contains(&field) {
                self.passthrough_fields.push(field);
            }
        }
        self
    }

    /// Builder form of [`Pipeline::set_collection_mode`].
    pub fn with_collection_mode(mut self, mode: CollectionMode) -> Self {
        self.collection_mode = mode;
        self
    }

    /// Change the collection mode.
    pub fn set_collection_mode(&mut self, mode: CollectionMode) -> &mut Self {
        self.collection_mode = mode;
        self
    }

    /// Attach runtime configuration.
    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    /// Passthrough field names in configuration order.
    pub fn passthrough_fields(&self) -> &[String] {
        &self.passthrough_fields
    }

    /// Current collection mode.
    pub fn collection_mode(&self) -> CollectionMode {
        self.collection_mode
    }

    /// Runtime configuration.
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Operators in execution order.
    pub fn operators(&self) -> &[Box<dyn Operator>] {
        &self.operators
    }

    /// Iterate over the operators in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Operator> {
        self.operators.iter().map(|op| op.as_ref())
    }

    /// Number of operators.
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// Whether the pipeline has no operators.
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Run the operator chain over a record or a collection.
    ///
    /// Operator errors are not caught here; they propagate to the caller.
    pub fn process(&self, input: Data) -> Result<Data> {
        match input {
            Data::Record(record) => self.process_record(record),
            Data::Collection(records) => match self.collection_mode {
                CollectionMode::Nested => {
                    // No single original record exists, so passthrough is skipped.
                    let mut current = Data::Collection(records);
                    for op in &self.operators {
                        current = self.apply(op.as_ref(), current)?;
                    }
                    Ok(current)
                }
                CollectionMode::Flatten => {
                    let mut output = Vec::with_capacity(records.len());
                    for record in records {
                        match self.process_record(record)? {
                            Data::Record(record) => output.push(record),
                            Data::Collection(expanded) => output.extend(expanded),
                        }
                    }
                    Ok(Data::Collection(output))
                }
            },
        }
    }

    fn process_record(&self, record: Record) -> Result<Data> {
        let snapshot = self.snapshot(&record);
        let mut current = Data::Record(record);

        for op in &self.operators {
            current = self.apply(op.as_ref(), current)?;
            if self.collection_mode == CollectionMode::Flatten && current.is_collection() {
                // Expansion ends this element's chain; later operators are not applied.
                break;
            }
        }

        Ok(match current {
            Data::Record(mut record) => {
                snapshot.apply(&mut record);
                Data::Record(record)
            }
            Data::Collection(mut records) => {
                for record in &mut records {
                    snapshot.apply(record);
                }
                Data::Collection(records)
            }
        })
    }

    fn snapshot(&self, record: &Record) -> PassthroughSnapshot {
        PassthroughSnapshot(
            self.passthrough_fields
                .iter()
                .filter_map(|field| {
                    record
                        .get(field)
                        .map(|value| (field.clone(), value.clone()))
                })
                .collect(),
        )
    }

    fn apply(&self, op: &dyn Operator, input: Data) -> Result<Data> {
        if !self.config.io_logging {
            return op.process(input);
        }
        let input_text = self.render(&input);
        let output = op.process(input)?;
        debug!(
            target: TRACING_TARGET,
            operator = op.name(),
            input = %input_text,
            output = %self.render(&output),
            "operator applied"
        );
        Ok(output)
    }

    fn render(&self, data: &Data) -> String {
        let text = serde_json::to_string(data).unwrap_or_else(|e| format!("<unserializable: {e}>"));
        self.config.truncate_for_log(&text)
    }
}

impl<'a> IntoIterator for &'a Pipeline {
    type Item = &'a Box<dyn Operator>;
    type IntoIter = std::slice::Iter<'a, Box<dyn Operator>>;

    fn into_iter(self) -> Self::IntoIter {
        self.operators.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record;
    use crate::operator::FnOperator;
    use serde_json::json;

    fn add_field(name: &'static str, key: &'static str, value: Value) -> Box<dyn Operator> {
        Box::new(FnOperator::new(name, move |mut rec: Record| {
            rec.insert(key.to_string(), value.clone());
            Ok(Data::Record(rec))
        }))
    }

    fn splitter() -> Box<dyn Operator> {
        Box::new(FnOperator::new("split", |rec: Record| {
            let items = rec
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            Ok(Data::Collection(
                items
                    .into_iter()
                    .map(|item| {
                        let mut out = rec.clone();
                        out.insert("items".into(), item);
                        out
                    })
                    .collect(),
            ))
        }))
    }

    fn clobber_ids() -> Box<dyn Operator> {
        Box::new(FnOperator::new("clobber", |mut rec: Record| {
            rec.insert("id".into(), json!("overwritten"));
            rec.remove("meta");
            Ok(Data::Record(rec))
        }))
    }

    #[test]
    fn chain_runs_in_order() {
        let pipeline = Pipeline::new(vec![
            add_field("a", "field1", json!("value1")),
            add_field("b", "field2", json!("value2")),
        ]);
        let out = pipeline
            .process(Data::Record(record(json!({"original": "data"}))))
            .unwrap();
        assert_eq!(
            out,
            Data::Record(record(json!({
                "original": "data", "field1": "value1", "field2": "value2"
            })))
        );
    }

    #[test]
    fn empty_pipeline_is_identity() {
        let pipeline = Pipeline::default();
        let input = Data::Record(record(json!({"x": 1})));
        assert_eq!(pipeline.process(input.clone()).unwrap(), input);
    }

    #[test]
    fn add_is_chainable() {
        let mut pipeline = Pipeline::default();
        pipeline
            .add(FnOperator::new("one", |r| Ok(Data::Record(r))))
            .add(FnOperator::new("two", |r| Ok(Data::Record(r))));
        assert_eq!(pipeline.len(), 2);
        let names: Vec<_> = pipeline.iter().map(|op| op.name().to_string()).collect();
        assert_eq!(names, ["one", "two"]);
    }

    #[test]
    fn passthrough_restores_original_values() {
        let pipeline = Pipeline::new(vec![clobber_ids()]).with_passthrough_fields(["id", "meta"]);
        let out = pipeline
            .process(Data::Record(record(
                json!({"id": "x", "meta": {"a": 1}, "text": "HELLO"}),
            )))
            .unwrap();
        let rec = out.as_record().unwrap();
        assert_eq!(rec["id"], "x");
        assert_eq!(rec["meta"], json!({"a": 1}));
    }

    #[test]
    fn passthrough_ignores_fields_absent_from_input() {
        let pipeline = Pipeline::new(vec![add_field("a", "id", json!(7))]).with_passthrough_fields(["id"]);
        let out = pipeline.process(Data::Record(record(json!({})))).unwrap();
        assert_eq!(out.as_record().unwrap()["id"], 7);
    }

    #[test]
    fn flatten_expansion_exits_chain_early() {
        let pipeline = Pipeline::new(vec![
            add_field("A", "a", json!(true)),
            splitter(),
            add_field("B", "b", json!(true)),
        ])
        .with_passthrough_fields(["id"]);
        let out = pipeline
            .process(Data::Record(record(json!({"id": 1, "items": [1, 2]}))))
            .unwrap();
        let records = out.into_records();
        assert_eq!(records.len(), 2);
        for rec in &records {
            assert_eq!(rec["a"], true);
            assert_eq!(rec["id"], 1);
            assert!(!rec.contains_key("b"));
        }
    }

    #[test]
    fn nested_mode_threads_collection_whole() {
        let pipeline = Pipeline::new(vec![
            add_field("A", "a", json!(true)),
            splitter(),
            add_field("B", "b", json!(true)),
        ])
        .with_collection_mode(CollectionMode::Nested);
        let out = pipeline
            .process(Data::Record(record(json!({"items": [1, 2]}))))
            .unwrap();
        let records = out.into_records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|rec| rec["b"] == true));
    }

    #[test]
    fn flatten_collection_input_preserves_order() {
        let pipeline = Pipeline::new(vec![splitter()]).with_passthrough_fields(["id"]);
        let out = pipeline
            .process(Data::Collection(vec![
                record(json!({"id": 1, "items": ["a", "b"]})),
                record(json!({"id": 2, "items": ["c"]})),
            ]))
            .unwrap();
        let items: Vec<_> = out
            .into_records()
            .into_iter()
            .map(|r| (r["id"].clone(), r["items"].clone()))
            .collect();
        assert_eq!(
            items,
            vec![(json!(1), json!("a")), (json!(1), json!("b")), (json!(2), json!("c"))]
        );
    }

    #[test]
    fn nested_collection_input_skips_passthrough() {
        let pipeline = Pipeline::new(vec![clobber_ids()])
            .with_passthrough_fields(["id"])
            .with_collection_mode(CollectionMode::Nested);
        let out = pipeline
            .process(Data::Collection(vec![record(json!({"id": "keep"}))]))
            .unwrap();
        assert_eq!(out.into_records()[0]["id"], "overwritten");
    }

    #[test]
    fn operator_errors_propagate() {
        let failing: Box<dyn Operator> =
            Box::new(FnOperator::new("fail", |_| Err(FlowError::operator("fail", "nope"))));
        let pipeline = Pipeline::new(vec![failing]);
        let err = pipeline.process(Data::Record(Record::new())).unwrap_err();
        assert!(matches!(err, FlowError::Operator { .. }));
    }

    #[test]
    fn collection_mode_parsing() {
        assert_eq!("Nested".parse::<CollectionMode>().unwrap(), CollectionMode::Nested);
        assert_eq!(" flatten ".parse::<CollectionMode>().unwrap(), CollectionMode::Flatten);
        assert!(matches!(
            "sideways".parse::<CollectionMode>(),
            Err(FlowError::Config(_))
        ));
    }

    #[test]
    fn passthrough_fields_are_deduplicated() {
        let pipeline = Pipeline::default().with_passthrough_fields(["id", "id", "meta"]);
        assert_eq!(pipeline.passthrough_fields(), ["id", "meta"]);
    }
}
