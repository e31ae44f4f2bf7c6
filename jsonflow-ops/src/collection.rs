//! Collection operators: one record to many and many records to one

use crate::expr::Expression;
use jsonflow_core::path::is_truthy;
use jsonflow_core::{Data, FlowError, Operator, Record, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Explodes a list field into one record per element.
#[derive(Debug, Clone)]
pub struct JsonSplitter {
    split_field: String,
    keep_original: bool,
    output_key_map: Vec<(String, String)>,
}

impl JsonSplitter {
    /// Split on the top-level list field `split_field`.
    pub fn new(split_field: impl Into<String>) -> Self {
        Self {
            split_field: split_field.into(),
            keep_original: true,
            output_key_map: Vec::new(),
        }
    }

    /// Copy the other fields of the input into every output (default true).
    pub fn keep_original(mut self, keep: bool) -> Self {
        self.keep_original = keep;
        self
    }

    /// Rename output keys; without `keep_original`, only mapped keys are kept.
    pub fn with_output_key_map<I, K, V>(mut self, map: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.output_key_map = map.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    fn base(&self, record: &Record) -> Record {
        if self.keep_original {
            return record.clone();
        }
        let mut base = Map::new();
        for (key, _) in &self.output_key_map {
            if let Some(value) = record.get(key) {
                base.insert(key.clone(), value.clone());
            }
        }
        base
    }

    fn rename(&self, mut out: Record) -> Record {
        for (from, to) in &self.output_key_map {
            if let Some(value) = out.shift_remove(from) {
                out.insert(to.clone(), value);
            }
        }
        out
    }
}

impl Operator for JsonSplitter {
    fn name(&self) -> &str {
        "JsonSplitter"
    }

    fn description(&self) -> String {
        format!("Splits records on the '{}' list", self.split_field)
    }

    fn process_item(&self, record: Record) -> Result<Data> {
        let items = match record.get(&self.split_field) {
            Some(Value::Array(items)) => items.clone(),
            _ => return Ok(Data::Collection(vec![record])),
        };
        let base = self.base(&record);
        let records = items
            .into_iter()
            .map(|item| {
                let mut out = base.clone();
                out.insert(self.split_field.clone(), item);
                self.rename(out)
            })
            .collect();
        Ok(Data::Collection(records))
    }
}

/// How [`JsonAggregator`] combines a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStrategy {
    /// Collect records into a list
    #[default]
    List,
    /// Merge records key by key, later records winning
    Merge,
}

impl fmt::Display for AggregateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateStrategy::List => write!(f, "list"),
            AggregateStrategy::Merge => write!(f, "merge"),
        }
    }
}

impl FromStr for AggregateStrategy {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "list" => Ok(AggregateStrategy::List),
            "merge" => Ok(AggregateStrategy::Merge),
            other => Err(FlowError::Config(format!(
                "unknown aggregate strategy '{}', expected 'list' or 'merge'",
                other
            ))),
        }
    }
}

/// Combines a whole collection into one record (or a filtered list).
#[derive(Debug, Clone, Default)]
pub struct JsonAggregator {
    aggregate_field: Option<String>,
    strategy: AggregateStrategy,
    condition: Option<Expression>,
}

impl JsonAggregator {
    /// Aggregate with `strategy`.
    pub fn new(strategy: AggregateStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Place the aggregated list under `field`.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.aggregate_field = Some(field.into());
        self
    }

    /// Only aggregate records matching `condition`.
    pub fn with_condition(mut self, condition: Expression) -> Self {
        self.condition = Some(condition);
        self
    }
}

impl Operator for JsonAggregator {
    fn name(&self) -> &str {
        "JsonAggregator"
    }

    fn description(&self) -> String {
        format!("Aggregates collections ({})", self.strategy)
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn process_item(&self, record: Record) -> Result<Data> {
        Ok(Data::Record(record))
    }

    fn process_batch(&self, records: Vec<Record>) -> Result<Data> {
        if records.is_empty() {
            return Ok(Data::Record(Map::new()));
        }
        let selected = match &self.condition {
            Some(condition) => {
                let mut kept = Vec::with_capacity(records.len());
                for record in records {
                    if is_truthy(&condition.evaluate_for(self.name(), &record)?) {
                        kept.push(record);
                    }
                }
                kept
            }
            None => records,
        };
        match self.strategy {
            AggregateStrategy::List => match &self.aggregate_field {
                Some(field) => {
                    let mut out = Map::new();
                    out.insert(
                        field.clone(),
                        Value::Array(selected.into_iter().map(Value::Object).collect()),
                    );
                    Ok(Data::Record(out))
                }
                None => Ok(Data::Collection(selected)),
            },
            AggregateStrategy::Merge => {
                let mut merged = Map::new();
                for record in selected {
                    merged.extend(record);
                }
                Ok(Data::Record(merged))
            }
        }
    }
}
