//! Operations over an array field
//!
//! Object elements are evaluated as records; any other element is exposed to
//! expressions as `item`.

use crate::expr::Expression;
use jsonflow_core::path::{self, is_truthy};
use jsonflow_core::{value_kind, Data, FlowError, Operator, Record, Result};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Transformation applied to the array.
#[derive(Debug, Clone)]
pub enum ArrayOp {
    /// Keep elements whose expression is truthy
    Filter(Expression),
    /// Replace each element with the expression result
    Map(Expression),
    /// Sort by the element itself or by a key path
    Sort {
        /// Key path inside object elements
        key: Option<String>,
        /// Descending order
        reverse: bool,
    },
    /// Drop repeated elements, keeping the first occurrence
    Unique,
    /// Keep `start..end` (negative values count from the end)
    Slice {
        /// First index kept
        start: i64,
        /// One past the last index kept; `None` means the end
        end: Option<i64>,
    },
}

impl ArrayOp {
    fn label(&self) -> &'static str {
        match self {
            ArrayOp::Filter(_) => "filter",
            ArrayOp::Map(_) => "map",
            ArrayOp::Sort { .. } => "sort",
            ArrayOp::Unique => "unique",
            ArrayOp::Slice { .. } => "slice",
        }
    }
}

/// Applies an [`ArrayOp`] to the array at `field`.
#[derive(Debug, Clone)]
pub struct JsonArrayOperator {
    field: String,
    op: ArrayOp,
    output_field: Option<String>,
}

impl JsonArrayOperator {
    /// Operate on `field` in place.
    pub fn new(field: impl Into<String>, op: ArrayOp) -> Self {
        Self {
            field: field.into(),
            op,
            output_field: None,
        }
    }

    /// Write the result to `output_field` instead of replacing `field`.
    pub fn with_output_field(mut self, output_field: impl Into<String>) -> Self {
        self.output_field = Some(output_field.into());
        self
    }
}

fn element_record(element: &Value) -> Record {
    match element {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("item".to_string(), other.clone());
            map
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn clamp_index(index: i64, len: usize) -> usize {
    let len = len as i64;
    let idx = if index < 0 { len + index } else { index };
    idx.clamp(0, len) as usize
}

impl Operator for JsonArrayOperator {
    fn name(&self) -> &str {
        "JsonArrayOperator"
    }

    fn description(&self) -> String {
        format!("Array {} on {}", self.op.label(), self.field)
    }

    fn process_item(&self, mut record: Record) -> Result<Data> {
        let items = match path::get(&record, &self.field) {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(FlowError::operator(
                    self.name(),
                    format!("field '{}' is {}, expected an array", self.field, value_kind(other)),
                ))
            }
            None => return Ok(Data::Record(record)),
        };
        let result = match &self.op {
            ArrayOp::Filter(expr) => {
                let mut kept = Vec::with_capacity(items.len());
                for item in items {
                    if is_truthy(&expr.evaluate_for(self.name(), &element_record(&item))?) {
                        kept.push(item);
                    }
                }
                kept
            }
            ArrayOp::Map(expr) => items
                .iter()
                .map(|item| expr.evaluate_for(self.name(), &element_record(item)))
                .collect::<Result<Vec<_>>>()?,
            ArrayOp::Sort { key, reverse } => {
                let mut sorted = items;
                sorted.sort_by(|a, b| {
                    let ordering = match key {
                        Some(key) => {
                            let ka = path::get(&element_record(a), key).cloned().unwrap_or(Value::Null);
                            let kb = path::get(&element_record(b), key).cloned().unwrap_or(Value::Null);
                            compare_values(&ka, &kb)
                        }
                        None => compare_values(a, b),
                    };
                    if *reverse {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                });
                sorted
            }
            ArrayOp::Unique => {
                let mut seen: Vec<Value> = Vec::new();
                for item in items {
                    if !seen.contains(&item) {
                        seen.push(item);
                    }
                }
                seen
            }
            ArrayOp::Slice { start, end } => {
                let len = items.len();
                let from = clamp_index(*start, len);
                let to = end.map_or(len, |end| clamp_index(end, len));
                if from < to {
                    items[from..to].to_vec()
                } else {
                    Vec::new()
                }
            }
        };
        let target = self.output_field.as_deref().unwrap_or(&self.field);
        path::set(&mut record, target, Value::Array(result));
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
            "items": [
                {"name": "pen", "price": 12},
                {"name": "book", "price": 30},
                {"name": "cup", "price": 18}
            ],
            "tags": ["b", "a", "b", "c"]
        }))
    }

    fn run(op: JsonArrayOperator) -> Record {
        op.process_item(sample()).unwrap().as_record().cloned().unwrap()
    }

    #[test]
    fn filter_in_place() {
        let op = JsonArrayOperator::new("items", ArrayOp::Filter(Expression::parse("price > 15").unwrap()));
        let rec = run(op);
        assert_eq!(rec["items"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn sort_by_key_into_output_field() {
        let op = JsonArrayOperator::new(
            "items",
            ArrayOp::Sort {
                key: Some("price".into()),
                reverse: true,
            },
        )
        .with_output_field("sorted");
        let rec = run(op);
        let names: Vec<_> = rec["sorted"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("book"), json!("cup"), json!("pen")]);
        assert_eq!(rec["items"][0]["name"], "pen");
    }

    #[test]
    fn map_scalars_through_item() {
        let op = JsonArrayOperator::new("tags", ArrayOp::Map(Expression::parse("upper(item)").unwrap()));
        assert_eq!(run(op)["tags"], json!(["B", "A", "B", "C"]));
    }

    #[test]
    fn unique_and_slice() {
        assert_eq!(run(JsonArrayOperator::new("tags", ArrayOp::Unique))["tags"], json!(["b", "a", "c"]));
        let op = JsonArrayOperator::new("tags", ArrayOp::Slice { start: -2, end: None });
        assert_eq!(run(op)["tags"], json!(["b", "c"]));
    }

    #[test]
    fn missing_field_passes_through_and_non_array_fails() {
        let op = JsonArrayOperator::new("nothing", ArrayOp::Unique);
        assert_eq!(run(op), sample());
        let op = JsonArrayOperator::new("items.0.name", ArrayOp::Unique);
        assert!(op.process_item(sample()).is_err());
    }
}
