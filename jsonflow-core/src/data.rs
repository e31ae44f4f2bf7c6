//! Records and collections flowing through a pipeline

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single JSON object. Key order is preserved.
pub type Record = Map<String, Value>;

/// Input or output of an operator: one record or an ordered collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Data {
    /// A single record
    Record(Record),
    /// An ordered sequence of records
    Collection(Vec<Record>),
}

impl Data {
    /// Check whether this value is a collection.
    pub fn is_collection(&self) -> bool {
        matches!(self, Data::Collection(_))
    }

    /// Borrow the record, if this is one.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Data::Record(record) => Some(record),
            Data::Collection(_) => None,
        }
    }

    /// Borrow the collection, if this is one.
    pub fn as_collection(&self) -> Option<&[Record]> {
        match self {
            Data::Record(_) => None,
            Data::Collection(records) => Some(records),
        }
    }

    /// Number of records carried by this value.
    pub fn record_count(&self) -> usize {
        match self {
            Data::Record(_) => 1,
            Data::Collection(records) => records.len(),
        }
    }

    /// Flatten into a list of records. A single record becomes a one-element list.
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Data::Record(record) => vec![record],
            Data::Collection(records) => records,
        }
    }

    /// Convert a JSON value into `Data`.
    ///
    /// Objects become records and arrays of objects become collections; any
    /// other shape is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Data::Record(map)),
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(idx, item)| match item {
                    Value::Object(map) => Ok(map),
                    other => Err(FlowError::Config(format!(
                        "collection element {} is {}, expected an object",
                        idx,
                        value_kind(&other)
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(Data::Collection),
            other => Err(FlowError::Config(format!(
                "expected an object or an array of objects, found {}",
                value_kind(&other)
            ))),
        }
    }

    /// Convert back into a JSON value.
    pub fn into_value(self) -> Value {
        match self {
            Data::Record(record) => Value::Object(record),
            Data::Collection(records) => {
                Value::Array(records.into_iter().map(Value::Object).collect())
            }
        }
    }
}

impl From<Record> for Data {
    fn from(record: Record) -> Self {
        Data::Record(record)
    }
}

impl From<Vec<Record>> for Data {
    fn from(records: Vec<Record>) -> Self {
        Data::Collection(records)
    }
}

/// Human readable name of a JSON value's kind.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Build a record from a `json!` object literal.
///
/// Non-object values produce an empty record; intended for tests and examples.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_value_distinguishes_shapes() {
        let data = Data::from_value(json!({"a": 1})).unwrap();
        assert!(!data.is_collection());

        let data = Data::from_value(json!([{"a": 1}, {"a": 2}])).unwrap();
        assert_eq!(data.record_count(), 2);

        assert!(Data::from_value(json!([1, 2])).is_err());
        assert!(Data::from_value(json!("text")).is_err());
    }

    #[test]
    fn serde_roundtrip_is_untagged() {
        let data = Data::Collection(vec![record(json!({"x": 1}))]);
        let text = serde_json::to_string(&data).unwrap();
        assert_eq!(text, r#"[{"x":1}]"#);
        let back: Data = serde_json::from_str(&text).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn into_records_wraps_single_record() {
        let data = Data::Record(record(json!({"k": "v"})));
        assert_eq!(data.into_records().len(), 1);
    }
}
