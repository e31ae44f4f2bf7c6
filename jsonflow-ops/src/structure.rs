//! Key structure extraction

use jsonflow_core::{value_kind, Data, Operator, Record, Result};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// Number of array elements sampled for element types.
const ARRAY_SAMPLE: usize = 5;

/// Type names describing a value; arrays also report sampled element kinds
/// as `<kind>_array`.
pub fn value_types(value: &Value) -> BTreeSet<String> {
    let mut types = BTreeSet::new();
    types.insert(value_kind(value).to_string());
    if let Value::Array(items) = value {
        for item in items.iter().take(ARRAY_SAMPLE) {
            types.insert(format!("{}_array", value_kind(item)));
            if item.is_object() {
                break;
            }
        }
    }
    types
}

/// Every key path of `record` with the types seen there, in document order.
///
/// With `nested`, objects are walked recursively and arrays of objects are
/// described through their first element as `path[*]`.
pub fn extract_structure(record: &Record, nested: bool) -> Vec<(String, BTreeSet<String>)> {
    let mut out = Vec::new();
    walk(record, "", nested, &mut out);
    out
}

fn walk(map: &Record, prefix: &str, nested: bool, out: &mut Vec<(String, BTreeSet<String>)>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        out.push((path.clone(), value_types(value)));
        if !nested {
            continue;
        }
        match value {
            Value::Object(inner) => walk(inner, &path, nested, out),
            Value::Array(items) => {
                if let Some(Value::Object(first)) = items.first() {
                    walk(first, &format!("{}[*]", path), nested, out);
                }
            }
            _ => {}
        }
    }
}

/// Adds a structure description of each record under `output_field`.
#[derive(Debug, Clone)]
pub struct JsonStructureExtractor {
    /// Record the types seen at each path
    pub extract_types: bool,
    /// Recurse into objects and arrays of objects
    pub extract_nested: bool,
    /// Field receiving the description
    pub output_field: String,
    /// Keep the input fields next to the description
    pub include_original: bool,
}

impl Default for JsonStructureExtractor {
    fn default() -> Self {
        Self {
            extract_types: true,
            extract_nested: true,
            output_field: "structure".to_string(),
            include_original: true,
        }
    }
}

impl Operator for JsonStructureExtractor {
    fn name(&self) -> &str {
        "JsonStructureExtractor"
    }

    fn description(&self) -> String {
        "Extracts structure information from JSON data".to_string()
    }

    fn process_item(&self, record: Record) -> Result<Data> {
        let mut structure = Map::new();
        for (path, types) in extract_structure(&record, self.extract_nested) {
            let mut info = Map::new();
            info.insert("path".to_string(), Value::String(path.clone()));
            if self.extract_types {
                info.insert("types".to_string(), json!(types));
            }
            structure.insert(path, Value::Object(info));
        }
        let mut out = if self.include_original {
            record
        } else {
            Map::new()
        };
        out.insert(self.output_field.clone(), Value::Object(structure));
        Ok(Data::Record(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonflow_core::record;

    #[test]
    fn describes_nested_paths_and_array_samples() {
        let op = JsonStructureExtractor {
            include_original: false,
            ..JsonStructureExtractor::default()
        };
        let rec = record(json!({
            "id": 1,
            "user": {"name": "Ada"},
            "items": [{"sku": "x"}],
            "tags": ["a", 1]
        }));
        let out = op.process_item(rec).unwrap().as_record().cloned().unwrap();
        let structure = &out["structure"];
        assert_eq!(out.len(), 1);
        assert_eq!(structure["id"], json!({"path": "id", "types": ["integer"]}));
        assert_eq!(structure["user.name"]["types"], json!(["string"]));
        assert_eq!(structure["items"]["types"], json!(["array", "object_array"]));
        assert_eq!(structure["items[*].sku"]["path"], "items[*].sku");
        assert_eq!(
            structure["tags"]["types"],
            json!(["array", "integer_array", "string_array"])
        );
    }

    #[test]
    fn flat_mode_without_types_keeps_original() {
        let op = JsonStructureExtractor {
            extract_types: false,
            extract_nested: false,
            ..JsonStructureExtractor::default()
        };
        let out = op
            .process_item(record(json!({"a": {"b": 1}})))
            .unwrap()
            .as_record()
            .cloned()
            .unwrap();
        assert_eq!(out["a"], json!({"b": 1}));
        assert_eq!(out["structure"], json!({"a": {"path": "a"}}));
    }
}
