//! Dotted path helpers shared by operators
//!
//! Paths address nested values with `.`-separated segments. A segment that
//! parses as an unsigned integer indexes into arrays; `a[0].b` is accepted as
//! an alias for `a.0.b`. `[*]` (or a `*` segment) fans out over every array
//! element and is only meaningful for [`get_all`].

use serde_json::{Map, Value};

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object key (or array index when numeric)
    Key(String),
    /// Every element of an array
    Wildcard,
}

/// Split a dotted path into segments.
pub fn parse_path(path: &str) -> Vec<Segment> {
    let normalized = path
        .trim_start_matches("$.")
        .replace("[*]", ".*")
        .replace('[', ".")
        .replace(']', "");
    normalized
        .split('.')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if segment == "*" {
                Segment::Wildcard
            } else {
                Segment::Key(segment.to_string())
            }
        })
        .collect()
}

fn step<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    }
}

fn step_mut<'a>(value: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(key),
        Value::Array(items) => {
            let idx = key.parse::<usize>().ok()?;
            items.get_mut(idx)
        }
        _ => None,
    }
}

/// Look up a value by dotted path. Wildcards are not followed.
pub fn get<'a>(record: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let segments = parse_path(path);
    let (first, rest) = segments.split_first()?;
    let Segment::Key(first) = first else {
        return None;
    };
    let mut current = record.get(first)?;
    for segment in rest {
        match segment {
            Segment::Key(key) => current = step(current, key)?,
            Segment::Wildcard => return None,
        }
    }
    Some(current)
}

/// Collect every value matched by a path, expanding wildcards.
///
/// Returns `None` when a non-wildcard path does not resolve; a wildcard path
/// always yields an array (possibly empty).
pub fn get_all(record: &Map<String, Value>, path: &str) -> Option<Value> {
    let segments = parse_path(path);
    if !segments.contains(&Segment::Wildcard) {
        return get(record, path).cloned();
    }
    let root = Value::Object(record.clone());
    let mut found = Vec::new();
    collect(&root, &segments, &mut found);
    Some(Value::Array(found))
}

fn collect(value: &Value, segments: &[Segment], found: &mut Vec<Value>) {
    let Some((first, rest)) = segments.split_first() else {
        found.push(value.clone());
        return;
    };
    match first {
        Segment::Key(key) => {
            if let Some(next) = step(value, key) {
                collect(next, rest, found);
            }
        }
        Segment::Wildcard => {
            if let Value::Array(items) = value {
                for item in items {
                    collect(item, rest, found);
                }
            }
        }
    }
}

/// Set a value by dotted path, creating intermediate objects as needed.
///
/// Numeric segments index existing arrays (one past the end appends); a
/// scalar in the way is replaced by an object. Returns `false` if the path is
/// empty, uses a wildcard, or cannot address an array slot.
pub fn set(record: &mut Map<String, Value>, path: &str, value: Value) -> bool {
    match keys_of(path) {
        Some(keys) => set_in_map(record, &keys, value),
        None => false,
    }
}

fn keys_of(path: &str) -> Option<Vec<String>> {
    parse_path(path)
        .into_iter()
        .map(|segment| match segment {
            Segment::Key(key) => Some(key),
            Segment::Wildcard => None,
        })
        .collect()
}

fn set_in_map(map: &mut Map<String, Value>, keys: &[String], value: Value) -> bool {
    let Some((key, rest)) = keys.split_first() else {
        return false;
    };
    if rest.is_empty() {
        map.insert(key.clone(), value);
        return true;
    }
    let child = map
        .entry(key.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    set_in_value(child, rest, value)
}

fn set_in_value(target: &mut Value, keys: &[String], value: Value) -> bool {
    let Some((key, rest)) = keys.split_first() else {
        *target = value;
        return true;
    };
    if let Value::Array(items) = target {
        return match key.parse::<usize>() {
            Ok(idx) if idx < items.len() => set_in_value(&mut items[idx], rest, value),
            Ok(idx) if idx == items.len() && rest.is_empty() => {
                items.push(value);
                true
            }
            _ => false,
        };
    }
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    match target {
        Value::Object(map) => set_in_map(map, keys, value),
        _ => false,
    }
}

/// Remove a value by dotted path. Returns the removed value.
pub fn remove(record: &mut Map<String, Value>, path: &str) -> Option<Value> {
    let keys = keys_of(path)?;
    let (last, parents) = keys.split_last()?;
    let Some((first, middle)) = parents.split_first() else {
        return record.shift_remove(last.as_str());
    };
    let mut current = record.get_mut(first.as_str())?;
    for key in middle {
        current = step_mut(current, key)?;
    }
    match current {
        Value::Object(map) => map.shift_remove(last.as_str()),
        Value::Array(items) => {
            let idx = last.parse::<usize>().ok()?;
            (idx < items.len()).then(|| items.remove(idx))
        }
        _ => None,
    }
}

/// JSON truthiness: null, false, 0, "" and empty containers are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Render a value as plain text: strings without quotes, everything else as JSON.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record;
    use serde_json::json;

    fn sample() -> Map<String, Value> {
        record(json!({
            "user": {"name": "Ada", "tags": ["x", "y"]},
            "items": [{"name": "a"}, {"name": "b"}]
        }))
    }

    #[test]
    fn get_follows_objects_and_indices() {
        let rec = sample();
        assert_eq!(get(&rec, "user.name"), Some(&json!("Ada")));
        assert_eq!(get(&rec, "user.tags.1"), Some(&json!("y")));
        assert_eq!(get(&rec, "items[0].name"), Some(&json!("a")));
        assert_eq!(get(&rec, "$.user.name"), Some(&json!("Ada")));
        assert_eq!(get(&rec, "user.missing"), None);
    }

    #[test]
    fn wildcard_collects_every_element() {
        let rec = sample();
        assert_eq!(get_all(&rec, "items[*].name"), Some(json!(["a", "b"])));
        assert_eq!(get_all(&rec, "nothing[*].name"), Some(json!([])));
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut rec = sample();
        assert!(set(&mut rec, "user.profile.age", json!(36)));
        assert_eq!(get(&rec, "user.profile.age"), Some(&json!(36)));
        assert!(set(&mut rec, "items.1.name", json!("B")));
        assert_eq!(get(&rec, "items.1.name"), Some(&json!("B")));
        assert!(set(&mut rec, "flat", json!(1)));
        assert_eq!(rec["flat"], 1);
        assert!(!set(&mut rec, "items[*].name", json!(0)));
    }

    #[test]
    fn set_replaces_scalar_in_the_way() {
        let mut rec = record(json!({"a": 5}));
        assert!(set(&mut rec, "a.b", json!(1)));
        assert_eq!(rec["a"], json!({"b": 1}));
    }

    #[test]
    fn remove_handles_keys_and_indices() {
        let mut rec = sample();
        assert_eq!(remove(&mut rec, "user.name"), Some(json!("Ada")));
        assert_eq!(remove(&mut rec, "items.0"), Some(json!({"name": "a"})));
        assert_eq!(rec["items"].as_array().map(Vec::len), Some(1));
        assert_eq!(remove(&mut rec, "nope.nope"), None);
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!([0])));
        assert!(is_truthy(&json!(0.5)));
    }
}
