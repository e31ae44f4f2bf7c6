//! System fields: identifiers and timestamps

use chrono::{SecondsFormat, Utc};
use jsonflow_core::{Data, FlowError, Operator, Record, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

/// Adds a random UUIDv4 to every record.
#[derive(Debug, Clone)]
pub struct IdAdder {
    field: String,
    overwrite: bool,
}

impl Default for IdAdder {
    fn default() -> Self {
        Self {
            field: "id".to_string(),
            overwrite: false,
        }
    }
}

impl IdAdder {
    /// Write ids to `field`.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            overwrite: false,
        }
    }

    /// Replace ids that are already present.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

impl Operator for IdAdder {
    fn name(&self) -> &str {
        "IdAdder"
    }

    fn process_item(&self, mut record: Record) -> Result<Data> {
        if self.overwrite || !record.contains_key(&self.field) {
            record.insert(
                self.field.clone(),
                Value::String(Uuid::new_v4().to_string()),
            );
        }
        Ok(Data::Record(record))
    }
}

/// Representation of the time written by [`TimestampAdder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    /// Seconds since the Unix epoch
    #[default]
    Unix,
    /// Milliseconds since the Unix epoch
    UnixMs,
    /// RFC 3339 string in UTC
    Iso,
}

impl FromStr for TimestampFormat {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unix" => Ok(TimestampFormat::Unix),
            "unix_ms" => Ok(TimestampFormat::UnixMs),
            "iso" => Ok(TimestampFormat::Iso),
            other => Err(FlowError::Config(format!("unknown timestamp format '{}'", other))),
        }
    }
}

/// Adds the current time to every record.
#[derive(Debug, Clone)]
pub struct TimestampAdder {
    field: String,
    format: TimestampFormat,
    overwrite: bool,
}

impl Default for TimestampAdder {
    fn default() -> Self {
        Self {
            field: "timestamp".to_string(),
            format: TimestampFormat::Unix,
            overwrite: true,
        }
    }
}

impl TimestampAdder {
    /// Write timestamps in `format` to `field`.
    pub fn new(field: impl Into<String>, format: TimestampFormat) -> Self {
        Self {
            field: field.into(),
            format,
            overwrite: true,
        }
    }

    /// Keep existing values instead of replacing them.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    fn now(&self) -> Value {
        let now = Utc::now();
        match self.format {
            TimestampFormat::Unix => Value::from(now.timestamp()),
            TimestampFormat::UnixMs => Value::from(now.timestamp_millis()),
            TimestampFormat::Iso => Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }
}

impl Operator for TimestampAdder {
    fn name(&self) -> &str {
        "TimestampAdder"
    }

    fn process_item(&self, mut record: Record) -> Result<Data> {
        if self.overwrite || !record.contains_key(&self.field) {
            record.insert(self.field.clone(), self.now());
        }
        Ok(Data::Record(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use jsonflow_core::record;
    use serde_json::json;

    fn run<O: Operator>(op: &O, value: Value) -> Record {
        op.process_item(record(value)).unwrap().as_record().cloned().unwrap()
    }

    #[test]
    fn ids_are_unique_and_respect_existing() {
        let op = IdAdder::default();
        let a = run(&op, json!({}));
        let b = run(&op, json!({}));
        assert_ne!(a["id"], b["id"]);
        assert!(Uuid::parse_str(a["id"].as_str().unwrap()).is_ok());
        assert_eq!(run(&op, json!({"id": 7}))["id"], 7);
        assert_ne!(run(&op.clone().overwrite(true), json!({"id": 7}))["id"], 7);
    }

    #[test]
    fn timestamp_formats() {
        let unix = run(&TimestampAdder::default(), json!({}));
        assert!(unix["timestamp"].as_i64().unwrap() > 1_600_000_000);

        let ms = run(&TimestampAdder::new("ts", TimestampFormat::UnixMs), json!({}));
        assert!(ms["ts"].as_i64().unwrap() > 1_600_000_000_000);

        let iso = run(&TimestampAdder::new("at", TimestampFormat::Iso), json!({}));
        assert!(DateTime::parse_from_rfc3339(iso["at"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn timestamp_can_keep_existing() {
        let op = TimestampAdder::default().overwrite(false);
        assert_eq!(run(&op, json!({"timestamp": 1}))["timestamp"], 1);
    }
}
