//! Record filtering

use crate::expr::Expression;
use jsonflow_core::{path::is_truthy, Data, Operator, Record, Result};

/// Keeps records whose predicate is truthy.
///
/// A dropped record becomes an empty collection, so inside a batch it simply
/// disappears from the flattened output.
#[derive(Debug, Clone)]
pub struct JsonFilter {
    condition: Expression,
}

impl JsonFilter {
    /// Filter with an allow-listed expression.
    pub fn new(condition: &str) -> Result<Self> {
        Ok(Self {
            condition: Expression::parse(condition)?,
        })
    }

    /// Filter with a prepared expression or closure.
    pub fn with_expression(condition: Expression) -> Self {
        Self { condition }
    }

    /// Predicate in effect.
    pub fn condition(&self) -> &Expression {
        &self.condition
    }
}

impl Operator for JsonFilter {
    fn name(&self) -> &str {
        "JsonFilter"
    }

    fn description(&self) -> String {
        format!("Keeps records matching {}", self.condition.source())
    }

    fn process_item(&self, record: Record) -> Result<Data> {
        let keep = is_truthy(&self.condition.evaluate_for(self.name(), &record)?);
        if keep {
            Ok(Data::Record(record))
        } else {
            Ok(Data::Collection(Vec::new()))
        }
    }
}
