//! Computed fields and field mapping

use crate::expr::Expression;
use jsonflow_core::{path, Data, FlowError, Operator, Record, Result};

/// Evaluates expressions and writes each result to its target path.
///
/// Expressions see the record as it was before this operator ran.
#[derive(Debug, Clone, Default)]
pub struct JsonExpressionOperator {
    expressions: Vec<(String, Expression)>,
}

impl JsonExpressionOperator {
    /// Build from prepared `(target, expression)` pairs.
    pub fn new<I, S>(expressions: I) -> Self
    where
        I: IntoIterator<Item = (S, Expression)>,
        S: Into<String>,
    {
        Self {
            expressions: expressions
                .into_iter()
                .map(|(target, expr)| (target.into(), expr))
                .collect(),
        }
    }

    /// Parse `(target, source)` pairs.
    pub fn parse<'a, I>(expressions: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let parsed = expressions
            .into_iter()
            .map(|(target, source)| Ok((target.to_string(), Expression::parse(source)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            expressions: parsed,
        })
    }

    /// Configured expressions.
    pub fn expressions(&self) -> &[(String, Expression)] {
        &self.expressions
    }
}

impl Operator for JsonExpressionOperator {
    fn name(&self) -> &str {
        "JsonExpressionOperator"
    }

    fn process_item(&self, record: Record) -> Result<Data> {
        let mut out = record.clone();
        for (target, expr) in &self.expressions {
            let value = expr.evaluate_for(self.name(), &record)?;
            if !path::set(&mut out, target, value) {
                return Err(FlowError::operator(
                    self.name(),
                    format!("cannot write to path '{}'", target),
                ));
            }
        }
        Ok(Data::Record(out))
    }
}

/// Where a mapped value comes from.
#[derive(Debug, Clone)]
pub enum MappingSource {
    /// Dotted path, possibly with `[*]` wildcards
    Path(String),
    /// Expression or closure
    Expr(Expression),
}

impl MappingSource {
    /// Interpret `source` as a path when it only contains path characters,
    /// otherwise as an expression.
    pub fn parse(source: &str) -> Result<Self> {
        let is_path = !source.is_empty()
            && source
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '$' | '[' | ']' | '*'))
            && !source.starts_with(|c: char| c.is_ascii_digit());
        if is_path {
            Ok(MappingSource::Path(source.to_string()))
        } else {
            Ok(MappingSource::Expr(Expression::parse(source)?))
        }
    }
}

impl From<Expression> for MappingSource {
    fn from(expr: Expression) -> Self {
        MappingSource::Expr(expr)
    }
}

/// Builds fields from other fields, wildcard paths or expressions.
///
/// Targets whose path source is missing are left unset.
#[derive(Debug, Clone, Default)]
pub struct JsonFieldMapper {
    mappings: Vec<(String, MappingSource)>,
}

impl JsonFieldMapper {
    /// Build from prepared `(target, source)` pairs.
    pub fn new<I, S>(mappings: I) -> Self
    where
        I: IntoIterator<Item = (S, MappingSource)>,
        S: Into<String>,
    {
        Self {
            mappings: mappings
                .into_iter()
                .map(|(target, source)| (target.into(), source))
                .collect(),
        }
    }

    /// Parse `(target, source)` pairs, see [`MappingSource::parse`].
    pub fn parse<'a, I>(mappings: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let parsed = mappings
            .into_iter()
            .map(|(target, source)| Ok((target.to_string(), MappingSource::parse(source)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { mappings: parsed })
    }
}

impl Operator for JsonFieldMapper {
    fn name(&self) -> &str {
        "JsonFieldMapper"
    }

    fn process_item(&self, record: Record) -> Result<Data> {
        let mut out = record.clone();
        for (target, source) in &self.mappings {
            let value = match source {
                MappingSource::Path(p) => path::get_all(&record, p),
                MappingSource::Expr(expr) => Some(expr.evaluate_for(self.name(), &record)?),
            };
            if let Some(value) = value {
                path::set(&mut out, target, value);
            }
        }
        Ok(Data::Record(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonflow_core::record;
    use serde_json::json;

    fn order() -> Record {
        record(json!({
            "user": {"first_name": "John", "last_name": "Doe", "email": "john@example.com"},
            "items": [
                {"name": "Laptop", "price": 1200, "quantity": 1},
                {"name": "Mouse", "price": 25, "quantity": 2}
            ]
        }))
    }

    #[test]
    fn expressions_compute_new_fields() {
        let op = JsonExpressionOperator::parse([
            ("user.full_name", "$.user.first_name + ' ' + $.user.last_name"),
            ("order.item_count", "len(items)"),
            ("order.large", "sum(items[*].price) > 1000"),
        ])
        .unwrap();
        let rec = op.process_item(order()).unwrap().as_record().cloned().unwrap();
        assert_eq!(rec["user"]["full_name"], "John Doe");
        assert_eq!(rec["order"], json!({"item_count": 2, "large": true}));
    }

    #[test]
    fn closures_can_compute_anything() {
        let total = Expression::from_fn(|rec| {
            let total: f64 = rec["items"]
                .as_array()
                .into_iter()
                .flatten()
                .map(|item| item["price"].as_f64().unwrap_or(0.0) * item["quantity"].as_f64().unwrap_or(0.0))
                .sum();
            Ok(json!(total))
        });
        let op = JsonExpressionOperator::new([("order.total", total)]);
        let rec = op.process_item(order()).unwrap().as_record().cloned().unwrap();
        assert_eq!(rec["order"]["total"], json!(1250.0));
    }

    #[test]
    fn mapper_handles_paths_wildcards_and_expressions() {
        let op = JsonFieldMapper::parse([
            ("customer.name", "user.first_name"),
            ("product_names", "items[*].name"),
            ("customer.domain", "split(user.email, '@')"),
            ("customer.phone", "user.phone"),
        ])
        .unwrap();
        let rec = op.process_item(order()).unwrap().as_record().cloned().unwrap();
        assert_eq!(rec["customer"]["name"], "John");
        assert_eq!(rec["product_names"], json!(["Laptop", "Mouse"]));
        assert_eq!(rec["customer"]["domain"], json!(["john", "example.com"]));
        assert!(rec["customer"].get("phone").is_none());
    }

    #[test]
    fn mapping_source_detection() {
        assert!(matches!(MappingSource::parse("a.b[0]").unwrap(), MappingSource::Path(_)));
        assert!(matches!(MappingSource::parse("a + 1").unwrap(), MappingSource::Expr(_)));
        assert!(MappingSource::parse("evil()").is_err());
    }
}
