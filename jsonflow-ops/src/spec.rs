//! Serializable pipeline descriptions
//!
//! A [`PipelineSpec`] describes a pipeline as data (TOML or JSON), so it can
//! be loaded from a config file or shipped to worker processes. Expressions
//! are carried as strings and parsed when the pipeline is built.

use crate::array_ops::{ArrayOp, JsonArrayOperator};
use crate::collection::{AggregateStrategy, JsonAggregator, JsonSplitter};
use crate::expr::Expression;
use crate::fields::{
    JsonFieldSelector, JsonMerger, JsonPathExtractor, JsonPathRemover, JsonPathUpdater,
    SelectOptions, ValueSource,
};
use crate::filter::JsonFilter;
use crate::mapping::{JsonExpressionOperator, JsonFieldMapper};
use crate::model::{MockBackend, ModelInvoker, ModelOptions};
use crate::string_ops::{JsonStringOperator, StringOperation};
use crate::structure::JsonStructureExtractor;
use crate::system::{IdAdder, TimestampAdder, TimestampFormat};
use crate::template::JsonTemplateOperator;
use crate::text::{CaseMode, NormalizeOptions, TextNormalizer};
use jsonflow_core::{
    CollectionMode, FlowConfig, FlowError, Named, Operator, Pipeline, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

fn yes() -> bool {
    true
}

fn default_structure_field() -> String {
    "structure".to_string()
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_timestamp_field() -> String {
    "timestamp".to_string()
}

/// Array operation names accepted by [`OperatorSpec::ArrayOperator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayOpKind {
    /// Keep matching elements
    Filter,
    /// Transform elements
    Map,
    /// Sort elements
    Sort,
    /// Drop duplicates
    Unique,
    /// Keep a range
    Slice,
}

/// Parameters of a model step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Invocation settings
    #[serde(flatten)]
    pub options: ModelOptions,
    /// Explicit API key; otherwise read from the configured variable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Endpoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Answer from this prompt -> reply table instead of calling a model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_responses: Option<HashMap<String, String>>,
    /// Reply for prompts missing from `mock_responses`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_default: Option<String>,
}

/// One operator with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorSpec {
    /// [`TextNormalizer`]
    TextNormalizer {
        /// Fields to normalize (default: every top-level string)
        #[serde(default)]
        fields: Option<Vec<String>>,
        /// Trim whitespace
        #[serde(default = "yes")]
        strip: bool,
        /// Collapse whitespace runs
        #[serde(default = "yes")]
        collapse_whitespace: bool,
        /// Lower-case
        #[serde(default = "yes")]
        lower_case: bool,
        /// Upper-case (wins over `lower_case`)
        #[serde(default)]
        upper_case: bool,
    },
    /// [`JsonFilter`]
    Filter {
        /// Predicate expression
        condition: String,
    },
    /// [`JsonFieldSelector`]
    FieldSelector {
        /// Paths to keep
        #[serde(default)]
        fields: Vec<String>,
        /// Paths to drop
        #[serde(default)]
        exclude: Vec<String>,
        /// Flatten selected paths
        #[serde(default)]
        flatten: bool,
        /// Prefix of flattened keys
        #[serde(default)]
        prefix: String,
        /// Value for missing fields
        #[serde(default)]
        default: Option<Value>,
    },
    /// [`JsonPathExtractor`]
    PathExtractor {
        /// Target -> source path
        paths: Map<String, Value>,
        /// Value for missing sources
        #[serde(default)]
        default_value: Value,
        /// Write into the input record
        #[serde(default)]
        keep_original: bool,
    },
    /// [`JsonPathUpdater`]
    PathUpdater {
        /// Path -> literal value
        #[serde(default)]
        updates: Map<String, Value>,
        /// Path -> expression
        #[serde(default)]
        computed: Map<String, Value>,
    },
    /// [`JsonPathRemover`]
    PathRemover {
        /// Paths to remove
        paths: Vec<String>,
    },
    /// [`JsonStringOperator`]
    StringOperator {
        /// Target -> operation
        operations: Map<String, Value>,
    },
    /// [`JsonArrayOperator`]
    ArrayOperator {
        /// Array field
        field: String,
        /// Operation
        operation: ArrayOpKind,
        /// Filter/map expression
        #[serde(default)]
        expression: Option<String>,
        /// Sort key path
        #[serde(default)]
        key: Option<String>,
        /// Sort descending
        #[serde(default)]
        reverse: bool,
        /// Slice start
        #[serde(default)]
        start: i64,
        /// Slice end
        #[serde(default)]
        end: Option<i64>,
        /// Destination field (default: in place)
        #[serde(default)]
        output_field: Option<String>,
    },
    /// [`JsonMerger`]
    Merger {
        /// Static object merged into every record
        #[serde(default)]
        data: Map<String, Value>,
        /// Key -> expression
        #[serde(default)]
        computed: Map<String, Value>,
        /// Deep merge
        #[serde(default)]
        deep: bool,
    },
    /// [`JsonExpressionOperator`]
    Expression {
        /// Target -> expression
        expressions: Map<String, Value>,
    },
    /// [`JsonFieldMapper`]
    FieldMapper {
        /// Target -> path or expression
        mappings: Map<String, Value>,
    },
    /// [`JsonTemplateOperator`]
    Template {
        /// Target -> template
        templates: Map<String, Value>,
    },
    /// [`JsonStructureExtractor`]
    StructureExtractor {
        /// Record types
        #[serde(default = "yes")]
        extract_types: bool,
        /// Recurse into nested values
        #[serde(default = "yes")]
        extract_nested: bool,
        /// Output field
        #[serde(default = "default_structure_field")]
        output_field: String,
        /// Keep input fields
        #[serde(default = "yes")]
        include_original: bool,
    },
    /// [`JsonSplitter`]
    Splitter {
        /// List field
        split_field: String,
        /// Copy other fields
        #[serde(default = "yes")]
        keep_original: bool,
        /// Key renames
        #[serde(default)]
        output_key_map: Map<String, Value>,
    },
    /// [`JsonAggregator`]
    Aggregator {
        /// Field for the aggregated list
        #[serde(default)]
        aggregate_field: Option<String>,
        /// Strategy
        #[serde(default)]
        strategy: AggregateStrategy,
        /// Predicate expression
        #[serde(default)]
        condition: Option<String>,
    },
    /// [`IdAdder`]
    IdAdder {
        /// Target field
        #[serde(default = "default_id_field")]
        field: String,
        /// Replace existing ids
        #[serde(default)]
        overwrite: bool,
    },
    /// [`TimestampAdder`]
    TimestampAdder {
        /// Target field
        #[serde(default = "default_timestamp_field")]
        field: String,
        /// Representation
        #[serde(default)]
        format: TimestampFormat,
        /// Replace existing values
        #[serde(default = "yes")]
        overwrite: bool,
    },
    /// [`ModelInvoker`]
    ModelInvoker(ModelSpec),
}

/// A pipeline step: an operator spec with an optional display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorEntry {
    /// Name reported in logs and errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Operator parameters
    #[serde(flatten)]
    pub spec: OperatorSpec,
}

impl From<OperatorSpec> for OperatorEntry {
    fn from(spec: OperatorSpec) -> Self {
        Self { name: None, spec }
    }
}

fn string_pairs(kind: &str, map: &Map<String, Value>) -> Result<Vec<(String, String)>> {
    map.iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key.clone(), s.clone())),
            other => Err(FlowError::Config(format!(
                "{}: value for '{}' must be a string, found {}",
                kind,
                key,
                jsonflow_core::value_kind(other)
            ))),
        })
        .collect()
}

fn expressions(kind: &str, map: &Map<String, Value>) -> Result<Vec<(String, Expression)>> {
    string_pairs(kind, map)?
        .into_iter()
        .map(|(key, source)| Ok((key, Expression::parse(&source)?)))
        .collect()
}

impl OperatorSpec {
    /// Instantiate the operator.
    pub fn build(&self, config: &FlowConfig) -> Result<Box<dyn Operator>> {
        let op: Box<dyn Operator> = match self {
            OperatorSpec::TextNormalizer {
                fields,
                strip,
                collapse_whitespace,
                lower_case,
                upper_case,
            } => Box::new(TextNormalizer::new(NormalizeOptions {
                fields: fields.clone(),
                strip: *strip,
                collapse_whitespace: *collapse_whitespace,
                case: if *upper_case {
                    CaseMode::Upper
                } else if *lower_case {
                    CaseMode::Lower
                } else {
                    CaseMode::Keep
                },
            })),
            OperatorSpec::Filter { condition } => Box::new(JsonFilter::new(condition)?),
            OperatorSpec::FieldSelector {
                fields,
                exclude,
                flatten,
                prefix,
                default,
            } => Box::new(JsonFieldSelector::new(SelectOptions {
                fields: fields.clone(),
                exclude: exclude.clone(),
                flatten: *flatten,
                prefix: prefix.clone(),
                default: default.clone(),
            })),
            OperatorSpec::PathExtractor {
                paths,
                default_value,
                keep_original,
            } => Box::new(
                JsonPathExtractor::new(string_pairs("path_extractor", paths)?)
                    .with_default(default_value.clone())
                    .keep_original(*keep_original),
            ),
            OperatorSpec::PathUpdater { updates, computed } => {
                let mut all: Vec<(String, ValueSource)> = updates
                    .iter()
                    .map(|(path, value)| (path.clone(), ValueSource::Literal(value.clone())))
                    .collect();
                for (path, expr) in expressions("path_updater", computed)? {
                    all.push((path, ValueSource::Computed(expr)));
                }
                Box::new(JsonPathUpdater::new(all))
            }
            OperatorSpec::PathRemover { paths } => Box::new(JsonPathRemover::new(paths.clone())),
            OperatorSpec::StringOperator { operations } => {
                let parsed = operations
                    .iter()
                    .map(|(target, op)| {
                        let op: StringOperation = serde_json::from_value(op.clone()).map_err(|err| {
                            FlowError::Config(format!("string_operator '{}': {}", target, err))
                        })?;
                        Ok((target.clone(), op))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Box::new(JsonStringOperator::new(parsed))
            }
            OperatorSpec::ArrayOperator {
                field,
                operation,
                expression,
                key,
                reverse,
                start,
                end,
                output_field,
            } => {
                let expr = || -> Result<Expression> {
                    let source = expression.as_deref().ok_or_else(|| {
                        FlowError::Config(format!(
                            "array_operator on '{}' needs an expression for {:?}",
                            field, operation
                        ))
                    })?;
                    Expression::parse(source)
                };
                let op = match operation {
                    ArrayOpKind::Filter => ArrayOp::Filter(expr()?),
                    ArrayOpKind::Map => ArrayOp::Map(expr()?),
                    ArrayOpKind::Sort => ArrayOp::Sort {
                        key: key.clone(),
                        reverse: *reverse,
                    },
                    ArrayOpKind::Unique => ArrayOp::Unique,
                    ArrayOpKind::Slice => ArrayOp::Slice {
                        start: *start,
                        end: *end,
                    },
                };
                let mut array = JsonArrayOperator::new(field.clone(), op);
                if let Some(output) = output_field {
                    array = array.with_output_field(output.clone());
                }
                Box::new(array)
            }
            OperatorSpec::Merger {
                data,
                computed,
                deep,
            } => {
                let mut merger = JsonMerger::new(data.clone()).deep(*deep);
                for (key, expr) in expressions("merger", computed)? {
                    merger = merger.with_computed(key, expr);
                }
                Box::new(merger)
            }
            OperatorSpec::Expression { expressions: map } => {
                Box::new(JsonExpressionOperator::new(expressions("expression", map)?))
            }
            OperatorSpec::FieldMapper { mappings } => {
                let pairs = string_pairs("field_mapper", mappings)?;
                Box::new(JsonFieldMapper::parse(
                    pairs.iter().map(|(t, s)| (t.as_str(), s.as_str())),
                )?)
            }
            OperatorSpec::Template { templates } => {
                let pairs = string_pairs("template", templates)?;
                Box::new(JsonTemplateOperator::parse(
                    pairs.iter().map(|(t, s)| (t.as_str(), s.as_str())),
                )?)
            }
            OperatorSpec::StructureExtractor {
                extract_types,
                extract_nested,
                output_field,
                include_original,
            } => Box::new(JsonStructureExtractor {
                extract_types: *extract_types,
                extract_nested: *extract_nested,
                output_field: output_field.clone(),
                include_original: *include_original,
            }),
            OperatorSpec::Splitter {
                split_field,
                keep_original,
                output_key_map,
            } => Box::new(
                JsonSplitter::new(split_field.clone())
                    .keep_original(*keep_original)
                    .with_output_key_map(string_pairs("splitter", output_key_map)?),
            ),
            OperatorSpec::Aggregator {
                aggregate_field,
                strategy,
                condition,
            } => {
                let mut aggregator = JsonAggregator::new(*strategy);
                if let Some(field) = aggregate_field {
                    aggregator = aggregator.with_field(field.clone());
                }
                if let Some(condition) = condition {
                    aggregator = aggregator.with_condition(Expression::parse(condition)?);
                }
                Box::new(aggregator)
            }
            OperatorSpec::IdAdder { field, overwrite } => {
                Box::new(IdAdder::new(field.clone()).overwrite(*overwrite))
            }
            OperatorSpec::TimestampAdder {
                field,
                format,
                overwrite,
            } => Box::new(TimestampAdder::new(field.clone(), *format).overwrite(*overwrite)),
            OperatorSpec::ModelInvoker(spec) => {
                let invoker = match &spec.mock_responses {
                    Some(responses) => {
                        let mut backend = MockBackend::new(responses.clone());
                        if let Some(fallback) = &spec.mock_default {
                            backend = backend.with_fallback(fallback.clone());
                        }
                        ModelInvoker::new(Arc::new(backend), spec.options.clone(), config)
                    }
                    None => ModelInvoker::openai(
                        spec.options.clone(),
                        config,
                        spec.api_key.clone(),
                        spec.base_url.clone(),
                    )?,
                };
                Box::new(invoker)
            }
        };
        Ok(op)
    }
}

impl OperatorEntry {
    /// Instantiate the operator, applying the display name if any.
    pub fn build(&self, config: &FlowConfig) -> Result<Box<dyn Operator>> {
        let op = self.spec.build(config)?;
        Ok(match &self.name {
            Some(name) => Box::new(Named::new(name.clone(), op)),
            None => op,
        })
    }
}

/// A whole pipeline as data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSpec {
    /// Steps in order
    pub operators: Vec<OperatorEntry>,
    /// Fields restored after every step
    pub passthrough_fields: Vec<String>,
    /// Collection handling
    pub collection_mode: CollectionMode,
    /// Runtime configuration
    pub config: FlowConfig,
}

impl PipelineSpec {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| FlowError::Config(format!("invalid pipeline TOML: {}", err)))
    }

    /// Parse a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|err| FlowError::Config(format!("invalid pipeline JSON: {}", err)))
    }

    /// Load from a `.toml` or `.json` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&text),
            Some("json") => Self::from_json_str(&text),
            _ => Err(FlowError::Config(format!(
                "unsupported pipeline file '{}': expected .toml or .json",
                path.display()
            ))),
        }
    }

    /// Append a step.
    pub fn push(mut self, spec: OperatorSpec) -> Self {
        self.operators.push(spec.into());
        self
    }

    /// Build the pipeline.
    pub fn build(&self) -> Result<Pipeline> {
        let operators = self
            .operators
            .iter()
            .map(|entry| entry.build(&self.config))
            .collect::<Result<Vec<_>>>()?;
        Ok(Pipeline::new(operators)
            .with_config(self.config.clone())
            .with_passthrough_fields(self.passthrough_fields.clone())
            .with_collection_mode(self.collection_mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonflow_core::{record, Data};
    use serde_json::json;

    const TOML_PIPELINE: &str = r#"
passthrough_fields = ["id"]
collection_mode = "flatten"

[config]
io_logging = true

[[operators]]
type = "text_normalizer"
fields = ["text"]

[[operators]]
type = "filter"
name = "long enough"
condition = "len(text) > 3"

[[operators]]
type = "template"
templates = { label = "{text|upper}!" }
"#;

    #[test]
    fn toml_pipeline_builds_and_runs() {
        let spec = PipelineSpec::from_toml_str(TOML_PIPELINE).unwrap();
        assert_eq!(spec.operators.len(), 3);
        assert_eq!(spec.operators[1].name.as_deref(), Some("long enough"));
        assert!(spec.config.io_logging);
        let pipeline = spec.build().unwrap();
        assert_eq!(pipeline.len(), 3);
        assert_eq!(pipeline.operators()[1].name(), "long enough");

        let out = pipeline
            .process(Data::Record(record(json!({"id": 1, "text": "  Hello  World "}))))
            .unwrap();
        assert_eq!(
            out,
            Data::Record(record(json!({"id": 1, "text": "hello world", "label": "HELLO WORLD!"})))
        );
        let dropped = pipeline
            .process(Data::Record(record(json!({"id": 2, "text": "ab"}))))
            .unwrap();
        assert_eq!(dropped.record_count(), 0);
    }

    #[test]
    fn json_round_trip_preserves_spec() {
        let spec = PipelineSpec::default()
            .push(OperatorSpec::Splitter {
                split_field: "items".into(),
                keep_original: true,
                output_key_map: Map::new(),
            })
            .push(OperatorSpec::ModelInvoker(ModelSpec {
                options: ModelOptions::default(),
                api_key: None,
                base_url: None,
                mock_responses: Some(HashMap::from([("a".to_string(), "b".to_string())])),
                mock_default: None,
            }));
        let text = serde_json::to_string(&spec).unwrap();
        let back = PipelineSpec::from_json_str(&text).unwrap();
        assert_eq!(spec, back);
        assert_eq!(back.build().unwrap().len(), 2);
    }

    #[test]
    fn every_operator_kind_builds_from_json() {
        let spec = PipelineSpec::from_json_str(
            &json!({
                "operators": [
                    {"type": "field_selector", "fields": ["a"]},
                    {"type": "path_extractor", "paths": {"x": "a.b"}},
                    {"type": "path_updater", "updates": {"u": 1}, "computed": {"v": "u + 1"}},
                    {"type": "path_remover", "paths": ["u"]},
                    {"type": "string_operator", "operations": {"t": {"sources": ["x"], "op": "upper"}}},
                    {"type": "array_operator", "field": "xs", "operation": "sort", "reverse": true},
                    {"type": "merger", "data": {"k": 1}, "computed": {"n": "len(xs)"}},
                    {"type": "expression", "expressions": {"e": "1 + 1"}},
                    {"type": "field_mapper", "mappings": {"m": "a.b"}},
                    {"type": "structure_extractor"},
                    {"type": "aggregator", "strategy": "merge"},
                    {"type": "id_adder"},
                    {"type": "timestamp_adder", "format": "iso"}
                ]
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(spec.build().unwrap().len(), 13);
    }

    #[test]
    fn invalid_specs_are_config_errors() {
        let bad_expr = PipelineSpec::from_json_str(
            r#"{"operators": [{"type": "filter", "condition": "os.system('x')"}]}"#,
        )
        .unwrap();
        assert!(matches!(bad_expr.build(), Err(FlowError::Config(_))));

        let missing_expr = PipelineSpec::from_json_str(
            r#"{"operators": [{"type": "array_operator", "field": "xs", "operation": "map"}]}"#,
        )
        .unwrap();
        assert!(matches!(missing_expr.build(), Err(FlowError::Config(_))));

        assert!(PipelineSpec::from_json_str(r#"{"operators": [{"type": "nope"}]}"#).is_err());
        assert!(PipelineSpec::from_json_str(r#"{"collection_mode": "sideways"}"#).is_err());
    }
}
