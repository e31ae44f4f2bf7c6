//! JSONFlow Operators - Built-in record transformations
//!
//! This crate provides the operators JSONFlow pipelines are assembled from:
//!
//! - Text normalization and filtering
//! - Field selection, path extraction, updates and removal
//! - String, array, template and expression based field computation
//! - Collection operators (split one record into many, aggregate many into one)
//! - System fields (ids, timestamps) and chat model invocation
//! - Serializable pipeline specs for config files and worker processes

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod array_ops;
pub mod collection;
pub mod expr;
pub mod fields;
pub mod filter;
pub mod mapping;
pub mod model;
pub mod spec;
pub mod string_ops;
pub mod structure;
pub mod system;
pub mod template;
pub mod text;

// Re-export commonly used types
pub use array_ops::{ArrayOp, JsonArrayOperator};
pub use collection::{AggregateStrategy, JsonAggregator, JsonSplitter};
pub use expr::{EvalError, Expression};
pub use fields::{
    JsonFieldSelector, JsonMerger, JsonPathExtractor, JsonPathRemover, JsonPathUpdater,
    SelectOptions, ValueSource,
};
pub use filter::JsonFilter;
pub use mapping::{JsonExpressionOperator, JsonFieldMapper, MappingSource};
pub use model::{ChatBackend, MockBackend, ModelInvoker, ModelOptions, OpenAiBackend};
pub use spec::{ModelSpec, OperatorEntry, OperatorSpec, PipelineSpec};
pub use string_ops::{JsonStringOperator, StringOp, StringOperation};
pub use structure::{extract_structure, JsonStructureExtractor};
pub use system::{IdAdder, TimestampAdder, TimestampFormat};
pub use template::{JsonTemplateOperator, Template};
pub use text::{CaseMode, NormalizeOptions, TextNormalizer};
