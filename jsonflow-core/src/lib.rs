//! JSONFlow Core - Record model and pipeline execution
//!
//! This crate provides the pieces every JSONFlow component builds on, with no
//! I/O dependencies:
//!
//! - `Record` / `Data` (single record or ordered collection)
//! - The `Operator` contract and its default batch expansion
//! - `Pipeline` with passthrough fields and collection modes
//! - Dotted path helpers shared by operators
//! - Runtime configuration and error types

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod data;
pub mod error;
pub mod operator;
pub mod path;
pub mod pipeline;

// Re-export commonly used types
pub use config::FlowConfig;
pub use data::{record, value_kind, Data, Record};
pub use error::{FlowError, Result};
pub use operator::{expand_each, FnOperator, Named, Operator};
pub use pipeline::{CollectionMode, Pipeline};
