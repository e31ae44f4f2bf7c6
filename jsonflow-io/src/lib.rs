//! JSONFlow I/O - JSON Lines streams and pipeline execution
//!
//! This crate connects pipelines to the outside world:
//!
//! - `JsonLoader` / `JsonSaver` for JSON Lines files and stdio
//! - Line validation and simple repair (`check_lines`)
//! - Executors that run a pipeline over many inputs while preserving order
//!   (synchronous, thread pool, process pool and, with the `async` feature,
//!   tokio based)
//! - The line protocol spoken by worker processes

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod check;
pub mod executor;
pub mod loader;
pub mod saver;
pub mod worker;

// Re-export commonly used types
#[cfg(feature = "async")]
pub use executor::AsyncExecutor;
pub use executor::{Executor, ProcessPoolExecutor, SyncExecutor, ThreadPoolExecutor};
pub use check::{check_lines, repair_line, CheckOptions, CheckReport};
pub use jsonflow_core::{Data, FlowError, Record, Result};
pub use loader::{Batches, Chunks, DataIter, JsonLoader};
pub use saver::{JsonSaver, SaveMode};
pub use worker::{serve, WorkerReply, WorkerRequest};
