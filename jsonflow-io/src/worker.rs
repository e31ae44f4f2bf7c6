//! Worker process protocol
//!
//! A worker reads JSON lines from its input and answers on its output:
//!
//! - line 1: the [`PipelineSpec`] as JSON
//! - every following line: `{"index": i, "input": <record or collection>}`
//! - every reply: `{"index": i, "output": ...}` or `{"index": i, "error": "..."}`
//!
//! Replies are flushed one by one, in request order. The worker exits when
//! its input closes.

use jsonflow_core::{Data, FlowError, Result};
use jsonflow_ops::PipelineSpec;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use tracing::{debug, info};

/// Tracing target for worker events.
pub const TRACING_TARGET: &str = "jsonflow_io::worker";

/// One unit of work sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Position of the input in the submitted sequence
    pub index: usize,
    /// Value to run through the pipeline
    pub input: Data,
}

/// A worker's answer to one [`WorkerRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    /// Index of the request being answered
    pub index: usize,
    /// Pipeline output on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Data>,
    /// Error message on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerReply {
    /// Reply carrying the outcome of processing request `index`.
    pub fn new(index: usize, outcome: Result<Data>) -> Self {
        match outcome {
            Ok(output) => Self {
                index,
                output: Some(output),
                error: None,
            },
            Err(err) => Self {
                index,
                output: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Split into the request index and its outcome.
    pub fn into_result(self) -> (usize, Result<Data>) {
        let result = match (self.output, self.error) {
            (_, Some(message)) => Err(FlowError::Worker(message)),
            (Some(output), None) => Ok(output),
            (None, None) => Err(FlowError::Worker("reply has neither output nor error".into())),
        };
        (self.index, result)
    }
}

/// Serve the worker protocol until `reader` is exhausted.
///
/// Returns the number of requests answered. Pipeline failures are reported
/// in replies; protocol violations and I/O failures end the session.
pub fn serve<R: BufRead, W: Write>(reader: R, mut writer: W) -> Result<u64> {
    let mut lines = reader.lines();
    let header = match lines.next() {
        Some(line) => line?,
        None => return Ok(0),
    };
    let spec = PipelineSpec::from_json_str(&header)?;
    let pipeline = spec.build()?;
    info!(target: TRACING_TARGET, operators = pipeline.len(), "worker ready");

    let mut answered = 0u64;
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: WorkerRequest = serde_json::from_str(&line)
            .map_err(|e| FlowError::Worker(format!("invalid request: {}", e)))?;
        let index = request.index;
        let reply = WorkerReply::new(index, pipeline.process(request.input));
        if let Some(message) = &reply.error {
            debug!(target: TRACING_TARGET, index, error = %message, "request failed");
        }

        serde_json::to_writer(&mut writer, &reply)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        answered += 1;
    }
    Ok(answered)
}
