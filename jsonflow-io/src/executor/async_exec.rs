//! Tokio based executor
//!
//! Inputs become tasks on a [`JoinSet`], with at most `concurrency` running
//! at once. Operators are blocking, so each pipeline call runs on tokio's
//! blocking pool and the task suspends while it waits. Results are placed by
//! input index as in the other executors.

use super::{empty_slots, settle, settle_each, Slots, TRACING_TARGET};
use jsonflow_core::{Data, FlowError, Pipeline, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::info;

/// Runs inputs as cooperative tasks on the current tokio runtime.
#[derive(Debug, Clone)]
pub struct AsyncExecutor {
    pipeline: Arc<Pipeline>,
    concurrency: usize,
}

impl AsyncExecutor {
    /// Allow up to `concurrency` inputs in flight.
    pub fn new(pipeline: Pipeline, concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            return Err(FlowError::Config("concurrency must be greater than 0".into()));
        }
        Ok(Self {
            pipeline: Arc::new(pipeline),
            concurrency,
        })
    }

    /// Maximum number of inputs in flight.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run the pipeline on one input.
    pub async fn execute(&self, input: Data) -> Result<Data> {
        let pipeline = Arc::clone(&self.pipeline);
        task::spawn_blocking(move || pipeline.process(input))
            .await
            .map_err(|e| FlowError::Worker(format!("task failed: {}", e)))?
    }

    /// Run the pipeline on every input; fails with the lowest failing index.
    pub async fn execute_all(&self, inputs: Vec<Data>) -> Result<Vec<Data>> {
        settle(self.run(inputs, true).await, None)
    }

    /// Run the pipeline on every input and report each outcome.
    pub async fn execute_all_settled(&self, inputs: Vec<Data>) -> Vec<Result<Data>> {
        settle_each(self.run(inputs, false).await, None)
    }

    async fn run(&self, inputs: Vec<Data>, fail_fast: bool) -> Slots {
        let started = Instant::now();
        let total = inputs.len();
        info!(
            target: TRACING_TARGET,
            executor = "async",
            inputs = total,
            concurrency = self.concurrency,
            "execute_all started"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();

        for (index, input) in inputs.into_iter().enumerate() {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            if fail_fast && cancelled.load(Ordering::Acquire) {
                break;
            }
            let pipeline = Arc::clone(&self.pipeline);
            let cancelled = Arc::clone(&cancelled);
            tasks.spawn(async move {
                let _permit = permit;
                let result = match task::spawn_blocking(move || pipeline.process(input)).await {
                    Ok(result) => result,
                    Err(e) => Err(FlowError::Worker(format!("task failed: {}", e))),
                };
                if result.is_err() {
                    cancelled.store(true, Ordering::Release);
                }
                (index, result)
            });
        }

        let mut slots = empty_slots(total);
        while let Some(joined) = tasks.join_next().await {
            if let Ok((index, result)) = joined {
                slots[index] = Some(result);
            }
        }

        info!(
            target: TRACING_TARGET,
            executor = "async",
            elapsed_ms = started.elapsed().as_millis() as u64,
            "execute_all finished"
        );
        slots
    }
}
