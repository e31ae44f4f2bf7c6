//! Synchronous executor

use super::{Executor, TRACING_TARGET};
use jsonflow_core::{Data, Pipeline, Result};
use std::sync::Arc;
use tracing::info;

/// Runs inputs one after another on the calling thread.
#[derive(Debug, Clone)]
pub struct SyncExecutor {
    pipeline: Arc<Pipeline>,
}

impl SyncExecutor {
    /// Wrap `pipeline`.
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    /// Pipeline being executed.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

impl Executor for SyncExecutor {
    fn kind(&self) -> &'static str {
        "sync"
    }

    fn execute(&self, input: Data) -> Result<Data> {
        self.pipeline.process(input)
    }

    fn execute_all(&self, inputs: Vec<Data>) -> Result<Vec<Data>> {
        info!(target: TRACING_TARGET, executor = self.kind(), inputs = inputs.len(), "execute_all");
        inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| self.pipeline.process(input).map_err(|err| err.at_index(index)))
            .collect()
    }

    fn execute_all_settled(&self, inputs: Vec<Data>) -> Vec<Result<Data>> {
        inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| self.pipeline.process(input).map_err(|err| err.at_index(index)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::{inputs, slow_doubler, values};

    #[test]
    fn runs_in_order_with_passthrough() {
        let exec = SyncExecutor::new(slow_doubler(None));
        let out = exec.execute_all(inputs(5)).unwrap();
        assert_eq!(values(&out), vec![0, 2, 4, 6, 8]);
        assert_eq!(out[3].as_record().unwrap()["tag"], "t3");
    }

    #[test]
    fn stops_at_first_failure() {
        let exec = SyncExecutor::new(slow_doubler(Some(2)));
        let err = exec.execute_all(inputs(5)).unwrap_err();
        assert_eq!(err.index(), Some(2));

        let settled = exec.execute_all_settled(inputs(5));
        assert_eq!(settled.iter().filter(|r| r.is_err()).count(), 1);
        assert!(settled[4].is_ok());
    }
}
