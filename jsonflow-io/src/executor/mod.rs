//! Executors - running a pipeline over many inputs
//!
//! Every executor guarantees that `execute_all(inputs)[i]` is the result of
//! the pipeline applied to `inputs[i]`. Results are placed by input index,
//! never by completion order.
//!
//! Failure policy is structured cancellation: after the first failure no new
//! input is started, inputs already running finish, and `execute_all`
//! reports the lowest failing index as [`FlowError::Execution`].
//! `execute_all_settled` runs everything and returns one result per input.

#[cfg(feature = "async")]
mod async_exec;
mod process_pool;
mod sync;
mod thread_pool;

#[cfg(feature = "async")]
pub use async_exec::AsyncExecutor;
pub use process_pool::ProcessPoolExecutor;
pub use sync::SyncExecutor;
pub use thread_pool::ThreadPoolExecutor;

use jsonflow_core::{Data, FlowError, Result};

/// Tracing target for executor events.
pub const TRACING_TARGET: &str = "jsonflow_io::executor";

/// Order-preserving execution strategy for a pipeline.
pub trait Executor: Send + Sync {
    /// Short name of the strategy, used in logs.
    fn kind(&self) -> &'static str;

    /// Run the pipeline on one input.
    fn execute(&self, input: Data) -> Result<Data>;

    /// Run the pipeline on every input; fails with the lowest failing index.
    fn execute_all(&self, inputs: Vec<Data>) -> Result<Vec<Data>>;

    /// Run the pipeline on every input and report each outcome.
    fn execute_all_settled(&self, inputs: Vec<Data>) -> Vec<Result<Data>>;
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    fn execute(&self, input: Data) -> Result<Data> {
        (**self).execute(input)
    }

    fn execute_all(&self, inputs: Vec<Data>) -> Result<Vec<Data>> {
        (**self).execute_all(inputs)
    }

    fn execute_all_settled(&self, inputs: Vec<Data>) -> Vec<Result<Data>> {
        (**self).execute_all_settled(inputs)
    }
}

/// One slot per input; `None` until that input reports.
pub(crate) type Slots = Vec<Option<Result<Data>>>;

pub(crate) fn empty_slots(len: usize) -> Slots {
    (0..len).map(|_| None).collect()
}

/// Collapse slots into ordered outputs or the lowest-index failure.
///
/// Unfilled slots are only acceptable when a failure explains them.
pub(crate) fn settle(slots: Slots, worker_error: Option<&FlowError>) -> Result<Vec<Data>> {
    let mut outputs = Vec::with_capacity(slots.len());
    let mut first_missing = None;

    for (index, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(Ok(data)) => outputs.push(data),
            Some(Err(err)) => return Err(err.at_index(index)),
            None => {
                first_missing.get_or_insert(index);
            }
        }
    }

    match first_missing {
        None => Ok(outputs),
        Some(index) => Err(missing(index, worker_error)),
    }
}

/// One result per slot, reporting unfilled slots as worker failures.
pub(crate) fn settle_each(slots: Slots, worker_error: Option<&FlowError>) -> Vec<Result<Data>> {
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| match slot {
            Some(result) => result.map_err(|err| err.at_index(index)),
            None => Err(missing(index, worker_error)),
        })
        .collect()
}

fn missing(index: usize, worker_error: Option<&FlowError>) -> FlowError {
    let message = match worker_error {
        Some(err) => err.to_string(),
        None => "input was never processed".to_string(),
    };
    FlowError::Worker(message).at_index(index)
}

#[cfg(test)]
pub(crate) mod test_support {
    use jsonflow_core::{record, Data, FlowError, FnOperator, Pipeline, Record};
    use serde_json::{json, Value};
    use std::thread;
    use std::time::Duration;

    /// Pipeline that doubles `n`, sleeping longer for smaller values so that
    /// completion order is the reverse of submission order. Fails on `n == fail_on`.
    pub fn slow_doubler(fail_on: Option<i64>) -> Pipeline {
        let mut pipeline = Pipeline::new(Vec::new()).with_passthrough_fields(["tag"]);
        pipeline.add(FnOperator::new("slow_double", move |mut rec: Record| {
            let n = rec.get("n").and_then(Value::as_i64).unwrap_or(0);
            thread::sleep(Duration::from_millis(((20 - n.min(20)) * 2) as u64));
            if Some(n) == fail_on {
                return Err(FlowError::operator("slow_double", format!("refusing {}", n)));
            }
            rec.insert("n".into(), json!(n * 2));
            rec.insert("tag".into(), json!("overwritten"));
            Ok(Data::Record(rec))
        }));
        pipeline
    }

    pub fn inputs(count: i64) -> Vec<Data> {
        (0..count)
            .map(|n| Data::Record(record(json!({"n": n, "tag": format!("t{}", n)}))))
            .collect()
    }

    pub fn values(outputs: &[Data]) -> Vec<i64> {
        outputs
            .iter()
            .map(|data| data.as_record().unwrap()["n"].as_i64().unwrap())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonflow_core::record;
    use serde_json::json;

    fn ok(n: i64) -> Option<Result<Data>> {
        Some(Ok(Data::Record(record(json!({"n": n})))))
    }

    #[test]
    fn settle_prefers_lowest_failure() {
        let slots = vec![
            ok(0),
            None,
            Some(Err(FlowError::operator("op", "first"))),
            Some(Err(FlowError::operator("op", "second"))),
        ];
        let err = settle(slots, None).unwrap_err();
        assert_eq!(err.index(), Some(2));
        assert!(err.to_string().contains("first"));
    }

    #[test]
    fn settle_reports_unexplained_gaps() {
        let err = settle(vec![ok(0), None], None).unwrap_err();
        assert_eq!(err.index(), Some(1));
        assert!(matches!(err, FlowError::Execution { ref source, .. } if matches!(**source, FlowError::Worker(_))));
    }

    #[test]
    fn settle_each_keeps_positions() {
        let results = settle_each(
            vec![ok(0), Some(Err(FlowError::Config("bad".into()))), None],
            Some(&FlowError::Worker("worker 7 exited".into())),
        );
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap_err().index(), Some(1));
        let missing = results[2].as_ref().unwrap_err();
        assert_eq!(missing.index(), Some(2));
        assert!(missing.to_string().contains("worker 7 exited"));
    }
}
