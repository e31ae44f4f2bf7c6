//! Thread pool executor
//!
//! One task per pool thread is spawned into a rayon scope. Tasks claim inputs
//! from a shared counter, so inputs start in index order: once an input has
//! been claimed every lower index has been claimed too, and a failure can
//! only stop inputs above it. Each task reports `(index, result)` over a
//! channel and the coordinator places the result in a pre-sized slot vector,
//! so completion order never affects output order.

use super::{empty_slots, settle, settle_each, Executor, Slots, TRACING_TARGET};
use jsonflow_core::{Data, FlowError, Pipeline, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};

/// Runs inputs concurrently on a fixed-size pool of threads.
///
/// Operators are shared between threads, so any state they hold must be
/// synchronised internally.
pub struct ThreadPoolExecutor {
    pipeline: Arc<Pipeline>,
    pool: ThreadPool,
}

impl fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("pipeline", &self.pipeline)
            .field("workers", &self.workers())
            .finish()
    }
}

impl ThreadPoolExecutor {
    /// Build a pool with `workers` threads, or rayon's default (one per
    /// logical CPU) when `None`.
    pub fn new(pipeline: Pipeline, workers: Option<usize>) -> Result<Self> {
        let mut builder =
            ThreadPoolBuilder::new().thread_name(|idx| format!("jsonflow-worker-{}", idx));
        if let Some(count) = workers {
            if count == 0 {
                return Err(FlowError::Config("worker count must be greater than 0".into()));
            }
            builder = builder.num_threads(count);
        }
        let pool = builder
            .build()
            .map_err(|e| FlowError::Config(format!("Failed to create thread pool: {}", e)))?;

        Ok(Self {
            pipeline: Arc::new(pipeline),
            pool,
        })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Pipeline being executed.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn run(&self, inputs: Vec<Data>, fail_fast: bool) -> Slots {
        let started = Instant::now();
        let total = inputs.len();
        info!(
            target: TRACING_TARGET,
            executor = self.kind(),
            inputs = total,
            workers = self.workers(),
            "execute_all started"
        );

        let queue = InputQueue::new(inputs, fail_fast);
        let (result_tx, result_rx) = channel();
        let pipeline = self.pipeline.as_ref();
        let task_count = self.workers().min(total);

        self.pool.scope(|scope| {
            for _ in 0..task_count {
                let tx = result_tx.clone();
                let queue = &queue;
                scope.spawn(move |_| {
                    while let Some((index, input)) = queue.claim() {
                        let result = pipeline.process(input);
                        if result.is_err() {
                            queue.cancel();
                        }
                        // The receiver outlives the scope.
                        let _ = tx.send((index, result));
                    }
                });
            }
        });
        drop(result_tx);
        if queue.is_cancelled() {
            debug!(
                target: TRACING_TARGET,
                claimed = queue.claimed(),
                inputs = total,
                "stopped after failure"
            );
        }

        let mut slots = empty_slots(total);
        for (index, result) in result_rx {
            slots[index] = Some(result);
        }

        info!(
            target: TRACING_TARGET,
            executor = self.kind(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "execute_all finished"
        );
        slots
    }
}

/// Inputs handed out in index order.
struct InputQueue {
    inputs: Vec<Mutex<Option<Data>>>,
    next: AtomicUsize,
    cancelled: AtomicBool,
    fail_fast: bool,
}

impl InputQueue {
    fn new(inputs: Vec<Data>, fail_fast: bool) -> Self {
        Self {
            inputs: inputs.into_iter().map(|input| Mutex::new(Some(input))).collect(),
            next: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            fail_fast,
        }
    }

    /// Next unclaimed input, or `None` when exhausted or cancelled.
    ///
    /// The cancellation check precedes the claim, so a claimed input always runs.
    fn claim(&self) -> Option<(usize, Data)> {
        loop {
            if self.is_cancelled() {
                return None;
            }
            let index = self.next.fetch_add(1, Ordering::AcqRel);
            let slot = self.inputs.get(index)?;
            let input = slot.lock().ok().and_then(|mut input| input.take());
            if let Some(input) = input {
                return Some((index, input));
            }
        }
    }

    fn cancel(&self) {
        if self.fail_fast {
            self.cancelled.store(true, Ordering::Release);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn claimed(&self) -> usize {
        self.next.load(Ordering::Acquire).min(self.inputs.len())
    }
}

impl Executor for ThreadPoolExecutor {
    fn kind(&self) -> &'static str {
        "thread"
    }

    fn execute(&self, input: Data) -> Result<Data> {
        self.pipeline.process(input)
    }

    fn execute_all(&self, inputs: Vec<Data>) -> Result<Vec<Data>> {
        settle(self.run(inputs, true), None)
    }

    fn execute_all_settled(&self, inputs: Vec<Data>) -> Vec<Result<Data>> {
        settle_each(self.run(inputs, false), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::{inputs, slow_doubler, values};
    use jsonflow_core::{record, FnOperator, Record};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn order_survives_reversed_completion() {
        let exec = ThreadPoolExecutor::new(slow_doubler(None), Some(4)).unwrap();
        assert_eq!(exec.workers(), 4);
        let out = exec.execute_all(inputs(20)).unwrap();
        assert_eq!(values(&out), (0..20).map(|n| n * 2).collect::<Vec<_>>());
        for (n, data) in out.iter().enumerate() {
            assert_eq!(data.as_record().unwrap()["tag"], json!(format!("t{}", n)));
        }
    }

    #[test]
    fn failure_reports_index() {
        let exec = ThreadPoolExecutor::new(slow_doubler(Some(7)), Some(3)).unwrap();
        let err = exec.execute_all(inputs(12)).unwrap_err();
        assert_eq!(err.index(), Some(7));
        assert!(err.to_string().contains("refusing 7"));
    }

    fn fails_on(bad: &'static [i64], slow: i64) -> Pipeline {
        let mut pipeline = Pipeline::new(Vec::new());
        pipeline.add(FnOperator::new("picky", move |rec: Record| {
            let n = rec.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            if n == slow {
                std::thread::sleep(std::time::Duration::from_millis(40));
            }
            if bad.contains(&n) {
                return Err(FlowError::operator("picky", format!("refusing {}", n)));
            }
            Ok(Data::Record(rec))
        }));
        pipeline
    }

    #[test]
    fn lowest_failing_index_wins_with_one_worker() {
        let sync = crate::SyncExecutor::new(fails_on(&[2, 7], -1))
            .execute_all(inputs(10))
            .unwrap_err();
        let exec = ThreadPoolExecutor::new(fails_on(&[2, 7], -1), Some(1)).unwrap();
        let err = exec.execute_all(inputs(10)).unwrap_err();
        assert_eq!(sync.index(), Some(2));
        assert_eq!(err.index(), Some(2));
        assert!(err.to_string().contains("refusing 2"));
    }

    #[test]
    fn slow_low_failure_beats_fast_high_failure() {
        let exec = ThreadPoolExecutor::new(fails_on(&[2, 7], 2), Some(4)).unwrap();
        for _ in 0..5 {
            let err = exec.execute_all(inputs(10)).unwrap_err();
            assert_eq!(err.index(), Some(2));
        }
    }

    #[test]
    fn settled_keeps_every_other_result() {
        let exec = ThreadPoolExecutor::new(slow_doubler(Some(3)), Some(3)).unwrap();
        let results = exec.execute_all_settled(inputs(8));
        assert_eq!(results.len(), 8);
        for (n, result) in results.iter().enumerate() {
            if n == 3 {
                assert_eq!(result.as_ref().unwrap_err().index(), Some(3));
            } else {
                let data = result.as_ref().unwrap();
                assert_eq!(data.as_record().unwrap()["n"], json!(n as i64 * 2));
            }
        }
    }

    #[test]
    fn failure_stops_new_work() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut pipeline = Pipeline::new(Vec::new());
        pipeline.add(FnOperator::new("count", move |rec: Record| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<Data, _>(FlowError::operator("count", format!("{:?}", rec.get("n"))))
        }));

        let exec = ThreadPoolExecutor::new(pipeline, Some(1)).unwrap();
        assert!(exec.execute_all(inputs(50)).is_err());
        assert!(calls.load(Ordering::SeqCst) < 50);
    }

    #[test]
    fn zero_workers_is_a_config_error() {
        let err = ThreadPoolExecutor::new(Pipeline::default(), Some(0)).unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }

    #[test]
    fn execute_and_empty_input() {
        let exec = ThreadPoolExecutor::new(Pipeline::default(), None).unwrap();
        assert!(exec.execute_all(Vec::new()).unwrap().is_empty());
        let out = exec.execute(Data::Record(record(json!({"a": 1})))).unwrap();
        assert_eq!(out.as_record().unwrap()["a"], 1);
    }
}
