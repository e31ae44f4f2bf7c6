//! Process pool executor
//!
//! Workers are child processes speaking the line protocol in
//! [`crate::worker`]. The pipeline crosses the process boundary as its
//! [`PipelineSpec`], so every worker builds its own operators (and its own
//! HTTP clients) after it starts.
//!
//! Each worker is fed by a writer thread and drained by a reader thread.
//! Inputs are claimed from a shared counter, and a worker only claims a new
//! input when one of its `IN_FLIGHT` request credits is free, which keeps
//! the load balanced and the pipes from filling up.

use super::{empty_slots, settle, settle_each, Executor, Slots, TRACING_TARGET};
use crate::worker::{WorkerReply, WorkerRequest};
use jsonflow_core::{Data, FlowError, Pipeline, Result};
use jsonflow_ops::PipelineSpec;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, sync_channel, Receiver, Sender, SyncSender};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Requests a worker may hold before it has to reply.
const IN_FLIGHT: usize = 2;

/// Subcommand that starts a worker when no explicit command is configured.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Runs inputs in a pool of worker processes.
#[derive(Debug)]
pub struct ProcessPoolExecutor {
    spec: PipelineSpec,
    spec_line: String,
    pipeline: Pipeline,
    workers: usize,
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessPoolExecutor {
    /// Build an executor for `spec` with `workers` processes, defaulting to
    /// the number of logical CPUs.
    ///
    /// The spec is built locally once so configuration errors surface here
    /// rather than inside the workers. Workers are started by re-running the
    /// current executable with the `worker` subcommand; see
    /// [`ProcessPoolExecutor::with_command`].
    pub fn new(spec: PipelineSpec, workers: Option<usize>) -> Result<Self> {
        let workers = match workers {
            Some(0) => {
                return Err(FlowError::Config("worker count must be greater than 0".into()))
            }
            Some(count) => count,
            None => thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        };
        let pipeline = spec.build()?;
        let spec_line = serde_json::to_string(&spec)?;
        let program = std::env::current_exe()?;

        Ok(Self {
            spec,
            spec_line,
            pipeline,
            workers,
            program,
            args: vec![OsString::from(WORKER_SUBCOMMAND)],
        })
    }

    /// Start workers with `program args..` instead of the current executable.
    pub fn with_command<I, S>(mut self, program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.program = program.into();
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Number of worker processes.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Spec shipped to every worker.
    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    fn spawn_worker(&self) -> Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                FlowError::Worker(format!(
                    "failed to start worker '{}': {}",
                    self.program.display(),
                    e
                ))
            })
    }

    fn run(&self, inputs: Vec<Data>, fail_fast: bool) -> Result<(Slots, Option<FlowError>)> {
        let started = Instant::now();
        let total = inputs.len();
        let mut slots = empty_slots(total);
        if total == 0 {
            return Ok((slots, None));
        }

        let requests = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| serde_json::to_string(&WorkerRequest { index, input }))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let worker_count = self.workers.min(total);
        info!(
            target: TRACING_TARGET,
            executor = self.kind(),
            inputs = total,
            workers = worker_count,
            "execute_all started"
        );

        let next = AtomicUsize::new(0);
        let cancelled = AtomicBool::new(false);
        let (result_tx, result_rx) = channel();

        let worker_errors: Vec<FlowError> = thread::scope(|scope| {
            let handles: Vec<_> = (0..worker_count)
                .map(|worker_idx| {
                    let shared = Shared {
                        requests: &requests,
                        next: &next,
                        cancelled: &cancelled,
                        fail_fast,
                    };
                    let result_tx = result_tx.clone();
                    let child = self.spawn_worker();
                    let spec_line = self.spec_line.as_str();
                    thread::Builder::new()
                        .name(format!("jsonflow-process-{}", worker_idx))
                        .spawn_scoped(scope, move || {
                            drive_worker(child?, spec_line, shared, result_tx)
                        })
                })
                .collect();

            handles
                .into_iter()
                .filter_map(|handle| match handle {
                    Ok(handle) => match handle.join() {
                        Ok(Ok(())) => None,
                        Ok(Err(err)) => Some(err),
                        Err(_) => Some(FlowError::Worker("worker thread panicked".into())),
                    },
                    Err(err) => Some(FlowError::Io(err)),
                })
                .collect()
        });
        drop(result_tx);

        for (index, result) in result_rx {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(result);
            }
        }

        for err in &worker_errors {
            warn!(target: TRACING_TARGET, error = %err, "worker failed");
        }
        info!(
            target: TRACING_TARGET,
            executor = self.kind(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "execute_all finished"
        );
        Ok((slots, worker_errors.into_iter().next()))
    }
}

/// State shared by every worker of one run.
#[derive(Clone, Copy)]
struct Shared<'a> {
    requests: &'a [String],
    next: &'a AtomicUsize,
    cancelled: &'a AtomicBool,
    fail_fast: bool,
}

impl Shared<'_> {
    fn claim(&self) -> Option<usize> {
        if self.fail_fast && self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::AcqRel);
        (index < self.requests.len()).then_some(index)
    }
}

type Reported = (usize, Result<Data>);

fn drive_worker(
    mut child: Child,
    spec_line: &str,
    shared: Shared<'_>,
    results: Sender<Reported>,
) -> Result<()> {
    let pid = child.id();
    let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
        (Some(stdin), Some(stdout)) => (stdin, stdout),
        _ => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(FlowError::Worker(format!("worker {} has no stdio pipes", pid)));
        }
    };
    debug!(target: TRACING_TARGET, pid, "worker started");

    let (credit_tx, credit_rx) = sync_channel::<()>(IN_FLIGHT);
    for _ in 0..IN_FLIGHT {
        let _ = credit_tx.send(());
    }

    let (replied, expected) = thread::scope(|scope| {
        let writer = scope.spawn(move || feed_worker(stdin, spec_line, shared, credit_rx));
        let replied = drain_worker(stdout, shared, &results, credit_tx);
        let expected = writer.join().unwrap_or(0);
        (replied, expected)
    });

    let status = child.wait()?;
    let replied = replied?;
    if !status.success() {
        return Err(FlowError::Worker(format!("worker {} exited with {}", pid, status)));
    }
    if replied < expected {
        return Err(FlowError::Worker(format!(
            "worker {} answered {} of {} requests",
            pid, replied, expected
        )));
    }
    debug!(target: TRACING_TARGET, pid, replied, "worker finished");
    Ok(())
}

/// Send the spec, then one request per credit. Returns the number of
/// requests written.
fn feed_worker(
    stdin: impl Write,
    spec_line: &str,
    shared: Shared<'_>,
    credits: Receiver<()>,
) -> usize {
    let mut stdin = BufWriter::new(stdin);
    if writeln!(stdin, "{}", spec_line).and_then(|_| stdin.flush()).is_err() {
        return 0;
    }

    let mut sent = 0;
    while credits.recv().is_ok() {
        let Some(index) = shared.claim() else {
            break;
        };
        let line = &shared.requests[index];
        if writeln!(stdin, "{}", line).and_then(|_| stdin.flush()).is_err() {
            // The input was claimed but never delivered; the reader reports the gap.
            sent += 1;
            break;
        }
        sent += 1;
    }
    // Dropping stdin closes the pipe and lets the worker exit.
    sent
}

/// Read replies until the worker closes stdout. Returns the number of replies.
fn drain_worker(
    stdout: impl std::io::Read,
    shared: Shared<'_>,
    results: &Sender<Reported>,
    credits: SyncSender<()>,
) -> Result<usize> {
    let mut replied = 0;
    for line in BufReader::new(stdout).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply: WorkerReply = serde_json::from_str(&line)
            .map_err(|e| FlowError::Worker(format!("invalid worker reply: {}", e)))?;
        let (index, result) = reply.into_result();
        if shared.fail_fast && result.is_err() {
            shared.cancelled.store(true, Ordering::Release);
        }
        let _ = results.send((index, result));
        replied += 1;
        // The writer may already be gone once every input is claimed.
        let _ = credits.send(());
    }
    Ok(replied)
}

impl Executor for ProcessPoolExecutor {
    fn kind(&self) -> &'static str {
        "process"
    }

    fn execute(&self, input: Data) -> Result<Data> {
        self.pipeline.process(input)
    }

    fn execute_all(&self, inputs: Vec<Data>) -> Result<Vec<Data>> {
        let (slots, worker_error) = self.run(inputs, true)?;
        settle(slots, worker_error.as_ref())
    }

    fn execute_all_settled(&self, inputs: Vec<Data>) -> Vec<Result<Data>> {
        let total = inputs.len();
        match self.run(inputs, false) {
            Ok((slots, worker_error)) => settle_each(slots, worker_error.as_ref()),
            Err(err) => {
                let message = err.to_string();
                (0..total)
                    .map(|index| Err(FlowError::Worker(message.clone()).at_index(index)))
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonflow_core::record;
    use jsonflow_ops::OperatorSpec;
    use serde_json::json;

    fn spec() -> PipelineSpec {
        PipelineSpec::default().push(OperatorSpec::IdAdder {
            field: "uid".into(),
            overwrite: false,
        })
    }

    #[test]
    fn local_execute_uses_built_pipeline() {
        let exec = ProcessPoolExecutor::new(spec(), Some(2)).unwrap();
        assert_eq!(exec.workers(), 2);
        let out = exec.execute(Data::Record(record(json!({"a": 1})))).unwrap();
        assert!(out.as_record().unwrap().contains_key("uid"));
    }

    #[test]
    fn missing_worker_binary_fails_every_input() {
        let exec = ProcessPoolExecutor::new(spec(), Some(2))
            .unwrap()
            .with_command("/nonexistent/jsonflow-worker", ["worker"]);
        let inputs = vec![Data::Record(record(json!({}))); 3];

        let err = exec.execute_all(inputs.clone()).unwrap_err();
        assert_eq!(err.index(), Some(0));
        assert!(err.to_string().contains("failed to start worker"));

        let settled = exec.execute_all_settled(inputs);
        assert_eq!(settled.len(), 3);
        assert!(settled.iter().all(|r| r.is_err()));
    }

    #[test]
    fn empty_input_spawns_nothing() {
        let exec = ProcessPoolExecutor::new(spec(), None)
            .unwrap()
            .with_command("/nonexistent/jsonflow-worker", Vec::<String>::new());
        assert!(exec.execute_all(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn zero_workers_is_a_config_error() {
        assert!(matches!(
            ProcessPoolExecutor::new(spec(), Some(0)),
            Err(FlowError::Config(_))
        ));
    }
}
