//! Process pool executor against real `jsonflow worker` processes

use jsonflow_core::{record, Data, FlowError};
use jsonflow_io::{Executor, ProcessPoolExecutor};
use jsonflow_ops::PipelineSpec;
use serde_json::json;

const WORKER_BIN: &str = env!("CARGO_BIN_EXE_jsonflow");

fn spec() -> PipelineSpec {
    PipelineSpec::from_toml_str(
        r#"
passthrough_fields = ["id"]
collection_mode = "flatten"

[[operators]]
type = "expression"
expressions = { ratio = "100 / n", id = "'replaced'" }

[[operators]]
type = "splitter"
split_field = "parts"
"#,
    )
    .unwrap()
}

fn executor(workers: usize) -> ProcessPoolExecutor {
    ProcessPoolExecutor::new(spec(), Some(workers))
        .unwrap()
        .with_command(WORKER_BIN, ["worker"])
}

fn inputs(values: &[i64]) -> Vec<Data> {
    values
        .iter()
        .enumerate()
        .map(|(i, n)| Data::Record(record(json!({"id": i, "n": n, "parts": [1, 2]}))))
        .collect()
}

#[test]
fn results_follow_input_order_across_workers() {
    let values: Vec<i64> = (1..=30).collect();
    let outputs = executor(3).execute_all(inputs(&values)).unwrap();
    assert_eq!(outputs.len(), 30);

    for (i, data) in outputs.iter().enumerate() {
        let parts = data.as_collection().expect("split output");
        assert_eq!(parts.len(), 2);
        for part in parts {
            assert_eq!(part["id"], json!(i));
            assert!(part["ratio"].is_number());
        }
        assert_eq!(parts[0]["parts"], json!(1));
        assert_eq!(parts[1]["parts"], json!(2));
    }
    assert_eq!(outputs[0].as_collection().unwrap()[0]["ratio"], json!(100));
    assert_eq!(outputs[3].as_collection().unwrap()[0]["ratio"], json!(25));
}

#[test]
fn matches_local_execution() {
    let exec = executor(2);
    let remote = exec.execute_all(inputs(&[4, 5, 10])).unwrap();
    let local: Vec<Data> = inputs(&[4, 5, 10])
        .into_iter()
        .map(|input| exec.execute(input).unwrap())
        .collect();
    assert_eq!(remote, local);
}

#[test]
fn failure_carries_the_input_index() {
    let err = executor(2).execute_all(inputs(&[1, 2, 0, 4])).unwrap_err();
    assert_eq!(err.index(), Some(2));

    let settled = executor(2).execute_all_settled(inputs(&[1, 0, 4, 0, 5]));
    let failed: Vec<usize> = settled
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_err())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(failed, vec![1, 3]);
    assert!(settled[4].is_ok());
}

#[test]
fn crashed_worker_is_reported() {
    let exec = ProcessPoolExecutor::new(spec(), Some(1))
        .unwrap()
        .with_command(WORKER_BIN, ["check", "/nonexistent/input.jsonl"]);
    let err = exec.execute_all(inputs(&[1, 2])).unwrap_err();
    assert_eq!(err.index(), Some(0));
    match err {
        FlowError::Execution { source, .. } => {
            assert!(matches!(*source, FlowError::Worker(ref msg) if msg.contains("exited")));
        }
        other => panic!("unexpected error: {other}"),
    }
}
