//! JSONFlow CLI - Command-line tool for JSON Lines pipelines
//!
//! This binary provides command-line interfaces for:
//! - normalize: clean up text fields
//! - filter: keep records matching an expression
//! - model: send a prompt field to a chat model
//! - run: execute a pipeline file with a chosen executor
//! - analyze: report key paths and value types
//! - check: validate and optionally repair JSON Lines input
//!
//! Input `-` reads stdin and output `-` writes stdout. Logs go to stderr.

mod logging;

use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use jsonflow_core::{Data, FlowConfig, FlowError, Pipeline};
use jsonflow_io::{
    check_lines, serve, CheckOptions, CheckReport, Executor, JsonLoader, JsonSaver,
    ProcessPoolExecutor, SaveMode, SyncExecutor, ThreadPoolExecutor,
};
use jsonflow_ops::{
    extract_structure, CaseMode, JsonFilter, JsonStructureExtractor, ModelInvoker, ModelOptions,
    NormalizeOptions, PipelineSpec, TextNormalizer,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_BATCH_SIZE: usize = 1000;

#[cfg(feature = "async")]
const DEFAULT_ASYNC_CONCURRENCY: usize = 16;

#[derive(Parser)]
#[command(name = "jsonflow")]
#[command(about = "Operator pipelines over JSON Lines")]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
    /// Log every operator's input and output
    #[arg(long, global = true)]
    log_io: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize text fields
    ///
    /// Examples:
    ///   jsonflow normalize in.jsonl out.jsonl
    ///   jsonflow normalize in.jsonl - --fields title body --lower
    Normalize {
        /// Input JSONL file ("-" for stdin)
        input: String,
        /// Output JSONL file ("-" for stdout)
        output: String,
        /// Fields to normalize (default: every top-level string field)
        #[arg(long, num_args = 1..)]
        fields: Vec<String>,
        /// Convert to lower case
        #[arg(long, conflicts_with = "upper")]
        lower: bool,
        /// Convert to upper case
        #[arg(long)]
        upper: bool,
    },
    /// Keep records matching a condition
    ///
    /// Examples:
    ///   jsonflow filter in.jsonl out.jsonl --condition 'score >= 0.5 and lang == "en"'
    Filter {
        /// Input JSONL file ("-" for stdin)
        input: String,
        /// Output JSONL file ("-" for stdout)
        output: String,
        /// Expression evaluated against each record
        #[arg(long)]
        condition: String,
    },
    /// Send each record's prompt to a chat model
    Model {
        /// Input JSONL file ("-" for stdin)
        input: String,
        /// Output JSONL file ("-" for stdout)
        output: String,
        /// Model name (default from configuration)
        #[arg(long)]
        model: Option<String>,
        /// Field holding the prompt
        #[arg(long, default_value = "prompt")]
        prompt_field: String,
        /// Field receiving the reply
        #[arg(long, default_value = "response")]
        response_field: String,
        /// System prompt sent before every user prompt
        #[arg(long)]
        system_prompt: Option<String>,
        /// Sampling temperature
        #[arg(long, default_value_t = 0.7)]
        temperature: f64,
        /// API key (default: read from OPENAI_API_KEY)
        #[arg(long)]
        api_key: Option<String>,
        /// Base URL of an OpenAI-compatible endpoint
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Run a pipeline file
    ///
    /// Examples:
    ///   jsonflow run in.jsonl out.jsonl --config pipeline.toml
    ///   jsonflow run in.jsonl out.jsonl -c pipeline.json --executor process --workers 4
    Run {
        /// Input JSONL file ("-" for stdin)
        input: String,
        /// Output JSONL file ("-" for stdout)
        output: String,
        /// Pipeline file (.toml or .json)
        #[arg(long, short = 'c')]
        config: PathBuf,
        /// Execution strategy
        #[arg(long, value_enum, default_value_t = ExecutorChoice::Sync)]
        executor: ExecutorChoice,
        /// Worker threads or processes (default: one per CPU)
        #[arg(long)]
        workers: Option<usize>,
        /// Lines handed to the executor at a time; an array line stays one collection
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// Append to the output file instead of replacing it
        #[arg(long)]
        append: bool,
        /// Log and drop records whose processing fails instead of stopping
        #[arg(long)]
        skip_errors: bool,
        /// Show progress spinner while processing
        #[arg(long)]
        progress: bool,
    },
    /// Report key paths and value types
    Analyze {
        /// Input JSONL file ("-" for stdin)
        input: String,
        /// Analysis method
        #[arg(long, value_enum, default_value_t = AnalyzeMethod::Pipeline)]
        method: AnalyzeMethod,
        /// Output format
        #[arg(long, value_enum, default_value_t = AnalyzeFormat::Table)]
        format: AnalyzeFormat,
    },
    /// Validate JSON Lines input, optionally repairing simple mistakes
    ///
    /// Exits with status 1 when invalid lines remain.
    Check {
        /// Input JSONL file ("-" for stdin)
        input: String,
        /// Where to write usable lines ("-" for stdout)
        #[arg(short, long)]
        output: Option<String>,
        /// Write only usable lines (to stdout unless --output is given)
        #[arg(short = 'r', long, conflicts_with = "count_only")]
        remove_invalid: bool,
        /// Attempt to repair invalid lines
        #[arg(short = 'f', long)]
        fix_errors: bool,
        /// Only print the counts
        #[arg(short = 'c', long)]
        count_only: bool,
    },
    /// Serve the worker protocol on stdin/stdout
    #[command(hide = true)]
    Worker,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ExecutorChoice {
    Sync,
    Thread,
    Process,
    #[cfg(feature = "async")]
    Async,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum AnalyzeMethod {
    Basic,
    Pipeline,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum AnalyzeFormat {
    Table,
    Json,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose, cli.log_io)?;
    let config = FlowConfig {
        io_logging: cli.log_io,
        ..FlowConfig::default()
    };

    match cli.command {
        Commands::Normalize {
            input,
            output,
            fields,
            lower,
            upper,
        } => {
            let case = if upper {
                CaseMode::Upper
            } else if lower {
                CaseMode::Lower
            } else {
                CaseMode::Keep
            };
            let normalizer = TextNormalizer::new(NormalizeOptions {
                fields: (!fields.is_empty()).then_some(fields),
                case,
                ..NormalizeOptions::default()
            });
            let mut pipeline = Pipeline::default().with_config(config);
            pipeline.add(normalizer);
            handle_stream(&input, &output, &sync_runner(pipeline), &StreamOptions::default())?;
        }
        Commands::Filter {
            input,
            output,
            condition,
        } => {
            let mut pipeline = Pipeline::default().with_config(config);
            pipeline.add(JsonFilter::new(&condition)?);
            handle_stream(&input, &output, &sync_runner(pipeline), &StreamOptions::default())?;
        }
        Commands::Model {
            input,
            output,
            model,
            prompt_field,
            response_field,
            system_prompt,
            temperature,
            api_key,
            base_url,
        } => {
            let opts = ModelOptions {
                model,
                prompt_field,
                response_field,
                system_prompt,
                temperature,
                ..ModelOptions::default()
            };
            let invoker = ModelInvoker::openai(opts, &config, api_key, base_url)?;
            let mut pipeline = Pipeline::default().with_config(config);
            pipeline.add(invoker);
            handle_stream(&input, &output, &sync_runner(pipeline), &StreamOptions::default())?;
        }
        Commands::Run {
            input,
            output,
            config: spec_path,
            executor,
            workers,
            batch_size,
            append,
            skip_errors,
            progress,
        } => {
            let mut spec = PipelineSpec::from_path(&spec_path)?;
            spec.config.io_logging |= cli.log_io;
            let runner = build_runner(spec, executor, workers)?;
            let options = StreamOptions {
                batch_size,
                mode: if append {
                    SaveMode::Append
                } else {
                    SaveMode::Overwrite
                },
                skip_errors,
                progress,
            };
            handle_stream(&input, &output, &runner, &options)?;
        }
        Commands::Analyze {
            input,
            method,
            format,
        } => {
            handle_analyze(&input, method, format)?;
        }
        Commands::Check {
            input,
            output,
            remove_invalid,
            fix_errors,
            count_only,
        } => {
            let report = handle_check(&input, output, remove_invalid, fix_errors, count_only)?;
            if !report.is_clean() {
                std::process::exit(1);
            }
        }
        Commands::Worker => {
            let stdin = io::stdin();
            let stdout = io::stdout();
            let answered = serve(stdin.lock(), stdout.lock())?;
            tracing::debug!(answered, "worker finished");
        }
    }

    Ok(())
}

/// Executor behind a CLI command.
enum Runner {
    Blocking(Box<dyn Executor>),
    #[cfg(feature = "async")]
    Async {
        executor: jsonflow_io::AsyncExecutor,
        runtime: tokio::runtime::Runtime,
    },
}

impl Runner {
    fn execute_all(&self, batch: Vec<Data>) -> jsonflow_core::Result<Vec<Data>> {
        match self {
            Runner::Blocking(executor) => executor.execute_all(batch),
            #[cfg(feature = "async")]
            Runner::Async { executor, runtime } => runtime.block_on(executor.execute_all(batch)),
        }
    }

    fn execute_all_settled(&self, batch: Vec<Data>) -> Vec<jsonflow_core::Result<Data>> {
        match self {
            Runner::Blocking(executor) => executor.execute_all_settled(batch),
            #[cfg(feature = "async")]
            Runner::Async { executor, runtime } => {
                runtime.block_on(executor.execute_all_settled(batch))
            }
        }
    }
}

fn sync_runner(pipeline: Pipeline) -> Runner {
    Runner::Blocking(Box::new(SyncExecutor::new(pipeline)))
}

fn build_runner(
    spec: PipelineSpec,
    choice: ExecutorChoice,
    workers: Option<usize>,
) -> Result<Runner, Box<dyn Error>> {
    let runner = match choice {
        ExecutorChoice::Sync => sync_runner(spec.build()?),
        ExecutorChoice::Thread => {
            Runner::Blocking(Box::new(ThreadPoolExecutor::new(spec.build()?, workers)?))
        }
        ExecutorChoice::Process => {
            Runner::Blocking(Box::new(ProcessPoolExecutor::new(spec, workers)?))
        }
        #[cfg(feature = "async")]
        ExecutorChoice::Async => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let executor = jsonflow_io::AsyncExecutor::new(
                spec.build()?,
                workers.unwrap_or(DEFAULT_ASYNC_CONCURRENCY),
            )?;
            Runner::Async { executor, runtime }
        }
    };
    Ok(runner)
}

struct StreamOptions {
    batch_size: usize,
    mode: SaveMode,
    skip_errors: bool,
    progress: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            mode: SaveMode::Overwrite,
            skip_errors: false,
            progress: false,
        }
    }
}

fn open_input(path: &str) -> jsonflow_core::Result<JsonLoader> {
    if path == "-" {
        Ok(JsonLoader::from_stdin())
    } else {
        JsonLoader::from_path(path)
    }
}

fn open_output(path: &str, mode: SaveMode) -> jsonflow_core::Result<JsonSaver> {
    if path == "-" {
        Ok(JsonSaver::to_stdout())
    } else {
        JsonSaver::to_path(path, mode)
    }
}

/// Shift a batch-relative execution index to a position in the whole input.
fn offset_index(err: FlowError, base: usize) -> FlowError {
    match err {
        FlowError::Execution { index, source } => FlowError::Execution {
            index: base + index,
            source,
        },
        other => other,
    }
}

fn handle_stream(
    input: &str,
    output: &str,
    runner: &Runner,
    options: &StreamOptions,
) -> Result<(), Box<dyn Error>> {
    let loader = open_input(input)?;
    let mut saver = open_output(output, options.mode)?;
    let spinner = options
        .progress
        .then(|| create_spinner("Processing records"));

    let mut inputs_read = 0usize;
    let mut skipped = 0usize;
    for batch in loader.chunks(options.batch_size)? {
        let batch = batch?;
        let base = inputs_read;
        inputs_read += batch.len();

        if options.skip_errors {
            for result in runner.execute_all_settled(batch) {
                match result {
                    Ok(data) => saver.write(&data)?,
                    Err(err) => {
                        warn!(error = %offset_index(err, base), "skipping record");
                        skipped += 1;
                    }
                }
            }
        } else {
            let outputs = runner
                .execute_all(batch)
                .map_err(|err| offset_index(err, base))?;
            saver.write_all(&outputs)?;
        }

        if let Some(pb) = &spinner {
            pb.set_position(inputs_read as u64);
        }
    }

    let records_out = saver.finish()?;
    if let Some(pb) = spinner {
        pb.finish_with_message(format!("{} inputs processed", inputs_read));
    }
    info!(inputs_read, records_out, skipped, output, "processing complete");
    Ok(())
}

fn handle_analyze(
    input: &str,
    method: AnalyzeMethod,
    format: AnalyzeFormat,
) -> Result<(), Box<dyn Error>> {
    let mut extractor = Pipeline::default();
    extractor.add(JsonStructureExtractor {
        include_original: false,
        ..JsonStructureExtractor::default()
    });

    let mut merged: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut count = 0usize;
    for data in open_input(input)?.iter() {
        for record in data?.into_records() {
            count += 1;
            match method {
                AnalyzeMethod::Basic => {
                    for (path, types) in extract_structure(&record, true) {
                        merged.entry(path).or_default().extend(types);
                    }
                }
                AnalyzeMethod::Pipeline => {
                    for described in extractor.process(Data::Record(record))?.into_records() {
                        let Some(Value::Object(structure)) = described.get("structure") else {
                            continue;
                        };
                        for (path, info) in structure {
                            let types = merged.entry(path.clone()).or_default();
                            if let Some(Value::Array(names)) = info.get("types") {
                                types.extend(names.iter().filter_map(Value::as_str).map(String::from));
                            }
                        }
                    }
                }
            }
        }
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        AnalyzeFormat::Json => {
            serde_json::to_writer_pretty(&mut out, &merged)?;
            writeln!(out)?;
        }
        AnalyzeFormat::Table => {
            writeln!(out, "Analyzed {} records", count)?;
            writeln!(out, "{}", "=".repeat(80))?;
            writeln!(out, "{:<50} | {}", "Key path", "Types")?;
            writeln!(out, "{}", "-".repeat(80))?;
            for (path, types) in &merged {
                let types: Vec<&str> = types.iter().map(String::as_str).collect();
                writeln!(out, "{:<50} | {}", path, types.join(", "))?;
            }
        }
    }
    Ok(())
}

fn handle_check(
    input: &str,
    output: Option<String>,
    remove_invalid: bool,
    fix_errors: bool,
    count_only: bool,
) -> Result<CheckReport, Box<dyn Error>> {
    let reader: Box<dyn BufRead> = if input == "-" {
        Box::new(io::stdin().lock())
    } else {
        Box::new(BufReader::new(File::open(input)?))
    };

    let mut writer: Option<Box<dyn Write>> = match output.as_deref() {
        Some("-") => Some(Box::new(BufWriter::new(io::stdout()))),
        Some(path) => Some(Box::new(BufWriter::new(File::create(path)?))),
        None if remove_invalid => Some(Box::new(BufWriter::new(io::stdout()))),
        None => None,
    };

    let options = CheckOptions { repair: fix_errors };
    let report = check_lines(
        reader,
        writer.as_mut().map(|w| w.as_mut() as &mut dyn Write),
        &options,
    )?;

    let mut err = io::stderr().lock();
    writeln!(err, "Total lines: {}", report.total)?;
    writeln!(err, "Valid lines: {}", report.valid)?;
    if fix_errors {
        writeln!(err, "Repaired lines: {}", report.repaired)?;
    }
    writeln!(err, "Invalid lines: {}", report.invalid)?;
    writeln!(err, "Blank lines: {}", report.blank)?;
    if !count_only && !report.invalid_lines.is_empty() {
        let lines: Vec<String> = report.invalid_lines.iter().map(|n| n.to_string()).collect();
        writeln!(err, "Invalid line numbers: {}", lines.join(", "))?;
    }
    Ok(report)
}

fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {pos} {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_shifts_execution_errors_only() {
        let err = offset_index(FlowError::operator("op", "boom").at_index(2), 100);
        assert_eq!(err.index(), Some(102));
        let err = offset_index(FlowError::Config("bad".into()), 100);
        assert_eq!(err.index(), None);
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "jsonflow", "--log-io", "run", "in.jsonl", "-", "-c", "p.toml", "--executor", "thread",
            "--workers", "3", "--skip-errors",
        ])
        .unwrap();
        assert!(cli.log_io);
        match cli.command {
            Commands::Run {
                executor,
                workers,
                skip_errors,
                batch_size,
                ..
            } => {
                assert_eq!(executor, ExecutorChoice::Thread);
                assert_eq!(workers, Some(3));
                assert!(skip_errors);
                assert_eq!(batch_size, DEFAULT_BATCH_SIZE);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn check_rejects_count_only_with_remove_invalid() {
        assert!(Cli::try_parse_from(["jsonflow", "check", "in.jsonl", "-c", "-r"]).is_err());
    }
}
