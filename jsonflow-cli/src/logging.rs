//! Tracing initialization for the `jsonflow` binary.

use jsonflow_core::pipeline;
use std::error::Error;
use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a stderr subscriber so stdout stays pure JSON Lines.
///
/// `verbose` forces `debug`; otherwise `RUST_LOG` applies, defaulting to
/// `info`. Operator I/O logging needs the pipeline's debug events, so
/// `log_io` enables them regardless of the base level.
pub fn init_tracing(verbose: bool, log_io: bool) -> Result<(), Box<dyn Error>> {
    let env_filter = build_env_filter(verbose, log_io)?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| format!("Failed to initialize tracing: {e}"))?;
    Ok(())
}

fn build_env_filter(verbose: bool, log_io: bool) -> Result<EnvFilter, Box<dyn Error>> {
    let mut env_filter = create_env_filter(verbose)?;
    if log_io {
        let directive = format!("{}=debug", pipeline::TRACING_TARGET);
        env_filter = env_filter.add_directive(directive.parse()?);
    }
    Ok(env_filter)
}

fn create_env_filter(verbose: bool) -> Result<EnvFilter, Box<dyn Error>> {
    if verbose {
        return Ok(EnvFilter::try_new("debug")?);
    }
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_io_enables_pipeline_target() {
        let filter = build_env_filter(true, true).unwrap().to_string();
        assert!(filter.contains("jsonflow_core::pipeline=debug"));

        let filter = build_env_filter(true, false).unwrap().to_string();
        assert!(!filter.contains("jsonflow_core::pipeline"));
    }
}
