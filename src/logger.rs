//! Subscriber setup for watching trustopt runs.
//!
//! The solvers never print. They emit `tracing` events that a subscriber can
//! pick up:
//! - DEBUG: the configuration dump at `initialize`, the iteration table
//!   (one header plus one row per iteration), convergence test hits and
//!   subproblem fallbacks
//! - WARN: a collapsed trust region, LM damping overflow, a failed
//!   Gauss-Newton solve
//! - ERROR: every error returned to the caller
//!
//! [`init_logger`] installs a compact formatter whose default filter only
//! covers the `trustopt` target, so enabling DEBUG for the iteration table
//! does not flood the output with events from other crates.

use chrono::Local;
use tracing::{Level, Metadata};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Install a subscriber showing trustopt events at INFO and above.
///
/// `RUST_LOG` replaces the default filter when it is set.
///
/// # Example
/// ```no_run
/// trustopt::init_logger();
/// ```
///
/// Iteration tables of a test run:
/// ```bash
/// RUST_LOG=trustopt=debug cargo test -- --nocapture
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Install a subscriber showing trustopt events at `level` and above.
///
/// A second call, or a call after another subscriber was installed, is a
/// no-op, so every test may call it.
///
/// # Example
/// ```no_run
/// use tracing::Level;
///
/// // Print the per-iteration table of every solver in this process
/// trustopt::init_logger_with_level(Level::DEBUG);
/// ```
pub fn init_logger_with_level(level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(IterationLogFormat)
        .try_init();
}

fn default_directive(level: Level) -> String {
    format!("{}={}", env!("CARGO_CRATE_NAME"), level)
}

/// `[LEVEL HH:MM:SS.mmm source] message`
///
/// Timestamps carry milliseconds so consecutive iteration rows can be told
/// apart. DEBUG and TRACE rows name `file:line`, other levels the module path.
struct IterationLogFormat;

impl<S, N> FormatEvent<S, N> for IterationLogFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        write!(
            writer,
            "[{} {} {}] ",
            level_label(*metadata.level()),
            Local::now().format("%H:%M:%S%.3f"),
            source(metadata)
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// ANSI colored, fixed-width level name
fn level_label(level: Level) -> &'static str {
    match level {
        Level::ERROR => "\x1b[31mERROR\x1b[0m",
        Level::WARN => "\x1b[33mWARN \x1b[0m",
        Level::INFO => "\x1b[32mINFO \x1b[0m",
        Level::DEBUG => "\x1b[34mDEBUG\x1b[0m",
        Level::TRACE => "\x1b[35mTRACE\x1b[0m",
    }
}

fn source(metadata: &Metadata<'_>) -> String {
    match (*metadata.level(), metadata.file()) {
        (Level::DEBUG | Level::TRACE, Some(file)) => {
            let file_name = file.rsplit('/').next().unwrap_or(file);
            match metadata.line() {
                Some(line) => format!("{file_name}:{line}"),
                None => file_name.to_string(),
            }
        }
        _ => metadata.target().to_string(),
    }
}
