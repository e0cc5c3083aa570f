//! Process-wide logging for the `multicam` CLI and calibration runs.
//!
//! Calibration units run concurrently on pool threads named
//! `calib-worker-<n>`, and their interleaved output is only readable if every
//! line says who wrote it. The stderr logger therefore prints
//! `[elapsed LEVEL thread module] message`. Lines from threads without a
//! name, such as the CLI main thread, use `main`.
//!
//! Install it with [`init_with_level`]. With the `tracing` feature,
//! [`init_tracing`] installs a subscriber instead. That subscriber can write
//! JSON lines for machine consumption of calibration progress.

use std::fmt::Arguments;
use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

struct WorkerLogger {
    level: LevelFilter,
    started: Instant,
}

/// One log line without the trailing newline.
fn format_line(elapsed: f64, level: Level, thread: &str, target: &str, args: Arguments) -> String {
    let module = target.rsplit("::").next().unwrap_or(target);
    format!("[{elapsed:8.3}s {level:>5} {thread} {module}] {args}")
}

impl Log for WorkerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let current = std::thread::current();
        let line = format_line(
            self.started.elapsed().as_secs_f64(),
            record.level(),
            current.name().unwrap_or("main"),
            record.target(),
            *record.args(),
        );
        // one write per line keeps concurrent workers from interleaving
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<WorkerLogger> = OnceLock::new();

/// Install the stderr logger. Later calls are no-ops.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| WorkerLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Install a `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise the filter is `debug` for a verbose
/// run and `info` else. Span close events report how long each instrumented
/// stage (pair scan, intrinsics fit, stereo fit, recompute) took.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_thread_names(true);
    if json {
        let _ = builder.json().flatten_event(true).finish().try_init();
    } else {
        let _ = builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_names_thread_and_module() {
        let line = format_line(
            1.5,
            Level::Warn,
            "calib-worker-2",
            "multicam_calib::pairwise",
            format_args!("view {} dropped", 7),
        );
        assert_eq!(line, "[   1.500s  WARN calib-worker-2 pairwise] view 7 dropped");
    }

    #[test]
    fn bare_target_is_kept() {
        let line = format_line(0.0, Level::Info, "main", "multicam", format_args!("ok"));
        assert!(line.ends_with("main multicam] ok"), "{line}");
    }
}
