//! Structured logging setup (ambient stack, SPEC_FULL.md "AMBIENT STACK").
//!
//! Generalized from `jdb::main::init_logging`: that function layered a
//! `tui-logger` widget sink alongside a non-blocking file appender, since the
//! TUI needed its own in-app log pane. There is no TUI in this crate (see
//! DESIGN.md), so only the file-appender layer survives, unchanged in shape.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a global `tracing` subscriber that writes leveled, non-blocking
/// logs to `{log_dir}/vertex-core.log`. Returns the `WorkerGuard`; the
/// caller must keep it alive for the duration of the process, or buffered
/// log lines are dropped on exit (mirrors `jdb::main::init_logging`'s
/// `WorkerGuard` return).
pub fn init_file_logging(log_dir: impl AsRef<Path>) -> std::io::Result<WorkerGuard> {
    let log_dir = log_dir.as_ref();
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::never(log_dir, "vertex-core.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(file_writer);

    // Installing a subscriber twice panics; tests that exercise this run in
    // isolated processes, so no guard against re-init is needed here.
    tracing_subscriber::registry().with(file_layer).init();

    Ok(guard)
}
