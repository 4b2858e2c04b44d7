//! File logging for conductor runs.
//!
//! Every planner attempt, lock decision, dispatch and task outcome goes
//! through the `clog!` macro family into `~/.conductor/conductor.log`.
//!
//! Levels, and what conductor logs at each:
//! - ERROR: a plan rejected before dispatch, a crashed worker supervisor
//! - WARN: planner fallback, backend retries, task failures, dropped events
//! - INFO: plan created, task dispatched, completed or blocked, run summary
//! - DEBUG: lock contention, tool calls, raw planner responses
//! - TRACE: anything noisier than that
//!
//! The level comes from `CONDUCTOR_LOG` (`error` .. `trace`, default
//! `info`); `--debug` or `CONDUCTOR_DEBUG=1` raise it to at least DEBUG.
//! Until [`init_with_debug`] or [`init_at`] runs nothing is written, so the
//! library stays silent when embedded or under test.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    const ALL: [LogLevel; 5] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown log level `{}`", wanted))
    }
}

/// Work out the level from the `--debug` flag and the environment.
pub fn level_from_env<F>(debug_flag: bool, lookup: F) -> LogLevel
where
    F: Fn(&str) -> Option<String>,
{
    let base = lookup("CONDUCTOR_LOG")
        .and_then(|v| v.parse().ok())
        .unwrap_or(LogLevel::Info);
    let env_debug = lookup("CONDUCTOR_DEBUG")
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    if debug_flag || env_debug {
        base.max(LogLevel::Debug)
    } else {
        base
    }
}

/// Start logging to `~/.conductor/conductor.log`, truncating any previous run.
pub fn init_with_debug(debug: bool) {
    let level = level_from_env(debug, |key| std::env::var(key).ok());
    if let Ok(dir) = crate::config::Config::conductor_dir() {
        init_at(dir.join("conductor.log"), level);
    }
}

/// Start logging to `path` at `level`. Only the first call picks the file.
pub fn init_at(path: PathBuf, level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
    if let Some(dir) = path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    let _ = std::fs::write(&path, "");
    LOG_PATH.set(path).ok();
}

pub fn level() -> LogLevel {
    let raw = LOG_LEVEL.load(Ordering::Relaxed) as usize;
    LogLevel::ALL[raw.min(LogLevel::ALL.len() - 1)]
}

fn format_line(level: LogLevel, msg: &str) -> String {
    let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
    format!("[{}] [{:<5}] {}", timestamp, level.as_str(), msg)
}

/// Append `msg` when `level` passes the filter and logging is initialised.
pub fn log_at(level: LogLevel, msg: &str) {
    if level > self::level() {
        return;
    }
    let Some(path) = LOG_PATH.get() else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{}", format_line(level, msg));
    }
}

#[macro_export]
macro_rules! clog {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! clog_error {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! clog_warn {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Warn, &format!($($arg)*))
    };
}

/// Only written when the level is DEBUG or TRACE.
#[macro_export]
macro_rules! clog_debug {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Debug, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! clog_trace {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Trace, &format!($($arg)*))
    };
}
