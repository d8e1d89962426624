//! File logging for orchestration runs.
//!
//! Every line is tagged with the component that wrote it (`scheduler:`,
//! `pipeline:`, `runner:`, `router:`, `incremental:`, `same-as:`), so one
//! log can interleave several runs and still be grepped per component.
//!
//! Log levels:
//! - ERROR: Run failures the caller sees as an error, e.g. a runner timeout
//! - WARN: Contained failures (hook and callback panics, dropped artifact
//!   writes, gated blocks, unreadable snapshot stores, aborted runs)
//! - INFO: Run lifecycle (level counts, block totals, final status)
//! - DEBUG: Per-task scheduling decisions and same-as merges
//! - TRACE: Section routing and hashing detail
//!
//! Nothing is written until [`init`], [`init_at`] or [`init_from_config`]
//! is called, so the library stays silent when embedded.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::RwLock;

use crate::config::Config;
use crate::error::{Error, Result};

static LOG_PATH: RwLock<Option<PathBuf>> = RwLock::new(None);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Env var naming a level (`error` .. `trace`).
pub const LEVEL_ENV: &str = "SPECFLOW_LOG";
/// Env var that turns on DEBUG when set to `1` or `true`.
pub const DEBUG_ENV: &str = "SPECFLOW_DEBUG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(Error::Validation(format!("unknown log level: {}", other))),
        }
    }
}

/// Pick the effective level. An explicit level wins, then [`LEVEL_ENV`],
/// then [`DEBUG_ENV`]; the default is INFO.
fn resolve_level(
    explicit: Option<LogLevel>,
    level_env: Option<&str>,
    debug_env: Option<&str>,
) -> LogLevel {
    if let Some(level) = explicit {
        return level;
    }
    if let Some(level) = level_env.and_then(|v| v.parse().ok()) {
        return level;
    }
    match debug_env {
        Some(v) if v == "1" || v.eq_ignore_ascii_case("true") => LogLevel::Debug,
        _ => LogLevel::Info,
    }
}

fn level_from_env(explicit: Option<LogLevel>) -> LogLevel {
    let level_env = std::env::var(LEVEL_ENV).ok();
    let debug_env = std::env::var(DEBUG_ENV).ok();
    resolve_level(explicit, level_env.as_deref(), debug_env.as_deref())
}

/// Log to `~/.specflow/specflow.log` at the level taken from the
/// environment. Does nothing when there is no home directory.
pub fn init() {
    match Config::specflow_dir() {
        Ok(dir) => {
            let _ = init_at(&dir.join("specflow.log"), None);
        }
        Err(_) => set_level(level_from_env(None)),
    }
}

/// Log to the file named by `config.log_file` (or the default location) at
/// `config.log_level`, falling back to the environment.
pub fn init_from_config(config: &Config) -> Result<()> {
    init_at(&config.log_path()?, config.log_level)
}

/// Append log lines to `path`, replacing any earlier target. Parent
/// directories are created.
pub fn init_at(path: &Path, level: Option<LogLevel>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)?;

    set_level(level_from_env(level));
    if let Ok(mut target) = LOG_PATH.write() {
        *target = Some(path.to_path_buf());
    }
    Ok(())
}

/// Stop writing. Later log calls are dropped until the next init.
pub fn close() {
    if let Ok(mut target) = LOG_PATH.write() {
        *target = None;
    }
}

/// Current log file, if logging is on.
pub fn log_path() -> Option<PathBuf> {
    LOG_PATH.read().ok().and_then(|target| target.clone())
}

pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

pub fn level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn enabled(level: LogLevel) -> bool {
    level <= self::level() && log_path().is_some()
}

pub fn log_at(level: LogLevel, msg: &str) {
    if level > self::level() {
        return;
    }
    let Some(path) = log_path() else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.as_str(), msg);
    }
}

pub fn log(msg: &str) {
    log_at(LogLevel::Info, msg);
}

pub fn error(msg: &str) {
    log_at(LogLevel::Error, msg);
}

pub fn warn(msg: &str) {
    log_at(LogLevel::Warn, msg);
}

pub fn debug(msg: &str) {
    log_at(LogLevel::Debug, msg);
}

pub fn trace(msg: &str) {
    log_at(LogLevel::Trace, msg);
}

/// INFO: run lifecycle.
#[macro_export]
macro_rules! sflog {
    ($($arg:tt)*) => {
        $crate::log::log(&format!($($arg)*))
    };
}

/// ERROR: failures surfaced to the caller.
#[macro_export]
macro_rules! sflog_error {
    ($($arg:tt)*) => {
        $crate::log::error(&format!($($arg)*))
    };
}

/// WARN: contained failures.
#[macro_export]
macro_rules! sflog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

/// DEBUG: scheduling decisions. The message is not formatted unless it
/// will be written.
#[macro_export]
macro_rules! sflog_debug {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::LogLevel::Debug) {
            $crate::log::debug(&format!($($arg)*))
        }
    };
}

/// TRACE: routing and hashing detail. Formatted only when enabled.
#[macro_export]
macro_rules! sflog_trace {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::LogLevel::Trace) {
            $crate::log::trace(&format!($($arg)*))
        }
    };
}
