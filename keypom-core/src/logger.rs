//! Log forwarding for host applications.
//!
//! The SDK emits `tracing` events. When no `tracing` subscriber is installed those events are
//! re-emitted as `log` records, which [`set_logger`] forwards to a host-provided [`Logger`].
//! Native hosts and tests that prefer a formatted stderr output can call [`init_env_logging`].

use std::sync::{Arc, OnceLock};

use tracing_subscriber::EnvFilter;

/// Trait representing a logger that can log messages at various levels.
///
/// This trait should be implemented by any logger that wants to receive log messages.
/// With the `ffi` feature it is exported via `UniFFI` for use in foreign languages.
///
/// # Examples
///
/// ```rust
/// use keypom_core::logger::{Logger, LogLevel};
///
/// struct MyLogger;
///
/// impl Logger for MyLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         println!("[{:?}] {}", level, message);
///     }
/// }
/// ```
#[cfg_attr(feature = "ffi", uniffi::export(with_foreign))]
pub trait Logger: Sync + Send {
    /// Logs a message at the specified log level.
    fn log(&self, level: LogLevel, message: String);
}

/// Enumeration of possible log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum LogLevel {
    /// Designates very low priority, often extremely detailed messages.
    Trace,
    /// Designates lower priority debugging information.
    Debug,
    /// Designates informational messages that highlight the progress of the application.
    Info,
    /// Designates potentially harmful situations.
    Warn,
    /// Designates error events that might still allow the application to continue running.
    Error,
}

/// A logger that forwards log messages to a user-provided `Logger` implementation.
struct ForeignLogger;

impl log::Log for ForeignLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if !should_forward(record.module_path(), record.level()) {
            return;
        }

        if let Some(logger) = LOGGER_INSTANCE.get() {
            let level = log_level(record.level());
            let message = format!("{}", record.args());
            logger.log(level, message);
        } else {
            eprintln!("Logger not set: {}", record.args());
        }
    }

    fn flush(&self) {}
}

/// Debug and trace records are only forwarded when they originate from this SDK, so chatty
/// dependencies (HTTP stack, TLS) do not flood the host's logs.
fn should_forward(module_path: Option<&str>, level: log::Level) -> bool {
    let is_record_from_keypom =
        module_path.is_some_and(|module_path| module_path.starts_with("keypom"));
    let is_debug_or_trace_level =
        level == log::Level::Debug || level == log::Level::Trace;

    !(is_debug_or_trace_level && !is_record_from_keypom)
}

const fn log_level(level: log::Level) -> LogLevel {
    match level {
        log::Level::Error => LogLevel::Error,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Info => LogLevel::Info,
        log::Level::Debug => LogLevel::Debug,
        log::Level::Trace => LogLevel::Trace,
    }
}

static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// Sets the global logger.
///
/// Call once, before any SDK operation. Subsequent calls keep the first logger.
#[cfg_attr(feature = "ffi", uniffi::export)]
pub fn set_logger(logger: Arc<dyn Logger>) {
    if LOGGER_INSTANCE.set(logger).is_err() {
        println!("Logger already set");
    }

    if let Err(e) = init_logger() {
        eprintln!("Failed to set logger: {e}");
    }
}

fn init_logger() -> Result<(), log::SetLoggerError> {
    static LOGGER: ForeignLogger = ForeignLogger;
    log::set_logger(&LOGGER)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}

/// Installs a formatted stderr `tracing` subscriber filtered by `RUST_LOG`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_env_logging() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
