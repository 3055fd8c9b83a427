/// Structured logging for the pool monitoring service
///
/// Every event carries the component that emitted it and, when relevant,
/// the pool it concerns. Output goes through `tracing`; `init_logger`
/// installs a `tracing-subscriber` fmt subscriber writing to the console
/// or to an append-only log file for daemon operation.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::notify::DeliveryError;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Parses a configured level name; unrecognised names yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Classifier,
    Throttle,
    Mailer,
    Store,
    Monitor,
    System,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Classifier => "classifier",
            Component::Throttle => "throttle",
            Component::Mailer => "mailer",
            Component::Store => "store",
            Component::Monitor => "monitor",
            Component::System => "system",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - relay not configured or recipient rejected
    Expected,
    /// Unexpected failure - indicates relay degradation or misconfiguration
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify a mail delivery failure by its cause.
pub fn classify_delivery_failure(err: &DeliveryError) -> FailureType {
    match err {
        DeliveryError::NotConfigured | DeliveryError::Rejected { .. } => FailureType::Expected,
        DeliveryError::Http(status) if *status >= 500 => FailureType::Unexpected,
        DeliveryError::Transport(_) => FailureType::Unexpected,
        DeliveryError::Http(_) => FailureType::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, overrides `min_level`. With `log_file` set, events
/// are appended to that file instead of the console. `console_timestamps`
/// toggles the timestamp column on console output. Calling this twice is
/// harmless: the second subscriber is rejected and the first one stays.
pub fn init_logger(
    min_level: LogLevel,
    log_file: Option<&str>,
    console_timestamps: bool,
) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(min_level.directive()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let installed = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None if console_timestamps => builder.try_init(),
        None => builder.without_time().try_init(),
    };

    if installed.is_err() {
        tracing::debug!(component = "system", "Logger already initialized");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Log a general informational message
pub fn info(component: Component, pool_id: Option<&str>, message: &str) {
    tracing::info!(component = component.as_str(), pool = pool_id, "{}", message);
}

/// Log a warning message
pub fn warn(component: Component, pool_id: Option<&str>, message: &str) {
    tracing::warn!(component = component.as_str(), pool = pool_id, "{}", message);
}

/// Log an error message
pub fn error(component: Component, pool_id: Option<&str>, message: &str) {
    tracing::error!(component = component.as_str(), pool = pool_id, "{}", message);
}

/// Log a debug message
pub fn debug(component: Component, pool_id: Option<&str>, message: &str) {
    tracing::debug!(component = component.as_str(), pool = pool_id, "{}", message);
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a mail delivery failure with automatic classification.
///
/// Returns the classification so callers can record it.
pub fn log_delivery_failure(pool_id: &str, recipient: &str, err: &DeliveryError) -> FailureType {
    let failure_type = classify_delivery_failure(err);

    let message = format!(
        "alert to {} failed [{}]: {}",
        recipient,
        failure_type,
        err
    );

    match failure_type {
        FailureType::Expected => debug(Component::Mailer, Some(pool_id), &message),
        FailureType::Unexpected => error(Component::Mailer, Some(pool_id), &message),
        FailureType::Unknown => warn(Component::Mailer, Some(pool_id), &message),
    }

    failure_type
}

// ---------------------------------------------------------------------------
// Reading Summary Logging
// ---------------------------------------------------------------------------

/// Log the result of evaluating one reading.
pub fn log_evaluation_summary(pool_id: &str, checked: usize, out_of_band: usize, warnings: usize) {
    let message = format!(
        "Reading evaluated: {} parameters, {} out of band, {} near limits",
        checked,
        out_of_band,
        warnings
    );

    if out_of_band > 0 {
        warn(Component::Classifier, Some(pool_id), &message);
    } else {
        debug(Component::Classifier, Some(pool_id), &message);
    }
}
