//! Log records and the pipeline they are handed to.
//!
//! Everything in this crate that wants to log goes through [`LogPipeline`]:
//! the failure hook, the explicit-catch logger and the stream interceptor.
//! [`TracingPipeline`] forwards records as `tracing` events; [`MemoryPipeline`]
//! keeps them in memory for tests and embedders that route records themselves.

use crate::error::Error;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Target used for every event emitted by [`TracingPipeline`].
pub const TARGET: &str = "logcatch";

/// Severity of a log record, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    /// The matching `tracing` level. `tracing` has nothing above `ERROR`, so
    /// critical records share it and carry a `critical` field instead.
    pub fn as_tracing(&self) -> tracing::Level {
        match self {
            Severity::Debug => tracing::Level::DEBUG,
            Severity::Info => tracing::Level::INFO,
            Severity::Warning => tracing::Level::WARN,
            Severity::Error | Severity::Critical => tracing::Level::ERROR,
        }
    }

    pub fn as_level_filter(&self) -> LevelFilter {
        LevelFilter::from_level(self.as_tracing())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" | "fatal" => Ok(Severity::Critical),
            _ => Err(Error::InvalidLevel(s.to_string())),
        }
    }
}

impl TryFrom<String> for Severity {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, <Severity as TryFrom<String>>::Error> {
        value.parse()
    }
}

impl From<Severity> for String {
    fn from(value: Severity) -> Self {
        value.as_str().to_string()
    }
}

/// Which part of the crate produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordOrigin {
    /// The uncaught-failure path of the failure hook
    Uncaught,
    /// An explicitly caught error logged through `ExceptionLogger`
    Caught,
    /// A line intercepted from an output stream
    Capture,
    /// Bootstrap messages
    Setup,
}

impl RecordOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOrigin::Uncaught => "uncaught",
            RecordOrigin::Caught => "caught",
            RecordOrigin::Capture => "capture",
            RecordOrigin::Setup => "setup",
        }
    }
}

/// The failure attached to a record.
///
/// The call chain travels only as rendered text; the frames themselves are
/// never attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionPayload {
    /// Failure type, e.g. `panic` or `ParseIntError`
    pub kind: String,
    /// Failure message
    pub value: String,
    /// Output of the frame context analyzer for the failure's chain
    pub rendered_chain: String,
}

/// A single record handed to a [`LogPipeline`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub severity: Severity,
    pub origin: RecordOrigin,
    pub message: String,
    pub exception: Option<ExceptionPayload>,
}

impl LogRecord {
    pub fn new(severity: Severity, origin: RecordOrigin, message: impl Into<String>) -> Self {
        Self {
            severity,
            origin,
            message: message.into(),
            exception: None,
        }
    }

    pub fn with_exception(mut self, payload: ExceptionPayload) -> Self {
        self.exception = Some(payload);
        self
    }

    /// Full text of the record: the message, followed by a `kind: value`
    /// line when an exception is attached.
    pub fn text(&self) -> String {
        match &self.exception {
            Some(exc) => format!("{}\n{}: {}", self.message.trim_end(), exc.kind, exc.value),
            None => self.message.clone(),
        }
    }
}

/// Destination for log records.
///
/// `disable` is a one-way latch: once called, every later `submit` is
/// dropped, and implementations backed by a global filter silence that
/// filter as well.
pub trait LogPipeline: Send + Sync {
    fn submit(&self, record: LogRecord);

    fn disable(&self);

    fn is_disabled(&self) -> bool;
}

/// Reload handle for the global filter installed by `setup_logging`.
pub type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Pipeline that emits records as `tracing` events under [`TARGET`].
#[derive(Debug, Default)]
pub struct TracingPipeline {
    disabled: AtomicBool,
    filter: Option<FilterHandle>,
}

impl TracingPipeline {
    /// A pipeline that emits into whatever subscriber is current. Disabling
    /// it only stops this pipeline's own records.
    pub fn new() -> Self {
        Self::default()
    }

    /// A pipeline that owns the global filter; disabling it turns the
    /// filter off so that direct `tracing` calls are dropped too.
    pub fn with_filter(filter: FilterHandle) -> Self {
        Self {
            disabled: AtomicBool::new(false),
            filter: Some(filter),
        }
    }
}

impl LogPipeline for TracingPipeline {
    fn submit(&self, record: LogRecord) {
        if self.is_disabled() {
            return;
        }

        let text = record.text();
        let origin = record.origin.as_str();
        match record.severity {
            Severity::Debug => tracing::debug!(target: TARGET, origin, "{}", text),
            Severity::Info => tracing::info!(target: TARGET, origin, "{}", text),
            Severity::Warning => tracing::warn!(target: TARGET, origin, "{}", text),
            Severity::Error => tracing::error!(target: TARGET, origin, "{}", text),
            Severity::Critical => {
                tracing::error!(target: TARGET, origin, critical = true, "{}", text)
            }
        }
    }

    fn disable(&self) {
        if self.disabled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(filter) = &self.filter {
            // Nothing useful can be done if the subscriber is already gone.
            let _ = filter.reload(EnvFilter::new("off"));
        }
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }
}

/// Pipeline that keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryPipeline {
    records: Mutex<Vec<LogRecord>>,
    disabled: AtomicBool,
}

impl MemoryPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records submitted so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Remove and return the records submitted so far.
    pub fn take(&self) -> Vec<LogRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl LogPipeline for MemoryPipeline {
    fn submit(&self, record: LogRecord) {
        if self.is_disabled() {
            return;
        }
        self.records.lock().push(record);
    }

    fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }
}
