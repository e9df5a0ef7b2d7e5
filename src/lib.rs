//! logcatch - panic and stdout logging with call-chain context
//!
//! This library logs uncaught panics and explicitly caught errors together
//! with the chain of tracked frames that led to them (optionally including
//! each frame's local values), and turns text written to stdout into log
//! records. Records flow through a `tracing` subscriber configured from a
//! TOML, JSON or YAML file.

pub mod capture;
pub mod classify;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod frames;
pub mod hooks;
pub mod output;
pub mod record;
pub mod setup;
pub mod stack_trace;

// Re-export commonly used types
pub use capture::{CapturePolicy, InterceptingStream};
pub use classify::{LevelClassifier, MarkerClassifier};
pub use config::LogConfig;
pub use context::LogContext;
pub use error::{Error, Result};
pub use frames::{CallChainFrame, FrameGuard, LocalBinding, SourceLocation};
pub use hooks::{
    catch_panic, CaughtPanic, Disposition, ErrorContext, ExceptionLogger, FailureHook,
    FailureKind, Traced, UncaughtFailure,
};
pub use record::{LogPipeline, LogRecord, MemoryPipeline, RecordOrigin, Severity, TracingPipeline};
pub use setup::{setup_logging, Logging, SetupOptions};
pub use stack_trace::render;
