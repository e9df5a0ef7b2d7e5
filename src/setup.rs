//! One-call bootstrap of the logging stack.
//!
//! [`setup_logging`] loads the config, installs a `tracing` subscriber with
//! one layer per handler, installs the failure hook and optionally starts
//! capturing stdout. The returned [`Logging`] keeps everything alive.

use crate::config::{ConsoleStream, HandlerConfig, LogConfig, LogFormat, Rotation};
use crate::context::LogContext;
use crate::error::{Error, Result};
use crate::hooks::{ExceptionLogger, FailureHook};
use crate::record::{LogPipeline, LogRecord, RecordOrigin, Severity, TracingPipeline};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

#[cfg(unix)]
use crate::capture::{CapturePolicy, StdoutCapture, StdoutRedirect};
#[cfg(unix)]
use crate::classify::MarkerClassifier;

/// Registry plus the reloadable global filter; every handler layer sits on top.
type Stack = Layered<reload::Layer<EnvFilter, Registry>, Registry>;
type HandlerLayer = Box<dyn Layer<Stack> + Send + Sync>;

/// Options for [`setup_logging`].
#[derive(Debug, Clone)]
pub struct SetupOptions {
    /// Config file; the user config or the default when `None`
    pub config_path: Option<PathBuf>,
    /// Replaces every file handler's filename
    pub log_path: Option<PathBuf>,
    /// Log everything written to stdout
    pub capture_print: bool,
    pub strict: bool,
    pub guess_level: bool,
    /// Include locals in rendered call chains
    pub full_context: bool,
    /// Level applied to the config's suppressed targets
    pub suppress_level_below: Severity,
    /// Install a Ctrl+C handler that exits with code 130
    pub handle_interrupt: bool,
    pub backtrace_fallback: bool,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            log_path: None,
            capture_print: false,
            strict: false,
            guess_level: false,
            full_context: false,
            suppress_level_below: Severity::Warning,
            handle_interrupt: false,
            backtrace_fallback: true,
        }
    }
}

/// The installed logging stack.
///
/// Dropping it restores stdout if it was captured; the subscriber and the
/// panic hook stay installed for the rest of the process.
pub struct Logging {
    context: Arc<LogContext>,
    pipeline: Arc<TracingPipeline>,
    hook: Arc<FailureHook>,
    config: LogConfig,
    #[cfg(unix)]
    _capture: Option<StdoutCapture>,
}

impl Logging {
    pub fn context(&self) -> &Arc<LogContext> {
        &self.context
    }

    pub fn pipeline(&self) -> Arc<dyn LogPipeline> {
        self.pipeline.clone()
    }

    pub fn hook(&self) -> &Arc<FailureHook> {
        &self.hook
    }

    /// The config after overrides were applied
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn exception_logger(&self) -> ExceptionLogger {
        ExceptionLogger::new(Arc::clone(&self.context), self.pipeline.clone())
    }
}

/// Install the logging stack for this process.
///
/// Fails if a global subscriber is already installed.
pub fn setup_logging(options: SetupOptions) -> Result<Logging> {
    let mut config = LogConfig::load(options.config_path.as_deref())?;
    let env_log_path = config.apply_env_overrides()?;
    config.ensure_paths(options.log_path.as_deref().or(env_log_path.as_deref()))?;
    let directives = config.filter_directives(options.suppress_level_below)?;

    #[cfg(unix)]
    let redirect = if options.capture_print {
        Some(StdoutRedirect::redirect().map_err(Error::Redirect)?)
    } else {
        None
    };
    #[cfg(unix)]
    let console_stdout = match &redirect {
        Some(redirect) => Some(redirect.original_stdout().map_err(Error::Redirect)?),
        None => None,
    };
    #[cfg(not(unix))]
    let console_stdout: Option<File> = None;

    let layers = build_layers(&config, console_stdout)?;
    let (filter, handle) = reload::Layer::new(build_filter(directives));
    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .map_err(|e| Error::SubscriberInit(e.to_string()))?;

    let pipeline = Arc::new(TracingPipeline::with_filter(handle));
    let context = Arc::new(
        LogContext::new(options.full_context).backtrace_fallback(options.backtrace_fallback),
    );
    let hook = Arc::new(FailureHook::new(Arc::clone(&context), pipeline.clone()));
    hook.install();
    if options.handle_interrupt {
        if let Err(err) = hook.install_interrupt_handler() {
            tracing::warn!(error = %err, "could not install interrupt handler");
        }
    }

    #[cfg(unix)]
    let capture = match redirect {
        Some(redirect) => Some(
            redirect
                .start(
                    CapturePolicy::new(options.strict, options.guess_level),
                    MarkerClassifier::new(),
                    pipeline.clone(),
                )
                .map_err(Error::Redirect)?,
        ),
        None => None,
    };
    #[cfg(not(unix))]
    if options.capture_print {
        tracing::warn!("stdout capture is only supported on unix");
    }

    pipeline.submit(LogRecord::new(
        Severity::Debug,
        RecordOrigin::Setup,
        start_banner(),
    ));

    Ok(Logging {
        context,
        pipeline,
        hook,
        config,
        #[cfg(unix)]
        _capture: capture,
    })
}

fn start_banner() -> String {
    format!("{:_^50}", "New log started")
}

fn build_filter(directives: Vec<Directive>) -> EnvFilter {
    directives
        .into_iter()
        .fold(EnvFilter::default(), EnvFilter::add_directive)
}

/// One layer per handler, each with its own level.
///
/// `console_stdout` replaces the process stdout for console handlers while
/// stdout is being captured.
fn build_layers(config: &LogConfig, console_stdout: Option<File>) -> Result<Vec<HandlerLayer>> {
    let console_stdout = console_stdout.map(Arc::new);
    let mut layers = Vec::with_capacity(config.handlers.len());

    for handler in config.handlers.values() {
        let (writer, format, ansi) = match handler {
            HandlerConfig::Console {
                stream,
                format,
                ansi,
                ..
            } => (console_writer(*stream, console_stdout.as_ref()), *format, *ansi),
            HandlerConfig::File {
                filename,
                format,
                rotation,
                ..
            } => (
                BoxMakeWriter::new(file_appender(filename, *rotation)?),
                *format,
                false,
            ),
        };
        layers.push(handler_layer(writer, format, ansi, handler.level()));
    }

    Ok(layers)
}

fn handler_layer(
    writer: BoxMakeWriter,
    format: LogFormat,
    ansi: bool,
    level: Severity,
) -> HandlerLayer {
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        LogFormat::Text => layer.with_filter(level.as_level_filter()).boxed(),
        LogFormat::Json => layer
            .json()
            .with_filter(level.as_level_filter())
            .boxed(),
    }
}

fn console_writer(stream: ConsoleStream, console_stdout: Option<&Arc<File>>) -> BoxMakeWriter {
    match (stream, console_stdout) {
        (ConsoleStream::Stdout, Some(file)) => BoxMakeWriter::new(Arc::clone(file)),
        (ConsoleStream::Stdout, None) => BoxMakeWriter::new(io::stdout),
        (ConsoleStream::Stderr, _) => BoxMakeWriter::new(io::stderr),
    }
}

fn file_appender(filename: &Path, rotation: Rotation) -> Result<RollingFileAppender> {
    let prefix = filename.file_name().ok_or_else(|| {
        Error::io(
            filename,
            io::Error::new(io::ErrorKind::InvalidInput, "log path has no file name"),
        )
    })?;
    let directory = filename
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let rotation = match rotation {
        Rotation::Never => rolling::Rotation::NEVER,
        Rotation::Minutely => rolling::Rotation::MINUTELY,
        Rotation::Hourly => rolling::Rotation::HOURLY,
        Rotation::Daily => rolling::Rotation::DAILY,
    };
    RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(prefix.to_string_lossy())
        .build(directory)
        .map_err(|e| Error::io(filename, io::Error::other(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FilterHandle;
    use std::fs;
    use tempfile::TempDir;

    fn file_only_config(path: &Path, level: Severity, format: LogFormat) -> LogConfig {
        let mut config = LogConfig::default();
        config.handlers.clear();
        config.handlers.insert(
            "file".to_string(),
            HandlerConfig::File {
                filename: path.to_path_buf(),
                level,
                format,
                rotation: Rotation::Never,
            },
        );
        config
    }

    fn with_stack<T>(config: &LogConfig, f: impl FnOnce(FilterHandle) -> T) -> T {
        let layers = build_layers(config, None).unwrap();
        let directives = config.filter_directives(Severity::Warning).unwrap();
        let (filter, handle) = reload::Layer::new(build_filter(directives));
        let subscriber = tracing_subscriber::registry().with(filter).with(layers);
        tracing::subscriber::with_default(subscriber, || f(handle))
    }

    #[test]
    fn test_start_banner() {
        let banner = start_banner();
        assert_eq!(banner.chars().count(), 50);
        assert_eq!(banner, "________________New log started_________________");
    }

    #[test]
    fn test_setup_options_default() {
        let options = SetupOptions::default();
        assert_eq!(options.suppress_level_below, Severity::Warning);
        assert!(!options.capture_print);
        assert!(options.backtrace_fallback);
    }

    #[test]
    fn test_file_handler_respects_its_level() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let config = file_only_config(&path, Severity::Info, LogFormat::Text);

        with_stack(&config, |_| {
            let pipeline = TracingPipeline::new();
            pipeline.submit(LogRecord::new(Severity::Debug, RecordOrigin::Capture, "hidden"));
            pipeline.submit(LogRecord::new(Severity::Warning, RecordOrigin::Capture, "shown"));
        });

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("shown"));
        assert!(contents.contains("origin=\"capture\""));
        assert!(!contents.contains("hidden"));
    }

    #[test]
    fn test_json_file_handler() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.json");
        let config = file_only_config(&path, Severity::Debug, LogFormat::Json);

        with_stack(&config, |_| {
            tracing::info!(target: "logcatch", origin = "setup", "hello json");
        });

        let contents = fs::read_to_string(&path).unwrap();
        let line: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(line["level"], "INFO");
        assert_eq!(line["fields"]["message"], "hello json");
        assert_eq!(line["fields"]["origin"], "setup");
    }

    #[test]
    fn test_suppressed_target_needs_suppression_level() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let mut config = file_only_config(&path, Severity::Debug, LogFormat::Text);
        config.suppress = vec!["noisy".to_string()];

        with_stack(&config, |_| {
            tracing::info!(target: "noisy", "chatter");
            tracing::warn!(target: "noisy", "noisy warning");
            tracing::info!(target: "app", "app info");
        });

        let contents = fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("chatter"));
        assert!(contents.contains("noisy warning"));
        assert!(contents.contains("app info"));
    }

    #[test]
    fn test_latch_silences_direct_tracing_calls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let config = file_only_config(&path, Severity::Debug, LogFormat::Text);

        with_stack(&config, |handle| {
            let pipeline = TracingPipeline::with_filter(handle);
            tracing::info!("before latch");
            pipeline.disable();
            tracing::error!("after latch");
            pipeline.submit(LogRecord::new(Severity::Error, RecordOrigin::Caught, "dropped"));
        });

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("before latch"));
        assert!(!contents.contains("after latch"));
        assert!(!contents.contains("dropped"));
    }

    #[test]
    fn test_file_appender_requires_file_name() {
        assert!(file_appender(Path::new("/"), Rotation::Never).is_err());
    }
}
