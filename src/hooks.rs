//! Failure hooks.
//!
//! Two ways a failure reaches the log:
//!
//! - Uncaught: a panic (through the process-wide panic hook), a Ctrl+C
//!   interrupt, or an error returned out of `main`. [`FailureHook`] logs it
//!   with its call chain and, when it ends the process, latches the pipeline
//!   so nothing else is written.
//! - Explicitly caught: the application holds an error and hands it to
//!   [`ExceptionLogger::exception`]. The chain comes from the error itself
//!   (see [`Traced`] and [`catch_panic`]).

use crate::context::LogContext;
use crate::frames::{self, CallChainFrame};
use crate::record::{ExceptionPayload, LogPipeline, LogRecord, RecordOrigin, Severity};
use crate::stack_trace::{self, TRACEBACK_HEADER};
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Exit code used when an interrupt is delegated to the default behaviour.
pub const INTERRUPT_EXIT_CODE: i32 = 130;

const MAIN_THREAD: &str = "main";

thread_local! {
    /// Panics inside these scopes are not reported at all.
    static QUIET_DEPTH: Cell<usize> = const { Cell::new(0) };

    /// Panics inside these scopes are stashed for `catch_panic`.
    static CATCH_DEPTH: Cell<usize> = const { Cell::new(0) };

    static LAST_PANIC: RefCell<Option<CaughtPanic>> = const { RefCell::new(None) };
}

struct ScopeGuard(&'static std::thread::LocalKey<Cell<usize>>);

impl ScopeGuard {
    fn enter(key: &'static std::thread::LocalKey<Cell<usize>>) -> Self {
        key.with(|depth| depth.set(depth.get() + 1));
        Self(key)
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let _ = self
            .0
            .try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn in_scope(key: &'static std::thread::LocalKey<Cell<usize>>) -> bool {
    key.try_with(|depth| depth.get() > 0).unwrap_or(false)
}

/// Run `f`, catching a panic without reporting it anywhere.
///
/// Used for user code that runs while a chain is being built, such as
/// `Debug` impls of bound locals.
pub(crate) fn quiet_unwind<R>(f: impl FnOnce() -> R) -> thread::Result<R> {
    let _scope = ScopeGuard::enter(&QUIET_DEPTH);
    panic::catch_unwind(AssertUnwindSafe(f))
}

/// Extract the message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

// ============================================================================
// Uncaught failures
// ============================================================================

/// What reached the top of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Panic,
    Interrupt,
    /// An error value, named by its type
    Error(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Panic => write!(f, "panic"),
            FailureKind::Interrupt => write!(f, "interrupt"),
            FailureKind::Error(type_name) => write!(f, "{}", type_name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UncaughtFailure {
    pub kind: FailureKind,
    pub value: String,
    /// Outermost frame first
    pub chain: Vec<CallChainFrame>,
    /// Failing thread, `None` for the main thread
    pub thread: Option<String>,
    /// Whether the process ends because of this failure
    pub terminal: bool,
}

impl UncaughtFailure {
    /// A failure on the main thread that ends the process.
    pub fn new(kind: FailureKind, value: impl Into<String>, chain: Vec<CallChainFrame>) -> Self {
        Self {
            kind,
            value: value.into(),
            chain,
            thread: None,
            terminal: true,
        }
    }

    pub fn interrupt() -> Self {
        Self::new(FailureKind::Interrupt, "interrupted", Vec::new())
    }

    /// Builder: mark the failure as raised on a named thread
    pub fn on_thread(mut self, name: impl Into<String>, terminal: bool) -> Self {
        self.thread = Some(name.into());
        self.terminal = terminal;
        self
    }
}

/// What the hook did with an uncaught failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Nothing logged; the caller should run the default behaviour
    Delegated,
    Logged { latched: bool },
    /// Dropped because an earlier terminal failure already latched
    Ignored,
}

/// Logs uncaught failures and latches the pipeline on terminal ones.
pub struct FailureHook {
    context: Arc<LogContext>,
    pipeline: Arc<dyn LogPipeline>,
    latched: AtomicBool,
}

impl FailureHook {
    pub fn new(context: Arc<LogContext>, pipeline: Arc<dyn LogPipeline>) -> Self {
        Self {
            context,
            pipeline,
            latched: AtomicBool::new(false),
        }
    }

    pub fn is_latched(&self) -> bool {
        self.latched.load(Ordering::SeqCst)
    }

    /// Log an uncaught failure.
    ///
    /// Interrupts are delegated untouched. A terminal failure disables the
    /// pipeline after its record is submitted; once latched, every later
    /// failure is ignored.
    pub fn on_uncaught(&self, failure: UncaughtFailure) -> Disposition {
        if failure.kind == FailureKind::Interrupt {
            return Disposition::Delegated;
        }
        if self.is_latched() {
            return Disposition::Ignored;
        }

        let header = match (&failure.thread, failure.terminal) {
            (Some(name), false) => format!("Uncaught exception in thread '{}':", name),
            _ => "Uncaught exception:".to_string(),
        };
        let rendered = stack_trace::render(&failure.chain, self.context.full_context());
        let record = LogRecord::new(
            Severity::Error,
            RecordOrigin::Uncaught,
            traceback_message(&header, &rendered),
        )
        .with_exception(ExceptionPayload {
            kind: failure.kind.to_string(),
            value: failure.value,
            rendered_chain: rendered,
        });
        self.pipeline.submit(record);

        if !failure.terminal {
            return Disposition::Logged { latched: false };
        }
        if !self.latched.swap(true, Ordering::SeqCst) {
            self.pipeline.disable();
        }
        Disposition::Logged { latched: true }
    }

    /// Report an error returned out of `main` as a terminal failure.
    pub fn report_error(&self, error: &dyn ErrorContext) -> Disposition {
        self.on_uncaught(UncaughtFailure::new(
            FailureKind::Error(error.kind()),
            error.value(),
            error.chain().to_vec(),
        ))
    }

    /// Replace the process-wide panic hook with this one.
    pub fn install(self: &Arc<Self>) {
        let hook = Arc::clone(self);
        panic::set_hook(Box::new(move |info| {
            hook.handle_panic(info.payload(), info.location());
        }));
        tracing::debug!("panic hook installed");
    }

    /// Register a Ctrl+C handler that exits with [`INTERRUPT_EXIT_CODE`].
    pub fn install_interrupt_handler(self: &Arc<Self>) -> Result<(), ctrlc::Error> {
        let hook = Arc::clone(self);
        ctrlc::set_handler(move || {
            if hook.on_uncaught(UncaughtFailure::interrupt()) == Disposition::Delegated {
                std::process::exit(INTERRUPT_EXIT_CODE);
            }
        })
    }

    fn handle_panic(&self, payload: &(dyn Any + Send), location: Option<&Location<'_>>) {
        if in_scope(&QUIET_DEPTH) {
            return;
        }

        let value = panic_message(payload);
        let chain = self.chain_at(location);

        if in_scope(&CATCH_DEPTH) {
            let _ = LAST_PANIC.try_with(|last| {
                if let Ok(mut last) = last.try_borrow_mut() {
                    *last = Some(CaughtPanic {
                        message: value,
                        chain,
                    });
                }
            });
            return;
        }

        let name = thread::current().name().map(str::to_string);
        let failure = match name {
            Some(name) if name == MAIN_THREAD => {
                UncaughtFailure::new(FailureKind::Panic, value, chain)
            }
            Some(name) => {
                UncaughtFailure::new(FailureKind::Panic, value, chain).on_thread(name, false)
            }
            None => UncaughtFailure::new(FailureKind::Panic, value, chain)
                .on_thread("<unnamed>", false),
        };
        self.on_uncaught(failure);
    }

    fn chain_at(&self, location: Option<&Location<'_>>) -> Vec<CallChainFrame> {
        let mut chain = frames::current_chain();
        if chain.is_empty() && self.context.uses_backtrace_fallback() {
            chain = stack_trace::chain_from_backtrace(&Backtrace::force_capture());
        }
        if let Some(location) = location {
            frames::attach_failure_site(&mut chain, location.file(), location.line());
        }
        chain
    }
}

impl fmt::Debug for FailureHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureHook")
            .field("context", &self.context)
            .field("latched", &self.is_latched())
            .finish()
    }
}

fn traceback_message(message: &str, rendered: &str) -> String {
    format!("{}\n{}\n{}", message, TRACEBACK_HEADER, rendered)
}

// ============================================================================
// Caught failures
// ============================================================================

/// An error that knows the call chain it was raised in.
pub trait ErrorContext {
    /// Short name of the error type
    fn kind(&self) -> String;

    fn value(&self) -> String;

    /// Outermost frame first
    fn chain(&self) -> &[CallChainFrame];
}

/// An error paired with the call chain captured where it was created.
///
/// Converting with `?` captures the chain at the conversion point, which
/// is the innermost function that saw the error. Propagating an existing
/// `Traced<E>` further keeps that chain.
pub struct Traced<E> {
    error: E,
    chain: Vec<CallChainFrame>,
}

impl<E> Traced<E> {
    #[track_caller]
    pub fn new(error: E) -> Self {
        let location = Location::caller();
        let mut chain = frames::current_chain();
        frames::attach_failure_site(&mut chain, location.file(), location.line());
        Self { error, chain }
    }

    pub fn error(&self) -> &E {
        &self.error
    }

    pub fn into_inner(self) -> E {
        self.error
    }
}

impl<E> From<E> for Traced<E> {
    #[track_caller]
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl<E: fmt::Display> ErrorContext for Traced<E> {
    fn kind(&self) -> String {
        short_type_name::<E>()
    }

    fn value(&self) -> String {
        self.error.to_string()
    }

    fn chain(&self) -> &[CallChainFrame] {
        &self.chain
    }
}

impl<E: fmt::Display> fmt::Display for Traced<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<E: fmt::Debug> fmt::Debug for Traced<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Traced")
            .field("error", &self.error)
            .field("frames", &self.chain.len())
            .finish()
    }
}

impl<E: std::error::Error + 'static> std::error::Error for Traced<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// `core::num::error::ParseIntError` → `ParseIntError`
fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// A panic caught by [`catch_panic`].
#[derive(Debug, Clone)]
pub struct CaughtPanic {
    pub message: String,
    pub chain: Vec<CallChainFrame>,
}

impl ErrorContext for CaughtPanic {
    fn kind(&self) -> String {
        "panic".to_string()
    }

    fn value(&self) -> String {
        self.message.clone()
    }

    fn chain(&self) -> &[CallChainFrame] {
        &self.chain
    }
}

impl fmt::Display for CaughtPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panicked: {}", self.message)
    }
}

impl std::error::Error for CaughtPanic {}

/// Run `f`, turning a panic into a [`CaughtPanic`] instead of reporting it.
///
/// With the failure hook installed, the chain is the one at the panic
/// site. Otherwise only the frames still tracked after unwinding are kept.
pub fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, CaughtPanic> {
    let result = {
        let _scope = ScopeGuard::enter(&CATCH_DEPTH);
        panic::catch_unwind(AssertUnwindSafe(f))
    };

    result.map_err(|payload| {
        let stashed = LAST_PANIC
            .try_with(|last| last.try_borrow_mut().ok().and_then(|mut last| last.take()))
            .ok()
            .flatten();
        stashed.unwrap_or_else(|| CaughtPanic {
            message: panic_message(&*payload),
            chain: frames::current_chain(),
        })
    })
}

/// Logs explicitly caught failures with their call chain.
#[derive(Clone)]
pub struct ExceptionLogger {
    context: Arc<LogContext>,
    pipeline: Arc<dyn LogPipeline>,
}

impl ExceptionLogger {
    pub fn new(context: Arc<LogContext>, pipeline: Arc<dyn LogPipeline>) -> Self {
        Self { context, pipeline }
    }

    /// Log `message` at Error severity, followed by the error's call chain.
    ///
    /// Without an error only the message is logged.
    pub fn exception(&self, message: impl fmt::Display, error: Option<&dyn ErrorContext>) {
        self.submit(message, error, self.context.full_context());
    }

    /// Like [`exception`](Self::exception), always including locals.
    pub fn log_with_full_context(&self, message: impl fmt::Display, error: &dyn ErrorContext) {
        self.submit(message, Some(error), true);
    }

    fn submit(
        &self,
        message: impl fmt::Display,
        error: Option<&dyn ErrorContext>,
        full_context: bool,
    ) {
        let message = message.to_string();
        let record = match error {
            Some(error) => {
                let rendered = stack_trace::render(error.chain(), full_context);
                LogRecord::new(
                    Severity::Error,
                    RecordOrigin::Caught,
                    traceback_message(&message, &rendered),
                )
                .with_exception(ExceptionPayload {
                    kind: error.kind(),
                    value: error.value(),
                    rendered_chain: rendered,
                })
            }
            None => LogRecord::new(Severity::Error, RecordOrigin::Caught, message),
        };
        self.pipeline.submit(record);
    }
}

impl fmt::Debug for ExceptionLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionLogger")
            .field("context", &self.context)
            .finish()
    }
}
