//! Tracked call frames and their local bindings.
//!
//! Rust cannot walk a live stack and read each frame's locals, so frames
//! that should appear in a failure's call chain register themselves. A
//! [`FrameGuard`] pushes a frame onto a thread-local stack and pops it on
//! drop; locals are recorded with [`FrameGuard::bind`] (or the [`track!`]
//! macro) and rendered to text at that moment.
//!
//! ```ignore
//! use logcatch::{traced_frame, track};
//!
//! fn ratio(total: u64, count: u64) -> u64 {
//!     let frame = traced_frame!(total, count);
//!     let scaled = total * 100;
//!     track!(frame, scaled);
//!     scaled / count
//! }
//! ```
//!
//! When a panic reaches the hook, the chain is a snapshot of this stack.
//! [`crate::hooks::Traced`] takes the same snapshot when an error is created,
//! so the frames survive `?` propagation.
//!
//! [`track!`]: crate::track

use serde::Serialize;
use std::cell::RefCell;
use std::fmt::{self, Write as _};
use std::marker::PhantomData;

/// Shown in place of a value whose `Debug` implementation panicked or failed.
pub const UNREPRESENTABLE: &str = "<unrepresentable>";

/// Rendered values longer than this are cut short.
pub const MAX_VALUE_LEN: usize = 500;

thread_local! {
    static FRAME_STACK: RefCell<Vec<CallChainFrame>> = const { RefCell::new(Vec::new()) };
}

/// Where a frame is executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub function: String,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32, function: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            function: function.into(),
        }
    }
}

/// One local variable of a frame, already rendered to text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalBinding {
    pub name: String,
    pub value: String,
}

/// One entry in a failure's call chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallChainFrame {
    pub location: SourceLocation,
    pub locals: Vec<LocalBinding>,
}

impl CallChainFrame {
    pub fn new(location: SourceLocation) -> Self {
        Self {
            location,
            locals: Vec::new(),
        }
    }

    /// Builder: add a pre-rendered local
    pub fn with_local(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_local(name.into(), value.into());
        self
    }

    /// Insert or replace a local, keeping first-bound order.
    fn set_local(&mut self, name: String, value: String) {
        match self.locals.iter_mut().find(|l| l.name == name) {
            Some(local) => local.value = value,
            None => self.locals.push(LocalBinding { name, value }),
        }
    }
}

/// Render a value with its `Debug` implementation.
///
/// Never panics: a panicking or failing implementation yields
/// [`UNREPRESENTABLE`]. Output longer than [`MAX_VALUE_LEN`] characters is
/// truncated with `...`.
pub fn render_value<T: fmt::Debug + ?Sized>(value: &T) -> String {
    let rendered = crate::hooks::quiet_unwind(|| {
        let mut out = String::new();
        write!(out, "{:?}", value).map(|_| out)
    });

    match rendered {
        Ok(Ok(text)) => truncate(text, MAX_VALUE_LEN),
        _ => UNREPRESENTABLE.to_string(),
    }
}

fn truncate(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}

/// RAII registration of a frame on the current thread's stack.
///
/// Dropping the guard removes its frame and any frame pushed after it.
/// Guards are bound to the thread that created them.
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct FrameGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl FrameGuard {
    pub fn enter(location: SourceLocation) -> Self {
        let depth = FRAME_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(CallChainFrame::new(location));
            stack.len() - 1
        });
        Self {
            depth,
            _not_send: PhantomData,
        }
    }

    /// Record (or update) a local binding of this frame.
    pub fn bind<T: fmt::Debug + ?Sized>(&self, name: &str, value: &T) -> &Self {
        // Render before borrowing: the value's Debug impl may enter frames itself.
        let value = render_value(value);
        self.with_frame(|frame| frame.set_local(name.to_string(), value));
        self
    }

    /// Move this frame's reported line, e.g. to the statement about to run.
    pub fn set_line(&self, line: u32) -> &Self {
        self.with_frame(|frame| frame.location.line = line);
        self
    }

    fn with_frame(&self, f: impl FnOnce(&mut CallChainFrame)) {
        let _ = FRAME_STACK.try_with(|stack| {
            if let Ok(mut stack) = stack.try_borrow_mut() {
                if let Some(frame) = stack.get_mut(self.depth) {
                    f(frame);
                }
            }
        });
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let _ = FRAME_STACK.try_with(|stack| {
            if let Ok(mut stack) = stack.try_borrow_mut() {
                stack.truncate(self.depth);
            }
        });
    }
}

/// Snapshot of the current thread's tracked frames, outermost first.
///
/// Returns an empty chain if the stack is unavailable (thread teardown).
pub fn current_chain() -> Vec<CallChainFrame> {
    FRAME_STACK
        .try_with(|stack| {
            stack
                .try_borrow()
                .map(|stack| stack.clone())
                .unwrap_or_default()
        })
        .unwrap_or_default()
}

/// Number of frames currently tracked on this thread.
pub fn depth() -> usize {
    FRAME_STACK
        .try_with(|stack| stack.try_borrow().map(|s| s.len()).unwrap_or(0))
        .unwrap_or(0)
}

/// Point the innermost frame at a failure site.
///
/// When the innermost frame is in the same file as the failure, its line
/// is moved to the failure line; otherwise the site is appended as its own
/// frame.
pub fn attach_failure_site(chain: &mut Vec<CallChainFrame>, file: &str, line: u32) {
    let same_file = |other: &str| other.trim_start_matches("./") == file.trim_start_matches("./");
    match chain.last_mut() {
        Some(innermost) if same_file(&innermost.location.file) => innermost.location.line = line,
        _ => chain.push(CallChainFrame::new(SourceLocation::new(
            file,
            line,
            "<failure site>",
        ))),
    }
}

/// Path of the enclosing function, e.g. `my_crate::module::function`.
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        name.strip_suffix("::f").unwrap_or(name)
    }};
}

/// Register the enclosing function as a frame, optionally binding locals.
///
/// Returns a [`FrameGuard`](crate::frames::FrameGuard) that must be kept
/// alive for the rest of the function.
#[macro_export]
macro_rules! traced_frame {
    () => {
        $crate::frames::FrameGuard::enter($crate::frames::SourceLocation::new(
            file!(),
            line!(),
            $crate::function_name!(),
        ))
    };
    ($($local:ident),+ $(,)?) => {{
        let guard = $crate::traced_frame!();
        $( guard.bind(stringify!($local), &$local); )+
        guard
    }};
}

/// Update a frame's line to the current statement and (re)bind locals.
#[macro_export]
macro_rules! track {
    ($guard:expr $(, $local:ident)* $(,)?) => {{
        let guard: &$crate::frames::FrameGuard = &$guard;
        guard.set_line(line!());
        $( guard.bind(stringify!($local), &$local); )*
    }};
}
