//! Shared logging context.
//!
//! Settings that are fixed at bootstrap and read on every failure. The
//! context is passed explicitly (as `Arc<LogContext>`) to the failure hook
//! and the exception logger instead of living in a global.

use std::sync::atomic::{AtomicBool, Ordering};

/// Settings read by the failure hook and the exception logger.
#[derive(Debug)]
pub struct LogContext {
    /// Include each frame's locals in rendered call chains
    full_context: AtomicBool,

    /// Recover the chain from a backtrace when no frames are tracked
    backtrace_fallback: AtomicBool,
}

impl LogContext {
    pub fn new(full_context: bool) -> Self {
        Self {
            full_context: AtomicBool::new(full_context),
            backtrace_fallback: AtomicBool::new(true),
        }
    }

    /// Builder: set backtrace fallback
    pub fn backtrace_fallback(self, enabled: bool) -> Self {
        self.backtrace_fallback.store(enabled, Ordering::Relaxed);
        self
    }

    pub fn full_context(&self) -> bool {
        self.full_context.load(Ordering::Relaxed)
    }

    pub fn set_full_context(&self, enabled: bool) {
        self.full_context.store(enabled, Ordering::Relaxed);
    }

    pub fn uses_backtrace_fallback(&self) -> bool {
        self.backtrace_fallback.load(Ordering::Relaxed)
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::new(false)
    }
}
