//! Call-chain rendering.
//!
//! [`render`] turns a failure's call chain into traceback text, one
//! `File "...", line N, in f` entry per frame, optionally followed by each
//! frame's locals. It runs inside the panic hook, so it performs no I/O and
//! has no failure path of its own: every value it prints was rendered to
//! text when it was captured.
//!
//! When a thread fails without any tracked frames, the chain can instead be
//! recovered from a `std::backtrace::Backtrace` with [`chain_from_backtrace`].

use crate::frames::{CallChainFrame, SourceLocation};
use once_cell::sync::Lazy;
use regex::Regex;
use std::backtrace::Backtrace;
use std::fmt::Write as _;

/// Placeholder for a missing file or function name.
pub const UNKNOWN: &str = "<unknown>";

/// Header line placed before a rendered chain in log messages.
pub const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

/// Prefix of each rendered local binding.
const LOCAL_PREFIX: &str = "     |-> ";

static SYMBOL_HASH: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"::h[0-9a-f]{16}$").ok());

// ============================================================================
// Rendering
// ============================================================================

/// Render a call chain (outermost frame first) as traceback text.
///
/// Each frame produces exactly one entry, in input order. With
/// `full_context`, the frame's locals follow its entry as
/// `     |-> name = value` lines. An empty chain renders as an empty string.
pub fn render(chain: &[CallChainFrame], full_context: bool) -> String {
    let mut out = String::new();
    for frame in chain {
        write_entry(&mut out, frame, full_context);
    }
    out
}

fn write_entry(out: &mut String, frame: &CallChainFrame, full_context: bool) {
    let location = &frame.location;
    // Writing into a String cannot fail.
    let _ = writeln!(
        out,
        "  File \"{}\", line {}, in {}",
        or_unknown(&location.file),
        location.line,
        or_unknown(&location.function)
    );

    if full_context {
        for local in &frame.locals {
            let _ = writeln!(out, "{}{} = {}", LOCAL_PREFIX, local.name, local.value);
        }
    }
}

fn or_unknown(text: &str) -> &str {
    if text.trim().is_empty() {
        UNKNOWN
    } else {
        text
    }
}

// ============================================================================
// Backtrace fallback
// ============================================================================

/// Recover a call chain from a captured backtrace.
///
/// Returns an empty chain when the backtrace is disabled or unsupported.
pub fn chain_from_backtrace(backtrace: &Backtrace) -> Vec<CallChainFrame> {
    parse_backtrace(&backtrace.to_string())
}

/// Parse std backtrace text into a call chain, outermost frame first.
///
/// Runtime and standard-library frames and frames without a source location
/// are dropped. Locals are never available from a backtrace.
pub fn parse_backtrace(text: &str) -> Vec<CallChainFrame> {
    let mut frames = Vec::new();
    let mut pending: Option<String> = None;

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(function) = parse_symbol_line(trimmed) {
            pending = Some(function);
            continue;
        }

        if let Some(loc) = trimmed.strip_prefix("at ") {
            let Some(function) = pending.take() else {
                continue;
            };
            if let Some((file, line_no)) = parse_location(loc) {
                if !is_framework_frame(&function, &file) {
                    frames.push(CallChainFrame::new(SourceLocation::new(
                        file, line_no, function,
                    )));
                }
            }
        }
    }

    // Backtraces list the innermost frame first.
    frames.reverse();
    frames
}

/// Parse a `  12: crate::module::function` line into the function name.
fn parse_symbol_line(line: &str) -> Option<String> {
    let (num_part, func_part) = line.split_once(':')?;
    let num_part = num_part.trim();
    if num_part.is_empty() || !num_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let function = func_part.trim();
    if function.is_empty() {
        return None;
    }

    let function = match SYMBOL_HASH.as_ref() {
        Some(re) => re.replace(function, "").into_owned(),
        None => function.to_string(),
    };
    Some(function)
}

/// Parse `path/to/file.rs:10:5` (column optional) into file and line.
fn parse_location(loc: &str) -> Option<(String, u32)> {
    let parts: Vec<&str> = loc.trim().rsplitn(3, ':').collect();
    match parts.as_slice() {
        [col, line, file] if col.parse::<u32>().is_ok() => {
            Some((file.to_string(), line.parse().ok()?))
        }
        [line, rest @ ..] if !rest.is_empty() => {
            let line = line.parse().ok()?;
            let file: Vec<&str> = rest.iter().rev().copied().collect();
            Some((file.join(":"), line))
        }
        _ => None,
    }
}

fn is_framework_frame(function: &str, file: &str) -> bool {
    file.contains("/rustc/")
        || file.contains(".cargo/registry")
        || file.contains("/library/std/")
        || file.contains("/library/core/")
        || function.starts_with("std::")
        || function.starts_with("core::")
        || function.starts_with("alloc::")
        || function.starts_with("<std::")
        || function.starts_with("<core::")
        || function.starts_with("<alloc::")
        || function.starts_with("rust_begin_unwind")
        || function.starts_with("__rust")
        || function.starts_with("logcatch::")
}
