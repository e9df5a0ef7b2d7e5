//! Terminal output for the `logcatch` binary.

use colored::Colorize;

/// Format an error line, with an optional tip on the next line.
pub fn format_error(message: &str, tip: Option<&str>) -> String {
    let mut output = format!("{} {}", "Error:".red().bold(), message);
    if let Some(tip) = tip {
        output.push('\n');
        output.push_str(&format!("{} {}", "Tip:".blue().bold(), tip));
    }
    output
}

/// Describe a child exit code in words
pub fn describe_exit_code(code: i32) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Misuse of shell command",
        101 => "Panicked",
        126 => "Command cannot execute (permission denied)",
        127 => "Command not found",
        130 => "Terminated by Ctrl+C (SIGINT)",
        _ if code > 128 && code < 165 => match code - 128 {
            9 => "Killed (SIGKILL)",
            11 => "Segmentation fault (SIGSEGV)",
            13 => "Broken pipe (SIGPIPE)",
            15 => "Terminated (SIGTERM)",
            _ => "Signal received",
        },
        _ => "Unknown error",
    }
}

/// One-line summary of how a captured command ended.
pub fn format_exit_summary(command: &str, code: i32, lines: usize) -> String {
    let marker = if code == 0 { "✓".green() } else { "●".red() };
    format!(
        "{} {} {} ({}, {} line{} captured)",
        marker,
        command.bold(),
        format!("exited with {}", code).dimmed(),
        describe_exit_code(code),
        lines,
        if lines == 1 { "" } else { "s" }
    )
}
