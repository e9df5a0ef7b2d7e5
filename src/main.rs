use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use std::io::{self, BufRead, BufReader, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;

use logcatch::capture::{CapturePolicy, InterceptingStream};
use logcatch::classify::MarkerClassifier;
use logcatch::cli::Cli;
use logcatch::config::print_default_config;
use logcatch::output::{format_error, format_exit_summary};
use logcatch::record::LogPipeline;
use logcatch::setup::{setup_logging, SetupOptions};

/// Exit code when the command line itself is unusable
const USAGE_EXIT_CODE: i32 = 2;

fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "logcatch", &mut io::stdout());
}

/// Exit code of a finished child, with signals mapped to 128 + signal.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Run the command, passing its stdout through an intercepting stream.
///
/// Returns the child's exit code and the number of lines it printed.
fn run_command(cli: &Cli, pipeline: Arc<dyn LogPipeline>) -> Result<(i32, usize)> {
    let (program, args) = cli.command.split_first().context("No command given")?;

    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to run '{}'", program))?;
    let child_stdout = child
        .stdout
        .take()
        .context("Command stdout was not captured")?;

    let stream = InterceptingStream::new(
        io::stdout(),
        CapturePolicy::new(cli.strict, cli.guess_level),
        MarkerClassifier::new(),
        pipeline,
    );

    let mut reader = BufReader::new(child_stdout);
    let mut line = Vec::new();
    let mut lines = 0;
    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .context("Failed to read command output")?;
        if read == 0 {
            break;
        }
        lines += 1;
        // The line is logged even when our own stdout is gone.
        if let Err(err) = (&stream).write_all(&line) {
            tracing::debug!(error = %err, "could not forward command output");
        }
    }
    if let Err(err) = (&stream).flush() {
        tracing::debug!(error = %err, "could not flush command output");
    }

    let status = child.wait().context("Failed to wait for command")?;
    Ok((exit_code(status), lines))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions
    if let Some(shell) = cli.completions {
        print_completions(shell);
        return Ok(());
    }

    if cli.print_config {
        print_default_config();
        return Ok(());
    }

    if cli.command.is_empty() {
        eprintln!(
            "{}",
            format_error(
                "No command given",
                Some("Pass the command after `--`, e.g. `logcatch -- cargo build`")
            )
        );
        std::process::exit(USAGE_EXIT_CODE);
    }

    let logging = setup_logging(SetupOptions {
        config_path: cli.config.clone(),
        log_path: cli.log_path.clone(),
        strict: cli.strict,
        guess_level: cli.guess_level,
        handle_interrupt: true,
        ..SetupOptions::default()
    })
    .context("Failed to set up logging")?;

    let command_line = cli.command.join(" ");
    let (code, lines) = run_command(&cli, logging.pipeline())?;
    tracing::info!(command = %command_line, code, lines, "command finished");

    eprintln!("{}", format_exit_summary(&command_line, code, lines));
    drop(logging);
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use logcatch::record::{MemoryPipeline, RecordOrigin};

    #[cfg(unix)]
    #[test]
    fn test_exit_code_from_status() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        // Killed by SIGKILL
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_logs_each_line() {
        let cli = Cli::parse_from([
            "logcatch",
            "-g",
            "--",
            "sh",
            "-c",
            "echo 'ERROR: disk full'; echo ok; exit 4",
        ]);
        let pipeline = Arc::new(MemoryPipeline::new());

        let (code, lines) = run_command(&cli, pipeline.clone()).unwrap();
        assert_eq!(code, 4);
        assert_eq!(lines, 2);

        let records = pipeline.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "ERROR: disk full");
        assert_eq!(records[0].severity, logcatch::Severity::Error);
        assert_eq!(records[1].message, "ok");
        assert!(records.iter().all(|r| r.origin == RecordOrigin::Capture));
    }

    #[test]
    fn test_run_command_missing_program() {
        let cli = Cli::parse_from(["logcatch", "--", "logcatch-no-such-program-xyz"]);
        let pipeline = Arc::new(MemoryPipeline::new());
        let err = run_command(&cli, pipeline).unwrap_err();
        assert!(err.to_string().contains("logcatch-no-such-program-xyz"));
    }
}
