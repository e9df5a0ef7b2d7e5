//! Command-line interface definitions for the `logcatch` tool.

use clap::Parser;
use clap_complete::Shell;
use std::path::PathBuf;

/// Run a command and log everything it prints
#[derive(Parser, Debug)]
#[command(
    name = "logcatch",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("LOGCATCH_GIT_SHA"), ")"),
    about,
    long_about = None
)]
#[command(
    after_help = "EXAMPLES:\n    logcatch -- cargo build\n    logcatch -g -l build.log -- make test\n    logcatch --print-config > ~/.config/logcatch/config.toml"
)]
pub struct Cli {
    /// Command to run, with its arguments
    #[arg(trailing_var_arg = true, value_name = "COMMAND")]
    pub command: Vec<String>,

    /// Logging config file (.toml, .json, .yaml or .yml)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write every file handler to this path
    #[arg(long, short = 'l', value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log every chunk of output as it arrives instead of whole lines
    #[arg(long)]
    pub strict: bool,

    /// Pick each line's level from markers such as `ERROR:` or `[warn]`
    #[arg(long, short = 'g')]
    pub guess_level: bool,

    /// Output the default logging configuration to stdout
    #[arg(long)]
    pub print_config: bool,

    /// Generate shell completions
    #[arg(long, value_enum, value_name = "SHELL")]
    pub completions: Option<Shell>,
}
