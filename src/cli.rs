// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `stax`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stax",
    version,
    about = "Run STAX workflow jobs.",
    long_about = None
)]
pub struct CliArgs {
    /// Job document to run (TOML, or JSON with a `.json` extension).
    #[arg(long, value_name = "PATH")]
    pub job: String,

    /// Service configuration file (TOML).
    ///
    /// Default: `Stax.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Start function, overriding the document's `[job].function`.
    #[arg(long, value_name = "NAME")]
    pub function: Option<String>,

    /// Expression passed to the start function.
    #[arg(long, value_name = "EXPR")]
    pub args: Option<String>,

    /// Maximum number of live STAX-Threads (0 = unlimited).
    #[arg(long, value_name = "N")]
    pub max_threads: Option<u32>,

    /// Let `breakpoint` elements hold their thread.
    #[arg(long)]
    pub breakpoints: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STAX_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate the job, print its functions, but don't run it.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
