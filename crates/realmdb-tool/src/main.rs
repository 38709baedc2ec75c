//! `realmdb` - inspect realmdb index files

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "realmdb",
    about = "Inspect realmdb index files",
    version,
    long_about = "Reads realmdb index files without modifying them: summary statistics, record dumps, key lookups and structural verification."
)]
struct Cli {
    /// Set the logging level (overridden by RUST_LOG)
    #[arg(short, long, value_enum, global = true, default_value = "warn")]
    log_level: LogLevel,

    /// Output format
    #[arg(
        short = 'o',
        long,
        value_enum,
        global = true,
        default_value = "text",
        env = "REALMDB_FORMAT"
    )]
    format: OutputFormat,

    /// Expected banner; detected from the file when omitted
    #[arg(short, long, global = true, env = "REALMDB_BANNER")]
    banner: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// How command results are printed.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain text output
    Text,
    /// JSON output
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Show record count, key range and header details
    Stats {
        /// Index file
        path: PathBuf,
    },

    /// Print records in file order
    Dump {
        /// Index file
        path: PathBuf,

        /// Stop after this many records
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Look up one or more keys
    Get {
        /// Index file
        path: PathBuf,

        /// Keys to look up
        #[arg(required = true, allow_negative_numbers = true)]
        keys: Vec<i32>,
    },

    /// Check ordering, duplicates and trailing bytes
    Verify {
        /// Index file
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON on stdout stays parseable
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(Level::from(cli.log_level)).into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let banner = cli.banner.as_deref();
    match cli.command {
        Commands::Stats { path } => commands::stats(&path, banner, cli.format),
        Commands::Dump { path, limit } => commands::dump(&path, banner, limit, cli.format),
        Commands::Get { path, keys } => commands::get(&path, banner, &keys, cli.format),
        Commands::Verify { path } => commands::verify(&path, banner, cli.format),
    }
}
