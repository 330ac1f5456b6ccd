//! CLI command definitions for taskdesk
//!
//! The main entry point is the `Cli` struct which contains subcommands.

use clap::{Args, Parser, Subcommand};

/// Research task board backend and maintenance tools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Path to media directory (overrides config)
    #[arg(short, long, global = true)]
    pub media_dir: Option<String>,

    /// Root directory for research exports (overrides config)
    #[arg(long, global = true)]
    pub export_dir: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the export and deadline timers until interrupted (default)
    Serve,

    /// Run one deadline sweep and print the report
    Sweep,

    /// Run the batch research export once and print the summary
    Export,

    /// Write the research export for a single user
    ExportUser(ExportUserArgs),
}

/// Arguments for the export-user subcommand
#[derive(Args, Debug)]
pub struct ExportUserArgs {
    /// Id of the user to export
    #[arg(long)]
    pub user_id: i64,
}
