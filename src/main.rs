//! taskdesk entry point.

use anyhow::Result;
use clap::Parser;
use std::fs::OpenOptions;
use taskdesk::cli::{Cli, Command};
use taskdesk::config::Config;
use taskdesk::scheduler::{spawn_periodic, start_export_scheduler};
use taskdesk::service::TaskDesk;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on --log option
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match cli.log.as_str() {
        "0" | "off" => {}
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            config
        }
        None => Config::load_or_default(),
    };

    // Override paths from CLI arguments
    if let Some(db_path) = &cli.database {
        config.server.db_path = db_path.into();
    }
    if let Some(media_dir) = &cli.media_dir {
        config.server.media_dir = media_dir.into();
    }
    if let Some(export_dir) = &cli.export_dir {
        config.export.dir = export_dir.into();
    }

    let desk = TaskDesk::open(config)?;

    match cli.command {
        Some(Command::Sweep) => {
            let report = desk.check_deadlines()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some(Command::Export) => {
            let summary = desk.run_research_export()?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Some(Command::ExportUser(args)) => {
            let path = desk.export_user(args.user_id)?;
            println!("{}", path.display());
        }
        Some(Command::Serve) | None => run_server(desk).await?,
    }

    Ok(())
}

/// Run the background timers until Ctrl-C.
async fn run_server(desk: TaskDesk) -> Result<()> {
    info!(
        db = %desk.config.server.db_path.display(),
        exports = %desk.config.export.dir.display(),
        "taskdesk starting"
    );

    let export_job = start_export_scheduler(
        desk.exporter.clone(),
        desk.config.export_interval(),
        desk.config.export.run_on_start,
    )?;

    let sweeper = desk.sweeper.clone();
    let sweep_job = spawn_periodic(
        "deadline_sweep",
        desk.config.sweep_interval(),
        true,
        move || {
            let report = sweeper.sweep()?;
            if !report.is_empty() {
                info!(
                    warned = report.warned_tasks,
                    failed = report.failed_assignments,
                    "deadline sweep"
                );
            }
            Ok(())
        },
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    sweep_job.shutdown().await;
    export_job.shutdown().await;
    Ok(())
}
