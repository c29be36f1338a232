use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use devcollab_server::shutdown::{ServiceTask, ShutdownCoordinator};
use devcollab_settings::Settings;
use devcollab_store::{schema, Database};
use devcollab_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Debug, Parser)]
#[command(name = "devcollab", about = "Kanban board and habit tracking services")]
struct Args {
    /// Settings file; defaults to ~/.devcollab/settings.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the board service (REST, Pomodoro logs, live sync).
    Serve,
    /// Run the habit tracking service.
    Habitus,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = match &args.config {
        Some(path) => devcollab_settings::load_settings_from_path(path),
        None => devcollab_settings::load_settings(),
    }
    .context("failed to load settings")?;

    let telemetry = init_telemetry(TelemetryConfig::from_levels(
        &settings.telemetry.log_level,
        &settings.telemetry.module_levels,
        settings.telemetry.log_to_sqlite,
        devcollab_settings::resolve_path(&settings.telemetry.log_db_path),
    ));

    let coordinator = ShutdownCoordinator::new(shutdown_grace(&settings));
    let tasks = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let path = devcollab_settings::resolve_path(&settings.board.database_path);
            let db = Database::open(&path, schema::BOARD)
                .with_context(|| format!("failed to open {}", path.display()))?;
            let config = devcollab_server::ServerConfig::from_settings(&settings);
            let handle = devcollab_server::start(config, db, telemetry.logs(), coordinator.token())
                .await
                .context("failed to start board service")?;
            tracing::info!(port = handle.port, "board service ready");
            handle.into_tasks()
        }
        Command::Habitus => {
            let path = devcollab_settings::resolve_path(&settings.habitus.database_path);
            let db = Database::open(&path, schema::HABITUS)
                .with_context(|| format!("failed to open {}", path.display()))?;
            let config = habitus_server::HabitusConfig::from_settings(&settings);
            let handle = habitus_server::start(config, db, coordinator.token())
                .await
                .context("failed to start habitus service")?;
            tracing::info!(port = handle.port, "habitus service ready");
            vec![ServiceTask::new("http", handle.handle)]
        }
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");

    let report = coordinator.drain(tasks).await;
    if report.is_clean() {
        tracing::info!(stopped = report.finished.len(), "shutdown complete");
    } else {
        tracing::warn!(aborted = ?report.aborted, "shutdown forced");
    }
    Ok(())
}

fn shutdown_grace(settings: &Settings) -> Duration {
    Duration::from_secs(settings.server.shutdown_timeout_secs)
}
