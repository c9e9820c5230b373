use std::path::PathBuf;

use clap::{Parser, Subcommand};

use dispatch_server::{admin, config, store::StoreClient};

/// Administrative mutations against a dispatch server's store, run
/// directly against the database — not a network client of the server.
#[derive(Parser)]
#[command(name = "dispatch-admin")]
struct Cli {
    #[arg(long, default_value = "dispatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a task from a directory or .zip archive.
    CreateTask {
        task_id: String,
        source: PathBuf,
    },
    /// Delete a task and its files.
    DeleteTask { task_id: String },
    /// Pause a task so its remaining ligands are no longer leased.
    PauseTask { task_id: String },
    /// Resume a paused task.
    ResumeTask { task_id: String },
    /// Set the shared compute-node password.
    SetPassword { password: String },
    /// Clear all recorded node heartbeats.
    ResetHeartbeats,
    /// Reset every in-flight (`processing`) work item back to `pending`.
    ResetProcessing,
    /// Reset every terminally `failed` work item back to `pending`.
    ResetFailed,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let system_config = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let store = match StoreClient::connect(&system_config.store.database_path).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to open store: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = store.migrate().await {
        eprintln!("failed to run store migrations: {e}");
        std::process::exit(1);
    }

    let result = match cli.command {
        Command::CreateTask { task_id, source } => {
            admin::create_task_from_archive(&store, &system_config.paths, &task_id, &source)
                .await
                .map(|()| "task created".to_string())
        }
        Command::DeleteTask { task_id } => {
            admin::delete_task(&store, &system_config.paths, &task_id)
                .await
                .map(|()| "task deleted".to_string())
        }
        Command::PauseTask { task_id } => admin::pause_task(&store, &task_id)
            .await
            .map(|()| "task paused".to_string()),
        Command::ResumeTask { task_id } => admin::resume_task(&store, &task_id)
            .await
            .map(|()| "task resumed".to_string()),
        Command::SetPassword { password } => admin::set_password(&store, &password)
            .await
            .map(|()| "password updated".to_string()),
        Command::ResetHeartbeats => admin::reset_heartbeats(&store)
            .await
            .map(|n| format!("cleared {n} heartbeat rows")),
        Command::ResetProcessing => admin::reset_processing_to_pending(&store)
            .await
            .map(|n| format!("reset {n} processing work items to pending")),
        Command::ResetFailed => admin::reset_failed_to_pending(&store)
            .await
            .map(|n| format!("reset {n} failed work items to pending")),
    };

    match result {
        Ok(message) => println!("{message}"),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
