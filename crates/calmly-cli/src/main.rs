//! Calmly CLI - mood and journal tracking from the terminal
//!
//! Every write lands in the local database first; `sync` and `watch` push it
//! to the backend when one is configured.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands, DlqCommands, JournalCommands, MoodCommands};
use crate::commands::common::{open_engine, open_sync_engine, EngineArgs};
use crate::commands::{completions, dlq, journal, mood, sync};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("calmly=info,calmly_core=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let args = EngineArgs {
        db_path: cli.db_path,
        api_url: cli.api_url,
        config: cli.config,
    };

    match cli.command {
        Commands::Mood { command } => {
            let engine = open_engine(&args)?;
            match command {
                MoodCommands::Add { score, note } => mood::run_add(&engine, score, &note)?,
                MoodCommands::List { limit, tag, json } => {
                    mood::run_list(&engine, limit, tag.as_deref(), json)?;
                }
                MoodCommands::Edit { id, score, note } => {
                    mood::run_edit(&engine, &id, score, note)?;
                }
                MoodCommands::Delete { id } => mood::run_delete(&engine, &id)?,
            }
        }
        Commands::Journal { command } => {
            let engine = open_engine(&args)?;
            match command {
                JournalCommands::Add { title, body } => journal::run_add(&engine, &title, &body)?,
                JournalCommands::List { limit, json } => journal::run_list(&engine, limit, json)?,
                JournalCommands::Delete { id } => journal::run_delete(&engine, &id)?,
            }
        }
        Commands::Sync { json } => {
            let engine = open_sync_engine(&args)?;
            sync::run_sync(&engine, json).await?;
        }
        Commands::Watch => {
            let engine = open_sync_engine(&args)?;
            sync::run_watch(&engine).await?;
        }
        Commands::Status { json } => {
            let engine = open_engine(&args)?;
            sync::run_status(&engine, json)?;
        }
        Commands::Dlq { command } => {
            let engine = open_engine(&args)?;
            match command {
                DlqCommands::List { json } => dlq::run_list(&engine, json)?,
                DlqCommands::Replay { id } => dlq::run_replay(&engine, &id)?,
                DlqCommands::Discard { id } => dlq::run_discard(&engine, &id)?,
            }
        }
        Commands::Completions { shell, output } => {
            completions::run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
