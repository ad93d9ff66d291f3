use std::path::PathBuf;

use calmly_core::models::{MAX_SCORE, MIN_SCORE};
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "calmly")]
#[command(about = "Track moods and journal offline, sync when you can")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Backend base URL (overrides `CALMLY_API_URL`)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// JSON engine config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record and review mood check-ins
    Mood {
        #[command(subcommand)]
        command: MoodCommands,
    },
    /// Write and review journal pages
    Journal {
        #[command(subcommand)]
        command: JournalCommands,
    },
    /// Run one sync cycle against the backend
    Sync {
        /// Output the cycle report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing in the background until interrupted
    Watch,
    /// Show pending, dead-lettered and last-sync state per entity type
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and resolve operations the backend refused
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum MoodCommands {
    /// Record a mood
    #[command(alias = "new")]
    Add {
        /// Score from 1 (worst) to 10 (best)
        #[arg(value_parser = score_parser())]
        score: u8,
        /// Optional note; #tags are picked up
        note: Vec<String>,
    },
    /// List recent moods
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Filter entries by tag name
        #[arg(long)]
        tag: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change the score or note of a mood
    Edit {
        /// Entry ID or unique ID prefix
        id: String,
        /// New score
        #[arg(long, value_parser = score_parser())]
        score: Option<u8>,
        /// New note (an empty string clears it)
        #[arg(long)]
        note: Option<String>,
    },
    /// Delete a mood
    Delete {
        /// Entry ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum JournalCommands {
    /// Write a journal page
    #[command(alias = "new")]
    Add {
        /// Page title
        title: String,
        /// Page body (read from stdin or $EDITOR when omitted)
        body: Vec<String>,
    },
    /// List recent journal pages
    List {
        /// Number of pages to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a journal page
    Delete {
        /// Page ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum DlqCommands {
    /// List dead-lettered operations
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Put an operation back in the outbox
    Replay {
        /// Operation ID
        id: String,
    },
    /// Drop an operation for good
    Discard {
        /// Operation ID
        id: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

fn score_parser() -> clap::builder::RangedI64ValueParser<u8> {
    clap::value_parser!(u8).range(i64::from(MIN_SCORE)..=i64::from(MAX_SCORE))
}
