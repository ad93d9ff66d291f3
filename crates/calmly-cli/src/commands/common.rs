use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use calmly_core::sync::SyncPhase;
use calmly_core::{
    DeadLetterEntry, Engine, EngineConfig, Entity, EntityHook, JournalEntry, MoodEntry, RecordId,
    SyncStatus, SyncedRecord, SystemClock,
};
use chrono::Utc;
use serde::Serialize;

use crate::error::CliError;

/// Global flags that shape the engine configuration
#[derive(Debug, Default, Clone)]
pub struct EngineArgs {
    pub db_path: Option<PathBuf>,
    pub api_url: Option<String>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct MoodListItem {
    pub id: String,
    pub score: u8,
    pub note: Option<String>,
    pub tags: Vec<String>,
    pub recorded_at: i64,
    pub relative_time: String,
    pub pending_sync: bool,
}

#[derive(Debug, Serialize)]
pub struct JournalListItem {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub updated_at: i64,
    pub relative_time: String,
    pub pending_sync: bool,
}

/// Build the engine configuration: file, then environment, then flags.
pub fn load_config(args: &EngineArgs) -> Result<EngineConfig, CliError> {
    let base = match &args.config {
        Some(path) => EngineConfig::load_from_path(path)?,
        None => EngineConfig::default(),
    };
    let mut config = base.with_env()?;

    if let Some(path) = &args.db_path {
        config.db_path = Some(path.clone());
    }
    if let Some(url) = normalize_content(args.api_url.as_deref().unwrap_or_default()) {
        config.api_url = Some(url);
    }
    if config.db_path.is_none() {
        config.db_path = Some(default_db_path()?);
    }
    config.validate()?;
    Ok(config)
}

pub fn open_engine(args: &EngineArgs) -> Result<Engine, CliError> {
    let config = load_config(args)?;
    tracing::debug!(
        "Opening {}",
        config
            .db_path
            .as_deref()
            .map_or_else(String::new, |path| path.display().to_string())
    );
    Ok(Engine::open(config, Arc::new(SystemClock))?)
}

pub fn open_sync_engine(args: &EngineArgs) -> Result<Engine, CliError> {
    let engine = open_engine(args)?;
    if !engine.is_sync_configured() {
        return Err(CliError::SyncNotConfigured);
    }
    Ok(engine)
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("calmly").join("calmly.db"))
        .ok_or_else(|| CliError::Config("could not resolve a data directory; pass --db-path".into()))
}

/// Find a live record by full ID or unique ID prefix
pub fn resolve_record<T: Entity>(
    hook: &EntityHook<T>,
    query: &str,
) -> Result<SyncedRecord<T>, CliError> {
    let query = normalize_identifier(query)?;
    if let Ok(id) = query.parse::<RecordId>() {
        if let Some(record) = hook.get(&id)? {
            return Ok(record);
        }
    }

    let mut matching = hook
        .list()?
        .into_iter()
        .filter(|record| record.id.as_str().starts_with(&query))
        .collect::<Vec<_>>();

    match matching.len() {
        0 => Err(CliError::NotFound(query)),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|record| short_id(&record.id.as_str()))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn mood_to_list_item(record: &SyncedRecord<MoodEntry>) -> MoodListItem {
    let now_ms = Utc::now().timestamp_millis();
    MoodListItem {
        id: record.id.to_string(),
        score: record.data.score,
        note: record.data.note.clone(),
        tags: record.data.tags(),
        recorded_at: record.data.recorded_at,
        relative_time: format_relative_time(record.data.recorded_at, now_ms),
        pending_sync: record.pending_sync,
    }
}

pub fn journal_to_list_item(record: &SyncedRecord<JournalEntry>) -> JournalListItem {
    let now_ms = Utc::now().timestamp_millis();
    JournalListItem {
        id: record.id.to_string(),
        title: record.data.title.clone(),
        preview: record.data.preview(80),
        updated_at: record.updated_at,
        relative_time: format_relative_time(record.updated_at, now_ms),
        pending_sync: record.pending_sync,
    }
}

pub fn format_mood_lines(records: &[SyncedRecord<MoodEntry>]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let short_id = short_id(&record.id.as_str());
            let bar = score_bar(record.data.score);
            let note = note_preview(record.data.note.as_deref().unwrap_or(""), 40);
            let relative_time = format_relative_time(record.data.recorded_at, now_ms);
            let marker = pending_marker(record.pending_sync);
            format!("{short_id:<13} {marker} {bar}  {note:<40}  {relative_time}")
        })
        .collect()
}

pub fn format_journal_lines(records: &[SyncedRecord<JournalEntry>]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let short_id = short_id(&record.id.as_str());
            let title = note_preview(&record.data.title, 30);
            let preview = note_preview(&record.data.body, 40);
            let relative_time = format_relative_time(record.updated_at, now_ms);
            let marker = pending_marker(record.pending_sync);
            format!("{short_id:<13} {marker} {title:<30}  {preview:<40}  {relative_time}")
        })
        .collect()
}

pub fn format_status_line(status: &SyncStatus) -> String {
    let phase = match status.phase {
        SyncPhase::Idle => "idle".to_string(),
        SyncPhase::Pushing => "pushing".to_string(),
        SyncPhase::Pulling => "pulling".to_string(),
        SyncPhase::Backoff { until } => format!("backoff until {}", format_timestamp(until)),
    };
    let last_synced = status
        .last_synced_at
        .map_or_else(|| "never".to_string(), format_timestamp);
    let mut line = format!(
        "{:<14} pending={:<4} dlq={:<4} last_sync={last_synced}  {phase}",
        status.entity.as_str(),
        status.pending_count,
        status.dead_letter_count,
    );
    if let Some(error) = &status.last_error {
        line.push_str(&format!("\n{:<14} last error: {error}", ""));
    }
    line
}

pub fn format_dead_letter_lines(entries: &[DeadLetterEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|dead| {
            format!(
                "{}  {:<13}  {:<6}  record={}  attempts={}  {}",
                dead.entry.id,
                dead.entry.entity_type.as_str(),
                dead.entry.kind.as_str(),
                short_id(&dead.entry.record_id.as_str()),
                dead.entry.attempt_count,
                dead.reason
            )
        })
        .collect()
}

fn score_bar(score: u8) -> String {
    let filled = usize::from(score);
    format!("{score:>2} {}{}", "#".repeat(filled), ".".repeat(10_usize.saturating_sub(filled)))
}

const fn pending_marker(pending_sync: bool) -> char {
    if pending_sync {
        '*'
    } else {
        ' '
    }
}

pub fn note_preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// Journal body from arguments, piped stdin, or the editor, in that order
pub fn resolve_body(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    if let Some(content) = capture_editor_input()? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input() -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_file_path();
    std::fs::write(&temp_file, "")?;

    let launch_result = launch_editor(&editor, &temp_file);
    let content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) => {
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let mut command = Command::new(program);
            command.args(parts).arg(file_path);

            let status = command.status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

fn create_temp_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("calmly-journal-{}-{now}.md", std::process::id()))
}
