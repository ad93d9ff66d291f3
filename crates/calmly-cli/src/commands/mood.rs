use calmly_core::{Engine, Entity, MoodEntry};

use crate::commands::common::{
    format_mood_lines, mood_to_list_item, normalize_content, resolve_record, MoodListItem,
};
use crate::error::CliError;

pub fn run_add(engine: &Engine, score: u8, note_parts: &[String]) -> Result<(), CliError> {
    let entry = MoodEntry::new(score, normalize_content(&note_parts.join(" ")));
    entry.validate().map_err(CliError::InvalidEntry)?;

    let created = engine.hook::<MoodEntry>().create(entry)?;
    println!("{}", created.id);
    Ok(())
}

pub fn run_list(
    engine: &Engine,
    limit: usize,
    tag: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    let tag = tag.map(|tag| tag.trim_start_matches('#').to_lowercase());
    let mut records = engine
        .hook::<MoodEntry>()
        .query(|record| tag.as_ref().is_none_or(|tag| record.data.tags().contains(tag)))?;
    records.sort_by_key(|record| std::cmp::Reverse(record.data.recorded_at));
    records.truncate(limit);

    if as_json {
        let json_items = records
            .iter()
            .map(mood_to_list_item)
            .collect::<Vec<MoodListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_mood_lines(&records) {
            println!("{line}");
        }
    }

    Ok(())
}

pub fn run_edit(
    engine: &Engine,
    id: &str,
    score: Option<u8>,
    note: Option<String>,
) -> Result<(), CliError> {
    if score.is_none() && note.is_none() {
        return Err(CliError::NothingToEdit);
    }

    let moods = engine.hook::<MoodEntry>();
    let record = resolve_record(&moods, id)?;
    let mut entry = record.data.clone();
    if let Some(score) = score {
        entry.score = score;
    }
    if let Some(note) = note {
        entry.note = normalize_content(&note);
    }
    entry.validate().map_err(CliError::InvalidEntry)?;

    let updated = moods.update(&record.id, entry)?;
    println!("{}", updated.id);
    Ok(())
}

pub fn run_delete(engine: &Engine, id: &str) -> Result<(), CliError> {
    let moods = engine.hook::<MoodEntry>();
    let record = resolve_record(&moods, id)?;
    moods.delete(&record.id)?;
    println!("{}", record.id);
    Ok(())
}
