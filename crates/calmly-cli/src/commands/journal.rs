use calmly_core::{Engine, Entity, JournalEntry};

use crate::commands::common::{
    format_journal_lines, journal_to_list_item, resolve_body, resolve_record, JournalListItem,
};
use crate::error::CliError;

pub fn run_add(engine: &Engine, title: &str, body_parts: &[String]) -> Result<(), CliError> {
    let body = resolve_body(body_parts)?;
    let entry = JournalEntry::new(title.trim(), body);
    entry.validate().map_err(CliError::InvalidEntry)?;

    let created = engine.hook::<JournalEntry>().create(entry)?;
    println!("{}", created.id);
    Ok(())
}

pub fn run_list(engine: &Engine, limit: usize, as_json: bool) -> Result<(), CliError> {
    let mut records = engine.hook::<JournalEntry>().list()?;
    records.truncate(limit);

    if as_json {
        let json_items = records
            .iter()
            .map(journal_to_list_item)
            .collect::<Vec<JournalListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_journal_lines(&records) {
            println!("{line}");
        }
    }

    Ok(())
}

pub fn run_delete(engine: &Engine, id: &str) -> Result<(), CliError> {
    let journal = engine.hook::<JournalEntry>();
    let record = resolve_record(&journal, id)?;
    journal.delete(&record.id)?;
    println!("{}", record.id);
    Ok(())
}
