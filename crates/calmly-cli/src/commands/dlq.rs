use calmly_core::{Engine, OpId};

use crate::commands::common::{format_dead_letter_lines, normalize_identifier};
use crate::error::CliError;

pub fn run_list(engine: &Engine, as_json: bool) -> Result<(), CliError> {
    let entries = engine.dead_letters().list()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No dead-lettered operations.");
        return Ok(());
    }

    for line in format_dead_letter_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_replay(engine: &Engine, id: &str) -> Result<(), CliError> {
    let op_id = parse_op_id(id)?;
    let entry = engine.dead_letters().replay(&op_id)?;
    println!("{}", entry.id);
    Ok(())
}

pub fn run_discard(engine: &Engine, id: &str) -> Result<(), CliError> {
    let op_id = parse_op_id(id)?;
    engine.dead_letters().discard(&op_id)?;
    println!("{op_id}");
    Ok(())
}

pub fn parse_op_id(id: &str) -> Result<OpId, CliError> {
    let id = normalize_identifier(id)?;
    id.parse::<OpId>().map_err(|_| CliError::NotFound(id))
}
