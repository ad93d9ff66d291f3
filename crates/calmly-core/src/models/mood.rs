//! Mood entry model

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{Entity, EntityType};

/// Lowest accepted mood score
pub const MIN_SCORE: u8 = 1;
/// Highest accepted mood score
pub const MAX_SCORE: u8 = 10;

/// A single mood check-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodEntry {
    /// Self-reported score, 1 (worst) to 10 (best)
    pub score: u8,
    /// Free-form note, may contain #tags
    #[serde(default)]
    pub note: Option<String>,
    /// When the mood was felt (Unix ms), distinct from when it was saved
    pub recorded_at: i64,
}

impl MoodEntry {
    /// Create a mood entry recorded now
    #[must_use]
    pub fn new(score: u8, note: Option<String>) -> Self {
        Self {
            score,
            note,
            recorded_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Extract #tags from the note
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        self.note.as_deref().map(extract_tags).unwrap_or_default()
    }
}

impl Entity for MoodEntry {
    const TYPE: EntityType = EntityType::MoodEntry;

    fn validate(&self) -> Result<(), String> {
        if !(MIN_SCORE..=MAX_SCORE).contains(&self.score) {
            return Err(format!(
                "mood score {} is outside {MIN_SCORE}..={MAX_SCORE}",
                self.score
            ));
        }
        Ok(())
    }
}

/// Extract #tags from text
///
/// Valid tags match the pattern: `#[a-zA-Z][a-zA-Z0-9_-]*`
/// Tags are returned in lowercase, deduplicated, and sorted.
///
/// # Examples
///
/// ```
/// use calmly_core::models::extract_tags;
///
/// let tags = extract_tags("Slept badly #sleep, long walk #Outdoors");
/// assert_eq!(tags, vec!["outdoors".to_string(), "sleep".to_string()]);
/// ```
#[must_use]
pub fn extract_tags(text: &str) -> Vec<String> {
    let re = Regex::new(r"#([a-zA-Z][a-zA-Z0-9_-]*)").expect("Invalid regex");
    let mut tags = re
        .captures_iter(text)
        .map(|cap| cap[1].to_lowercase())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    tags.sort();
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_score_bounds() {
        assert!(MoodEntry::new(1, None).validate().is_ok());
        assert!(MoodEntry::new(10, None).validate().is_ok());
        assert!(MoodEntry::new(0, None).validate().is_err());
        assert!(MoodEntry::new(11, None).validate().is_err());
    }

    #[test]
    fn tags_come_from_note() {
        let entry = MoodEntry::new(6, Some("#Work was fine, #work #gym".to_string()));
        assert_eq!(entry.tags(), vec!["gym", "work"]);
        assert!(MoodEntry::new(6, None).tags().is_empty());
    }

    #[test]
    fn extract_tags_ignores_numeric_prefix() {
        assert!(extract_tags("#123 #456test").is_empty());
    }

    #[test]
    fn missing_note_deserializes_as_none() {
        let entry: MoodEntry =
            serde_json::from_value(serde_json::json!({ "score": 4, "recorded_at": 1 })).unwrap();
        assert_eq!(entry.note, None);
    }
}
