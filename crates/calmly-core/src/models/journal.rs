//! Journal entry model

use serde::{Deserialize, Serialize};

use super::{Entity, EntityType};

/// Maximum title length accepted by the backend
pub const MAX_TITLE_CHARS: usize = 200;

/// A free-form journal page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

impl JournalEntry {
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// First line of the body, truncated to `max_len` characters
    #[must_use]
    pub fn preview(&self, max_len: usize) -> String {
        self.body
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(max_len)
            .collect()
    }
}

impl Entity for JournalEntry {
    const TYPE: EntityType = EntityType::JournalEntry;

    fn validate(&self) -> Result<(), String> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err("journal title must not be empty".to_string());
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(format!(
                "journal title exceeds {MAX_TITLE_CHARS} characters"
            ));
        }
        Ok(())
    }
}
