//! Entity type registry and record identifiers

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{JournalEntry, MoodEntry};

/// A client-generated local record identifier, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Every synced entity type. Each has its own local table and remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    MoodEntry,
    JournalEntry,
}

impl EntityType {
    /// All entity types in the order the sync manager processes them.
    pub const ALL: [Self; 2] = [Self::MoodEntry, Self::JournalEntry];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MoodEntry => "mood_entry",
            Self::JournalEntry => "journal_entry",
        }
    }

    /// Local table holding records of this type.
    pub const fn table(self) -> &'static str {
        match self {
            Self::MoodEntry => "mood_entries",
            Self::JournalEntry => "journal_entries",
        }
    }

    /// Check that a payload decodes into this entity and passes its domain rules.
    ///
    /// The reference backend uses this to issue deterministic rejections; the
    /// pull path uses the decode half to refuse pages it cannot store.
    pub fn validate(self, payload: &serde_json::Value) -> Result<(), String> {
        match self {
            Self::MoodEntry => decode::<MoodEntry>(payload)?.validate(),
            Self::JournalEntry => decode::<JournalEntry>(payload)?.validate(),
        }
    }

    /// Check only that a payload has the shape of this entity.
    pub fn check_shape(self, payload: &serde_json::Value) -> Result<(), String> {
        match self {
            Self::MoodEntry => decode::<MoodEntry>(payload).map(|_| ()),
            Self::JournalEntry => decode::<JournalEntry>(payload).map(|_| ()),
        }
    }
}

fn decode<T: DeserializeOwned>(payload: &serde_json::Value) -> Result<T, String> {
    serde_json::from_value(payload.clone()).map_err(|error| format!("malformed payload: {error}"))
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|entity| entity.as_str() == s)
            .ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// A domain payload that can be stored locally and synced.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TYPE: EntityType;

    /// Domain rules enforced by the backend. Local writes are not checked.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_unique_and_parses() {
        let id1 = RecordId::new();
        let id2 = RecordId::new();
        assert_ne!(id1, id2);

        let parsed: RecordId = id1.as_str().parse().unwrap();
        assert_eq!(id1, parsed);
    }

    #[test]
    fn entity_type_round_trips_through_str() {
        for entity in EntityType::ALL {
            assert_eq!(entity.as_str().parse::<EntityType>().unwrap(), entity);
        }
        assert!("habit".parse::<EntityType>().is_err());
    }

    #[test]
    fn entity_type_serializes_as_snake_case() {
        let json = serde_json::to_string(&EntityType::MoodEntry).unwrap();
        assert_eq!(json, "\"mood_entry\"");
    }

    #[test]
    fn validate_rejects_malformed_payload() {
        let error = EntityType::MoodEntry
            .validate(&serde_json::json!({ "nope": true }))
            .unwrap_err();
        assert!(error.contains("malformed payload"));
    }
}
