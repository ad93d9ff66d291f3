//! Data models for Calmly

mod entity;
mod journal;
mod mood;
mod operation;
mod record;

pub use entity::{Entity, EntityType, RecordId};
pub use journal::JournalEntry;
pub use mood::{extract_tags, MoodEntry, MAX_SCORE, MIN_SCORE};
pub use operation::{
    DeadLetterEntry, FailureKind, FailureReason, OpId, OperationKind, OutboxEntry,
};
pub(crate) use record::RawRecord;
pub use record::{LocalRecord, SyncedRecord};
