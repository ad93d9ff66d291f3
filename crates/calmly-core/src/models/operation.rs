//! Outbox and dead-letter entries

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{EntityType, RecordId};

/// Client-generated operation id, sent to the backend as `clientOpId`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpId(Uuid);

impl OpId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OpId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OpId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of mutation an outbox entry carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation kind: {other}")),
        }
    }
}

/// A pending operation awaiting acknowledgment from the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OpId,
    /// Insertion order; FIFO per record follows this
    pub seq: i64,
    pub entity_type: EntityType,
    pub record_id: RecordId,
    pub kind: OperationKind,
    /// Payload snapshot at enqueue time (`null` for deletes)
    pub payload: serde_json::Value,
    pub attempt_count: u32,
    pub created_at: i64,
    pub last_attempt_at: Option<i64>,
    pub next_retry_at: i64,
    pub last_error: Option<String>,
}

/// Why an entry left the outbox without being acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Backend refused the payload (4xx validation)
    Validation,
    /// Backend refused the caller (401/403)
    Authorization,
    /// Retryable failures exhausted the retry budget
    RetriesExhausted,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validation" => Ok(Self::Validation),
            "authorization" => Ok(Self::Authorization),
            "retries_exhausted" => Ok(Self::RetriesExhausted),
            other => Err(format!("unknown failure kind: {other}")),
        }
    }
}

/// Terminal failure attached to a dead-lettered entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// An operation parked for manual replay or discard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    #[serde(flatten)]
    pub entry: OutboxEntry,
    pub reason: FailureReason,
    pub moved_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_kind_parses_its_own_labels() {
        for kind in [
            OperationKind::Create,
            OperationKind::Update,
            OperationKind::Delete,
        ] {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
    }

    #[test]
    fn failure_reason_display_includes_kind() {
        let reason = FailureReason::new(FailureKind::Validation, "score out of range");
        assert_eq!(reason.to_string(), "validation: score out of range");
    }
}
