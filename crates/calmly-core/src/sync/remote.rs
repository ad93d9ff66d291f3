//! Contract between the sync manager and a backend.
//!
//! The wire types are camelCase JSON and shared by the HTTP client, the
//! in-memory backend, and the reference server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{EntityType, OpId, OperationKind, OutboxEntry, RecordId};

/// One outbox entry as sent to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOperation {
    pub client_op_id: OpId,
    pub operation_kind: OperationKind,
    pub entity_type: EntityType,
    /// Client id of the target record, echoed back on pull
    pub local_id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl PushOperation {
    pub fn from_entry(entry: &OutboxEntry, server_id: Option<String>) -> Self {
        Self {
            client_op_id: entry.id,
            operation_kind: entry.kind,
            entity_type: entry.entity_type,
            local_id: entry.record_id,
            server_id,
            payload: entry.payload.clone(),
        }
    }
}

/// Why the backend refused a single operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    Validation,
    Authorization,
    /// The backend could not process the operation right now
    Transient,
}

/// Per-operation result of a push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PushOutcome {
    #[serde(rename_all = "camelCase")]
    Accepted {
        client_op_id: OpId,
        #[serde(default)]
        server_id: Option<String>,
        accepted_at: i64,
    },
    #[serde(rename_all = "camelCase")]
    Rejected {
        client_op_id: OpId,
        kind: RejectionKind,
        message: String,
    },
}

impl PushOutcome {
    pub const fn client_op_id(&self) -> &OpId {
        match self {
            Self::Accepted { client_op_id, .. } | Self::Rejected { client_op_id, .. } => {
                client_op_id
            }
        }
    }
}

/// A server version of one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub server_id: String,
    /// Local id of the client that created the record
    #[serde(default)]
    pub client_id: Option<RecordId>,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Server modification time (Unix ms)
    pub updated_at: i64,
    #[serde(default)]
    pub deleted: bool,
}

/// One page of changes since a cursor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullPage {
    pub records: Vec<RemoteRecord>,
    /// Watermark after this page; `None` means the cursor does not move
    #[serde(default)]
    pub next_cursor: Option<String>,
    /// Whether more changes are waiting past `next_cursor`
    #[serde(default)]
    pub has_more: bool,
}

/// Failure of a whole remote call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Request timed out")]
    Timeout,
    #[error("Backend unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request rejected: {0}")]
    Validation(String),
    #[error("Not authorized: {0}")]
    Authorization(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Whether the same request may succeed later.
    ///
    /// An unreadable response is retried too: the request may have been
    /// applied, and `clientOpId` makes a replay safe.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Unavailable { .. } | Self::Transport(_) | Self::InvalidResponse(_)
        )
    }
}

/// A backend able to accept pushed operations and serve changes.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Apply a batch. The result holds one outcome per operation; operations
    /// missing from it count as not acknowledged.
    async fn push(
        &self,
        entity: EntityType,
        operations: Vec<PushOperation>,
    ) -> Result<Vec<PushOutcome>, RemoteError>;

    /// Changes after `cursor` (from the beginning when `None`)
    async fn pull(
        &self,
        entity: EntityType,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<PullPage, RemoteError>;

    /// Cheap reachability check
    async fn health(&self) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn push_outcome_uses_status_tag_and_camel_case() {
        let id = OpId::new();
        let accepted = PushOutcome::Accepted {
            client_op_id: id,
            server_id: Some("srv-1".to_string()),
            accepted_at: 42,
        };
        let value = serde_json::to_value(&accepted).unwrap();
        assert_eq!(value["status"], "accepted");
        assert_eq!(value["clientOpId"], id.to_string());
        assert_eq!(value["acceptedAt"], 42);

        let rejected: PushOutcome = serde_json::from_value(json!({
            "status": "rejected",
            "clientOpId": id.to_string(),
            "kind": "validation",
            "message": "score out of range",
        }))
        .unwrap();
        assert_eq!(rejected.client_op_id(), &id);
    }

    #[test]
    fn pull_page_tolerates_missing_optional_fields() {
        let page: PullPage = serde_json::from_value(json!({
            "records": [{ "serverId": "s", "updatedAt": 3, "deleted": true }]
        }))
        .unwrap();
        assert_eq!(page.next_cursor, None);
        assert!(page.records[0].deleted);
        assert_eq!(page.records[0].client_id, None);
    }

    #[test]
    fn retryability_follows_error_class() {
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::Unavailable {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!RemoteError::Validation("bad".to_string()).is_retryable());
        assert!(!RemoteError::Authorization("expired".to_string()).is_retryable());
    }
}
