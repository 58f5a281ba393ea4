//! Session metadata and the read-only history provider seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::message::ContextMessage;

/// What kind of session a history belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// An interactive conversation with a person
    #[default]
    Conversation,
    /// An unattended scheduled loop run
    Loop,
}

/// Session metadata, owned by the surrounding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSession {
    pub id: String,
    pub kind: SessionKind,
    #[serde(default)]
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ContextSession {
    pub fn new(id: impl Into<String>, kind: SessionKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            status: "active".into(),
            created_at: now,
            updated_at: now,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Read-only access to session metadata and message logs.
#[async_trait]
pub trait SessionHistoryProvider: Send + Sync {
    /// Look up a session. `Ok(None)` when the id is unknown.
    async fn get_session(&self, id: &str) -> Result<Option<ContextSession>, SessionError>;

    /// The full, unfiltered, chronologically ordered message log.
    async fn get_history(&self, id: &str) -> Result<Vec<ContextMessage>, SessionError>;
}
