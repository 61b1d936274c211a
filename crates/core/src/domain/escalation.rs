use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::ConversationId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EscalationId(pub Uuid);

impl EscalationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    Automatic,
    Manual,
}

impl EscalationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "automatic" => Some(Self::Automatic),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Open,
    Assigned,
    Closed,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Assigned => "assigned",
            Self::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(Self::Open),
            "assigned" => Some(Self::Assigned),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Record of handing a conversation from automation to a human.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: EscalationId,
    pub conversation_id: ConversationId,
    pub reason: String,
    pub kind: EscalationKind,
    pub status: EscalationStatus,
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Escalation {
    pub fn automatic(conversation_id: ConversationId, reason: impl Into<String>) -> Self {
        Self::with_kind(conversation_id, reason, EscalationKind::Automatic)
    }

    pub fn manual(conversation_id: ConversationId, reason: impl Into<String>) -> Self {
        Self::with_kind(conversation_id, reason, EscalationKind::Manual)
    }

    fn with_kind(
        conversation_id: ConversationId,
        reason: impl Into<String>,
        kind: EscalationKind,
    ) -> Self {
        Self {
            id: EscalationId::generate(),
            conversation_id,
            reason: reason.into(),
            kind,
            status: EscalationStatus::Open,
            assignee: None,
            created_at: Utc::now(),
        }
    }
}
