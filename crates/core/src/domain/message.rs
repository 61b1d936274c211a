use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::ConversationId;
use crate::intent::Intent;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

/// How an automated reply came to be: the classified intent, the
/// orchestrator's confidence, and whether an agent produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub intent: Option<Intent>,
    pub confidence: Option<f64>,
    pub automated: bool,
}

/// Append-only utterance belonging to exactly one conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub direction: Direction,
    pub content: String,
    pub attribution: Option<Attribution>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn inbound(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            direction: Direction::Inbound,
            content: content.into(),
            attribution: None,
            created_at: Utc::now(),
        }
    }

    pub fn outbound(
        conversation_id: ConversationId,
        content: impl Into<String>,
        attribution: Attribution,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            direction: Direction::Outbound,
            content: content.into(),
            attribution: Some(attribution),
            created_at: Utc::now(),
        }
    }
}
