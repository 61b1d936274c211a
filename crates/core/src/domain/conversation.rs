use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::customer::CustomerId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Escalated,
    Resolved,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Escalated => "escalated",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "escalated" => Some(Self::Escalated),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    /// Transitions are one-way: active → escalated → resolved, with the
    /// direct active → resolved shortcut.
    pub fn can_transition_to(&self, to: ConversationStatus) -> bool {
        matches!(
            (self, to),
            (Self::Active, Self::Escalated)
                | (Self::Active, Self::Resolved)
                | (Self::Escalated, Self::Resolved)
        )
    }
}

/// One open thread tied to exactly one customer and one external ticket id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub customer_id: CustomerId,
    pub ticket_id: String,
    pub status: ConversationStatus,
    pub priority: i32,
    pub human_took_over: bool,
    pub human_took_over_at: Option<DateTime<Utc>>,
    pub message_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn open(customer_id: CustomerId, ticket_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::generate(),
            customer_id,
            ticket_id: ticket_id.into(),
            status: ConversationStatus::Active,
            priority: 0,
            human_took_over: false,
            human_took_over_at: None,
            message_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, to: ConversationStatus) -> Result<(), DomainError> {
        if self.status == ConversationStatus::Resolved {
            return Err(DomainError::ConversationResolved);
        }
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidConversationTransition { from: self.status, to });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Hand the thread to a human. Idempotent; keeps the first takeover time.
    pub fn mark_human_takeover(&mut self) {
        if !self.human_took_over {
            self.human_took_over = true;
            self.human_took_over_at = Some(Utc::now());
            self.updated_at = Utc::now();
        }
    }

    pub fn record_message(&mut self) {
        self.message_count += 1;
        self.updated_at = Utc::now();
    }
}
