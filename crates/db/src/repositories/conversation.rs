use sqlx::{sqlite::SqliteRow, Row};

use parley_core::domain::conversation::{Conversation, ConversationId, ConversationStatus};
use parley_core::domain::customer::CustomerId;
use parley_core::domain::escalation::{
    Escalation, EscalationId, EscalationKind, EscalationStatus,
};

use super::metrics::{parse_optional_timestamp, parse_timestamp, parse_u32, parse_uuid};
use super::{ConversationRepository, EscalationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_ticket(
        &self,
        ticket_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, customer_id, ticket_id, status, priority, human_took_over,
                    human_took_over_at, message_count, created_at, updated_at
             FROM conversation WHERE ticket_id = ?",
        )
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(conversation_from_row).transpose()
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation (
                id, customer_id, ticket_id, status, priority, human_took_over,
                human_took_over_at, message_count, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                customer_id = excluded.customer_id,
                status = excluded.status,
                priority = excluded.priority,
                human_took_over = excluded.human_took_over,
                human_took_over_at = excluded.human_took_over_at,
                message_count = excluded.message_count,
                updated_at = excluded.updated_at",
        )
        .bind(conversation.id.0.to_string())
        .bind(conversation.customer_id.0.to_string())
        .bind(&conversation.ticket_id)
        .bind(conversation.status.as_str())
        .bind(i64::from(conversation.priority))
        .bind(conversation.human_took_over)
        .bind(conversation.human_took_over_at.map(|value| value.to_rfc3339()))
        .bind(i64::from(conversation.message_count))
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ConversationStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown conversation status `{status_raw}`"))
    })?;

    Ok(Conversation {
        id: ConversationId(parse_uuid("id", row.try_get("id")?)?),
        customer_id: CustomerId(parse_uuid("customer_id", row.try_get("customer_id")?)?),
        ticket_id: row.try_get("ticket_id")?,
        status,
        priority: row.try_get::<i64, _>("priority")? as i32,
        human_took_over: row.try_get("human_took_over")?,
        human_took_over_at: parse_optional_timestamp(
            "human_took_over_at",
            row.try_get("human_took_over_at")?,
        )?,
        message_count: parse_u32("message_count", row.try_get("message_count")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

pub struct SqlEscalationRepository {
    pool: DbPool,
}

impl SqlEscalationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EscalationRepository for SqlEscalationRepository {
    async fn insert(&self, escalation: Escalation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO escalation (id, conversation_id, reason, kind, status, assignee, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(escalation.id.0.to_string())
        .bind(escalation.conversation_id.0.to_string())
        .bind(&escalation.reason)
        .bind(escalation.kind.as_str())
        .bind(escalation.status.as_str())
        .bind(escalation.assignee.as_deref())
        .bind(escalation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Escalation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, reason, kind, status, assignee, created_at
             FROM escalation WHERE conversation_id = ? ORDER BY created_at ASC",
        )
        .bind(conversation_id.0.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(escalation_from_row).collect()
    }
}

fn escalation_from_row(row: SqliteRow) -> Result<Escalation, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = EscalationKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown escalation kind `{kind_raw}`")))?;
    let status_raw = row.try_get::<String, _>("status")?;
    let status = EscalationStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown escalation status `{status_raw}`"))
    })?;

    Ok(Escalation {
        id: EscalationId(parse_uuid("id", row.try_get("id")?)?),
        conversation_id: ConversationId(parse_uuid(
            "conversation_id",
            row.try_get("conversation_id")?,
        )?),
        reason: row.try_get("reason")?,
        kind,
        status,
        assignee: row.try_get("assignee")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
