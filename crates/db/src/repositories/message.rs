use sqlx::{sqlite::SqliteRow, Row};

use parley_core::domain::conversation::ConversationId;
use parley_core::domain::message::{Attribution, Direction, Message, MessageId};
use parley_core::intent::Intent;

use super::metrics::{parse_timestamp, parse_uuid};
use super::{MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, message: Message) -> Result<(), RepositoryError> {
        let attribution = message.attribution.as_ref();
        sqlx::query(
            "INSERT INTO message (
                id, conversation_id, direction, content, intent, confidence, automated, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.0.to_string())
        .bind(message.conversation_id.0.to_string())
        .bind(message.direction.as_str())
        .bind(&message.content)
        .bind(attribution.and_then(|a| a.intent).map(|intent| intent.as_str()))
        .bind(attribution.and_then(|a| a.confidence))
        .bind(attribution.map(|a| a.automated).unwrap_or(false))
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_for_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        // Newest `limit` rows, then flipped back to chronological order.
        let rows = sqlx::query(
            "SELECT id, conversation_id, direction, content, intent, confidence, automated,
                    created_at
             FROM message WHERE conversation_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(conversation_id.0.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .into_iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let direction_raw = row.try_get::<String, _>("direction")?;
    let direction = Direction::parse(&direction_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown message direction `{direction_raw}`"))
    })?;

    let attribution = match direction {
        Direction::Inbound => None,
        Direction::Outbound => Some(Attribution {
            intent: row
                .try_get::<Option<String>, _>("intent")?
                .map(|raw| Intent::from_label(&raw)),
            confidence: row.try_get("confidence")?,
            automated: row.try_get("automated")?,
        }),
    };

    Ok(Message {
        id: MessageId(parse_uuid("id", row.try_get("id")?)?),
        conversation_id: ConversationId(parse_uuid(
            "conversation_id",
            row.try_get("conversation_id")?,
        )?),
        direction,
        content: row.try_get("content")?,
        attribution,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
