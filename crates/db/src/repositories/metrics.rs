use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;
use uuid::Uuid;

use parley_core::jobs::{JobId, QueuedJob};

use super::{JobRepository, MetricsRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMetricsRepository {
    pool: DbPool,
}

impl SqlMetricsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MetricsRepository for SqlMetricsRepository {
    async fn record_handled(
        &self,
        day: NaiveDate,
        confidence: Option<f64>,
        escalated: bool,
    ) -> Result<(), RepositoryError> {
        let reply_increment: i64 = if confidence.is_some() { 1 } else { 0 };
        let escalation_increment: i64 = if escalated { 1 } else { 0 };
        sqlx::query(
            "INSERT INTO daily_metrics (
                day, conversations_handled, confidence_sum, reply_count, escalation_count
             ) VALUES (?, 1, ?, ?, ?)
             ON CONFLICT(day) DO UPDATE SET
                conversations_handled = conversations_handled + 1,
                confidence_sum = confidence_sum + excluded.confidence_sum,
                reply_count = reply_count + excluded.reply_count,
                escalation_count = escalation_count + excluded.escalation_count",
        )
        .bind(day.format("%Y-%m-%d").to_string())
        .bind(confidence.unwrap_or(0.0))
        .bind(reply_increment)
        .bind(escalation_increment)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct SqlJobRepository {
    pool: DbPool,
}

impl SqlJobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl JobRepository for SqlJobRepository {
    async fn save(&self, job: &QueuedJob) -> Result<(), RepositoryError> {
        let payload = serde_json::to_string(&job.payload)
            .map_err(|err| RepositoryError::Decode(format!("encode job payload: {err}")))?;
        sqlx::query(
            "INSERT INTO queued_job (
                id, kind, payload_json, priority, not_before, attempt, max_attempts, enqueued_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                not_before = excluded.not_before,
                attempt = excluded.attempt",
        )
        .bind(job.id.0.to_string())
        .bind(&job.kind)
        .bind(payload)
        .bind(i64::from(job.priority))
        .bind(job.not_before.to_rfc3339())
        .bind(i64::from(job.attempt))
        .bind(i64::from(job.max_attempts))
        .bind(job.enqueued_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &JobId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM queued_job WHERE id = ?")
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<QueuedJob>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, kind, payload_json, priority, not_before, attempt, max_attempts, enqueued_at
             FROM queued_job ORDER BY not_before ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let payload_raw = row.try_get::<String, _>("payload_json")?;
                let payload = serde_json::from_str(&payload_raw).map_err(|err| {
                    RepositoryError::Decode(format!("decode job payload: {err}"))
                })?;
                Ok(QueuedJob {
                    id: JobId(parse_uuid("id", row.try_get("id")?)?),
                    kind: row.try_get("kind")?,
                    payload,
                    priority: row.try_get::<i64, _>("priority")? as i32,
                    not_before: parse_timestamp("not_before", row.try_get("not_before")?)?,
                    attempt: parse_u32("attempt", row.try_get("attempt")?)?,
                    max_attempts: parse_u32("max_attempts", row.try_get("max_attempts")?)?,
                    enqueued_at: parse_timestamp("enqueued_at", row.try_get("enqueued_at")?)?,
                })
            })
            .collect()
    }
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}`")))
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|raw| parse_timestamp(column, raw)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("out-of-range count in `{column}`: {value}")))
}

pub(crate) fn parse_uuid(column: &str, value: String) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(&value)
        .map_err(|_| RepositoryError::Decode(format!("invalid uuid in `{column}`: `{value}`")))
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use serde_json::json;
    use sqlx::Row;

    use parley_core::jobs::QueuedJob;

    use super::{SqlJobRepository, SqlMetricsRepository};
    use crate::repositories::{JobRepository, MetricsRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    #[tokio::test]
    async fn record_handled_folds_into_one_day_row() {
        let pool = setup_pool().await;
        let repo = SqlMetricsRepository::new(pool.clone());
        let day = NaiveDate::from_ymd_opt(2026, 8, 23).expect("valid date");

        repo.record_handled(day, Some(0.9), false).await.expect("first");
        repo.record_handled(day, Some(0.7), false).await.expect("second");
        repo.record_handled(day, None, true).await.expect("third");

        let row = sqlx::query("SELECT * FROM daily_metrics WHERE day = '2026-08-23'")
            .fetch_one(&pool)
            .await
            .expect("fetch row");
        assert_eq!(row.get::<i64, _>("conversations_handled"), 3);
        assert_eq!(row.get::<i64, _>("reply_count"), 2);
        assert_eq!(row.get::<i64, _>("escalation_count"), 1);
        assert!((row.get::<f64, _>("confidence_sum") - 1.6).abs() < 1e-9);

        pool.close().await;
    }

    #[tokio::test]
    async fn jobs_survive_a_save_and_replay_round_trip() {
        let pool = setup_pool().await;
        let repo = SqlJobRepository::new(pool.clone());

        let job = QueuedJob::new("follow_up", json!({"ticket": "t1"}), 10, Utc::now(), 5);
        repo.save(&job).await.expect("save");

        let pending = repo.list_pending().await.expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, job.id);
        assert_eq!(pending[0].payload, json!({"ticket": "t1"}));
        assert_eq!(pending[0].max_attempts, 5);

        repo.delete(&job.id).await.expect("delete");
        assert!(repo.list_pending().await.expect("list").is_empty());

        pool.close().await;
    }

    #[tokio::test]
    async fn saving_a_retried_job_updates_its_schedule() {
        let pool = setup_pool().await;
        let repo = SqlJobRepository::new(pool.clone());

        let now = Utc::now();
        let job = QueuedJob::new("process_event", json!({}), 0, now, 3);
        repo.save(&job).await.expect("save");

        let retried = job.after_failure(now).expect("retry");
        repo.save(&retried).await.expect("save retry");

        let pending = repo.list_pending().await.expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempt, 1);
        assert!(pending[0].not_before > now);

        pool.close().await;
    }
}
