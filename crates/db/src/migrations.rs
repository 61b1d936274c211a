use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::connect_with_settings;

    const BASELINE_TABLES: &[&str] = &[
        "customer",
        "conversation",
        "message",
        "business_rule",
        "rule_execution",
        "escalation",
        "queued_job",
        "daily_metrics",
    ];

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in BASELINE_TABLES {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .expect("check table")
            .get::<i64, _>("count");
            assert_eq!(count, 1, "expected table `{table}` to exist");
        }

        pool.close().await;
    }

    #[tokio::test]
    async fn ticket_id_is_globally_unique() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query(
            "INSERT INTO customer (id, segment, created_at, updated_at)
             VALUES ('c1', 'new', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert customer");

        let insert = "INSERT INTO conversation (id, customer_id, ticket_id, status, created_at, updated_at)
             VALUES (?, 'c1', 't-dup', 'active', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')";
        sqlx::query(insert).bind("conv1").execute(&pool).await.expect("first insert");
        let duplicate = sqlx::query(insert).bind("conv2").execute(&pool).await;
        assert!(duplicate.is_err(), "duplicate ticket_id must violate uniqueness");

        pool.close().await;
    }
}
