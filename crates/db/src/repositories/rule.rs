use sqlx::{sqlite::SqliteRow, Row};

use parley_core::domain::rule::{
    BusinessRule, RuleCategory, RuleExecution, RuleId,
};

use super::metrics::{parse_timestamp, parse_u32, parse_uuid};
use super::{RepositoryError, RuleExecutionRepository, RuleRepository};
use crate::DbPool;

pub struct SqlRuleRepository {
    pool: DbPool,
}

impl SqlRuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RuleRepository for SqlRuleRepository {
    async fn list_active(
        &self,
        categories: &[RuleCategory],
    ) -> Result<Vec<BusinessRule>, RepositoryError> {
        if categories.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; categories.len()].join(", ");
        let query = format!(
            "SELECT id, name, version, category, trigger_json, conditions_json, actions_json,
                    priority, is_active, created_at
             FROM business_rule
             WHERE is_active = 1 AND category IN ({placeholders})
             ORDER BY priority DESC, created_at ASC"
        );
        let mut select = sqlx::query(&query);
        for category in categories {
            select = select.bind(category.as_str());
        }
        let rows = select.fetch_all(&self.pool).await?;
        rows.into_iter().map(rule_from_row).collect()
    }

    async fn save(&self, rule: BusinessRule) -> Result<(), RepositoryError> {
        let trigger = encode_json("trigger", &rule.trigger)?;
        let conditions = encode_json("conditions", &rule.conditions)?;
        let actions = encode_json("actions", &rule.actions)?;
        sqlx::query(
            "INSERT INTO business_rule (
                id, name, version, category, trigger_json, conditions_json, actions_json,
                priority, is_active, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                version = excluded.version,
                category = excluded.category,
                trigger_json = excluded.trigger_json,
                conditions_json = excluded.conditions_json,
                actions_json = excluded.actions_json,
                priority = excluded.priority,
                is_active = excluded.is_active",
        )
        .bind(rule.id.0.to_string())
        .bind(&rule.name)
        .bind(i64::from(rule.version))
        .bind(rule.category.as_str())
        .bind(trigger)
        .bind(conditions)
        .bind(actions)
        .bind(i64::from(rule.priority))
        .bind(rule.is_active)
        .bind(rule.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn encode_json<T: serde::Serialize>(label: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|err| RepositoryError::Decode(format!("encode rule {label}: {err}")))
}

fn decode_json<T: serde::de::DeserializeOwned>(
    label: &str,
    raw: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|err| RepositoryError::Decode(format!("decode rule {label}: {err}")))
}

fn rule_from_row(row: SqliteRow) -> Result<BusinessRule, RepositoryError> {
    let category_raw = row.try_get::<String, _>("category")?;
    let category = RuleCategory::parse(&category_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown rule category `{category_raw}`"))
    })?;

    Ok(BusinessRule {
        id: RuleId(parse_uuid("id", row.try_get("id")?)?),
        name: row.try_get("name")?,
        version: parse_u32("version", row.try_get("version")?)?,
        category,
        trigger: decode_json("trigger", &row.try_get::<String, _>("trigger_json")?)?,
        conditions: decode_json("conditions", &row.try_get::<String, _>("conditions_json")?)?,
        actions: decode_json("actions", &row.try_get::<String, _>("actions_json")?)?,
        priority: row.try_get::<i64, _>("priority")? as i32,
        is_active: row.try_get("is_active")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

pub struct SqlRuleExecutionRepository {
    pool: DbPool,
}

impl SqlRuleExecutionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RuleExecutionRepository for SqlRuleExecutionRepository {
    async fn append(&self, execution: RuleExecution) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO rule_execution (
                id, rule_id, conversation_id, trigger_snapshot, success, action_kind,
                latency_ms, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(execution.id.0.to_string())
        .bind(execution.rule_id.0.to_string())
        .bind(execution.conversation_id.0.to_string())
        .bind(&execution.trigger_snapshot)
        .bind(execution.success)
        .bind(execution.action_kind.as_deref())
        .bind(execution.latency_ms as i64)
        .bind(execution.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
