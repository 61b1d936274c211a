use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use parley_core::domain::customer::{Customer, CustomerId, Segment};

use super::{CustomerRepository, MatchedContact, MergeCandidate, RepositoryError};
use crate::DbPool;

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_one(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Customer>, RepositoryError> {
        let query = format!(
            "SELECT id, external_id, email, phone, name, order_count, lifetime_spend_cents,
                    last_order_at, segment, created_at, updated_at
             FROM customer WHERE {column} = ? LIMIT 1"
        );
        let row = sqlx::query(&query).bind(value).fetch_optional(&self.pool).await?;
        row.map(customer_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl CustomerRepository for SqlCustomerRepository {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        self.find_one("id", &id.0.to_string()).await
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Customer>, RepositoryError> {
        self.find_one("external_id", external_id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, RepositoryError> {
        self.find_one("email", email).await
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<Customer>, RepositoryError> {
        self.find_one("phone", phone).await
    }

    async fn list_named(&self) -> Result<Vec<Customer>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, external_id, email, phone, name, order_count, lifetime_spend_cents,
                    last_order_at, segment, created_at, updated_at
             FROM customer WHERE name IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(customer_from_row).collect()
    }

    async fn save(&self, customer: Customer) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO customer (
                id, external_id, email, phone, name, order_count, lifetime_spend_cents,
                last_order_at, segment, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                external_id = excluded.external_id,
                email = excluded.email,
                phone = excluded.phone,
                name = excluded.name,
                order_count = excluded.order_count,
                lifetime_spend_cents = excluded.lifetime_spend_cents,
                last_order_at = excluded.last_order_at,
                segment = excluded.segment,
                updated_at = excluded.updated_at",
        )
        .bind(customer.id.0.to_string())
        .bind(customer.external_id.as_deref())
        .bind(customer.email.as_deref())
        .bind(customer.phone.as_deref())
        .bind(customer.name.as_deref())
        .bind(i64::from(customer.order_count))
        .bind(customer.lifetime_spend_cents)
        .bind(customer.last_order_at.map(|value| value.to_rfc3339()))
        .bind(customer.segment.as_str())
        .bind(customer.created_at.to_rfc3339())
        .bind(customer.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_merge_candidates(&self) -> Result<Vec<MergeCandidate>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT a.id AS primary_id, b.id AS secondary_id,
                    CASE WHEN a.email IS NOT NULL AND a.email = b.email THEN 'email'
                         ELSE 'phone' END AS matched_on
             FROM customer a
             JOIN customer b ON a.id < b.id
              AND ((a.email IS NOT NULL AND a.email = b.email)
                OR (a.phone IS NOT NULL AND a.phone = b.phone))
             ORDER BY a.created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let primary_id = parse_customer_id("primary_id", row.try_get("primary_id")?)?;
            let secondary_id = parse_customer_id("secondary_id", row.try_get("secondary_id")?)?;
            let matched_on = match row.try_get::<String, _>("matched_on")?.as_str() {
                "email" => MatchedContact::Email,
                _ => MatchedContact::Phone,
            };
            let primary = self.find_by_id(&primary_id).await?.ok_or_else(|| {
                RepositoryError::Decode(format!("merge candidate vanished: {primary_id:?}"))
            })?;
            let secondary = self.find_by_id(&secondary_id).await?.ok_or_else(|| {
                RepositoryError::Decode(format!("merge candidate vanished: {secondary_id:?}"))
            })?;
            candidates.push(MergeCandidate { primary, secondary, matched_on });
        }
        Ok(candidates)
    }

    async fn merge(
        &self,
        primary: &CustomerId,
        secondary: &CustomerId,
    ) -> Result<Customer, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let primary_row = sqlx::query(
            "SELECT id, external_id, email, phone, name, order_count, lifetime_spend_cents,
                    last_order_at, segment, created_at, updated_at
             FROM customer WHERE id = ?",
        )
        .bind(primary.0.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::Decode(format!("merge primary not found: {primary:?}")))?;
        let mut merged = customer_from_row(primary_row)?;

        let secondary_row = sqlx::query(
            "SELECT id, external_id, email, phone, name, order_count, lifetime_spend_cents,
                    last_order_at, segment, created_at, updated_at
             FROM customer WHERE id = ?",
        )
        .bind(secondary.0.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            RepositoryError::Decode(format!("merge secondary not found: {secondary:?}"))
        })?;
        let absorbed = customer_from_row(secondary_row)?;

        // Aggregates sum; scalars prefer the primary's non-null values.
        merged.order_count += absorbed.order_count;
        merged.lifetime_spend_cents += absorbed.lifetime_spend_cents;
        merged.last_order_at = match (merged.last_order_at, absorbed.last_order_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        merged.external_id = merged.external_id.or(absorbed.external_id);
        merged.email = merged.email.or(absorbed.email);
        merged.phone = merged.phone.or(absorbed.phone);
        merged.name = merged.name.or(absorbed.name);
        merged.refresh_segment();
        merged.updated_at = Utc::now();

        sqlx::query("UPDATE conversation SET customer_id = ? WHERE customer_id = ?")
            .bind(primary.0.to_string())
            .bind(secondary.0.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE customer SET
                external_id = ?, email = ?, phone = ?, name = ?,
                order_count = ?, lifetime_spend_cents = ?, last_order_at = ?,
                segment = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(merged.external_id.as_deref())
        .bind(merged.email.as_deref())
        .bind(merged.phone.as_deref())
        .bind(merged.name.as_deref())
        .bind(i64::from(merged.order_count))
        .bind(merged.lifetime_spend_cents)
        .bind(merged.last_order_at.map(|value| value.to_rfc3339()))
        .bind(merged.segment.as_str())
        .bind(merged.updated_at.to_rfc3339())
        .bind(primary.0.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM customer WHERE id = ?")
            .bind(secondary.0.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(merged)
    }
}

pub(crate) fn customer_from_row(row: SqliteRow) -> Result<Customer, RepositoryError> {
    let segment_raw = row.try_get::<String, _>("segment")?;
    let segment = Segment::parse(&segment_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown segment `{segment_raw}`")))?;

    Ok(Customer {
        id: parse_customer_id("id", row.try_get("id")?)?,
        external_id: row.try_get("external_id")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        name: row.try_get("name")?,
        order_count: super::metrics::parse_u32("order_count", row.try_get("order_count")?)?,
        lifetime_spend_cents: row.try_get("lifetime_spend_cents")?,
        last_order_at: super::metrics::parse_optional_timestamp(
            "last_order_at",
            row.try_get("last_order_at")?,
        )?,
        segment,
        created_at: super::metrics::parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: super::metrics::parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_customer_id(column: &str, value: String) -> Result<CustomerId, RepositoryError> {
    Uuid::parse_str(&value)
        .map(CustomerId)
        .map_err(|_| RepositoryError::Decode(format!("invalid uuid in `{column}`: `{value}`")))
}

#[cfg(test)]
mod tests {
    use parley_core::domain::conversation::Conversation;
    use parley_core::domain::customer::{Customer, Segment};

    use super::SqlCustomerRepository;
    use crate::repositories::{
        ConversationRepository, CustomerRepository, MatchedContact, SqlConversationRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn customer(email: Option<&str>, phone: Option<&str>, name: Option<&str>) -> Customer {
        Customer::new_unmatched(
            None,
            email.map(str::to_string),
            phone.map(str::to_string),
            name.map(str::to_string),
        )
    }

    #[tokio::test]
    async fn save_and_find_round_trip() {
        let pool = setup_pool().await;
        let repo = SqlCustomerRepository::new(pool.clone());

        let mut stored = customer(Some("ana@example.com"), Some("+525512345678"), Some("Ana"));
        stored.external_id = Some("ext-1".into());
        repo.save(stored.clone()).await.expect("save");

        let by_external =
            repo.find_by_external_id("ext-1").await.expect("query").expect("found");
        assert_eq!(by_external.id, stored.id);

        let by_email =
            repo.find_by_email("ana@example.com").await.expect("query").expect("found");
        assert_eq!(by_email.id, stored.id);

        let by_phone =
            repo.find_by_phone("+525512345678").await.expect("query").expect("found");
        assert_eq!(by_phone.id, stored.id);

        assert!(repo.find_by_email("nobody@example.com").await.expect("query").is_none());

        pool.close().await;
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let pool = setup_pool().await;
        let repo = SqlCustomerRepository::new(pool.clone());

        let mut stored = customer(Some("b@example.com"), None, None);
        repo.save(stored.clone()).await.expect("insert");

        stored.order_count = 6;
        stored.refresh_segment();
        repo.save(stored.clone()).await.expect("update");

        let found = repo.find_by_id(&stored.id).await.expect("query").expect("found");
        assert_eq!(found.order_count, 6);
        assert_eq!(found.segment, Segment::Loyal);

        pool.close().await;
    }

    #[tokio::test]
    async fn merge_sums_aggregates_and_reparents_conversations() {
        let pool = setup_pool().await;
        let customers = SqlCustomerRepository::new(pool.clone());
        let conversations = SqlConversationRepository::new(pool.clone());

        let mut primary = customer(Some("dup@example.com"), None, Some("Carlos"));
        primary.order_count = 3;
        primary.lifetime_spend_cents = 40_000;
        let mut secondary = customer(Some("dup@example.com"), Some("+525511112222"), None);
        secondary.order_count = 8;
        secondary.lifetime_spend_cents = 70_000;
        customers.save(primary.clone()).await.expect("save primary");
        customers.save(secondary.clone()).await.expect("save secondary");

        let orphan = Conversation::open(secondary.id.clone(), "t-merge");
        conversations.save(orphan.clone()).await.expect("save conversation");

        let candidates = customers.find_merge_candidates().await.expect("candidates");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].matched_on, MatchedContact::Email);

        let merged =
            customers.merge(&primary.id, &secondary.id).await.expect("merge");
        assert_eq!(merged.order_count, 11);
        assert_eq!(merged.lifetime_spend_cents, 110_000);
        assert_eq!(merged.phone.as_deref(), Some("+525511112222"));
        assert_eq!(merged.name.as_deref(), Some("Carlos"));
        assert_eq!(merged.segment, Segment::Vip);

        assert!(customers.find_by_id(&secondary.id).await.expect("query").is_none());
        let reparented =
            conversations.find_by_ticket("t-merge").await.expect("query").expect("found");
        assert_eq!(reparented.customer_id, primary.id);

        pool.close().await;
    }

    #[tokio::test]
    async fn list_named_skips_anonymous_customers() {
        let pool = setup_pool().await;
        let repo = SqlCustomerRepository::new(pool.clone());

        repo.save(customer(None, Some("+525500000001"), Some("Maria Perez")))
            .await
            .expect("save named");
        repo.save(customer(None, Some("+525500000002"), None)).await.expect("save anonymous");

        let named = repo.list_named().await.expect("list");
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].name.as_deref(), Some("Maria Perez"));

        pool.close().await;
    }
}
