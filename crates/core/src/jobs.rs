use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

/// One unit of deferred work, owned by the delayed work queue until it
/// completes or exhausts its attempts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: JobId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub not_before: DateTime<Utc>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedJob {
    pub fn new(
        kind: impl Into<String>,
        payload: serde_json::Value,
        priority: i32,
        not_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: JobId::generate(),
            kind: kind.into(),
            payload,
            priority,
            not_before,
            attempt: 0,
            max_attempts: max_attempts.max(1),
            enqueued_at: Utc::now(),
        }
    }

    /// Delay before retry number `attempt` (1-based): `2^attempt` seconds.
    pub fn retry_delay(attempt: u32) -> Duration {
        Duration::seconds(2_i64.saturating_pow(attempt.min(30)))
    }

    /// Record a failed run. Returns the retried copy, or `None` once
    /// attempts are exhausted.
    pub fn after_failure(&self, now: DateTime<Utc>) -> Option<QueuedJob> {
        let attempt = self.attempt + 1;
        if attempt >= self.max_attempts {
            return None;
        }
        let mut retried = self.clone();
        retried.attempt = attempt;
        retried.not_before = now + Self::retry_delay(attempt);
        Some(retried)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::QueuedJob;

    #[test]
    fn retry_delay_doubles_per_attempt() {
        assert_eq!(QueuedJob::retry_delay(1), Duration::seconds(2));
        assert_eq!(QueuedJob::retry_delay(2), Duration::seconds(4));
        assert_eq!(QueuedJob::retry_delay(3), Duration::seconds(8));
    }

    #[test]
    fn job_with_three_attempts_is_dropped_after_third_failure() {
        let now = Utc::now();
        let job = QueuedJob::new("follow_up", json!({}), 0, now, 3);

        let first_retry = job.after_failure(now).expect("first retry");
        assert_eq!(first_retry.attempt, 1);
        assert_eq!(first_retry.not_before, now + Duration::seconds(2));

        let second_retry = first_retry.after_failure(now).expect("second retry");
        assert_eq!(second_retry.attempt, 2);
        assert_eq!(second_retry.not_before, now + Duration::seconds(4));

        assert!(second_retry.after_failure(now).is_none(), "no fourth attempt");
    }

    #[test]
    fn max_attempts_is_at_least_one() {
        let job = QueuedJob::new("noop", json!({}), 0, Utc::now(), 0);
        assert_eq!(job.max_attempts, 1);
    }
}
