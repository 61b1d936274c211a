use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use parley_core::domain::conversation::{Conversation, ConversationId};
use parley_core::domain::customer::{Customer, CustomerId};
use parley_core::domain::escalation::Escalation;
use parley_core::domain::message::Message;
use parley_core::domain::rule::{BusinessRule, RuleCategory, RuleExecution};
use parley_core::jobs::{JobId, QueuedJob};

pub mod conversation;
pub mod customer;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod rule;

pub use conversation::{SqlConversationRepository, SqlEscalationRepository};
pub use customer::SqlCustomerRepository;
pub use memory::{
    InMemoryConversationRepository, InMemoryCustomerRepository, InMemoryEscalationRepository,
    InMemoryJobRepository, InMemoryMessageRepository, InMemoryMetricsRepository,
    InMemoryRuleExecutionRepository, InMemoryRuleRepository,
};
pub use message::SqlMessageRepository;
pub use metrics::{SqlJobRepository, SqlMetricsRepository};
pub use rule::{SqlRuleExecutionRepository, SqlRuleRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Which contact field two merge candidates share.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchedContact {
    Email,
    Phone,
}

#[derive(Clone, Debug)]
pub struct MergeCandidate {
    pub primary: Customer,
    pub secondary: Customer,
    pub matched_on: MatchedContact,
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError>;
    async fn find_by_external_id(&self, external_id: &str)
        -> Result<Option<Customer>, RepositoryError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, RepositoryError>;
    async fn find_by_phone(&self, phone: &str) -> Result<Option<Customer>, RepositoryError>;
    /// All customers carrying a non-null display name, for fuzzy matching.
    async fn list_named(&self) -> Result<Vec<Customer>, RepositoryError>;
    async fn save(&self, customer: Customer) -> Result<(), RepositoryError>;
    /// Pairs of customers sharing an exact email or exact phone.
    async fn find_merge_candidates(&self) -> Result<Vec<MergeCandidate>, RepositoryError>;
    /// Fold `secondary` into `primary` atomically: sum aggregates, fill the
    /// primary's missing scalars, re-parent conversations, delete secondary.
    async fn merge(
        &self,
        primary: &CustomerId,
        secondary: &CustomerId,
    ) -> Result<Customer, RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_ticket(&self, ticket_id: &str)
        -> Result<Option<Conversation>, RepositoryError>;
    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: Message) -> Result<(), RepositoryError>;
    async fn recent_for_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Active rules in the given categories, priority descending with
    /// creation-order ties (the evaluation order contract).
    async fn list_active(
        &self,
        categories: &[RuleCategory],
    ) -> Result<Vec<BusinessRule>, RepositoryError>;
    async fn save(&self, rule: BusinessRule) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RuleExecutionRepository: Send + Sync {
    async fn append(&self, execution: RuleExecution) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait EscalationRepository: Send + Sync {
    async fn insert(&self, escalation: Escalation) -> Result<(), RepositoryError>;
    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Escalation>, RepositoryError>;
}

#[async_trait]
pub trait MetricsRepository: Send + Sync {
    /// Fold one handled conversation into the per-day aggregates.
    async fn record_handled(
        &self,
        day: NaiveDate,
        confidence: Option<f64>,
        escalated: bool,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn save(&self, job: &QueuedJob) -> Result<(), RepositoryError>;
    async fn delete(&self, id: &JobId) -> Result<(), RepositoryError>;
    /// Jobs that were persisted but never completed, for replay on startup.
    async fn list_pending(&self) -> Result<Vec<QueuedJob>, RepositoryError>;
}
