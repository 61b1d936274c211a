//! In-memory repositories for wiring services together in tests without a
//! database pool.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};

use parley_core::domain::conversation::{Conversation, ConversationId};
use parley_core::domain::customer::{Customer, CustomerId};
use parley_core::domain::escalation::Escalation;
use parley_core::domain::message::Message;
use parley_core::domain::rule::{BusinessRule, RuleCategory, RuleExecution};
use parley_core::jobs::{JobId, QueuedJob};

use super::{
    ConversationRepository, CustomerRepository, EscalationRepository, JobRepository,
    MatchedContact, MergeCandidate, MessageRepository, MetricsRepository, RepositoryError,
    RuleExecutionRepository, RuleRepository,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct InMemoryCustomerRepository {
    customers: Mutex<Vec<Customer>>,
}

impl InMemoryCustomerRepository {
    pub fn with_customers(customers: Vec<Customer>) -> Self {
        Self { customers: Mutex::new(customers) }
    }

    fn find(&self, predicate: impl Fn(&Customer) -> bool) -> Option<Customer> {
        lock(&self.customers).iter().find(|customer| predicate(customer)).cloned()
    }
}

#[async_trait::async_trait]
impl CustomerRepository for InMemoryCustomerRepository {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        Ok(self.find(|customer| &customer.id == id))
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Customer>, RepositoryError> {
        Ok(self.find(|customer| customer.external_id.as_deref() == Some(external_id)))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, RepositoryError> {
        Ok(self.find(|customer| customer.email.as_deref() == Some(email)))
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<Customer>, RepositoryError> {
        Ok(self.find(|customer| customer.phone.as_deref() == Some(phone)))
    }

    async fn list_named(&self) -> Result<Vec<Customer>, RepositoryError> {
        Ok(lock(&self.customers)
            .iter()
            .filter(|customer| customer.name.is_some())
            .cloned()
            .collect())
    }

    async fn save(&self, customer: Customer) -> Result<(), RepositoryError> {
        let mut customers = lock(&self.customers);
        match customers.iter_mut().find(|existing| existing.id == customer.id) {
            Some(existing) => *existing = customer,
            None => customers.push(customer),
        }
        Ok(())
    }

    async fn find_merge_candidates(&self) -> Result<Vec<MergeCandidate>, RepositoryError> {
        let customers = lock(&self.customers);
        let mut candidates = Vec::new();
        for (index, primary) in customers.iter().enumerate() {
            for secondary in customers.iter().skip(index + 1) {
                let matched_on = if primary.email.is_some() && primary.email == secondary.email {
                    Some(MatchedContact::Email)
                } else if primary.phone.is_some() && primary.phone == secondary.phone {
                    Some(MatchedContact::Phone)
                } else {
                    None
                };
                if let Some(matched_on) = matched_on {
                    candidates.push(MergeCandidate {
                        primary: primary.clone(),
                        secondary: secondary.clone(),
                        matched_on,
                    });
                }
            }
        }
        Ok(candidates)
    }

    async fn merge(
        &self,
        primary: &CustomerId,
        secondary: &CustomerId,
    ) -> Result<Customer, RepositoryError> {
        let mut customers = lock(&self.customers);
        let absorbed_index = customers
            .iter()
            .position(|customer| &customer.id == secondary)
            .ok_or_else(|| {
                RepositoryError::Decode(format!("merge secondary not found: {secondary:?}"))
            })?;
        let absorbed = customers.remove(absorbed_index);
        let merged = customers
            .iter_mut()
            .find(|customer| &customer.id == primary)
            .ok_or_else(|| {
                RepositoryError::Decode(format!("merge primary not found: {primary:?}"))
            })?;

        merged.order_count += absorbed.order_count;
        merged.lifetime_spend_cents += absorbed.lifetime_spend_cents;
        merged.last_order_at = match (merged.last_order_at, absorbed.last_order_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        merged.external_id = merged.external_id.take().or(absorbed.external_id);
        merged.email = merged.email.take().or(absorbed.email);
        merged.phone = merged.phone.take().or(absorbed.phone);
        merged.name = merged.name.take().or(absorbed.name);
        merged.refresh_segment();
        merged.updated_at = Utc::now();
        Ok(merged.clone())
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: Mutex<Vec<Conversation>>,
}

impl InMemoryConversationRepository {
    pub fn with_conversations(conversations: Vec<Conversation>) -> Self {
        Self { conversations: Mutex::new(conversations) }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_by_ticket(
        &self,
        ticket_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(lock(&self.conversations)
            .iter()
            .find(|conversation| conversation.ticket_id == ticket_id)
            .cloned())
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        let mut conversations = lock(&self.conversations);
        match conversations.iter_mut().find(|existing| existing.id == conversation.id) {
            Some(existing) => *existing = conversation,
            None => conversations.push(conversation),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: Mutex<Vec<Message>>,
}

impl InMemoryMessageRepository {
    pub fn all(&self) -> Vec<Message> {
        lock(&self.messages).clone()
    }
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: Message) -> Result<(), RepositoryError> {
        lock(&self.messages).push(message);
        Ok(())
    }

    async fn recent_for_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = lock(&self.messages);
        let mut matching: Vec<Message> = messages
            .iter()
            .filter(|message| &message.conversation_id == conversation_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let skip = matching.len().saturating_sub(limit as usize);
        Ok(matching.split_off(skip))
    }
}

#[derive(Default)]
pub struct InMemoryRuleRepository {
    rules: Mutex<Vec<BusinessRule>>,
}

impl InMemoryRuleRepository {
    pub fn with_rules(rules: Vec<BusinessRule>) -> Self {
        Self { rules: Mutex::new(rules) }
    }
}

#[async_trait::async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn list_active(
        &self,
        categories: &[RuleCategory],
    ) -> Result<Vec<BusinessRule>, RepositoryError> {
        let mut matching: Vec<BusinessRule> = lock(&self.rules)
            .iter()
            .filter(|rule| rule.is_active && categories.contains(&rule.category))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at))
        });
        Ok(matching)
    }

    async fn save(&self, rule: BusinessRule) -> Result<(), RepositoryError> {
        let mut rules = lock(&self.rules);
        match rules.iter_mut().find(|existing| existing.id == rule.id) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRuleExecutionRepository {
    executions: Mutex<Vec<RuleExecution>>,
}

impl InMemoryRuleExecutionRepository {
    pub fn all(&self) -> Vec<RuleExecution> {
        lock(&self.executions).clone()
    }
}

#[async_trait::async_trait]
impl RuleExecutionRepository for InMemoryRuleExecutionRepository {
    async fn append(&self, execution: RuleExecution) -> Result<(), RepositoryError> {
        lock(&self.executions).push(execution);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryEscalationRepository {
    escalations: Mutex<Vec<Escalation>>,
}

impl InMemoryEscalationRepository {
    pub fn all(&self) -> Vec<Escalation> {
        lock(&self.escalations).clone()
    }
}

#[async_trait::async_trait]
impl EscalationRepository for InMemoryEscalationRepository {
    async fn insert(&self, escalation: Escalation) -> Result<(), RepositoryError> {
        lock(&self.escalations).push(escalation);
        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Escalation>, RepositoryError> {
        Ok(lock(&self.escalations)
            .iter()
            .filter(|escalation| &escalation.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DayTotals {
    pub conversations_handled: u64,
    pub confidence_sum: f64,
    pub reply_count: u64,
    pub escalation_count: u64,
}

#[derive(Default)]
pub struct InMemoryMetricsRepository {
    days: Mutex<HashMap<NaiveDate, DayTotals>>,
}

impl InMemoryMetricsRepository {
    pub fn totals_for(&self, day: NaiveDate) -> Option<DayTotals> {
        lock(&self.days).get(&day).copied()
    }
}

#[async_trait::async_trait]
impl MetricsRepository for InMemoryMetricsRepository {
    async fn record_handled(
        &self,
        day: NaiveDate,
        confidence: Option<f64>,
        escalated: bool,
    ) -> Result<(), RepositoryError> {
        let mut days = lock(&self.days);
        let totals = days.entry(day).or_default();
        totals.conversations_handled += 1;
        if let Some(confidence) = confidence {
            totals.confidence_sum += confidence;
            totals.reply_count += 1;
        }
        if escalated {
            totals.escalation_count += 1;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<Vec<QueuedJob>>,
}

impl InMemoryJobRepository {
    pub fn all(&self) -> Vec<QueuedJob> {
        lock(&self.jobs).clone()
    }
}

#[async_trait::async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn save(&self, job: &QueuedJob) -> Result<(), RepositoryError> {
        let mut jobs = lock(&self.jobs);
        match jobs.iter_mut().find(|existing| existing.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => jobs.push(job.clone()),
        }
        Ok(())
    }

    async fn delete(&self, id: &JobId) -> Result<(), RepositoryError> {
        lock(&self.jobs).retain(|job| &job.id != id);
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<QueuedJob>, RepositoryError> {
        let mut jobs = lock(&self.jobs).clone();
        jobs.sort_by(|a, b| a.not_before.cmp(&b.not_before));
        Ok(jobs)
    }
}
