//! Queue job handlers. Each one owns a job kind the webhook boundary (or the
//! pipeline itself) enqueues. Deferred handlers re-check conversation state
//! before acting; the world moves on while a job waits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use parley_agent::{InboundEvent, Orchestrator};
use parley_core::domain::conversation::ConversationStatus;
use parley_core::domain::customer::Customer;
use parley_core::domain::escalation::Escalation;
use parley_core::errors::ProcessingError;
use parley_core::identity::{normalize_email, normalize_phone, IdentityHints};
use parley_core::jobs::QueuedJob;
use parley_db::repositories::{
    ConversationRepository, CustomerRepository, EscalationRepository, RepositoryError,
};
use parley_gateway::chat::OutboundMessenger;
use parley_queue::JobHandler;

/// Nudge sent when a conversation went quiet and a follow-up was scheduled.
pub const FOLLOW_UP_TEXT: &str =
    "¿Pudimos resolver tu duda? Si necesitas algo más, aquí estoy para ayudarte.";

fn persistence(err: RepositoryError) -> ProcessingError {
    ProcessingError::Persistence(err.to_string())
}

fn decode<T: serde::de::DeserializeOwned>(job: &QueuedJob) -> Result<T, ProcessingError> {
    serde_json::from_value(job.payload.clone())
        .map_err(|err| ProcessingError::Validation(format!("bad `{}` payload: {err}", job.kind)))
}

#[derive(Debug, Deserialize)]
struct ProcessEventPayload {
    ticket_id: String,
    text: String,
    #[serde(default)]
    hints: HintsPayload,
}

#[derive(Debug, Default, Deserialize)]
struct HintsPayload {
    #[serde(default)]
    external_id: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl From<HintsPayload> for IdentityHints {
    fn from(payload: HintsPayload) -> Self {
        Self {
            external_id: payload.external_id,
            email: payload.email,
            phone: payload.phone,
            name: payload.name,
        }
    }
}

/// Runs the full response pipeline for one inbound provider event.
pub struct ProcessEventHandler {
    orchestrator: Arc<Orchestrator>,
}

impl ProcessEventHandler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for ProcessEventHandler {
    async fn handle(&self, job: &QueuedJob) -> Result<(), ProcessingError> {
        let payload: ProcessEventPayload = decode(job)?;
        // The orchestrator absorbs pipeline failures into the fallback reply,
        // so a dispatched event never re-enters the retry loop.
        self.orchestrator
            .process(InboundEvent {
                ticket_id: payload.ticket_id,
                text: payload.text,
                hints: payload.hints.into(),
            })
            .await;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TicketPayload {
    ticket_id: String,
}

/// Applies provider-side ticket lifecycle changes: a human resolved the
/// ticket, or an agent stepped in.
pub struct TicketStatusHandler {
    conversations: Arc<dyn ConversationRepository>,
    escalations: Arc<dyn EscalationRepository>,
}

impl TicketStatusHandler {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        escalations: Arc<dyn EscalationRepository>,
    ) -> Self {
        Self { conversations, escalations }
    }
}

#[async_trait]
impl JobHandler for TicketStatusHandler {
    async fn handle(&self, job: &QueuedJob) -> Result<(), ProcessingError> {
        let payload: TicketPayload = decode(job)?;
        let Some(mut conversation) =
            self.conversations.find_by_ticket(&payload.ticket_id).await.map_err(persistence)?
        else {
            info!(
                event_name = "ticket_status_unknown",
                ticket_id = %payload.ticket_id,
                kind = %job.kind,
                "no conversation for ticket, nothing to update"
            );
            return Ok(());
        };

        match job.kind.as_str() {
            "ticket_resolved" => {
                if conversation.status == ConversationStatus::Resolved {
                    return Ok(());
                }
                conversation.transition(ConversationStatus::Resolved)?;
                self.conversations.save(conversation).await.map_err(persistence)?;
                info!(
                    event_name = "conversation_resolved",
                    ticket_id = %payload.ticket_id,
                    "conversation resolved by the provider"
                );
            }
            "ticket_escalated" => {
                conversation.mark_human_takeover();
                if conversation.status == ConversationStatus::Active {
                    conversation.transition(ConversationStatus::Escalated)?;
                }
                let conversation_id = conversation.id.clone();
                self.conversations.save(conversation).await.map_err(persistence)?;
                let escalation =
                    Escalation::manual(conversation_id, "agent joined the conversation");
                self.escalations.insert(escalation).await.map_err(persistence)?;
                info!(
                    event_name = "human_takeover",
                    ticket_id = %payload.ticket_id,
                    "agent took over, automation muted"
                );
            }
            other => {
                return Err(ProcessingError::Validation(format!(
                    "unexpected job kind `{other}` for ticket status handler"
                )));
            }
        }
        Ok(())
    }
}

/// Sends the scheduled follow-up nudge, unless the conversation moved on.
pub struct FollowUpHandler {
    conversations: Arc<dyn ConversationRepository>,
    customers: Arc<dyn CustomerRepository>,
    messenger: Arc<dyn OutboundMessenger>,
}

impl FollowUpHandler {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        customers: Arc<dyn CustomerRepository>,
        messenger: Arc<dyn OutboundMessenger>,
    ) -> Self {
        Self { conversations, customers, messenger }
    }
}

#[async_trait]
impl JobHandler for FollowUpHandler {
    async fn handle(&self, job: &QueuedJob) -> Result<(), ProcessingError> {
        let payload: TicketPayload = decode(job)?;
        let Some(conversation) =
            self.conversations.find_by_ticket(&payload.ticket_id).await.map_err(persistence)?
        else {
            return Ok(());
        };
        if conversation.status == ConversationStatus::Resolved || conversation.human_took_over {
            info!(
                event_name = "follow_up_skipped",
                ticket_id = %payload.ticket_id,
                status = conversation.status.as_str(),
                human_took_over = conversation.human_took_over,
                "conversation moved on, follow-up dropped"
            );
            return Ok(());
        }

        let customer = self
            .customers
            .find_by_id(&conversation.customer_id)
            .await
            .map_err(persistence)?;
        let Some(phone) = customer.as_ref().and_then(|customer| customer.phone.clone()) else {
            warn!(
                event_name = "follow_up_unaddressable",
                ticket_id = %payload.ticket_id,
                "customer has no phone, follow-up dropped"
            );
            return Ok(());
        };

        self.messenger
            .send_text(&payload.ticket_id, &phone, FOLLOW_UP_TEXT)
            .await
            .map_err(|err| ProcessingError::Transport(err.to_string()))?;
        info!(event_name = "follow_up_sent", ticket_id = %payload.ticket_id, "follow-up sent");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CustomerSyncPayload {
    external_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Applies provider-side profile edits to the stored customer. Contact
/// fields go through the same normalization the identity resolver uses.
pub struct CustomerSyncHandler {
    customers: Arc<dyn CustomerRepository>,
    default_country_prefix: String,
}

impl CustomerSyncHandler {
    pub fn new(
        customers: Arc<dyn CustomerRepository>,
        default_country_prefix: impl Into<String>,
    ) -> Self {
        Self { customers, default_country_prefix: default_country_prefix.into() }
    }
}

#[async_trait]
impl JobHandler for CustomerSyncHandler {
    async fn handle(&self, job: &QueuedJob) -> Result<(), ProcessingError> {
        let payload: CustomerSyncPayload = decode(job)?;
        let mut customer = match self
            .customers
            .find_by_external_id(&payload.external_id)
            .await
            .map_err(persistence)?
        {
            Some(existing) => existing,
            None => Customer::new_unmatched(Some(payload.external_id.clone()), None, None, None),
        };

        if let Some(email) = payload.email.as_deref() {
            customer.email = Some(normalize_email(email));
        }
        if let Some(phone) = payload.phone.as_deref() {
            let normalized = normalize_phone(phone, &self.default_country_prefix);
            if !normalized.is_empty() {
                customer.phone = Some(normalized);
            }
        }
        if payload.name.is_some() {
            customer.name = payload.name;
        }
        customer.updated_at = Utc::now();
        self.customers.save(customer).await.map_err(persistence)?;
        info!(
            event_name = "customer_synced",
            external_id = %payload.external_id,
            "customer profile updated"
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct OrderSyncPayload {
    external_id: String,
    #[serde(default)]
    total_cents: i64,
}

/// Folds a commerce-side order event into the customer aggregates, so the
/// segment tag and prompt context stay current.
pub struct OrderSyncHandler {
    customers: Arc<dyn CustomerRepository>,
}

impl OrderSyncHandler {
    pub fn new(customers: Arc<dyn CustomerRepository>) -> Self {
        Self { customers }
    }
}

#[async_trait]
impl JobHandler for OrderSyncHandler {
    async fn handle(&self, job: &QueuedJob) -> Result<(), ProcessingError> {
        let payload: OrderSyncPayload = decode(job)?;
        let mut customer = match self
            .customers
            .find_by_external_id(&payload.external_id)
            .await
            .map_err(persistence)?
        {
            Some(existing) => existing,
            None => {
                info!(
                    event_name = "order_sync_new_customer",
                    external_id = %payload.external_id,
                    "order for unseen customer, creating a profile"
                );
                Customer::new_unmatched(Some(payload.external_id.clone()), None, None, None)
            }
        };

        let now = Utc::now();
        customer.order_count += 1;
        customer.lifetime_spend_cents += payload.total_cents.max(0);
        customer.last_order_at = Some(now);
        customer.updated_at = now;
        customer.refresh_segment();
        let segment = customer.segment;
        self.customers.save(customer).await.map_err(persistence)?;
        info!(
            event_name = "order_synced",
            external_id = %payload.external_id,
            segment = segment.as_str(),
            "customer aggregates updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use serde_json::json;

    use parley_core::domain::conversation::{Conversation, ConversationStatus};
    use parley_core::domain::customer::{Customer, Segment};
    use parley_core::domain::escalation::EscalationKind;
    use parley_core::errors::ProcessingError;
    use parley_core::jobs::QueuedJob;
    use parley_db::repositories::{
        ConversationRepository, CustomerRepository, InMemoryConversationRepository,
        InMemoryCustomerRepository, InMemoryEscalationRepository,
    };
    use parley_gateway::chat::{ChatError, OutboundMessenger};
    use parley_queue::JobHandler;

    use super::{
        CustomerSyncHandler, FollowUpHandler, OrderSyncHandler, TicketStatusHandler,
        FOLLOW_UP_TEXT,
    };

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingMessenger {
        fn sent(&self) -> Vec<(String, String, String)> {
            self.sent.lock().expect("lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl OutboundMessenger for RecordingMessenger {
        async fn send_text(
            &self,
            ticket_id: &str,
            to_phone: &str,
            text: &str,
        ) -> Result<(), ChatError> {
            self.sent.lock().expect("lock").push((
                ticket_id.to_string(),
                to_phone.to_string(),
                text.to_string(),
            ));
            Ok(())
        }
    }

    fn job(kind: &str, payload: serde_json::Value) -> QueuedJob {
        QueuedJob::new(kind, payload, 0, Utc::now(), 1)
    }

    fn customer_with_phone(phone: &str) -> Customer {
        Customer::new_unmatched(None, None, Some(phone.to_string()), Some("Ana".into()))
    }

    #[tokio::test]
    async fn follow_up_nudges_a_conversation_still_waiting() {
        let customer = customer_with_phone("+525512345678");
        let conversation = Conversation::open(customer.id.clone(), "t-1");
        let messenger = Arc::new(RecordingMessenger::default());
        let handler = FollowUpHandler::new(
            Arc::new(InMemoryConversationRepository::with_conversations(vec![conversation])),
            Arc::new(InMemoryCustomerRepository::with_customers(vec![customer])),
            messenger.clone(),
        );

        handler.handle(&job("follow_up", json!({"ticket_id": "t-1"}))).await.expect("handle");

        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "t-1");
        assert_eq!(sent[0].1, "+525512345678");
        assert_eq!(sent[0].2, FOLLOW_UP_TEXT);
    }

    #[tokio::test]
    async fn follow_up_noops_once_the_conversation_resolved() {
        let customer = customer_with_phone("+525512345678");
        let mut conversation = Conversation::open(customer.id.clone(), "t-2");
        conversation.transition(ConversationStatus::Resolved).expect("resolve");
        let messenger = Arc::new(RecordingMessenger::default());
        let handler = FollowUpHandler::new(
            Arc::new(InMemoryConversationRepository::with_conversations(vec![conversation])),
            Arc::new(InMemoryCustomerRepository::with_customers(vec![customer])),
            messenger.clone(),
        );

        handler.handle(&job("follow_up", json!({"ticket_id": "t-2"}))).await.expect("handle");

        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn follow_up_noops_after_a_human_took_over() {
        let customer = customer_with_phone("+525512345678");
        let mut conversation = Conversation::open(customer.id.clone(), "t-3");
        conversation.mark_human_takeover();
        let messenger = Arc::new(RecordingMessenger::default());
        let handler = FollowUpHandler::new(
            Arc::new(InMemoryConversationRepository::with_conversations(vec![conversation])),
            Arc::new(InMemoryCustomerRepository::with_customers(vec![customer])),
            messenger.clone(),
        );

        handler.handle(&job("follow_up", json!({"ticket_id": "t-3"}))).await.expect("handle");

        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn provider_resolution_closes_the_conversation() {
        let customer = customer_with_phone("+525512345678");
        let conversation = Conversation::open(customer.id.clone(), "t-4");
        let conversations =
            Arc::new(InMemoryConversationRepository::with_conversations(vec![conversation]));
        let handler =
            TicketStatusHandler::new(conversations.clone(), Arc::new(InMemoryEscalationRepository::default()));

        handler.handle(&job("ticket_resolved", json!({"ticket_id": "t-4"}))).await.expect("handle");

        let stored = conversations
            .find_by_ticket("t-4")
            .await
            .expect("query")
            .expect("conversation exists");
        assert_eq!(stored.status, ConversationStatus::Resolved);
    }

    #[tokio::test]
    async fn agent_takeover_mutes_automation_and_records_a_manual_escalation() {
        let customer = customer_with_phone("+525512345678");
        let conversation = Conversation::open(customer.id.clone(), "t-5");
        let conversations =
            Arc::new(InMemoryConversationRepository::with_conversations(vec![conversation]));
        let escalations = Arc::new(InMemoryEscalationRepository::default());
        let handler = TicketStatusHandler::new(conversations.clone(), escalations.clone());

        handler
            .handle(&job("ticket_escalated", json!({"ticket_id": "t-5"})))
            .await
            .expect("handle");

        let stored = conversations
            .find_by_ticket("t-5")
            .await
            .expect("query")
            .expect("conversation exists");
        assert!(stored.human_took_over);
        assert_eq!(stored.status, ConversationStatus::Escalated);
        let recorded = escalations.all();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].kind, EscalationKind::Manual);
    }

    #[tokio::test]
    async fn order_sync_updates_aggregates_and_segment() {
        let mut customer = Customer::new_unmatched(Some("ext-9".into()), None, None, None);
        customer.order_count = 9;
        customer.lifetime_spend_cents = 50_000;
        customer.refresh_segment();
        let customers = Arc::new(InMemoryCustomerRepository::with_customers(vec![customer]));
        let handler = OrderSyncHandler::new(customers.clone());

        handler
            .handle(&job("order_sync", json!({"external_id": "ext-9", "total_cents": 12_500})))
            .await
            .expect("handle");

        let updated = customers
            .find_by_external_id("ext-9")
            .await
            .expect("query")
            .expect("customer exists");
        assert_eq!(updated.order_count, 10);
        assert_eq!(updated.lifetime_spend_cents, 62_500);
        assert!(updated.last_order_at.is_some());
        assert_eq!(updated.segment, Segment::Vip);
    }

    #[tokio::test]
    async fn order_for_an_unseen_customer_creates_the_profile() {
        let customers = Arc::new(InMemoryCustomerRepository::default());
        let handler = OrderSyncHandler::new(customers.clone());

        handler
            .handle(&job("order_sync", json!({"external_id": "ext-new", "total_cents": 9_900})))
            .await
            .expect("handle");

        let created = customers
            .find_by_external_id("ext-new")
            .await
            .expect("query")
            .expect("customer created");
        assert_eq!(created.order_count, 1);
        assert_eq!(created.segment, Segment::Regular);
    }

    #[tokio::test]
    async fn customer_sync_normalizes_contact_fields() {
        let customer = Customer::new_unmatched(Some("ext-3".into()), None, None, None);
        let customers = Arc::new(InMemoryCustomerRepository::with_customers(vec![customer]));
        let handler = CustomerSyncHandler::new(customers.clone(), "+52");

        handler
            .handle(&job(
                "customer_sync",
                json!({
                    "external_id": "ext-3",
                    "email": "  Ana@Example.COM ",
                    "phone": "55 1234 5678",
                    "name": "Ana",
                }),
            ))
            .await
            .expect("handle");

        let updated = customers
            .find_by_external_id("ext-3")
            .await
            .expect("query")
            .expect("customer exists");
        assert_eq!(updated.email.as_deref(), Some("ana@example.com"));
        assert_eq!(updated.phone.as_deref(), Some("+525512345678"));
        assert_eq!(updated.name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn garbage_payload_is_a_validation_error() {
        let handler = OrderSyncHandler::new(Arc::new(InMemoryCustomerRepository::default()));

        let err = handler
            .handle(&job("order_sync", json!({"nope": true})))
            .await
            .expect_err("bad payload");
        assert!(matches!(err, ProcessingError::Validation(_)));
    }
}
