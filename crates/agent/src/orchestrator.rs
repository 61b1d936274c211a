//! The response pipeline: resolve identity, record the inbound message,
//! classify, evaluate rules, fall back to the model, execute follow-on
//! actions, then deliver and persist the reply.
//!
//! Failures inside the pipeline degrade to the apology fallback; ingestion
//! never sees a hard error from here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{error, info, warn};

use parley_core::domain::conversation::{Conversation, ConversationId, ConversationStatus};
use parley_core::domain::customer::Customer;
use parley_core::domain::escalation::Escalation;
use parley_core::domain::message::{Attribution, Message};
use parley_core::domain::rule::{BusinessRule, RuleAction, RuleExecution, RuleExecutionId};
use parley_core::errors::ProcessingError;
use parley_core::identity::IdentityHints;
use parley_core::intent::Intent;
use parley_core::rules::{evaluate, relevant_categories, RuleEvalContext};
use parley_core::sentiment::{SentimentAnalyzer, ESCALATION_THRESHOLD};
use parley_db::repositories::{
    ConversationRepository, EscalationRepository, MessageRepository, MetricsRepository,
    RepositoryError, RuleExecutionRepository, RuleRepository,
};
use parley_gateway::chat::OutboundMessenger;
use parley_gateway::commerce::{mint_discount_code, CommerceProvider};
use parley_gateway::llm::LlmClient;
use parley_queue::DelayedWorkQueue;

use crate::classify::IntentClassifier;
use crate::identity::IdentityResolver;
use crate::respond::{build_prompt, parse_reply, ReplyAction, APOLOGY, SYSTEM_PROMPT};

/// Acknowledgement sent when a rule escalates without its own reply text.
pub const ESCALATION_ACK: &str =
    "Entendido, un agente humano revisará tu caso y te atenderá en breve.";

/// One inbound provider event, already validated at the boundary.
#[derive(Clone, Debug)]
pub struct InboundEvent {
    pub ticket_id: String,
    pub text: String,
    pub hints: IdentityHints,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    Suppressed,
}

#[derive(Clone, Debug)]
struct PlannedReply {
    text: String,
    confidence: f64,
}

/// Everything the pipeline talks to.
pub struct Services {
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub rules: Arc<dyn RuleRepository>,
    pub rule_executions: Arc<dyn RuleExecutionRepository>,
    pub escalations: Arc<dyn EscalationRepository>,
    pub metrics: Arc<dyn MetricsRepository>,
    pub classifier: Arc<dyn IntentClassifier>,
    pub llm: Arc<dyn LlmClient>,
    pub messenger: Arc<dyn OutboundMessenger>,
    pub commerce: Arc<dyn CommerceProvider>,
    pub sentiment: Arc<dyn SentimentAnalyzer>,
    pub queue: Arc<DelayedWorkQueue>,
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub history_limit: u32,
    pub follow_up_max_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { history_limit: 10, follow_up_max_attempts: 5 }
    }
}

pub struct Orchestrator {
    services: Services,
    identity: IdentityResolver,
    config: OrchestratorConfig,
    ticket_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

fn persistence(err: RepositoryError) -> ProcessingError {
    ProcessingError::Persistence(err.to_string())
}

impl Orchestrator {
    pub fn new(
        services: Services,
        identity: IdentityResolver,
        config: OrchestratorConfig,
    ) -> Self {
        Self { services, identity, config, ticket_locks: Mutex::new(HashMap::new()) }
    }

    /// Process one inbound event. Events for different tickets run in
    /// parallel; the same ticket is serialized through a per-ticket mutex.
    pub async fn process(&self, event: InboundEvent) -> Outcome {
        let lock = self.ticket_lock(&event.ticket_id);
        let _guard = lock.lock().await;

        match self.run_pipeline(&event).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                error!(
                    event_name = "pipeline_failed",
                    ticket_id = %event.ticket_id,
                    error = %failure,
                    "pipeline failed, sending fallback"
                );
                self.send_fallback(&event).await;
                Outcome::Delivered
            }
        }
    }

    fn ticket_lock(&self, ticket_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.ticket_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(ticket_id.to_string()).or_default().clone()
    }

    async fn send_fallback(&self, event: &InboundEvent) {
        let Some(phone) = event.hints.phone.as_deref() else {
            warn!(
                event_name = "fallback_unaddressable",
                ticket_id = %event.ticket_id,
                "no phone hint, fallback apology not sent"
            );
            return;
        };
        if let Err(send_error) =
            self.services.messenger.send_text(&event.ticket_id, phone, APOLOGY).await
        {
            warn!(
                event_name = "fallback_send_failed",
                ticket_id = %event.ticket_id,
                error = %send_error,
                "could not deliver fallback apology"
            );
        }
    }

    async fn run_pipeline(&self, event: &InboundEvent) -> Result<Outcome, ProcessingError> {
        let resolution = self.identity.resolve(&event.hints).await?;
        let customer = resolution.customer;

        let mut conversation = match self
            .services
            .conversations
            .find_by_ticket(&event.ticket_id)
            .await
            .map_err(persistence)?
        {
            Some(existing) => existing,
            None => {
                let opened = Conversation::open(customer.id.clone(), &event.ticket_id);
                self.services.conversations.save(opened.clone()).await.map_err(persistence)?;
                info!(
                    event_name = "conversation_opened",
                    ticket_id = %event.ticket_id,
                    customer_id = %customer.id.0,
                    "conversation opened"
                );
                opened
            }
        };

        let inbound = Message::inbound(conversation.id.clone(), &event.text);
        self.services.messages.append(inbound).await.map_err(persistence)?;
        conversation.record_message();
        self.services.conversations.save(conversation.clone()).await.map_err(persistence)?;

        if conversation.human_took_over {
            info!(
                event_name = "reply_suppressed",
                ticket_id = %event.ticket_id,
                "human owns the conversation, automated reply suppressed"
            );
            return Ok(Outcome::Suppressed);
        }

        let intent = self.services.classifier.classify(&event.text).await;
        let sentiment = self.services.sentiment.score(&event.text);

        // First satisfied rule wins; no match falls through to the model.
        let active = self
            .services
            .rules
            .list_active(relevant_categories(intent))
            .await
            .map_err(persistence)?;
        let fired = {
            let ctx = RuleEvalContext {
                intent,
                message_text: &event.text,
                customer: &customer,
                conversation: &conversation,
            };
            evaluate(&active, &ctx).cloned()
        };

        let mut escalation_reason: Option<String> = None;
        let reply = match fired {
            Some(rule) => {
                self.apply_rule(&rule, &conversation.id, &customer, &mut escalation_reason)
                    .await?
            }
            None => {
                self.model_reply(event, &conversation, &customer, &mut escalation_reason)
                    .await?
            }
        };

        // Sentiment overrides whatever the reply path decided.
        if sentiment < ESCALATION_THRESHOLD && escalation_reason.is_none() {
            escalation_reason = Some(format!("negative sentiment ({sentiment:.2})"));
        }

        let escalated = if let Some(reason) = escalation_reason {
            self.escalate(&mut conversation, reason).await?;
            true
        } else {
            false
        };

        self.deliver(event, &customer, &mut conversation, intent, &reply).await?;
        self.services
            .metrics
            .record_handled(Utc::now().date_naive(), Some(reply.confidence), escalated)
            .await
            .map_err(persistence)?;

        Ok(Outcome::Delivered)
    }

    async fn apply_rule(
        &self,
        rule: &BusinessRule,
        conversation_id: &ConversationId,
        customer: &Customer,
        escalation_reason: &mut Option<String>,
    ) -> Result<PlannedReply, ProcessingError> {
        let started = Instant::now();
        let mut reply_text: Option<String> = None;
        let mut all_actions_succeeded = true;

        for action in &rule.actions {
            match action {
                RuleAction::DirectResponse { message, next_steps } => {
                    let mut text = message.clone();
                    for step in next_steps {
                        text.push('\n');
                        text.push_str(step);
                    }
                    reply_text.get_or_insert(text);
                }
                RuleAction::Escalate { reason } => {
                    escalation_reason.get_or_insert_with(|| reason.clone());
                }
                RuleAction::ApplyDiscount { percent, valid_hours, message_template } => {
                    let discount = mint_discount_code(*percent, *valid_hours);
                    if let Err(commerce_error) =
                        self.services.commerce.register_discount(&discount).await
                    {
                        all_actions_succeeded = false;
                        warn!(
                            event_name = "action_failed",
                            action = "apply_discount",
                            rule = %rule.name,
                            error = %commerce_error,
                            "discount registration failed, code sent anyway"
                        );
                    }
                    let text = message_template
                        .replace("{percent}", &percent.to_string())
                        .replace("{code}", &discount.code);
                    reply_text.get_or_insert(text);
                }
            }
        }

        let execution = RuleExecution {
            id: RuleExecutionId::generate(),
            rule_id: rule.id.clone(),
            conversation_id: conversation_id.clone(),
            trigger_snapshot: serde_json::to_string(&rule.trigger)
                .unwrap_or_else(|_| "{}".to_string()),
            success: all_actions_succeeded,
            action_kind: rule.actions.first().map(|action| action.kind().to_string()),
            latency_ms: started.elapsed().as_millis() as u64,
            created_at: Utc::now(),
        };
        self.services.rule_executions.append(execution).await.map_err(persistence)?;
        info!(
            event_name = "rule_fired",
            rule = %rule.name,
            priority = rule.priority,
            customer_id = %customer.id.0,
            "business rule fired"
        );

        Ok(PlannedReply {
            text: reply_text.unwrap_or_else(|| ESCALATION_ACK.to_string()),
            confidence: 1.0,
        })
    }

    async fn model_reply(
        &self,
        event: &InboundEvent,
        conversation: &Conversation,
        customer: &Customer,
        escalation_reason: &mut Option<String>,
    ) -> Result<PlannedReply, ProcessingError> {
        let history = self
            .services
            .messages
            .recent_for_conversation(&conversation.id, self.config.history_limit)
            .await
            .map_err(persistence)?;
        let catalog = match self.services.commerce.search_products(&event.text).await {
            Ok(products) => products,
            Err(search_error) => {
                warn!(
                    event_name = "catalog_lookup_failed",
                    error = %search_error,
                    "continuing without catalog context"
                );
                Vec::new()
            }
        };

        let prompt = build_prompt(customer, &history, &catalog, &event.text);
        let completion = match self.services.llm.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(completion) => completion,
            Err(model_error) => {
                warn!(
                    event_name = "model_call_failed",
                    ticket_id = %event.ticket_id,
                    error = %model_error,
                    "model unavailable, using apology fallback"
                );
                escalation_reason.get_or_insert_with(|| "model unavailable".to_string());
                return Ok(PlannedReply { text: APOLOGY.to_string(), confidence: 0.0 });
            }
        };

        let reply = parse_reply(&completion);
        if reply.needs_human() {
            escalation_reason.get_or_insert_with(|| "model requested a human".to_string());
        }
        let mut text = reply.text().to_string();
        if let Some(action) = reply.action() {
            self.execute_reply_action(action, event, customer, &mut text, escalation_reason)
                .await;
        }

        Ok(PlannedReply { text, confidence: reply.confidence() })
    }

    /// Follow-on actions are independently fallible: a failure is logged and
    /// the reply still goes out.
    async fn execute_reply_action(
        &self,
        action: &ReplyAction,
        event: &InboundEvent,
        customer: &Customer,
        reply_text: &mut String,
        escalation_reason: &mut Option<String>,
    ) {
        let outcome: Result<(), ProcessingError> = match action {
            ReplyAction::Escalate { reason } => {
                escalation_reason.get_or_insert_with(|| reason.clone());
                Ok(())
            }
            ReplyAction::CreateOrder { skus } => match customer.external_id.as_deref() {
                Some(external_id) => self
                    .services
                    .commerce
                    .create_order(external_id, skus)
                    .await
                    .map(|order_id| {
                        info!(
                            event_name = "order_created",
                            ticket_id = %event.ticket_id,
                            order_id = %order_id,
                            "order created from reply action"
                        );
                    })
                    .map_err(|cause| ProcessingError::ActionExecution {
                        action: "create_order".into(),
                        cause: cause.to_string(),
                    }),
                None => Err(ProcessingError::ActionExecution {
                    action: "create_order".into(),
                    cause: "customer has no provider id".into(),
                }),
            },
            ReplyAction::ApplyDiscount { percent, valid_hours } => {
                let discount = mint_discount_code(*percent, *valid_hours);
                let registered = self
                    .services
                    .commerce
                    .register_discount(&discount)
                    .await
                    .map_err(|cause| ProcessingError::ActionExecution {
                        action: "apply_discount".into(),
                        cause: cause.to_string(),
                    });
                reply_text.push_str(&format!(
                    "\nTu código de descuento del {}%: {}",
                    discount.percent, discount.code
                ));
                registered
            }
            ReplyAction::RecommendProducts { query } => self
                .services
                .commerce
                .search_products(query)
                .await
                .map(|products| {
                    if !products.is_empty() {
                        reply_text.push_str("\nTe podría interesar:");
                        for product in products.iter().take(3) {
                            reply_text.push_str(&format!("\n- {}", product.name));
                        }
                    }
                })
                .map_err(|cause| ProcessingError::ActionExecution {
                    action: "recommend_products".into(),
                    cause: cause.to_string(),
                }),
            ReplyAction::ScheduleFollowUp { hours } => self
                .services
                .queue
                .enqueue(
                    "follow_up",
                    json!({ "ticket_id": event.ticket_id }),
                    0,
                    Utc::now() + Duration::hours(i64::from(*hours)),
                    self.config.follow_up_max_attempts,
                )
                .await
                .map(|job_id| {
                    info!(
                        event_name = "follow_up_scheduled",
                        ticket_id = %event.ticket_id,
                        job_id = %job_id.0,
                        hours,
                        "follow-up scheduled"
                    );
                }),
        };

        if let Err(action_error) = outcome {
            warn!(
                event_name = "action_failed",
                ticket_id = %event.ticket_id,
                error = %action_error,
                "reply action failed, reply still sent"
            );
        }
    }

    async fn escalate(
        &self,
        conversation: &mut Conversation,
        reason: String,
    ) -> Result<(), ProcessingError> {
        if conversation.status == ConversationStatus::Active {
            conversation.transition(ConversationStatus::Escalated)?;
        }
        conversation.mark_human_takeover();
        self.services.conversations.save(conversation.clone()).await.map_err(persistence)?;
        self.services
            .escalations
            .insert(Escalation::automatic(conversation.id.clone(), reason.clone()))
            .await
            .map_err(persistence)?;
        info!(
            event_name = "conversation_escalated",
            ticket_id = %conversation.ticket_id,
            reason = %reason,
            "conversation escalated to a human"
        );
        Ok(())
    }

    async fn deliver(
        &self,
        event: &InboundEvent,
        customer: &Customer,
        conversation: &mut Conversation,
        intent: Intent,
        reply: &PlannedReply,
    ) -> Result<(), ProcessingError> {
        let recipient = customer
            .phone
            .as_deref()
            .or(event.hints.phone.as_deref())
            .map(str::to_string);
        match recipient {
            Some(phone) => {
                self.services
                    .messenger
                    .send_text(&event.ticket_id, &phone, &reply.text)
                    .await
                    .map_err(|cause| ProcessingError::Transport(cause.to_string()))?;
            }
            None => {
                warn!(
                    event_name = "reply_unaddressable",
                    ticket_id = %event.ticket_id,
                    "no phone on record, reply persisted but not delivered"
                );
            }
        }

        let outbound = Message::outbound(
            conversation.id.clone(),
            &reply.text,
            Attribution {
                intent: Some(intent),
                confidence: Some(reply.confidence),
                automated: true,
            },
        );
        self.services.messages.append(outbound).await.map_err(persistence)?;
        conversation.record_message();
        self.services.conversations.save(conversation.clone()).await.map_err(persistence)?;
        info!(
            event_name = "reply_delivered",
            ticket_id = %event.ticket_id,
            intent = intent.as_str(),
            confidence = reply.confidence,
            "reply delivered"
        );
        Ok(())
    }
}
