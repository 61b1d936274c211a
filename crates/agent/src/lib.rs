//! The conversational agent: identity resolution, intent classification,
//! the LLM fallback response pipeline and the orchestrator that ties them
//! to rules, actions and delivery.

pub mod classify;
pub mod identity;
pub mod orchestrator;
pub mod respond;

pub use classify::{FixedIntentClassifier, IntentClassifier, LlmIntentClassifier};
pub use identity::{IdentityResolver, Resolution};
pub use orchestrator::{
    InboundEvent, Orchestrator, OrchestratorConfig, Outcome, Services, ESCALATION_ACK,
};
pub use respond::{
    build_prompt, parse_reply, LlmReply, ReplyAction, StructuredReply, APOLOGY,
    RAW_REPLY_CONFIDENCE,
};
