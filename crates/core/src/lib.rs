pub mod config;
pub mod domain;
pub mod errors;
pub mod identity;
pub mod intent;
pub mod jobs;
pub mod rules;
pub mod sentiment;

pub use chrono;

pub use domain::conversation::{Conversation, ConversationId, ConversationStatus};
pub use domain::customer::{Customer, CustomerId, Segment};
pub use domain::escalation::{Escalation, EscalationId, EscalationKind, EscalationStatus};
pub use domain::message::{Attribution, Direction, Message, MessageId};
pub use domain::rule::{
    BusinessRule, NumericField, RuleAction, RuleCategory, RuleCondition, RuleExecution,
    RuleExecutionId, RuleId, RuleTrigger,
};
pub use errors::{DomainError, ProcessingError};
pub use identity::{IdentityHints, MatchMethod};
pub use intent::Intent;
pub use jobs::{JobId, QueuedJob};
pub use rules::{evaluate, relevant_categories, RuleEvalContext};
pub use sentiment::{LexiconSentimentAnalyzer, SentimentAnalyzer};
