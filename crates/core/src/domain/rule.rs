use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::ConversationId;
use crate::domain::customer::Segment;
use crate::intent::Intent;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(pub Uuid);

impl RuleId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Engagement,
    Sales,
    Support,
    General,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Engagement => "engagement",
            Self::Sales => "sales",
            Self::Support => "support",
            Self::General => "general",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "engagement" => Some(Self::Engagement),
            "sales" => Some(Self::Sales),
            "support" => Some(Self::Support),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// What must be present in the event for a rule to be considered at all.
/// Both members optional; a set member must match when declared.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intents: Option<Vec<Intent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
}

/// Numeric attributes a condition may range over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericField {
    OrderCount,
    LifetimeSpendCents,
    MessageCount,
    Priority,
}

/// Closed set of condition variants, decoded from the persisted JSON
/// document at load time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    SegmentEquals { segment: Segment },
    NumericRange { field: NumericField, min: Option<f64>, max: Option<f64> },
}

/// Closed set of action variants a rule may carry, in execution order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleAction {
    DirectResponse {
        message: String,
        #[serde(default)]
        next_steps: Vec<String>,
    },
    Escalate {
        reason: String,
    },
    ApplyDiscount {
        percent: u8,
        valid_hours: u32,
        message_template: String,
    },
}

impl RuleAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DirectResponse { .. } => "direct_response",
            Self::Escalate { .. } => "escalate",
            Self::ApplyDiscount { .. } => "apply_discount",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusinessRule {
    pub id: RuleId,
    pub name: String,
    pub version: u32,
    pub category: RuleCategory,
    pub trigger: RuleTrigger,
    pub conditions: Vec<RuleCondition>,
    pub actions: Vec<RuleAction>,
    pub priority: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleExecutionId(pub Uuid);

impl RuleExecutionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Write-once audit record of one rule firing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleExecution {
    pub id: RuleExecutionId,
    pub rule_id: RuleId,
    pub conversation_id: ConversationId,
    pub trigger_snapshot: String,
    pub success: bool,
    pub action_kind: Option<String>,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}
