//! LLM fallback response pipeline: prompt assembly from conversation
//! context and the two-branch parse of the model's reply.

use serde::{Deserialize, Serialize};

use parley_core::domain::customer::Customer;
use parley_core::domain::message::{Direction, Message};
use parley_gateway::commerce::Product;

/// Sent when the model is unreachable or unusable. Always paired with
/// `needs_human = true`.
pub const APOLOGY: &str = "Lo siento, estoy teniendo problemas técnicos en este momento. \
Un agente humano te atenderá en breve.";

/// Confidence assigned to replies the model returned as free text.
pub const RAW_REPLY_CONFIDENCE: f64 = 0.6;

pub const SYSTEM_PROMPT: &str = "You are a commerce support assistant. Answer in the \
customer's language, briefly and concretely. Respond with a JSON object \
{\"text\": string, \"action\": object|null, \"needs_human\": bool, \"confidence\": number} \
where action, when present, is one of \
{\"kind\":\"escalate\",\"reason\":string}, \
{\"kind\":\"create_order\",\"skus\":[string]}, \
{\"kind\":\"apply_discount\",\"percent\":number,\"valid_hours\":number}, \
{\"kind\":\"recommend_products\",\"query\":string}, \
{\"kind\":\"schedule_follow_up\",\"hours\":number}.";

/// Follow-on action the model may request alongside its reply text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplyAction {
    Escalate { reason: String },
    CreateOrder { skus: Vec<String> },
    ApplyDiscount { percent: u8, valid_hours: u32 },
    RecommendProducts { query: String },
    ScheduleFollowUp { hours: u32 },
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct StructuredReply {
    pub text: String,
    #[serde(default)]
    pub action: Option<ReplyAction>,
    #[serde(default)]
    pub needs_human: bool,
    pub confidence: f64,
}

/// Two-branch parse result: the strict structure when the model followed
/// instructions, otherwise its output taken as plain reply text.
#[derive(Clone, Debug, PartialEq)]
pub enum LlmReply {
    Structured(StructuredReply),
    Raw { text: String },
}

impl LlmReply {
    pub fn text(&self) -> &str {
        match self {
            Self::Structured(reply) => &reply.text,
            Self::Raw { text } => text,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Self::Structured(reply) => reply.confidence,
            Self::Raw { .. } => RAW_REPLY_CONFIDENCE,
        }
    }

    pub fn action(&self) -> Option<&ReplyAction> {
        match self {
            Self::Structured(reply) => reply.action.as_ref(),
            Self::Raw { .. } => None,
        }
    }

    pub fn needs_human(&self) -> bool {
        match self {
            Self::Structured(reply) => reply.needs_human,
            Self::Raw { .. } => false,
        }
    }
}

/// Strict parse first; anything that is not the expected JSON object is a
/// raw reply, not an error.
pub fn parse_reply(completion: &str) -> LlmReply {
    let trimmed = completion.trim();
    // Models wrap JSON in fences often enough to deserve a peel.
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    match serde_json::from_str::<StructuredReply>(unfenced) {
        Ok(reply) if !reply.text.trim().is_empty() => LlmReply::Structured(reply),
        _ => LlmReply::Raw { text: trimmed.to_string() },
    }
}

/// Prompt context: recent history oldest-first, the customer profile line,
/// and any catalog items the inbound text matched.
pub fn build_prompt(
    customer: &Customer,
    history: &[Message],
    catalog: &[Product],
    inbound_text: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("Customer: ");
    prompt.push_str(&customer.profile_summary());
    prompt.push('\n');

    if !catalog.is_empty() {
        prompt.push_str("Relevant catalog items:\n");
        for product in catalog {
            prompt.push_str(&format!(
                "- {} ({}): ${}.{:02}\n",
                product.name,
                product.sku,
                product.price_cents / 100,
                (product.price_cents % 100).unsigned_abs(),
            ));
        }
    }

    if !history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        for message in history {
            let speaker = match message.direction {
                Direction::Inbound => "customer",
                Direction::Outbound => "assistant",
            };
            prompt.push_str(&format!("{speaker}: {}\n", message.content));
        }
    }

    prompt.push_str("customer: ");
    prompt.push_str(inbound_text);
    prompt
}

#[cfg(test)]
mod tests {
    use parley_core::domain::conversation::ConversationId;
    use parley_core::domain::customer::Customer;
    use parley_core::domain::message::Message;
    use parley_gateway::commerce::Product;

    use super::{build_prompt, parse_reply, LlmReply, ReplyAction, RAW_REPLY_CONFIDENCE};

    #[test]
    fn well_formed_json_parses_to_the_structured_branch() {
        let reply = parse_reply(
            r#"{"text": "Claro, el plan cuesta $499.", "action": {"kind": "recommend_products", "query": "plan"}, "needs_human": false, "confidence": 0.9}"#,
        );
        let LlmReply::Structured(structured) = reply else {
            panic!("expected structured branch");
        };
        assert_eq!(structured.text, "Claro, el plan cuesta $499.");
        assert_eq!(
            structured.action,
            Some(ReplyAction::RecommendProducts { query: "plan".into() })
        );
        assert!((structured.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn fenced_json_is_unwrapped_before_parsing() {
        let reply = parse_reply(
            "```json\n{\"text\": \"hola\", \"confidence\": 0.8}\n```",
        );
        assert!(matches!(reply, LlmReply::Structured(_)));
        assert_eq!(reply.text(), "hola");
    }

    #[test]
    fn free_text_falls_back_to_the_raw_branch() {
        let reply = parse_reply("Claro, con gusto te ayudo con tu pedido.");
        assert!(matches!(reply, LlmReply::Raw { .. }));
        assert_eq!(reply.text(), "Claro, con gusto te ayudo con tu pedido.");
        assert_eq!(reply.confidence(), RAW_REPLY_CONFIDENCE);
        assert!(reply.action().is_none());
        assert!(!reply.needs_human());
    }

    #[test]
    fn structured_reply_with_empty_text_is_treated_as_raw() {
        let raw = r#"{"text": "  ", "confidence": 0.9}"#;
        let reply = parse_reply(raw);
        assert!(matches!(reply, LlmReply::Raw { .. }));
        assert_eq!(reply.text(), raw);
    }

    #[test]
    fn prompt_carries_profile_history_and_catalog() {
        let mut customer = Customer::new_unmatched(None, None, None, Some("Ana".into()));
        customer.order_count = 2;
        let conversation_id = ConversationId::generate();
        let history = vec![
            Message::inbound(conversation_id.clone(), "hola"),
            Message::outbound(
                conversation_id,
                "¡Hola Ana!",
                parley_core::domain::message::Attribution {
                    intent: None,
                    confidence: Some(0.9),
                    automated: true,
                },
            ),
        ];
        let catalog = vec![Product {
            sku: "PLAN-1".into(),
            name: "Plan Básico".into(),
            price_cents: 49_900,
            description: None,
        }];

        let prompt = build_prompt(&customer, &history, &catalog, "¿cuánto cuesta el plan?");
        assert!(prompt.contains("Ana"));
        assert!(prompt.contains("customer: hola"));
        assert!(prompt.contains("assistant: ¡Hola Ana!"));
        assert!(prompt.contains("PLAN-1"));
        assert!(prompt.contains("$499.00"));
        assert!(prompt.ends_with("customer: ¿cuánto cuesta el plan?"));
    }
}
