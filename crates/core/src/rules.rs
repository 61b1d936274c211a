//! Prioritized business-rule evaluation.
//!
//! Works over an already-loaded snapshot of active rules; exactly one rule
//! (the highest-priority satisfied one) fires per event. No match is a
//! normal outcome and hands control to the LLM fallback.

use crate::domain::conversation::Conversation;
use crate::domain::customer::Customer;
use crate::domain::rule::{BusinessRule, NumericField, RuleCategory, RuleCondition};
use crate::intent::Intent;

/// Fixed intent → rule-category mapping. `General` is always in scope so
/// cross-cutting rules (keyword escalations) apply to every intent.
pub fn relevant_categories(intent: Intent) -> &'static [RuleCategory] {
    match intent {
        Intent::Greeting | Intent::Goodbye => &[RuleCategory::Engagement, RuleCategory::General],
        Intent::ProductInquiry | Intent::PriceRequest | Intent::PurchaseIntent => {
            &[RuleCategory::Sales, RuleCategory::General]
        }
        Intent::SupportRequest | Intent::Complaint => {
            &[RuleCategory::Support, RuleCategory::General]
        }
        Intent::Other => &[RuleCategory::General],
    }
}

pub struct RuleEvalContext<'a> {
    pub intent: Intent,
    pub message_text: &'a str,
    pub customer: &'a Customer,
    pub conversation: &'a Conversation,
}

/// Pick the rule that fires for this event, if any.
///
/// Rules are ordered priority descending; the stable sort preserves creation
/// order among equal priorities when the slice is loaded in creation order.
pub fn evaluate<'a>(
    rules: &'a [BusinessRule],
    ctx: &RuleEvalContext<'_>,
) -> Option<&'a BusinessRule> {
    let mut ordered: Vec<&BusinessRule> = rules.iter().filter(|rule| rule.is_active).collect();
    ordered.sort_by_key(|rule| std::cmp::Reverse(rule.priority));

    ordered
        .into_iter()
        .find(|rule| trigger_matches(rule, ctx) && conditions_hold(rule, ctx))
}

fn trigger_matches(rule: &BusinessRule, ctx: &RuleEvalContext<'_>) -> bool {
    if let Some(intents) = &rule.trigger.intents {
        if !intents.contains(&ctx.intent) {
            return false;
        }
    }
    if let Some(keywords) = &rule.trigger.keywords {
        if !keywords.iter().any(|keyword| keyword_in_text(keyword, ctx.message_text)) {
            return false;
        }
    }
    true
}

fn conditions_hold(rule: &BusinessRule, ctx: &RuleEvalContext<'_>) -> bool {
    rule.conditions.iter().all(|condition| condition_holds(condition, ctx))
}

fn condition_holds(condition: &RuleCondition, ctx: &RuleEvalContext<'_>) -> bool {
    match condition {
        RuleCondition::SegmentEquals { segment } => ctx.customer.segment == *segment,
        RuleCondition::NumericRange { field, min, max } => {
            let value = numeric_value(*field, ctx);
            min.map_or(true, |min| value >= min) && max.map_or(true, |max| value <= max)
        }
    }
}

fn numeric_value(field: NumericField, ctx: &RuleEvalContext<'_>) -> f64 {
    match field {
        NumericField::OrderCount => f64::from(ctx.customer.order_count),
        NumericField::LifetimeSpendCents => ctx.customer.lifetime_spend_cents as f64,
        NumericField::MessageCount => f64::from(ctx.conversation.message_count),
        NumericField::Priority => f64::from(ctx.conversation.priority),
    }
}

/// Case-insensitive whole-word occurrence check. A keyword may span several
/// words; boundaries are non-alphanumeric characters.
pub fn keyword_in_text(keyword: &str, text: &str) -> bool {
    let keyword = keyword.trim().to_lowercase();
    if keyword.is_empty() {
        return false;
    }
    let text = text.to_lowercase();
    let mut start = 0;
    while let Some(offset) = text[start..].find(&keyword) {
        let begin = start + offset;
        let end = begin + keyword.len();
        let boundary_before =
            begin == 0 || !text[..begin].chars().next_back().is_some_and(char::is_alphanumeric);
        let boundary_after = !text[end..].chars().next().is_some_and(char::is_alphanumeric);
        if boundary_before && boundary_after {
            return true;
        }
        start = begin + 1;
    }
    false
}
