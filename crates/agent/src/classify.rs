//! Intent classification. Total by construction: whatever the model does,
//! the caller gets a label out of the closed intent set.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use parley_core::intent::Intent;
use parley_gateway::llm::LlmClient;

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Intent;
}

const SYSTEM_PROMPT: &str = "You label customer messages. Reply with exactly one of: \
greeting, product_inquiry, price_request, purchase_intent, support_request, complaint, \
goodbye, other. Reply with the label only.";

pub struct LlmIntentClassifier {
    llm: Arc<dyn LlmClient>,
}

impl LlmIntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(&self, text: &str) -> Intent {
        match self.llm.complete(SYSTEM_PROMPT, text).await {
            Ok(label) => {
                let intent = Intent::from_label(&label);
                debug!(event_name = "intent_classified", intent = intent.as_str(), "classified");
                intent
            }
            Err(error) => {
                warn!(
                    event_name = "intent_classification_failed",
                    error = %error,
                    "model failure, defaulting intent"
                );
                Intent::Other
            }
        }
    }
}

/// Always returns the same intent. For pipeline tests.
pub struct FixedIntentClassifier(pub Intent);

#[async_trait]
impl IntentClassifier for FixedIntentClassifier {
    async fn classify(&self, _text: &str) -> Intent {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_core::intent::Intent;
    use parley_gateway::llm::ScriptedLlmClient;

    use super::{IntentClassifier, LlmIntentClassifier};

    #[tokio::test]
    async fn in_set_label_is_used_verbatim() {
        let classifier =
            LlmIntentClassifier::new(Arc::new(ScriptedLlmClient::replies_with("complaint")));
        assert_eq!(classifier.classify("el pedido llegó mal").await, Intent::Complaint);
    }

    #[tokio::test]
    async fn out_of_set_label_coerces_to_other() {
        let classifier =
            LlmIntentClassifier::new(Arc::new(ScriptedLlmClient::replies_with("sales_lead")));
        assert_eq!(classifier.classify("hola").await, Intent::Other);
    }

    #[tokio::test]
    async fn model_failure_coerces_to_other() {
        let classifier =
            LlmIntentClassifier::new(Arc::new(ScriptedLlmClient::always_fails("down")));
        assert_eq!(classifier.classify("hola").await, Intent::Other);
    }
}
