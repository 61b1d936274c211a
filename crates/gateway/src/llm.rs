//! Language-model provider client. Chat-completions shaped API behind the
//! retrying gateway, with a hard timeout on every call.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::client::{GatewayClient, GatewayError, RequestSpec};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("model response had no completion text")]
    MalformedResponse,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete `prompt` with an optional system preamble. Returns the raw
    /// completion text; the caller decides how to parse it.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}

pub struct HttpLlmClient {
    gateway: GatewayClient,
    base_url: String,
    api_key: SecretString,
    model: String,
    timeout: Duration,
}

impl HttpLlmClient {
    pub fn new(
        gateway: GatewayClient,
        base_url: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let spec = RequestSpec::post(
            url,
            json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": prompt},
                ],
            }),
        )
        .with_bearer(self.api_key.clone())
        .fail_fast_on_client_error();

        let body = tokio::time::timeout(self.timeout, self.gateway.call(spec))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))??;

        let text = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(LlmError::MalformedResponse)?
            .trim()
            .to_string();
        debug!(event_name = "llm_completion", model = %self.model, chars = text.len(), "model replied");
        Ok(text)
    }
}

/// Fixed-output model for tests and offline runs.
pub struct ScriptedLlmClient {
    reply: Result<String, &'static str>,
}

impl ScriptedLlmClient {
    pub fn replies_with(reply: impl Into<String>) -> Self {
        Self { reply: Ok(reply.into()) }
    }

    pub fn always_fails(reason: &'static str) -> Self {
        Self { reply: Err(reason) }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, LlmError> {
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(_) => Err(LlmError::MalformedResponse),
        }
    }
}
