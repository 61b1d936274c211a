//! Chat provider client: outbound messages, conversation lifecycle calls,
//! channel/template listings and provider-side metrics.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use parley_core::identity::normalize_phone;

use crate::client::{GatewayClient, GatewayError, RequestSpec};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("chat response missing field `{0}`")]
    MalformedResponse(&'static str),
    #[error("no deliverable address for recipient")]
    Unaddressable,
}

/// The one seam the orchestrator needs: pushing a reply back to the customer.
#[async_trait]
pub trait OutboundMessenger: Send + Sync {
    async fn send_text(&self, ticket_id: &str, to_phone: &str, text: &str)
        -> Result<(), ChatError>;
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TemplateInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub placeholders: Vec<String>,
}

pub struct ChatClient {
    gateway: GatewayClient,
    base_url: String,
    api_token: SecretString,
    default_country_prefix: String,
}

impl ChatClient {
    pub fn new(
        gateway: GatewayClient,
        base_url: impl Into<String>,
        api_token: SecretString,
        default_country_prefix: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            base_url: base_url.into(),
            api_token,
            default_country_prefix: default_country_prefix.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn authed(&self, spec: RequestSpec) -> RequestSpec {
        spec.with_bearer(self.api_token.clone())
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ChatError> {
        Ok(self.gateway.call(self.authed(RequestSpec::post(self.url(path), body))).await?)
    }

    async fn get(&self, path: &str) -> Result<Value, ChatError> {
        Ok(self.gateway.call(self.authed(RequestSpec::get(self.url(path)))).await?)
    }

    /// Send a template message with named parameters substituted provider-side.
    pub async fn send_template(
        &self,
        ticket_id: &str,
        to_phone: &str,
        template_id: &str,
        params: &HashMap<String, String>,
    ) -> Result<(), ChatError> {
        let recipient = normalize_phone(to_phone, &self.default_country_prefix);
        if recipient.is_empty() {
            return Err(ChatError::Unaddressable);
        }
        self.post(
            "messages/template",
            json!({
                "ticket_id": ticket_id,
                "to": recipient,
                "template_id": template_id,
                "params": params,
            }),
        )
        .await?;
        info!(event_name = "chat_template_sent", ticket_id, template_id, "template sent");
        Ok(())
    }

    /// Claim the conversation for the automated agent.
    pub async fn take(&self, ticket_id: &str) -> Result<(), ChatError> {
        self.post(&format!("tickets/{ticket_id}/take"), json!({})).await?;
        Ok(())
    }

    /// Return the conversation to the human pool.
    pub async fn release(&self, ticket_id: &str) -> Result<(), ChatError> {
        self.post(&format!("tickets/{ticket_id}/release"), json!({})).await?;
        Ok(())
    }

    pub async fn close(&self, ticket_id: &str) -> Result<(), ChatError> {
        self.post(&format!("tickets/{ticket_id}/close"), json!({})).await?;
        Ok(())
    }

    pub async fn list_channels(&self) -> Result<Vec<ChannelInfo>, ChatError> {
        let body = self.get("channels").await?;
        decode_list(body, "channels")
    }

    pub async fn list_templates(&self) -> Result<Vec<TemplateInfo>, ChatError> {
        let body = self.get("templates").await?;
        decode_list(body, "templates")
    }

    /// Provider-side conversation metrics for a window, returned as-is.
    pub async fn fetch_metrics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Value, ChatError> {
        self.get(&format!("metrics?from={}&to={}", from.to_rfc3339(), to.to_rfc3339())).await
    }
}

#[async_trait]
impl OutboundMessenger for ChatClient {
    async fn send_text(
        &self,
        ticket_id: &str,
        to_phone: &str,
        text: &str,
    ) -> Result<(), ChatError> {
        let recipient = normalize_phone(to_phone, &self.default_country_prefix);
        if recipient.is_empty() {
            return Err(ChatError::Unaddressable);
        }
        self.post(
            "messages/text",
            json!({ "ticket_id": ticket_id, "to": recipient, "text": text }),
        )
        .await?;
        info!(event_name = "chat_text_sent", ticket_id, "text message sent");
        Ok(())
    }
}

fn decode_list<T: serde::de::DeserializeOwned>(
    body: Value,
    field: &'static str,
) -> Result<Vec<T>, ChatError> {
    let items = body.get(field).cloned().unwrap_or(body);
    serde_json::from_value(items).map_err(|_| ChatError::MalformedResponse(field))
}

/// Discards everything it is asked to send. For orchestrator tests.
#[derive(Default)]
pub struct NoopMessenger;

#[async_trait]
impl OutboundMessenger for NoopMessenger {
    async fn send_text(
        &self,
        _ticket_id: &str,
        _to_phone: &str,
        _text: &str,
    ) -> Result<(), ChatError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::json;

    use crate::client::{
        AttemptFailure, GatewayClient, RequestSpec, RetryPolicy, Transport, TransportResponse,
    };

    use super::{ChatClient, ChatError, OutboundMessenger};

    struct RecordingTransport {
        requests: Mutex<Vec<RequestSpec>>,
        response: TransportResponse,
    }

    impl RecordingTransport {
        fn ok(body: serde_json::Value) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                response: TransportResponse { status: 200, body },
            })
        }

        fn requests(&self) -> Vec<RequestSpec> {
            self.requests.lock().expect("lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn execute(
            &self,
            spec: &RequestSpec,
        ) -> Result<TransportResponse, AttemptFailure> {
            self.requests.lock().expect("lock").push(spec.clone());
            Ok(self.response.clone())
        }
    }

    fn chat_client(transport: Arc<RecordingTransport>) -> ChatClient {
        let gateway = GatewayClient::new(
            transport,
            RetryPolicy { max_attempts: 1, base_delay: Duration::from_millis(1) },
        );
        let token = secrecy::SecretString::from("token".to_string());
        ChatClient::new(gateway, "https://chat.test/api", token, "+52")
    }

    #[tokio::test]
    async fn send_text_normalizes_the_recipient_phone() {
        let transport = RecordingTransport::ok(json!({"ok": true}));
        let client = chat_client(transport.clone());

        client.send_text("t-1", "55 1234 5678", "hola").await.expect("send");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let body = requests[0].body.clone().expect("body");
        assert_eq!(body["to"], "+525512345678");
        assert_eq!(body["text"], "hola");
        assert!(requests[0].url.ends_with("/messages/text"));
    }

    #[tokio::test]
    async fn send_text_rejects_an_empty_recipient() {
        let transport = RecordingTransport::ok(json!({"ok": true}));
        let client = chat_client(transport.clone());

        let err = client.send_text("t-1", "   ", "hola").await.expect_err("unaddressable");
        assert!(matches!(err, ChatError::Unaddressable));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn channel_listing_decodes_the_wrapped_array() {
        let transport = RecordingTransport::ok(json!({
            "channels": [
                {"id": "ch-1", "name": "whatsapp", "provider": "wa"},
                {"id": "ch-2", "name": "webchat"},
            ]
        }));
        let client = chat_client(transport);

        let channels = client.list_channels().await.expect("list");
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].id, "ch-1");
        assert_eq!(channels[1].provider, None);
    }
}
