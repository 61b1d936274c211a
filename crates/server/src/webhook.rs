//! Webhook ingestion boundary. Verifies the provider signature over the raw
//! body, validates the payload shape, and hands the event to the work queue
//! before acknowledging. Nothing here waits on the pipeline.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, info, warn};

use parley_queue::DelayedWorkQueue;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct WebhookState {
    pub queue: Arc<DelayedWorkQueue>,
    pub secret: Option<SecretString>,
    pub allow_unsigned: bool,
    pub immediate_priority: i32,
    pub default_max_attempts: u32,
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/webhook", post(receive)).with_state(state)
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    action: String,
    #[serde(default)]
    ticket: Option<TicketInfo>,
    #[serde(default)]
    customer: Option<CustomerInfo>,
    #[serde(default)]
    message: Option<MessageInfo>,
    #[serde(default)]
    order: Option<OrderInfo>,
}

#[derive(Debug, Deserialize)]
struct TicketInfo {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct CustomerInfo {
    #[serde(default)]
    external_id: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderInfo {
    #[serde(default)]
    customer_external_id: Option<String>,
    #[serde(default)]
    total_cents: Option<i64>,
}

enum Mapped {
    Job { kind: &'static str, payload: Value },
    Ignored,
}

fn ticket_id(payload: &WebhookPayload) -> Result<String, &'static str> {
    payload
        .ticket
        .as_ref()
        .and_then(|ticket| ticket.id.clone())
        .filter(|id| !id.trim().is_empty())
        .ok_or("missing ticket id")
}

fn hints_json(customer: Option<&CustomerInfo>) -> Value {
    let hints = customer.cloned().unwrap_or_default();
    json!({
        "external_id": hints.external_id,
        "email": hints.email,
        "phone": hints.phone,
        "name": hints.name,
    })
}

/// Map a provider event onto a queue job. Unknown actions are acknowledged
/// and dropped; providers add event types without warning.
fn map_event(payload: &WebhookPayload) -> Result<Mapped, &'static str> {
    match payload.action.as_str() {
        "ticket.created" | "ticket.message" | "message.received" => {
            let ticket = ticket_id(payload)?;
            let text = payload.message.as_ref().and_then(|message| message.text.clone());
            let text = match (payload.action.as_str(), text) {
                (_, Some(text)) => text,
                // A freshly created ticket may carry no message yet.
                ("ticket.created", None) => String::new(),
                (_, None) => return Err("missing message text"),
            };
            Ok(Mapped::Job {
                kind: "process_event",
                payload: json!({
                    "ticket_id": ticket,
                    "text": text,
                    "hints": hints_json(payload.customer.as_ref()),
                }),
            })
        }
        "ticket.resolved" => {
            let ticket = ticket_id(payload)?;
            Ok(Mapped::Job { kind: "ticket_resolved", payload: json!({ "ticket_id": ticket }) })
        }
        "ticket.escalated" => {
            let ticket = ticket_id(payload)?;
            Ok(Mapped::Job { kind: "ticket_escalated", payload: json!({ "ticket_id": ticket }) })
        }
        "customer.updated" => {
            let customer = payload.customer.as_ref().ok_or("missing customer")?;
            let external_id = customer
                .external_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .ok_or("missing customer external id")?;
            Ok(Mapped::Job {
                kind: "customer_sync",
                payload: json!({
                    "external_id": external_id,
                    "email": customer.email,
                    "phone": customer.phone,
                    "name": customer.name,
                }),
            })
        }
        "order.created" => {
            let order = payload.order.as_ref().ok_or("missing order")?;
            let external_id = order
                .customer_external_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .ok_or("missing order customer")?;
            Ok(Mapped::Job {
                kind: "order_sync",
                payload: json!({
                    "external_id": external_id,
                    "total_cents": order.total_cents.unwrap_or(0),
                }),
            })
        }
        _ => Ok(Mapped::Ignored),
    }
}

fn verify_signature(secret: &SecretString, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn reject(code: StatusCode, reason: &str) -> (StatusCode, Json<Value>) {
    (code, Json(json!({ "error": reason })))
}

fn accepted() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "received": true, "processed": false })))
}

pub async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
    match (&state.secret, signature) {
        (Some(secret), Some(sig)) if verify_signature(secret, &body, sig) => {}
        (Some(_), _) => {
            warn!(event_name = "webhook_bad_signature", "rejected webhook with bad signature");
            return reject(StatusCode::UNAUTHORIZED, "invalid signature");
        }
        (None, _) if state.allow_unsigned => {
            warn!(event_name = "webhook_unsigned_accepted", "accepting unsigned webhook");
        }
        (None, _) => {
            warn!(
                event_name = "webhook_unsigned_rejected",
                "no webhook secret configured and unsigned requests are not allowed"
            );
            return reject(StatusCode::UNAUTHORIZED, "unsigned webhooks are not accepted");
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(event_name = "webhook_malformed", error = %err, "malformed webhook payload");
            return reject(StatusCode::BAD_REQUEST, "malformed payload");
        }
    };

    let (kind, job_payload) = match map_event(&payload) {
        Ok(Mapped::Job { kind, payload }) => (kind, payload),
        Ok(Mapped::Ignored) => {
            debug!(
                event_name = "webhook_ignored",
                action = %payload.action,
                "no handler for this event type"
            );
            return accepted();
        }
        Err(reason) => {
            debug!(
                event_name = "webhook_invalid",
                action = %payload.action,
                reason,
                "webhook payload failed validation"
            );
            return reject(StatusCode::BAD_REQUEST, reason);
        }
    };

    match state
        .queue
        .enqueue(kind, job_payload, state.immediate_priority, Utc::now(), state.default_max_attempts)
        .await
    {
        Ok(job_id) => {
            info!(
                event_name = "webhook_accepted",
                action = %payload.action,
                job_id = %job_id.0,
                kind,
                "webhook event queued"
            );
            accepted()
        }
        Err(err) => {
            warn!(event_name = "webhook_enqueue_failed", error = %err, "could not queue event");
            reject(StatusCode::INTERNAL_SERVER_ERROR, "could not accept event")
        }
    }
}
