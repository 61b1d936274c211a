//! Outbound provider plumbing: a retrying gateway client plus the chat,
//! language-model and commerce clients built on top of it.

pub mod chat;
pub mod client;
pub mod commerce;
pub mod llm;

pub use chat::{ChatClient, ChatError, ChannelInfo, NoopMessenger, OutboundMessenger, TemplateInfo};
pub use client::{
    AttemptFailure, GatewayClient, GatewayError, HttpTransport, Method, RequestSpec, RetryPolicy,
    Transport, TransportResponse,
};
pub use commerce::{
    mint_discount_code, CommerceError, CommerceProvider, DiscountCode, HttpCommerceClient,
    NoopCommerceProvider, Product,
};
pub use llm::{HttpLlmClient, LlmClient, LlmError, ScriptedLlmClient};
