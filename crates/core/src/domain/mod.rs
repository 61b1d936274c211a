pub mod conversation;
pub mod customer;
pub mod escalation;
pub mod message;
pub mod rule;
