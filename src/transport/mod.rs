//! The conversation-transport boundary.
//!
//! The core is written against [`ChatTransport`]; everything connection-
//! specific (credentials, reconnection, API quirks) stays behind it.

pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// One inbound chat message, exactly as delivered by the transport. May
/// arrive duplicated or out of order; the admission gate deals with both.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    /// Server-side epoch seconds.
    pub timestamp: i64,
    pub message_id: String,
    pub from_self: bool,
}

#[derive(Debug, Clone)]
pub struct ConversationInfo {
    pub id: String,
    pub name: String,
    pub member_count: usize,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Register for inbound message batches. Called once by the consumer;
    /// the subscription ends when [`ChatTransport::shutdown`] is called and
    /// the sender side is dropped.
    fn subscribe(&self) -> flume::Receiver<Vec<InboundMessage>>;

    async fn send_text(&self, conversation_id: &str, text: &str) -> Result<()>;

    async fn list_conversations(&self) -> Result<Vec<ConversationInfo>>;

    /// Best-effort history clear; callers treat failure as non-fatal.
    async fn clear_history(&self, conversation_id: &str) -> Result<()>;

    /// Stop delivering events. Idempotent.
    fn shutdown(&self);
}
