//! Delivery transport contract
//!
//! A transport knows how to manage per-channel delivery endpoints and post
//! through them. Implementations report failures as [`TransportError`] so the
//! pool can tell a missing endpoint from a full channel from a flaky network.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::ids::{ChannelId, EndpointId, MessageId};

pub type TransportResult<T> = std::result::Result<T, TransportError>;

// ─────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────

/// A usable delivery endpoint (a channel webhook on Discord)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointHandle {
    pub id: EndpointId,
    pub token: String,
    pub name: String,
    /// Channel the endpoint is attached to. Never a thread.
    pub channel: ChannelId,
}

/// An endpoint as listed on a channel. Foreign endpoints may carry no token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub id: EndpointId,
    pub name: Option<String>,
    pub token: Option<String>,
    pub channel: ChannelId,
}

impl EndpointInfo {
    pub fn has_name_in(&self, names: &[String]) -> bool {
        self.name
            .as_deref()
            .map_or(false, |n| names.iter().any(|r| r == n))
    }

    /// A handle for this endpoint, if it can be posted through.
    pub fn into_handle(self) -> Option<EndpointHandle> {
        Some(EndpointHandle {
            id: self.id,
            token: self.token?,
            name: self.name.unwrap_or_default(),
            channel: self.channel,
        })
    }
}

/// Where a message ends up: the endpoint's channel, optionally a thread in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelTarget {
    pub channel: ChannelId,
    pub thread: Option<ChannelId>,
}

impl ChannelTarget {
    /// Route a message posted in `channel`. Threads deliver through the
    /// parent's endpoint with the thread as target.
    pub fn for_channel(channel: ChannelId, parent: Option<ChannelId>) -> Self {
        match parent {
            Some(parent) => Self {
                channel: parent,
                thread: Some(channel),
            },
            None => Self {
                channel,
                thread: None,
            },
        }
    }

    /// The channel the message is visible in.
    pub fn visible_channel(&self) -> ChannelId {
        self.thread.unwrap_or(self.channel)
    }
}

/// A persona-branded message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub username: String,
    pub avatar_url: String,
    pub content: String,
}

/// Reference to a message the transport posted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub id: MessageId,
    pub channel: ChannelId,
}

// ─────────────────────────────────────────────────────────────────
// Transport Contract
// ─────────────────────────────────────────────────────────────────

#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn list_endpoints(&self, channel: ChannelId) -> TransportResult<Vec<EndpointInfo>>;

    async fn create_endpoint(&self, channel: ChannelId, name: &str) -> TransportResult<EndpointHandle>;

    /// Liveness probe. `NotFound` means the endpoint is gone.
    async fn fetch_endpoint(&self, handle: &EndpointHandle) -> TransportResult<()>;

    async fn delete_endpoint(&self, endpoint: EndpointId) -> TransportResult<()>;

    async fn send(
        &self,
        handle: &EndpointHandle,
        message: &OutboundMessage,
        thread: Option<ChannelId>,
    ) -> TransportResult<DeliveredMessage>;

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> TransportResult<()>;

    /// Plain bot message, used for operator notices.
    async fn post_message(&self, channel: ChannelId, content: &str) -> TransportResult<DeliveredMessage>;
}

/// Bound a transport call. Elapsed time becomes [`TransportError::Timeout`].
pub async fn timed<T, F>(operation: &str, limit: Duration, fut: F) -> TransportResult<T>
where
    F: Future<Output = TransportResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            operation: operation.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}
