//! Mock transport for testing
//!
//! Keeps endpoints and posted messages in memory and enforces a per-channel
//! endpoint quota the way the platform does.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::TransportError;
use crate::ids::{ChannelId, EndpointId, MessageId};

use super::transport::{
    DeliveredMessage, DeliveryTransport, EndpointHandle, EndpointInfo, OutboundMessage,
    TransportResult,
};

// ─────────────────────────────────────────────────────────────────
// Mock Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for mock transport behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Endpoints allowed per channel
    pub quota: usize,

    /// Simulated latency per call
    pub latency: Option<Duration>,
    /// Extra latency on endpoint listing only
    pub list_latency: Option<Duration>,

    /// Failures to inject
    pub fail_list: bool,
    pub fail_create: Option<TransportError>,
    pub fail_send: Option<TransportError>,
    /// Sends under this username fail as transient
    pub fail_send_as: Option<String>,
    pub fail_delete_message: Option<TransportError>,
    pub fail_post: Option<TransportError>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            quota: 15,
            latency: None,
            list_latency: None,
            fail_list: false,
            fail_create: None,
            fail_send: None,
            fail_send_as: None,
            fail_delete_message: None,
            fail_post: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────

/// A message sent through an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: MessageId,
    pub endpoint: EndpointId,
    pub channel: ChannelId,
    pub thread: Option<ChannelId>,
    pub message: OutboundMessage,
}

/// A plain bot message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub id: MessageId,
    pub channel: ChannelId,
    pub content: String,
}

#[derive(Debug, Clone)]
struct MockEndpoint {
    info: EndpointInfo,
}

#[derive(Debug, Default)]
struct MockState {
    endpoints: Vec<MockEndpoint>,
    sent: Vec<SentMessage>,
    posted: Vec<PostedMessage>,
    deleted_messages: Vec<(ChannelId, MessageId)>,
    call_counts: HashMap<&'static str, u32>,
    next_id: u64,
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        // Far above ids tests use for their own fixtures
        1_000_000 + self.next_id
    }

    fn count_in(&self, channel: ChannelId) -> usize {
        self.endpoints.iter().filter(|e| e.info.channel == channel).count()
    }
}

// ─────────────────────────────────────────────────────────────────
// Mock Transport
// ─────────────────────────────────────────────────────────────────

/// In-memory implementation of [`DeliveryTransport`] for testing
pub struct MockTransport {
    config: RwLock<MockConfig>,
    state: RwLock<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_config(MockConfig::default())
    }

    pub fn with_config(config: MockConfig) -> Self {
        Self {
            config: RwLock::new(config),
            state: RwLock::new(MockState::default()),
        }
    }

    /// Change behavior between calls.
    pub fn configure(&self, f: impl FnOnce(&mut MockConfig)) {
        f(&mut self.config.write());
    }

    /// Put an endpoint on a channel, ignoring the quota.
    pub fn seed_endpoint(&self, channel: ChannelId, name: &str) -> EndpointId {
        let mut state = self.state.write();
        let id = EndpointId::new(state.next_id());
        state.endpoints.push(MockEndpoint {
            info: EndpointInfo {
                id,
                name: Some(name.to_string()),
                token: Some(format!("token-{}", id)),
                channel,
            },
        });
        id
    }

    /// Remove an endpoint behind the pool's back.
    pub fn remove_endpoint(&self, id: EndpointId) {
        self.state.write().endpoints.retain(|e| e.info.id != id);
    }

    pub fn has_endpoint(&self, id: EndpointId) -> bool {
        self.state.read().endpoints.iter().any(|e| e.info.id == id)
    }

    pub fn endpoint_count(&self, channel: ChannelId) -> usize {
        self.state.read().count_in(channel)
    }

    /// Get the number of times a method was called
    pub fn call_count(&self, method: &str) -> u32 {
        self.state.read().call_counts.get(method).copied().unwrap_or(0)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.read().sent.clone()
    }

    pub fn posted(&self) -> Vec<PostedMessage> {
        self.state.read().posted.clone()
    }

    pub fn deleted_messages(&self) -> Vec<(ChannelId, MessageId)> {
        self.state.read().deleted_messages.clone()
    }

    /// Record a call, wait out the simulated latency, and return a snapshot
    /// of the configuration.
    async fn enter(&self, method: &'static str) -> MockConfig {
        *self.state.write().call_counts.entry(method).or_insert(0) += 1;
        let config = self.config.read().clone();
        if let Some(latency) = config.latency {
            tokio::time::sleep(latency).await;
        }
        config
    }
}

#[async_trait]
impl DeliveryTransport for MockTransport {
    async fn list_endpoints(&self, channel: ChannelId) -> TransportResult<Vec<EndpointInfo>> {
        let config = self.enter("list_endpoints").await;
        if let Some(latency) = config.list_latency {
            tokio::time::sleep(latency).await;
        }
        if config.fail_list {
            return Err(TransportError::transient("listing unavailable"));
        }
        Ok(self
            .state
            .read()
            .endpoints
            .iter()
            .filter(|e| e.info.channel == channel)
            .map(|e| e.info.clone())
            .collect())
    }

    async fn create_endpoint(&self, channel: ChannelId, name: &str) -> TransportResult<EndpointHandle> {
        let config = self.enter("create_endpoint").await;
        if let Some(err) = config.fail_create {
            return Err(err);
        }
        let mut state = self.state.write();
        if state.count_in(channel) >= config.quota {
            return Err(TransportError::quota_exceeded("Maximum number of webhooks reached"));
        }
        let id = EndpointId::new(state.next_id());
        let info = EndpointInfo {
            id,
            name: Some(name.to_string()),
            token: Some(format!("token-{}", id)),
            channel,
        };
        state.endpoints.push(MockEndpoint { info: info.clone() });
        info.into_handle()
            .ok_or_else(|| TransportError::transient("created endpoint has no token"))
    }

    async fn fetch_endpoint(&self, handle: &EndpointHandle) -> TransportResult<()> {
        self.enter("fetch_endpoint").await;
        if self.has_endpoint(handle.id) {
            Ok(())
        } else {
            Err(TransportError::not_found(format!("webhook {}", handle.id)))
        }
    }

    async fn delete_endpoint(&self, endpoint: EndpointId) -> TransportResult<()> {
        self.enter("delete_endpoint").await;
        if !self.has_endpoint(endpoint) {
            return Err(TransportError::not_found(format!("webhook {}", endpoint)));
        }
        self.remove_endpoint(endpoint);
        Ok(())
    }

    async fn send(
        &self,
        handle: &EndpointHandle,
        message: &OutboundMessage,
        thread: Option<ChannelId>,
    ) -> TransportResult<DeliveredMessage> {
        let config = self.enter("send").await;
        if let Some(err) = config.fail_send {
            return Err(err);
        }
        if config.fail_send_as.as_deref() == Some(message.username.as_str()) {
            return Err(TransportError::transient(format!("cannot post as {}", message.username)));
        }
        if !self.has_endpoint(handle.id) {
            return Err(TransportError::not_found(format!("webhook {}", handle.id)));
        }
        let mut state = self.state.write();
        let id = MessageId::new(state.next_id());
        let channel = thread.unwrap_or(handle.channel);
        state.sent.push(SentMessage {
            id,
            endpoint: handle.id,
            channel,
            thread,
            message: message.clone(),
        });
        Ok(DeliveredMessage { id, channel })
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> TransportResult<()> {
        let config = self.enter("delete_message").await;
        if let Some(err) = config.fail_delete_message {
            return Err(err);
        }
        self.state.write().deleted_messages.push((channel, message));
        Ok(())
    }

    async fn post_message(&self, channel: ChannelId, content: &str) -> TransportResult<DeliveredMessage> {
        let config = self.enter("post_message").await;
        if let Some(err) = config.fail_post {
            return Err(err);
        }
        let mut state = self.state.write();
        let id = MessageId::new(state.next_id());
        state.posted.push(PostedMessage {
            id,
            channel,
            content: content.to_string(),
        });
        Ok(DeliveredMessage { id, channel })
    }
}
