//! Delivery endpoint pool
//!
//! Caches one endpoint per channel. On a miss the pool:
//! 1. reuses an endpoint with a recognized name already on the channel
//! 2. creates a new endpoint under the configured name
//! 3. when the channel is full, runs a best-effort cleanup and retries the
//!    creation once
//!
//! Creation is serialized per channel, so concurrent misses on the same
//! channel produce one endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::DeliverySettings;
use crate::error::{Error, Result, TransportError};
use crate::ids::ChannelId;

use super::transport::{
    timed, ChannelTarget, DeliveredMessage, DeliveryTransport, EndpointHandle, EndpointInfo,
    OutboundMessage,
};

// ─────────────────────────────────────────────────────────────────
// Pool Settings
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Name given to endpoints this pool creates
    pub endpoint_name: String,
    /// Names treated as ours when reusing or cleaning up
    pub recognized_names: Vec<String>,
    /// Endpoint count at which foreign endpoints are cleaned up too
    pub hard_cap: usize,
    /// Most foreign endpoints removed in one cleanup
    pub foreign_cleanup_batch: usize,
    pub request_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&DeliverySettings::default())
    }
}

impl From<&DeliverySettings> for PoolSettings {
    fn from(settings: &DeliverySettings) -> Self {
        Self {
            endpoint_name: settings.endpoint_name.clone(),
            recognized_names: settings.all_recognized_names(),
            hard_cap: settings.hard_cap,
            foreign_cleanup_batch: settings.foreign_cleanup_batch,
            request_timeout: settings.request_timeout(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Cleanup Report
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    Succeeded,
    Partial,
    Failed,
}

/// What a cleanup pass managed to remove
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted_recognized: usize,
    pub deleted_foreign: usize,
    pub failed_deletes: usize,
    /// Set when the endpoints could not even be listed
    pub listing_error: Option<String>,
}

impl CleanupReport {
    pub fn deleted(&self) -> usize {
        self.deleted_recognized + self.deleted_foreign
    }

    pub fn outcome(&self) -> CleanupOutcome {
        if self.listing_error.is_some() {
            return CleanupOutcome::Failed;
        }
        match (self.deleted(), self.failed_deletes) {
            (_, 0) => CleanupOutcome::Succeeded,
            (0, _) => CleanupOutcome::Failed,
            _ => CleanupOutcome::Partial,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Endpoint Pool
// ─────────────────────────────────────────────────────────────────

pub struct EndpointPool {
    transport: Arc<dyn DeliveryTransport>,
    settings: PoolSettings,
    cache: RwLock<HashMap<ChannelId, EndpointHandle>>,
    creation_locks: Mutex<HashMap<ChannelId, Arc<AsyncMutex<()>>>>,
}

impl EndpointPool {
    pub fn new(transport: Arc<dyn DeliveryTransport>, settings: PoolSettings) -> Self {
        Self {
            transport,
            settings,
            cache: RwLock::new(HashMap::new()),
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn transport(&self) -> &Arc<dyn DeliveryTransport> {
        &self.transport
    }

    pub fn cached(&self, channel: ChannelId) -> Option<EndpointHandle> {
        self.cache.read().get(&channel).cloned()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Drop a cached endpoint. Returns whether one was cached.
    pub fn evict(&self, channel: ChannelId) -> bool {
        self.cache.write().remove(&channel).is_some()
    }

    fn channel_lock(&self, channel: ChannelId) -> Arc<AsyncMutex<()>> {
        self.creation_locks
            .lock()
            .entry(channel)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop the per-channel lock once nobody but the map and `lock` holds it.
    fn release_channel_lock(&self, channel: ChannelId, lock: &Arc<AsyncMutex<()>>) {
        let mut locks = self.creation_locks.lock();
        let idle = locks
            .get(&channel)
            .is_some_and(|held| Arc::ptr_eq(held, lock) && Arc::strong_count(lock) == 2);
        if idle {
            locks.remove(&channel);
        }
    }

    /// A live endpoint for `channel`, reusing or creating one as needed.
    pub async fn get_or_create(&self, channel: ChannelId) -> Result<EndpointHandle> {
        let lock = self.channel_lock(channel);
        let result = {
            let _creating = lock.lock().await;
            self.get_or_create_locked(channel).await
        };
        self.release_channel_lock(channel, &lock);
        result
    }

    async fn get_or_create_locked(&self, channel: ChannelId) -> Result<EndpointHandle> {
        if let Some(handle) = self.cached(channel) {
            let probe = timed(
                "fetch_endpoint",
                self.settings.request_timeout,
                self.transport.fetch_endpoint(&handle),
            )
            .await;
            match probe {
                Ok(()) => return Ok(handle),
                Err(e) if e.is_not_found() => {
                    debug!(channel = %channel, endpoint = %handle.id, "Cached endpoint is gone");
                }
                Err(e) => {
                    warn!(channel = %channel, endpoint = %handle.id, error = %e, "Endpoint probe failed, refreshing");
                }
            }
            self.evict(channel);
        }

        if let Some(handle) = self.find_recognized(channel).await {
            debug!(channel = %channel, endpoint = %handle.id, "Reusing existing endpoint");
            self.cache.write().insert(channel, handle.clone());
            return Ok(handle);
        }

        let handle = match self.create(channel).await {
            Ok(handle) => handle,
            Err(e) if e.is_quota_exceeded() => {
                warn!(channel = %channel, "Channel is at its endpoint limit, cleaning up");
                let report = self.cleanup(channel).await;
                log_cleanup(channel, &report);
                match self.create(channel).await {
                    Ok(handle) => handle,
                    Err(e) if e.is_quota_exceeded() => {
                        return Err(Error::EndpointQuotaExhausted { channel })
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        info!(channel = %channel, endpoint = %handle.id, name = %handle.name, "Delivery endpoint created");
        self.cache.write().insert(channel, handle.clone());
        Ok(handle)
    }

    /// Send `message` to `target`.
    ///
    /// A send that reports the endpoint missing evicts it and fails. The send
    /// is not repeated, so a message is never delivered twice.
    pub async fn send(&self, target: ChannelTarget, message: &OutboundMessage) -> Result<DeliveredMessage> {
        let handle = self.get_or_create(target.channel).await?;
        let sent = timed(
            "send",
            self.settings.request_timeout,
            self.transport.send(&handle, message, target.thread),
        )
        .await;
        match sent {
            Ok(delivered) => Ok(delivered),
            Err(e) => {
                if e.is_not_found() {
                    self.evict(target.channel);
                }
                Err(e.into())
            }
        }
    }

    /// A listing failure of any kind is treated as "nothing to reuse".
    async fn find_recognized(&self, channel: ChannelId) -> Option<EndpointHandle> {
        let listed = timed(
            "list_endpoints",
            self.settings.request_timeout,
            self.transport.list_endpoints(channel),
        )
        .await;
        match listed {
            Ok(endpoints) => endpoints
                .into_iter()
                .filter(|e| e.has_name_in(&self.settings.recognized_names))
                .find_map(EndpointInfo::into_handle),
            Err(e) => {
                warn!(channel = %channel, error = %e, "Cannot list endpoints, creating a new one");
                None
            }
        }
    }

    async fn create(&self, channel: ChannelId) -> std::result::Result<EndpointHandle, TransportError> {
        timed(
            "create_endpoint",
            self.settings.request_timeout,
            self.transport.create_endpoint(channel, &self.settings.endpoint_name),
        )
        .await
    }

    /// Best-effort cleanup. Never fails; the report says what happened.
    ///
    /// Keeps the first recognized endpoint and removes the rest. If the
    /// channel is still at the hard cap, removes up to a batch of foreign
    /// endpoints.
    pub async fn cleanup(&self, channel: ChannelId) -> CleanupReport {
        let mut report = CleanupReport::default();
        let endpoints = match timed(
            "list_endpoints",
            self.settings.request_timeout,
            self.transport.list_endpoints(channel),
        )
        .await
        {
            Ok(endpoints) => endpoints,
            Err(e) => {
                report.listing_error = Some(e.to_string());
                return report;
            }
        };

        let (ours, foreign): (Vec<_>, Vec<_>) = endpoints
            .into_iter()
            .partition(|e| e.has_name_in(&self.settings.recognized_names));

        for endpoint in ours.iter().skip(1) {
            if self.delete_endpoint(endpoint).await {
                report.deleted_recognized += 1;
            } else {
                report.failed_deletes += 1;
            }
        }

        let remaining = ours.len() + foreign.len() - report.deleted_recognized;
        if remaining >= self.settings.hard_cap {
            for endpoint in foreign.iter().take(self.settings.foreign_cleanup_batch) {
                if self.delete_endpoint(endpoint).await {
                    report.deleted_foreign += 1;
                } else {
                    report.failed_deletes += 1;
                }
            }
        }

        report
    }

    async fn delete_endpoint(&self, endpoint: &EndpointInfo) -> bool {
        let result = timed(
            "delete_endpoint",
            self.settings.request_timeout,
            self.transport.delete_endpoint(endpoint.id),
        )
        .await;
        match result {
            Ok(()) => {
                debug!(endpoint = %endpoint.id, name = ?endpoint.name, "Endpoint deleted during cleanup");
                true
            }
            Err(e) => {
                debug!(endpoint = %endpoint.id, error = %e, "Endpoint delete failed during cleanup");
                false
            }
        }
    }
}

fn log_cleanup(channel: ChannelId, report: &CleanupReport) {
    match report.outcome() {
        CleanupOutcome::Succeeded => info!(
            channel = %channel,
            recognized = report.deleted_recognized,
            foreign = report.deleted_foreign,
            "Endpoint cleanup succeeded"
        ),
        outcome => warn!(
            channel = %channel,
            outcome = ?outcome,
            deleted = report.deleted(),
            failed = report.failed_deletes,
            listing_error = ?report.listing_error,
            "Endpoint cleanup incomplete"
        ),
    }
}
