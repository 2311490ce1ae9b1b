//! Message dispatcher
//!
//! Turns one inbound message into zero or more persona posts:
//! guard, candidate lookup, multi-line split or single resolution, delete the
//! original, deliver, record usage. Failures stay contained to the message.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::DispatchSettings;
use crate::delivery::{timed, DeliveryTransport, EndpointPool, OutboundMessage};
use crate::error::{Error, Result, TransportError};
use crate::ids::{ChannelId, GuildId, UserId};
use crate::persona::PersonaStore;
use crate::sticky::{StickyRegistry, StickyState};
use crate::trigger::{is_multiline, resolve, split_resolve, CandidateSet, Resolution};

use super::guard::ProcessingGuard;
use super::inbound::InboundMessage;

// ─────────────────────────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────────────────────────

/// What handling one message amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Already being handled
    Duplicate,
    /// Bot author, DM, or no text
    Skipped,
    /// No persona applies, or an exact trigger with nothing to post
    Untouched,
    /// No persona applies but some trigger text appears in the message
    NearMiss,
    /// Every post went out
    Delivered { posts: usize },
    /// A split message where only some lines went out
    PartiallyDelivered { posts: usize, failed: usize },
    /// Nothing went out; the operator was notified
    DeliveryFailed,
    /// Data integrity or store failure; nothing was touched
    Aborted,
}

impl HandleOutcome {
    pub fn posts(&self) -> usize {
        match self {
            HandleOutcome::Delivered { posts } | HandleOutcome::PartiallyDelivered { posts, .. } => *posts,
            _ => 0,
        }
    }
}

impl fmt::Display for HandleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleOutcome::Duplicate => write!(f, "duplicate"),
            HandleOutcome::Skipped => write!(f, "skipped"),
            HandleOutcome::Untouched => write!(f, "untouched"),
            HandleOutcome::NearMiss => write!(f, "near-miss"),
            HandleOutcome::Delivered { posts } => write!(f, "delivered ({})", posts),
            HandleOutcome::PartiallyDelivered { posts, failed } => {
                write!(f, "partially delivered ({} ok, {} failed)", posts, failed)
            }
            HandleOutcome::DeliveryFailed => write!(f, "delivery failed"),
            HandleOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────

pub struct Dispatcher {
    store: Arc<dyn PersonaStore>,
    sticky: Arc<StickyRegistry>,
    pool: Arc<EndpointPool>,
    guard: Arc<ProcessingGuard>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn PersonaStore>,
        sticky: Arc<StickyRegistry>,
        pool: Arc<EndpointPool>,
        guard: Arc<ProcessingGuard>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            sticky,
            pool,
            guard,
            settings,
        }
    }

    pub fn sticky(&self) -> &Arc<StickyRegistry> {
        &self.sticky
    }

    pub fn guard(&self) -> &Arc<ProcessingGuard> {
        &self.guard
    }

    fn transport(&self) -> &Arc<dyn DeliveryTransport> {
        self.pool.transport()
    }

    fn io_timeout(&self) -> Duration {
        self.pool.settings().request_timeout
    }

    /// Enable auto-proxy, optionally starting as the persona called `name`.
    ///
    /// An unknown name fails and leaves the current state alone.
    pub async fn enable_auto_proxy(&self, user: UserId, guild: GuildId, name: Option<&str>) -> Result<StickyState> {
        let persona = match name {
            Some(name) => Some(
                self.store
                    .find_by_name(user, guild, name)
                    .await?
                    .ok_or_else(|| Error::persona_not_found(name))?
                    .id,
            ),
            None => None,
        };
        Ok(self.sticky.enable((user, guild), persona))
    }

    pub fn disable_auto_proxy(&self, user: UserId, guild: GuildId) -> bool {
        self.sticky.disable((user, guild))
    }

    /// Handle one inbound message.
    ///
    /// Calls for the same (author, guild) must not overlap; the lane router
    /// guarantees that.
    pub async fn handle(&self, message: &InboundMessage) -> HandleOutcome {
        let span = info_span!(
            "dispatch",
            dispatch_id = %Uuid::new_v4(),
            message_id = %message.id,
            author = %message.author,
            channel = %message.channel,
        );
        async {
            let outcome = self.handle_inner(message).await;
            debug!(outcome = %outcome, "Message handled");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn handle_inner(&self, message: &InboundMessage) -> HandleOutcome {
        if let Some(reason) = message.skip_reason() {
            debug!(reason, "Skipping message");
            return HandleOutcome::Skipped;
        }
        let (author, guild) = match message.lane_key() {
            Some(key) => key,
            None => return HandleOutcome::Skipped,
        };

        let _ticket = match self.guard.acquire(message.id) {
            Some(ticket) => ticket,
            None => {
                debug!("Message already in flight");
                return HandleOutcome::Duplicate;
            }
        };

        let candidates = match self.candidates(author, guild).await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e.format_for_log(), "Could not load personas, message left alone");
                return HandleOutcome::Aborted;
            }
        };
        if candidates.is_empty() {
            return HandleOutcome::Untouched;
        }

        let key = (author, guild);
        let sticky = self.sticky.status(key);
        let text = message.content.as_str();

        if is_multiline(text) {
            if let Some(split) = split_resolve(text, &candidates, sticky) {
                if split.should_split(self.settings.min_distinct_personas) {
                    debug!(lines = split.lines.len(), personas = split.distinct_personas(), "Splitting message");
                    self.sticky.store(key, split.sticky);
                    return self.deliver_lines(message, split.lines).await;
                }
            }
        }

        let mut cell = sticky;
        let resolved = resolve(text, &candidates, &mut cell);
        if cell != sticky {
            self.sticky.store(key, cell);
        }

        match resolved {
            None if candidates.has_trigger_substring(text) => {
                debug!("Near-miss: trigger text present but nothing matched");
                HandleOutcome::NearMiss
            }
            None => HandleOutcome::Untouched,
            Some(r) if r.content.is_empty() => {
                debug!(persona = %r.persona.display_name, "Exact trigger with no content");
                HandleOutcome::Untouched
            }
            Some(r) => self.deliver_lines(message, vec![r]).await,
        }
    }

    async fn candidates(&self, viewer: UserId, guild: GuildId) -> Result<CandidateSet> {
        let owned = self.store.list_owned(viewer, guild).await?;
        let shared = self.store.list_shared(viewer, guild).await?;
        let overrides = self.store.list_overrides(viewer, guild).await?;
        CandidateSet::build(viewer, owned, shared, overrides)
    }

    /// Delete the original once, then post each resolution in order.
    async fn deliver_lines(&self, message: &InboundMessage, lines: Vec<Resolution>) -> HandleOutcome {
        if let Err(e) = self.delete_original(message).await {
            error!(error = %e, "Could not remove the original message, not proxying");
            let name = lines.first().map(|r| r.persona.display_name.as_str()).unwrap_or("persona");
            self.notify_failure(message, name, &Error::from(e)).await;
            return HandleOutcome::DeliveryFailed;
        }

        let target = message.target();
        let total = lines.len();
        let mut posts = 0;
        for line in lines {
            let outbound = OutboundMessage {
                username: line.persona.display_name.clone(),
                avatar_url: line.persona.avatar_url.clone(),
                content: line.content,
            };
            match self.pool.send(target, &outbound).await {
                Ok(delivered) => {
                    posts += 1;
                    info!(persona = %line.persona.display_name, tier = %line.tier, delivered_id = %delivered.id, "Posted as persona");
                    if let Err(e) = self.store.increment_usage(line.persona.id).await {
                        warn!(persona_id = %line.persona.id, error = %e, "Could not record persona usage");
                    }
                }
                Err(e) => {
                    error!(persona = %line.persona.display_name, error = %e.format_for_log(), "Delivery failed");
                    self.notify_failure(message, &line.persona.display_name, &e).await;
                }
            }
        }

        match posts {
            0 => HandleOutcome::DeliveryFailed,
            n if n == total => HandleOutcome::Delivered { posts: n },
            n => HandleOutcome::PartiallyDelivered {
                posts: n,
                failed: total - n,
            },
        }
    }

    /// Remove the operator's message. Missing permission or an already
    /// deleted message is not a reason to stop.
    async fn delete_original(&self, message: &InboundMessage) -> std::result::Result<(), TransportError> {
        let result = timed(
            "delete_message",
            self.io_timeout(),
            self.transport().delete_message(message.channel, message.id),
        )
        .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_forbidden() || e.is_not_found() => {
                warn!(error = %e, "Original message not deleted, proxying anyway");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Post a self-deleting failure notice where the operator wrote.
    async fn notify_failure(&self, message: &InboundMessage, persona: &str, error: &Error) {
        let content = format!("❌ <@{}> Failed to post as {}: {}", message.author, persona, error);
        let channel = message.channel;
        let posted = timed(
            "post_message",
            self.io_timeout(),
            self.transport().post_message(channel, &content),
        )
        .await;
        match posted {
            Ok(notice) => {
                let transport = Arc::clone(self.transport());
                let ttl = Duration::from_secs(self.settings.notice_ttl_secs);
                let timeout = self.io_timeout();
                tokio::spawn(async move {
                    tokio::time::sleep(ttl).await;
                    expire_notice(transport, notice.channel, notice.id, timeout).await;
                });
            }
            Err(e) => warn!(error = %e, "Could not post failure notice"),
        }
    }
}

async fn expire_notice(
    transport: Arc<dyn DeliveryTransport>,
    channel: ChannelId,
    notice: crate::ids::MessageId,
    limit: Duration,
) {
    if let Err(e) = timed("delete_message", limit, transport.delete_message(channel, notice)).await {
        debug!(notice_id = %notice, error = %e, "Failure notice not removed");
    }
}
