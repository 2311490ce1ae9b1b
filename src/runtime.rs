//! Relay assembly and the main event loop
//!
//! [`Engine::assemble`] wires the persona store, sticky registry, endpoint
//! pool and dispatcher from a [`RelayConfig`]. [`run`] adds the gateway
//! client and forwards inbound messages until shutdown.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::delivery::{DeliveryTransport, DiscordTransport, EndpointPool, PoolSettings};
use crate::dispatch::{Dispatcher, LaneRouter, ProcessingGuard};
use crate::error::{Error, Result};
use crate::gateway::{ChannelDirectory, GatewayClient, GatewayConfig, GatewayEvent};
use crate::ids::{GuildId, UserId};
use crate::persona::{InMemoryPersonaStore, PersonaStore, Roster};
use crate::sticky::StickyRegistry;
use crate::trigger::{find_conflicts, CandidateSet, TriggerConflict};

// ─────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────

/// Everything needed to process inbound messages, minus the gateway.
pub struct Engine {
    pub store: Arc<InMemoryPersonaStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub router: LaneRouter,
}

impl Engine {
    /// Wire the engine around `roster` and `transport`.
    ///
    /// Auto-proxy seeds from the roster are applied to the sticky registry.
    pub fn assemble(config: &RelayConfig, roster: Roster, transport: Arc<dyn DeliveryTransport>) -> Self {
        let store = Arc::new(roster.store);

        let sticky = Arc::new(StickyRegistry::new());
        for seed in &roster.auto_proxy {
            sticky.enable((seed.user, seed.guild), seed.persona);
        }

        let pool = Arc::new(EndpointPool::new(transport, PoolSettings::from(&config.delivery)));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            sticky,
            pool,
            ProcessingGuard::new(),
            config.dispatch.clone(),
        ));
        let router = LaneRouter::new(dispatcher.clone());

        info!(
            personas = store.persona_count(),
            grants = store.grant_count(),
            overrides = store.override_count(),
            auto_proxy = roster.auto_proxy.len(),
            "Relay engine assembled"
        );

        Self {
            store,
            dispatcher,
            router,
        }
    }
}

/// Load the roster named by `override_path`, else the configured one.
///
/// With neither set the relay starts with no personas.
pub fn load_roster(config: &RelayConfig, override_path: Option<&str>) -> Result<Roster> {
    let default_avatar = &config.delivery.default_avatar;
    match override_path.or(config.roster.path.as_deref()) {
        Some(path) => Roster::load(Path::new(path), default_avatar),
        None => {
            warn!("No roster configured, starting with no personas");
            Ok(Roster::empty(default_avatar))
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Roster Check
// ─────────────────────────────────────────────────────────────────

/// Summary of a loaded roster
#[derive(Debug, Default)]
pub struct RosterReport {
    pub personas: usize,
    pub grants: usize,
    pub overrides: usize,
    pub auto_proxy: usize,
    /// Shadowed triggers per operator, operators without conflicts omitted
    pub conflicts: Vec<((UserId, GuildId), Vec<TriggerConflict>)>,
}

impl RosterReport {
    pub fn conflict_count(&self) -> usize {
        self.conflicts.iter().map(|(_, c)| c.len()).sum()
    }
}

/// Build the candidate set of every operator in `roster` and collect
/// trigger conflicts.
pub async fn check_roster(roster: &Roster) -> Result<RosterReport> {
    let store = &roster.store;
    let mut report = RosterReport {
        personas: store.persona_count(),
        grants: store.grant_count(),
        overrides: store.override_count(),
        auto_proxy: roster.auto_proxy.len(),
        conflicts: Vec::new(),
    };

    for (operator, guild) in store.known_operators() {
        let candidates = CandidateSet::build(
            operator,
            store.list_owned(operator, guild).await?,
            store.list_shared(operator, guild).await?,
            store.list_overrides(operator, guild).await?,
        )?;
        let conflicts = find_conflicts(&candidates);
        if !conflicts.is_empty() {
            report.conflicts.push(((operator, guild), conflicts));
        }
    }

    Ok(report)
}

fn require_token(config: &RelayConfig) -> Result<String> {
    match config.bot.token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(Error::config_field_invalid(
            "bot.token",
            "A bot token is required to run (set bot.token or PERSONA_RELAY_TOKEN)",
        )),
    }
}

// ─────────────────────────────────────────────────────────────────
// Event Loop
// ─────────────────────────────────────────────────────────────────

/// Run the relay until Ctrl+C or a fatal gateway error.
pub async fn run(config: RelayConfig, roster_path: Option<String>) -> Result<()> {
    let token = require_token(&config)?;
    let roster = load_roster(&config, roster_path.as_deref())?;

    let transport = Arc::new(DiscordTransport::new(
        config.delivery.api_base.clone(),
        token.clone(),
        config.delivery.request_timeout(),
    )?);
    let engine = Engine::assemble(&config, roster, transport);

    let directory = Arc::new(ChannelDirectory::new());
    let mut client = GatewayClient::new(GatewayConfig::from_settings(&config.gateway, token), directory.clone());
    let mut event_rx = client.start()?;

    info!(
        gateway_url = %config.gateway.url,
        endpoint_name = %config.delivery.endpoint_name,
        "Starting relay"
    );

    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    let mut result = Ok(());

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Shutdown signal received");
                break;
            }

            event = event_rx.recv() => {
                match event {
                    Some(GatewayEvent::Connected) => {
                        info!("Connected to gateway");
                    }
                    Some(GatewayEvent::Ready { user, session_id }) => {
                        info!(bot_user = %user, session_id = %session_id, "Gateway session ready");
                    }
                    Some(GatewayEvent::Message(message)) => {
                        debug!(message_id = %message.id, channel = %message.channel, "Inbound message");
                        engine.router.submit(message);
                    }
                    Some(GatewayEvent::Disconnected { reason }) => {
                        warn!(reason = %reason, "Disconnected from gateway");
                    }
                    Some(GatewayEvent::Reconnecting { attempt }) => {
                        info!(attempt = attempt, "Reconnecting to gateway");
                    }
                    Some(GatewayEvent::Error { message, fatal }) => {
                        if fatal {
                            error!(message = %message, "Fatal gateway error");
                            result = Err(Error::Gateway(message));
                            break;
                        }
                        warn!(message = %message, "Gateway error");
                    }
                    None => {
                        info!("Gateway event channel closed");
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = client.shutdown().await {
        debug!(error = %e, "Gateway already stopped");
    }

    info!(
        lanes = engine.router.active_lanes(),
        in_flight = engine.dispatcher.guard().len(),
        threads_known = directory.len(),
        "Relay shutting down"
    );

    result
}
