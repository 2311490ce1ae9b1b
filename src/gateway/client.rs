//! WebSocket client for the Discord gateway
//!
//! Provides a long-running gateway connection with:
//! - Automatic reconnection with exponential backoff
//! - Hello / Identify handshake and heartbeat management
//! - Zombie connection detection (missed heartbeat ACK)
//! - Thread directory upkeep from channel events

use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::{backoff::Backoff, ExponentialBackoff};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::GatewaySettings;
use crate::dispatch::InboundMessage;
use crate::error::{Error, Result};
use crate::ids::{ChannelId, UserId};

use super::directory::ChannelDirectory;
use super::protocol::{
    opcode, ChannelPayload, GatewayFrame, GuildCreate, Hello, MessageCreate, Ready, ThreadListSync,
};

/// Close codes after which reconnecting cannot help
const FATAL_CLOSE_CODES: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for the gateway client
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway WebSocket URL
    pub url: String,

    /// Bot token
    pub token: String,

    /// Gateway intents bitfield
    pub intents: u64,

    /// Timeout for the WebSocket handshake and the Hello frame
    pub connect_timeout: Duration,

    /// Maximum reconnection attempts (0 = infinite)
    pub max_reconnect_attempts: u32,

    /// Initial reconnect delay
    pub initial_reconnect_delay: Duration,

    /// Maximum reconnect delay
    pub max_reconnect_delay: Duration,

    /// Event queue size
    pub event_queue_size: usize,
}

impl GatewayConfig {
    pub fn from_settings(settings: &GatewaySettings, token: impl Into<String>) -> Self {
        Self {
            url: settings.url.clone(),
            token: token.into(),
            intents: settings.intents,
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            max_reconnect_attempts: settings.max_reconnect_attempts,
            initial_reconnect_delay: Duration::from_millis(settings.reconnect_interval_ms),
            max_reconnect_delay: Duration::from_millis(settings.max_reconnect_delay_ms),
            event_queue_size: 256,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Connection State
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Socket open, waiting for READY
    Identifying,
    Ready,
    Reconnecting,
    ShuttingDown,
}

#[derive(Debug, Default)]
struct ClientState {
    connection_state: ConnectionState,
    session_id: Option<String>,
    bot_user: Option<UserId>,
    sequence: Option<u64>,
    last_heartbeat_ack: Option<Instant>,
    reconnect_attempts: u32,
}

// ─────────────────────────────────────────────────────────────────
// Commands and Events
// ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum GatewayCommand {
    /// Close the connection and stop reconnecting
    Shutdown,

    /// Get current connection state
    GetState(oneshot::Sender<ConnectionState>),
}

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Connected,
    Ready { user: UserId, session_id: String },
    Message(InboundMessage),
    Disconnected { reason: String },
    Reconnecting { attempt: u32 },
    Error { message: String, fatal: bool },
}

/// How one connection ended
enum ConnectionExit {
    Reconnect(String),
    Shutdown,
}

// ─────────────────────────────────────────────────────────────────
// Gateway Client
// ─────────────────────────────────────────────────────────────────

pub struct GatewayClient {
    config: GatewayConfig,
    state: Arc<RwLock<ClientState>>,
    directory: Arc<ChannelDirectory>,
    command_tx: Option<mpsc::Sender<GatewayCommand>>,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig, directory: Arc<ChannelDirectory>) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(ClientState::default())),
            directory,
            command_tx: None,
        }
    }

    /// Start the connection task and return the event receiver.
    pub fn start(&mut self) -> Result<mpsc::Receiver<GatewayEvent>> {
        let url = Url::parse(&self.config.url)
            .map_err(|e| Error::connection_failed(&self.config.url, format!("invalid URL: {}", e)))?;

        let (event_tx, event_rx) = mpsc::channel(self.config.event_queue_size);
        let (command_tx, command_rx) = mpsc::channel(16);
        self.command_tx = Some(command_tx);

        let config = self.config.clone();
        let state = self.state.clone();
        let directory = self.directory.clone();
        tokio::spawn(async move {
            run_client_loop(url, config, state, directory, command_rx, event_tx).await;
        });

        Ok(event_rx)
    }

    pub async fn send_command(&self, command: GatewayCommand) -> Result<()> {
        let tx = self
            .command_tx
            .as_ref()
            .ok_or_else(|| Error::ConnectionLost {
                message: "gateway client not started".to_string(),
            })?;
        tx.send(command).await.map_err(|_| Error::ConnectionLost {
            message: "gateway client stopped".to_string(),
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.read().connection_state
    }

    pub fn is_ready(&self) -> bool {
        self.connection_state() == ConnectionState::Ready
    }

    pub fn bot_user(&self) -> Option<UserId> {
        self.state.read().bot_user
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send_command(GatewayCommand::Shutdown).await
    }
}

// ─────────────────────────────────────────────────────────────────
// Client Loop
// ─────────────────────────────────────────────────────────────────

async fn run_client_loop(
    url: Url,
    config: GatewayConfig,
    state: Arc<RwLock<ClientState>>,
    directory: Arc<ChannelDirectory>,
    mut command_rx: mpsc::Receiver<GatewayCommand>,
    event_tx: mpsc::Sender<GatewayEvent>,
) {
    let mut backoff = ExponentialBackoff {
        initial_interval: config.initial_reconnect_delay,
        max_interval: config.max_reconnect_delay,
        max_elapsed_time: None,
        ..Default::default()
    };

    loop {
        state.write().connection_state = ConnectionState::Connecting;
        info!(url = %url, "Connecting to gateway");

        match tokio::time::timeout(config.connect_timeout, connect_async(url.clone())).await {
            Ok(Ok((ws_stream, _response))) => {
                info!("Gateway connection established");
                backoff.reset();
                {
                    let mut s = state.write();
                    s.connection_state = ConnectionState::Identifying;
                    s.reconnect_attempts = 0;
                }
                let _ = event_tx.send(GatewayEvent::Connected).await;

                let (write, read) = ws_stream.split();
                let result = handle_connection(&config, &state, &directory, &mut command_rx, &event_tx, write, read).await;

                match result {
                    Ok(ConnectionExit::Shutdown) => break,
                    Ok(ConnectionExit::Reconnect(reason)) => {
                        info!(reason = %reason, "Gateway asked to reconnect");
                        let _ = event_tx.send(GatewayEvent::Disconnected { reason }).await;
                    }
                    Err(e) if e.is_fatal() => {
                        error!(error = %e.format_for_log(), "Gateway connection cannot recover");
                        let _ = event_tx
                            .send(GatewayEvent::Error {
                                message: e.to_string(),
                                fatal: true,
                            })
                            .await;
                        break;
                    }
                    Err(e) => {
                        if e.is_retryable() {
                            warn!(error = %e, "Gateway connection dropped");
                        } else {
                            error!(error = %e.format_for_log(), "Gateway connection error");
                        }
                        let _ = event_tx
                            .send(GatewayEvent::Disconnected {
                                reason: e.to_string(),
                            })
                            .await;
                    }
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to gateway");
                let _ = event_tx
                    .send(GatewayEvent::Error {
                        message: format!("Connection failed: {}", e),
                        fatal: false,
                    })
                    .await;
            }
            Err(_) => {
                error!(timeout_ms = config.connect_timeout.as_millis() as u64, "Gateway connection timed out");
            }
        }

        let attempts = {
            let mut s = state.write();
            s.connection_state = ConnectionState::Reconnecting;
            s.reconnect_attempts += 1;
            s.session_id = None;
            s.sequence = None;
            s.reconnect_attempts
        };

        if config.max_reconnect_attempts > 0 && attempts >= config.max_reconnect_attempts {
            error!(attempts, max = config.max_reconnect_attempts, "Max reconnection attempts reached");
            let _ = event_tx
                .send(GatewayEvent::Error {
                    message: "Max reconnection attempts reached".to_string(),
                    fatal: true,
                })
                .await;
            break;
        }

        let delay = backoff.next_backoff().unwrap_or(config.max_reconnect_delay);
        let _ = event_tx.send(GatewayEvent::Reconnecting { attempt: attempts }).await;
        info!(delay_ms = delay.as_millis() as u64, attempt = attempts, "Waiting before reconnection");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            Some(cmd) = command_rx.recv() => {
                match cmd {
                    GatewayCommand::Shutdown => break,
                    GatewayCommand::GetState(tx) => {
                        let _ = tx.send(state.read().connection_state);
                    }
                }
            }
        }
    }

    state.write().connection_state = ConnectionState::ShuttingDown;
    info!("Gateway loop terminated");
}

/// Run one gateway session until it ends.
async fn handle_connection<S, R>(
    config: &GatewayConfig,
    state: &Arc<RwLock<ClientState>>,
    directory: &ChannelDirectory,
    command_rx: &mut mpsc::Receiver<GatewayCommand>,
    event_tx: &mpsc::Sender<GatewayEvent>,
    mut write: S,
    mut read: R,
) -> Result<ConnectionExit>
where
    S: SinkExt<WsMessage, Error = WsError> + Unpin,
    R: StreamExt<Item = std::result::Result<WsMessage, WsError>> + Unpin,
{
    let hello = wait_for_hello(&mut read, config.connect_timeout).await?;
    let interval = Duration::from_millis(hello.heartbeat_interval.max(1));
    debug!(heartbeat_ms = hello.heartbeat_interval, "Received hello");

    let device = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "persona-relay".to_string());
    send_frame(&mut write, &GatewayFrame::identify(&config.token, config.intents, &device)).await?;
    debug!("Sent identify");

    let mut heartbeat_timer = tokio::time::interval(interval);
    heartbeat_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut awaiting_ack = false;

    loop {
        tokio::select! {
            _ = heartbeat_timer.tick() => {
                if awaiting_ack {
                    return Err(Error::ConnectionLost {
                        message: "heartbeat was not acknowledged".to_string(),
                    });
                }
                let sequence = state.read().sequence;
                send_frame(&mut write, &GatewayFrame::heartbeat(sequence)).await?;
                awaiting_ack = true;
                debug!(sequence = ?sequence, "Sent heartbeat");
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        let frame = match GatewayFrame::from_json(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(error = %e, "Failed to parse gateway frame");
                                continue;
                            }
                        };
                        match frame.op {
                            opcode::DISPATCH => {
                                if frame.s.is_some() {
                                    state.write().sequence = frame.s;
                                }
                                handle_dispatch(&frame, state, directory, event_tx).await;
                            }
                            opcode::HEARTBEAT => {
                                let sequence = state.read().sequence;
                                send_frame(&mut write, &GatewayFrame::heartbeat(sequence)).await?;
                            }
                            opcode::HEARTBEAT_ACK => {
                                awaiting_ack = false;
                                state.write().last_heartbeat_ack = Some(Instant::now());
                            }
                            opcode::RECONNECT => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                return Ok(ConnectionExit::Reconnect("reconnect requested".to_string()));
                            }
                            opcode::INVALID_SESSION => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                return Ok(ConnectionExit::Reconnect("session invalidated".to_string()));
                            }
                            other => debug!(op = other, "Unhandled gateway opcode"),
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        write.send(WsMessage::Pong(data)).await?;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        info!(code = ?code, "Received close frame");
                        if let Some(code) = code.filter(|c| FATAL_CLOSE_CODES.contains(c)) {
                            return Err(Error::AuthenticationFailed {
                                message: format!("gateway closed the session with code {}", code),
                            });
                        }
                        return Ok(ConnectionExit::Reconnect(format!("closed with code {:?}", code)));
                    }
                    Some(Err(e)) => {
                        return Err(Error::ConnectionLost { message: e.to_string() });
                    }
                    None => {
                        return Ok(ConnectionExit::Reconnect("stream ended".to_string()));
                    }
                    _ => {}
                }
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(GatewayCommand::Shutdown) | None => {
                        info!("Closing gateway connection");
                        let _ = write.send(WsMessage::Close(None)).await;
                        return Ok(ConnectionExit::Shutdown);
                    }
                    Some(GatewayCommand::GetState(tx)) => {
                        let _ = tx.send(state.read().connection_state);
                    }
                }
            }
        }
    }
}

async fn send_frame<S>(write: &mut S, frame: &GatewayFrame) -> Result<()>
where
    S: SinkExt<WsMessage, Error = WsError> + Unpin,
{
    let json = frame.to_json().map_err(|e| Error::Gateway(e.to_string()))?;
    write
        .send(WsMessage::Text(json))
        .await
        .map_err(|e| Error::ConnectionLost { message: e.to_string() })
}

async fn wait_for_hello<R>(read: &mut R, limit: Duration) -> Result<Hello>
where
    R: StreamExt<Item = std::result::Result<WsMessage, WsError>> + Unpin,
{
    let wait = tokio::time::timeout(limit, async {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    let frame = GatewayFrame::from_json(&text).map_err(|e| Error::Gateway(e.to_string()))?;
                    if frame.op == opcode::HELLO {
                        return frame.data::<Hello>().map_err(|e| Error::Gateway(e.to_string()));
                    }
                }
                Ok(WsMessage::Close(_)) => {
                    return Err(Error::ConnectionLost {
                        message: "connection closed before hello".to_string(),
                    });
                }
                Err(e) => return Err(Error::ConnectionLost { message: e.to_string() }),
                _ => {}
            }
        }
        Err(Error::ConnectionLost {
            message: "stream ended before hello".to_string(),
        })
    });

    wait.await.map_err(|_| Error::ConnectionTimeout {
        url: "gateway".to_string(),
        timeout_secs: limit.as_secs(),
    })?
}

/// Apply a dispatch event and forward what the runtime needs.
async fn handle_dispatch(
    frame: &GatewayFrame,
    state: &Arc<RwLock<ClientState>>,
    directory: &ChannelDirectory,
    event_tx: &mpsc::Sender<GatewayEvent>,
) {
    let Some(kind) = frame.t.as_deref() else {
        return;
    };

    let result: std::result::Result<(), serde_json::Error> = async {
        match kind {
            "READY" => {
                let ready: Ready = frame.data()?;
                {
                    let mut s = state.write();
                    s.connection_state = ConnectionState::Ready;
                    s.session_id = Some(ready.session_id.clone());
                    s.bot_user = Some(ready.user.id);
                }
                info!(user = %ready.user.id, name = %ready.user.username, "Gateway session ready");
                let _ = event_tx
                    .send(GatewayEvent::Ready {
                        user: ready.user.id,
                        session_id: ready.session_id,
                    })
                    .await;
            }
            "GUILD_CREATE" => {
                let guild: GuildCreate = frame.data()?;
                directory.sync_guild(guild.id, &guild.threads);
                debug!(guild = %guild.id, threads = guild.threads.len(), "Guild available");
            }
            "THREAD_LIST_SYNC" => {
                let sync: ThreadListSync = frame.data()?;
                directory.sync_guild(sync.guild_id, &sync.threads);
            }
            "THREAD_CREATE" | "THREAD_UPDATE" => {
                let thread: ChannelPayload = frame.data()?;
                if let Some(guild) = thread.guild_id {
                    directory.observe(guild, &thread);
                }
            }
            "THREAD_DELETE" => {
                let thread: ChannelPayload = frame.data()?;
                directory.forget(thread.id);
            }
            "MESSAGE_CREATE" => {
                let msg: MessageCreate = frame.data()?;
                let inbound = to_inbound(msg, directory);
                if event_tx.send(GatewayEvent::Message(inbound)).await.is_err() {
                    debug!("Event receiver dropped");
                }
            }
            _ => {}
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        warn!(event = kind, error = %e, "Failed to decode dispatch event");
    }
}

pub(crate) fn to_inbound(msg: MessageCreate, directory: &ChannelDirectory) -> InboundMessage {
    let from_bot = msg.from_bot();
    let parent: Option<ChannelId> = directory.parent_of(msg.channel_id);
    InboundMessage {
        id: msg.id,
        channel: msg.channel_id,
        parent,
        guild: msg.guild_id,
        author: msg.author.id,
        from_bot,
        content: msg.content,
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{GuildId, MessageId};
    use serde_json::json;

    #[test]
    fn test_config_from_settings() {
        let config = GatewayConfig::from_settings(&GatewaySettings::default(), "tok");
        assert_eq!(config.token, "tok");
        assert_eq!(config.max_reconnect_attempts, 0);
        assert_eq!(config.initial_reconnect_delay, Duration::from_millis(1000));
    }

    #[test]
    fn test_connection_state_default() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        let state = ClientState::default();
        assert!(state.sequence.is_none());
        assert!(state.bot_user.is_none());
    }

    #[test]
    fn test_to_inbound_resolves_thread_parent() {
        let directory = ChannelDirectory::new();
        directory.observe(
            GuildId::new(100),
            &serde_json::from_value(json!({"id": "5", "type": 11, "parent_id": "2"})).unwrap(),
        );
        let msg: MessageCreate = serde_json::from_value(json!({
            "id": "9", "channel_id": "5", "guild_id": "100",
            "author": {"id": "1", "username": "alice"}, "content": "k: hi"
        }))
        .unwrap();

        let inbound = to_inbound(msg, &directory);
        assert_eq!(inbound.id, MessageId::new(9));
        assert_eq!(inbound.parent, Some(ChannelId::new(2)));
        assert!(!inbound.from_bot);
    }

    #[tokio::test]
    async fn test_dispatch_updates_state_and_directory() {
        let state = Arc::new(RwLock::new(ClientState::default()));
        let directory = ChannelDirectory::new();
        let (tx, mut rx) = mpsc::channel(8);

        let ready = GatewayFrame::from_json(
            r#"{"op":0,"s":1,"t":"READY","d":{"session_id":"abc","user":{"id":"42","username":"relay","bot":true}}}"#,
        )
        .unwrap();
        handle_dispatch(&ready, &state, &directory, &tx).await;
        assert_eq!(state.read().connection_state, ConnectionState::Ready);
        assert!(matches!(rx.recv().await, Some(GatewayEvent::Ready { user, .. }) if user == UserId::new(42)));

        let thread = GatewayFrame::from_json(
            r#"{"op":0,"s":2,"t":"THREAD_CREATE","d":{"id":"5","type":11,"parent_id":"2","guild_id":"100"}}"#,
        )
        .unwrap();
        handle_dispatch(&thread, &state, &directory, &tx).await;
        assert_eq!(directory.parent_of(ChannelId::new(5)), Some(ChannelId::new(2)));

        let bad = GatewayFrame::from_json(r#"{"op":0,"s":3,"t":"MESSAGE_CREATE","d":{"id":"x"}}"#).unwrap();
        handle_dispatch(&bad, &state, &directory, &tx).await;
        assert!(rx.try_recv().is_err());
    }
}
