//! Per-operator dispatch lanes
//!
//! Messages from the same (author, guild) are handled one at a time in
//! arrival order; different keys run in parallel. Each lane is a task
//! draining an unbounded queue. A lane that sits idle shuts itself down.
//! A panic while handling one message is contained to that message.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::ids::MessageId;
use crate::sticky::StickyKey;

use super::dispatcher::{Dispatcher, HandleOutcome};
use super::inbound::InboundMessage;

/// How long an empty lane waits before shutting down
pub const DEFAULT_LANE_IDLE: Duration = Duration::from_secs(60);

type LaneMap = Arc<Mutex<HashMap<StickyKey, mpsc::UnboundedSender<InboundMessage>>>>;
type OutcomeSink = mpsc::UnboundedSender<(MessageId, HandleOutcome)>;

pub struct LaneRouter {
    dispatcher: Arc<Dispatcher>,
    lanes: LaneMap,
    idle: Duration,
    outcomes: Option<OutcomeSink>,
}

impl LaneRouter {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            lanes: Arc::new(Mutex::new(HashMap::new())),
            idle: DEFAULT_LANE_IDLE,
            outcomes: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    /// Report every outcome on a channel.
    pub fn with_outcomes(mut self, sink: OutcomeSink) -> Self {
        self.outcomes = Some(sink);
        self
    }

    pub fn active_lanes(&self) -> usize {
        self.lanes.lock().len()
    }

    /// Queue `message` behind earlier messages with the same key.
    pub fn submit(&self, message: InboundMessage) {
        let key = match message.lane_key() {
            Some(key) => key,
            None => {
                // Nothing to serialize against; the dispatcher will skip it
                let dispatcher = Arc::clone(&self.dispatcher);
                let outcomes = self.outcomes.clone();
                tokio::spawn(async move {
                    let outcome = handle_contained(&dispatcher, &message).await;
                    report(&outcomes, message.id, outcome);
                });
                return;
            }
        };

        let mut lanes = self.lanes.lock();
        let message = match lanes.get(&key) {
            Some(tx) => match tx.send(message) {
                Ok(()) => return,
                // Lane task died; start a fresh one
                Err(mpsc::error::SendError(message)) => {
                    warn!(author = %key.0, guild = %key.1, "Dispatch lane was gone, restarting");
                    message
                }
            },
            None => message,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(message).is_err() {
            return;
        }
        lanes.insert(key, tx);
        drop(lanes);

        debug!(author = %key.0, guild = %key.1, "Dispatch lane opened");
        tokio::spawn(run_lane(
            key,
            rx,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.lanes),
            self.idle,
            self.outcomes.clone(),
        ));
    }
}

async fn run_lane(
    key: StickyKey,
    mut rx: mpsc::UnboundedReceiver<InboundMessage>,
    dispatcher: Arc<Dispatcher>,
    lanes: LaneMap,
    idle: Duration,
    outcomes: Option<OutcomeSink>,
) {
    loop {
        let next = match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(_) => {
                // Close only if nothing slipped in; submit holds the same lock
                let mut map = lanes.lock();
                match rx.try_recv() {
                    Ok(message) => message,
                    Err(_) => {
                        map.remove(&key);
                        break;
                    }
                }
            }
        };
        let outcome = handle_contained(&dispatcher, &next).await;
        report(&outcomes, next.id, outcome);
    }
    debug!(author = %key.0, guild = %key.1, "Dispatch lane closed");
}

/// Handle one message, turning a panic into `Aborted`.
async fn handle_contained(dispatcher: &Dispatcher, message: &InboundMessage) -> HandleOutcome {
    match AssertUnwindSafe(dispatcher.handle(message)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            error!(message_id = %message.id, author = %message.author, "Dispatch panicked, message dropped");
            HandleOutcome::Aborted
        }
    }
}

fn report(outcomes: &Option<OutcomeSink>, id: MessageId, outcome: HandleOutcome) {
    if let Some(sink) = outcomes {
        let _ = sink.send((id, outcome));
    }
}
