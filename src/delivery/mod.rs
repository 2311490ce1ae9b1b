//! Persona delivery: the transport contract, the Discord and mock
//! transports, and the per-channel endpoint pool.

pub mod discord;
pub mod mock;
pub mod pool;
pub mod transport;

pub use discord::DiscordTransport;
pub use mock::{MockConfig, MockTransport};
pub use pool::{CleanupOutcome, CleanupReport, EndpointPool, PoolSettings};
pub use transport::{
    timed, ChannelTarget, DeliveredMessage, DeliveryTransport, EndpointHandle, EndpointInfo,
    OutboundMessage, TransportResult,
};
