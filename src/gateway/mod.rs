//! Discord gateway connection and the thread directory it maintains.

pub mod client;
pub mod directory;
pub mod protocol;

pub use client::{ConnectionState, GatewayClient, GatewayCommand, GatewayConfig, GatewayEvent};
pub use directory::ChannelDirectory;
