//! Persona Relay
//!
//! Resolves persona triggers in Discord messages and reposts the text
//! through per-channel webhooks under the persona's name and avatar.
//!
//! - [`trigger`]: trigger patterns, candidate sets and resolution
//! - [`sticky`]: per-operator auto-proxy state
//! - [`delivery`]: webhook endpoint pool and transports
//! - [`dispatch`]: message handling, de-duplication and ordering lanes
//! - [`gateway`]: Discord gateway client
//! - [`runtime`]: wiring and the main event loop

pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod ids;
pub mod logging;
pub mod persona;
pub mod runtime;
pub mod sticky;
pub mod trigger;
pub mod version;

pub use error::{Error, Result};
