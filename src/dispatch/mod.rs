//! Dispatch runtime: duplicate guard, per-operator lanes, and the
//! dispatcher that turns inbound messages into persona posts.

pub mod dispatcher;
pub mod guard;
pub mod inbound;
pub mod lanes;

pub use dispatcher::{Dispatcher, HandleOutcome};
pub use guard::{GuardTicket, ProcessingGuard};
pub use inbound::InboundMessage;
pub use lanes::LaneRouter;
