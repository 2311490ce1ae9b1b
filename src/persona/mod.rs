//! Persona system: the identities operators post under, who can see them,
//! and viewer-private trigger overrides.

pub mod roster;
pub mod store;
pub mod types;

pub use roster::{AutoProxySeed, Roster};
pub use store::{InMemoryPersonaStore, PersonaStore};
pub use types::{
    AccessGrant, AccessLevel, GrantTarget, GroupPath, Persona, PersonaDraft, PersonaOverride,
    PersonaProfile, PersonaUpdate, Usage,
};
