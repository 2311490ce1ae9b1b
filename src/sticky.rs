//! Sticky auto-proxy state
//!
//! Each (operator, guild) pair holds one cell:
//! - `Disabled`: only explicit triggers are proxied
//! - `EnabledUnset`: armed, waiting for the first explicit trigger
//! - `EnabledWith(p)`: untriggered text is posted as `p`
//!
//! Explicit trigger matches move an enabled cell to the matched persona.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::ids::{GuildId, PersonaId, UserId};

/// Scope of one sticky cell
pub type StickyKey = (UserId, GuildId);

/// Auto-proxy state for one operator in one guild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StickyState {
    #[default]
    Disabled,
    EnabledUnset,
    EnabledWith(PersonaId),
}

impl StickyState {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, StickyState::Disabled)
    }

    /// Persona used for untriggered text, if any.
    pub fn current(&self) -> Option<PersonaId> {
        match self {
            StickyState::EnabledWith(id) => Some(*id),
            _ => None,
        }
    }

    /// Follow an explicit trigger match. Returns whether the state changed.
    pub fn follow(&mut self, matched: PersonaId) -> bool {
        match *self {
            StickyState::Disabled => false,
            StickyState::EnabledWith(id) if id == matched => false,
            _ => {
                *self = StickyState::EnabledWith(matched);
                true
            }
        }
    }
}

/// Owns every sticky cell. Cells never leave the registry by reference.
#[derive(Debug, Default)]
pub struct StickyRegistry {
    cells: Mutex<HashMap<StickyKey, StickyState>>,
}

impl StickyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable auto-proxy, optionally starting with `persona`.
    ///
    /// Name resolution happens before this call, so a failed lookup never
    /// reaches the registry and leaves the state untouched.
    pub fn enable(&self, key: StickyKey, persona: Option<PersonaId>) -> StickyState {
        let state = match persona {
            Some(id) => StickyState::EnabledWith(id),
            None => StickyState::EnabledUnset,
        };
        self.cells.lock().insert(key, state);
        debug!(user = %key.0, guild = %key.1, state = ?state, "Auto-proxy enabled");
        state
    }

    /// Disable auto-proxy. Returns whether it was enabled.
    pub fn disable(&self, key: StickyKey) -> bool {
        let changed = self.cells.lock().remove(&key).is_some();
        if changed {
            debug!(user = %key.0, guild = %key.1, "Auto-proxy disabled");
        }
        changed
    }

    pub fn status(&self, key: StickyKey) -> StickyState {
        self.cells.lock().get(&key).copied().unwrap_or_default()
    }

    /// Run `f` against a copy of the cell and store the result.
    ///
    /// The lock is not held while `f` runs. Callers serialize access per key
    /// (see the dispatch lanes), so read-modify-write through this method is
    /// race free for a given key.
    pub fn with_cell<R>(&self, key: StickyKey, f: impl FnOnce(&mut StickyState) -> R) -> R {
        let mut cell = self.status(key);
        let out = f(&mut cell);
        self.store(key, cell);
        out
    }

    /// Store a state computed elsewhere.
    pub fn store(&self, key: StickyKey, state: StickyState) {
        let mut cells = self.cells.lock();
        match state {
            StickyState::Disabled => {
                cells.remove(&key);
            }
            other => {
                cells.insert(key, other);
            }
        }
    }

    /// Number of enabled cells
    pub fn enabled_count(&self) -> usize {
        self.cells.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: StickyKey = (UserId::new(1), GuildId::new(10));
    const P1: PersonaId = PersonaId::new(1);
    const P2: PersonaId = PersonaId::new(2);

    #[test]
    fn test_initial_state_disabled() {
        let reg = StickyRegistry::new();
        assert_eq!(reg.status(KEY), StickyState::Disabled);
        assert!(!reg.disable(KEY));
    }

    #[test]
    fn test_enable_and_disable() {
        let reg = StickyRegistry::new();
        assert_eq!(reg.enable(KEY, None), StickyState::EnabledUnset);
        assert_eq!(reg.enable(KEY, Some(P1)), StickyState::EnabledWith(P1));
        assert!(reg.disable(KEY));
        assert_eq!(reg.status(KEY), StickyState::Disabled);
    }

    #[test]
    fn test_follow_only_when_enabled() {
        let mut state = StickyState::Disabled;
        assert!(!state.follow(P1));
        assert_eq!(state, StickyState::Disabled);

        let mut state = StickyState::EnabledUnset;
        assert!(state.follow(P1));
        assert_eq!(state.current(), Some(P1));
        assert!(!state.follow(P1));
        assert!(state.follow(P2));
        assert_eq!(state.current(), Some(P2));
    }

    #[test]
    fn test_scopes_are_independent() {
        let reg = StickyRegistry::new();
        let other_guild = (UserId::new(1), GuildId::new(11));
        reg.enable(KEY, Some(P1));
        assert_eq!(reg.status(other_guild), StickyState::Disabled);
        assert!(!reg.disable(other_guild));
        assert_eq!(reg.status(KEY), StickyState::EnabledWith(P1));
    }

    #[test]
    fn test_with_cell_persists_changes() {
        let reg = StickyRegistry::new();
        reg.enable(KEY, None);
        let changed = reg.with_cell(KEY, |cell| cell.follow(P2));
        assert!(changed);
        assert_eq!(reg.status(KEY), StickyState::EnabledWith(P2));

        // A disabled cell stays absent
        let other = (UserId::new(2), GuildId::new(10));
        reg.with_cell(other, |cell| cell.follow(P1));
        assert_eq!(reg.enabled_count(), 1);
    }
}
