//! Trigger resolution
//!
//! Picks the persona that should speak for a piece of text. Candidates are
//! checked in priority order:
//! 1. the viewer's personal overrides
//! 2. the viewer's own personas
//! 3. personas shared with the viewer
//! 4. the sticky auto-proxy persona, with the whole text as content
//!
//! Within a tier the store-defined order wins; specificity plays no part.

use std::fmt;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::ids::{PersonaId, UserId};
use crate::persona::{Persona, PersonaOverride};
use crate::sticky::StickyState;

use super::pattern::TriggerPattern;

/// Which priority tier produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchTier {
    Override,
    Owned,
    Shared,
    Sticky,
}

impl MatchTier {
    /// Tiers 1-3 are explicit and move sticky state.
    pub fn is_explicit(&self) -> bool {
        !matches!(self, MatchTier::Sticky)
    }
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchTier::Override => "override",
            MatchTier::Owned => "owned",
            MatchTier::Shared => "shared",
            MatchTier::Sticky => "sticky",
        })
    }
}

/// A selected persona and the content it should post
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub persona: Persona,
    pub content: String,
    pub tier: MatchTier,
}

/// Everything one viewer can speak as in one guild, in priority order.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    overrides: Vec<(String, Persona)>,
    owned: Vec<Persona>,
    shared: Vec<Persona>,
}

impl CandidateSet {
    /// Assemble the candidate set for `viewer`.
    ///
    /// Overrides must point at a shared persona. An override for a persona
    /// the viewer owns, or one filed under another viewer, is a data
    /// integrity failure. An override whose persona is no longer shared is
    /// stale and skipped.
    pub fn build(
        viewer: UserId,
        owned: Vec<Persona>,
        shared: Vec<Persona>,
        overrides: Vec<PersonaOverride>,
    ) -> Result<Self> {
        if let Some(p) = shared.iter().find(|p| p.owner == viewer) {
            return Err(Error::invariant(format!(
                "persona {} is listed as shared with its own owner {}",
                p.id, viewer
            )));
        }

        let mut paired = Vec::with_capacity(overrides.len());
        for o in overrides {
            if o.viewer != viewer {
                return Err(Error::invariant(format!(
                    "override for persona {} belongs to viewer {}, not {}",
                    o.persona, o.viewer, viewer
                )));
            }
            if owned.iter().any(|p| p.id == o.persona) {
                return Err(Error::invariant(format!(
                    "viewer {} has an override on their own persona {}",
                    viewer, o.persona
                )));
            }
            match shared.iter().find(|p| p.id == o.persona) {
                Some(p) => paired.push((o.trigger, p.clone())),
                None => {
                    warn!(viewer = %viewer, persona_id = %o.persona, "Skipping override for persona that is no longer shared");
                }
            }
        }

        Ok(Self {
            overrides: paired,
            owned,
            shared,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty() && self.shared.is_empty()
    }

    /// Look up a persona the viewer can speak as.
    pub fn persona(&self, id: PersonaId) -> Option<&Persona> {
        self.owned.iter().chain(self.shared.iter()).find(|p| p.id == id)
    }

    /// Every explicit (trigger, persona, tier) in priority order.
    ///
    /// Shared personas with an override appear under both their override and
    /// their original trigger.
    pub fn explicit(&self) -> impl Iterator<Item = (&str, &Persona, MatchTier)> {
        let overrides = self
            .overrides
            .iter()
            .map(|(t, p)| (t.as_str(), p, MatchTier::Override));
        let owned = self
            .owned
            .iter()
            .map(|p| (p.trigger.as_str(), p, MatchTier::Owned));
        let shared = self
            .shared
            .iter()
            .map(|p| (p.trigger.as_str(), p, MatchTier::Shared));
        overrides.chain(owned).chain(shared)
    }

    /// Effective triggers: overrides replace the originals they shadow.
    pub fn effective(&self) -> impl Iterator<Item = (&str, &Persona, MatchTier)> {
        self.explicit().filter(move |(_, p, tier)| {
            *tier != MatchTier::Shared || !self.overrides.iter().any(|(_, o)| o.id == p.id)
        })
    }

    /// Whether any trigger appears anywhere in `text`.
    pub fn has_trigger_substring(&self, text: &str) -> bool {
        self.explicit()
            .any(|(trigger, _, _)| TriggerPattern::classify(trigger).appears_in(text))
    }
}

/// First explicit match for `text`, without touching sticky state.
pub fn resolve_explicit(text: &str, candidates: &CandidateSet) -> Option<Resolution> {
    let text = text.trim();
    candidates.explicit().find_map(|(trigger, persona, tier)| {
        TriggerPattern::classify(trigger)
            .extract(text)
            .map(|content| Resolution {
                persona: persona.clone(),
                content,
                tier,
            })
    })
}

/// The persona sticky state currently points at, if the viewer can still use it.
pub fn sticky_persona<'c>(candidates: &'c CandidateSet, sticky: &mut StickyState) -> Option<&'c Persona> {
    let id = sticky.current()?;
    match candidates.persona(id) {
        Some(p) => Some(p),
        None => {
            // Persona was deleted or unshared since auto-proxy latched onto it
            debug!(persona_id = %id, "Sticky persona no longer available, re-arming");
            *sticky = StickyState::EnabledUnset;
            None
        }
    }
}

/// Resolve `text` for one viewer.
///
/// An explicit match moves an enabled sticky cell to the matched persona. The
/// sticky fallback posts `text` unchanged.
pub fn resolve(text: &str, candidates: &CandidateSet, sticky: &mut StickyState) -> Option<Resolution> {
    if text.trim().is_empty() {
        return None;
    }

    if let Some(found) = resolve_explicit(text, candidates) {
        if sticky.follow(found.persona.id) {
            debug!(persona = %found.persona.display_name, tier = %found.tier, "Sticky persona switched");
        }
        return Some(found);
    }

    sticky_persona(candidates, sticky).map(|persona| Resolution {
        persona: persona.clone(),
        content: text.to_string(),
        tier: MatchTier::Sticky,
    })
}
