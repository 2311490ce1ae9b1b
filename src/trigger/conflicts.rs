//! Trigger conflict report
//!
//! Groups a viewer's effective triggers by the texts they match and lists
//! every group claimed by more than one persona. Priority still decides who
//! wins; the report only makes the shadowing visible.

use std::collections::BTreeMap;

use crate::ids::PersonaId;

use super::pattern::TriggerPattern;
use super::resolver::{CandidateSet, MatchTier};

/// One trigger claimed by several personas, winner first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerConflict {
    pub key: String,
    pub claims: Vec<TriggerClaim>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerClaim {
    pub persona: PersonaId,
    pub display_name: String,
    pub trigger: String,
    pub tier: MatchTier,
}

impl TriggerConflict {
    pub fn winner(&self) -> Option<&TriggerClaim> {
        self.claims.first()
    }
}

/// Conflicts among the effective triggers of `candidates`, sorted by key.
pub fn find_conflicts(candidates: &CandidateSet) -> Vec<TriggerConflict> {
    let mut groups: BTreeMap<String, Vec<TriggerClaim>> = BTreeMap::new();

    for (trigger, persona, tier) in candidates.effective() {
        let key = TriggerPattern::classify(trigger).equivalence_key();
        let claims = groups.entry(key).or_default();
        if claims.iter().any(|c| c.persona == persona.id) {
            continue;
        }
        claims.push(TriggerClaim {
            persona: persona.id,
            display_name: persona.display_name.clone(),
            trigger: trigger.to_string(),
            tier,
        });
    }

    groups
        .into_iter()
        .filter(|(_, claims)| claims.len() > 1)
        .map(|(key, claims)| TriggerConflict { key, claims })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{GuildId, UserId};
    use crate::persona::{GroupPath, Persona, PersonaOverride, PersonaProfile, Usage};

    const VIEWER: UserId = UserId::new(1);
    const OTHER: UserId = UserId::new(2);

    fn persona(id: u64, owner: UserId, name: &str, trigger: &str) -> Persona {
        Persona {
            id: PersonaId::new(id),
            owner,
            guild: GuildId::new(100),
            display_name: name.into(),
            trigger: trigger.into(),
            avatar_url: String::new(),
            group: GroupPath::default(),
            profile: PersonaProfile::default(),
            usage: Usage::default(),
        }
    }

    #[test]
    fn test_case_insensitive_conflict() {
        let set = CandidateSet::build(
            VIEWER,
            vec![persona(1, VIEWER, "Ash", "A:")],
            vec![persona(2, OTHER, "Aria", "a:")],
            vec![],
        )
        .unwrap();
        let conflicts = find_conflicts(&set);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].key, "a:");
        assert_eq!(conflicts[0].winner().unwrap().display_name, "Ash");
    }

    #[test]
    fn test_bracket_triggers_always_conflict() {
        let set = CandidateSet::build(
            VIEWER,
            vec![persona(1, VIEWER, "One", "[one]"), persona(2, VIEWER, "Two", "[two]")],
            vec![],
            vec![],
        )
        .unwrap();
        let conflicts = find_conflicts(&set);
        assert_eq!(conflicts[0].key, "[...]");
        assert_eq!(conflicts[0].claims.len(), 2);
    }

    #[test]
    fn test_override_resolves_conflict() {
        let set = CandidateSet::build(
            VIEWER,
            vec![persona(1, VIEWER, "Ash", "a:")],
            vec![persona(2, OTHER, "Aria", "a:")],
            vec![PersonaOverride {
                viewer: VIEWER,
                guild: GuildId::new(100),
                persona: PersonaId::new(2),
                trigger: "ar:".into(),
            }],
        )
        .unwrap();
        assert!(find_conflicts(&set).is_empty());
    }
}
