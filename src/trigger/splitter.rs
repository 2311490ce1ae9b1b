//! Multi-line splitting
//!
//! Each non-blank line is resolved on its own, in order, against a sticky
//! cell threaded through the loop. A sticky switch on line N is therefore
//! visible to the fallback on line N+1.

use std::collections::HashSet;

use crate::ids::PersonaId;
use crate::sticky::StickyState;

use super::resolver::{resolve, CandidateSet, Resolution};

/// Distinct personas a split must name before it replaces single-line handling.
pub const MIN_DISTINCT_PERSONAS: usize = 2;

pub fn is_multiline(text: &str) -> bool {
    text.contains('\n')
}

/// Per-line resolutions plus the sticky state after the last line.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitOutcome {
    pub lines: Vec<Resolution>,
    pub sticky: StickyState,
}

impl SplitOutcome {
    pub fn distinct_personas(&self) -> usize {
        self.lines
            .iter()
            .map(|r| r.persona.id)
            .collect::<HashSet<PersonaId>>()
            .len()
    }

    /// Whether this split should be delivered line by line.
    pub fn should_split(&self, min_distinct: usize) -> bool {
        self.distinct_personas() >= min_distinct.max(MIN_DISTINCT_PERSONAS)
    }
}

/// Resolve every line of `text` starting from `sticky`.
///
/// Lines without a match are dropped, and so are explicit matches that leave
/// no content. Returns `None` when nothing matched at all.
pub fn split_resolve(text: &str, candidates: &CandidateSet, sticky: StickyState) -> Option<SplitOutcome> {
    let mut cell = sticky;
    let mut lines = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        // Resolve against a copy so an empty exact match leaves sticky alone
        let mut scratch = cell;
        match resolve(line, candidates, &mut scratch) {
            Some(r) if r.content.is_empty() => continue,
            Some(r) => {
                cell = scratch;
                lines.push(r);
            }
            None => cell = scratch,
        }
    }

    if lines.is_empty() {
        None
    } else {
        Some(SplitOutcome { lines, sticky: cell })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{GuildId, UserId};
    use crate::persona::{GroupPath, Persona, PersonaProfile, Usage};
    use crate::trigger::MatchTier;

    const VIEWER: UserId = UserId::new(1);

    fn persona(id: u64, name: &str, trigger: &str) -> Persona {
        Persona {
            id: PersonaId::new(id),
            owner: VIEWER,
            guild: GuildId::new(100),
            display_name: name.into(),
            trigger: trigger.into(),
            avatar_url: "https://example.com/a.png".into(),
            group: GroupPath::default(),
            profile: PersonaProfile::default(),
            usage: Usage::default(),
        }
    }

    fn candidates() -> CandidateSet {
        CandidateSet::build(
            VIEWER,
            vec![persona(1, "A", "a:"), persona(2, "B", "b:")],
            vec![],
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn test_is_multiline() {
        assert!(is_multiline("a\nb"));
        assert!(!is_multiline("a b"));
    }

    #[test]
    fn test_two_personas_split() {
        let out = split_resolve("a: hi\n\n  b: hello  \n", &candidates(), StickyState::Disabled).unwrap();
        assert_eq!(out.lines.len(), 2);
        assert_eq!(out.lines[0].content, "hi");
        assert_eq!(out.lines[1].persona.display_name, "B");
        assert_eq!(out.distinct_personas(), 2);
        assert!(out.should_split(MIN_DISTINCT_PERSONAS));
    }

    #[test]
    fn test_unmatched_lines_are_dropped() {
        let out = split_resolve("a: hi\nnobody\nb: yo", &candidates(), StickyState::Disabled).unwrap();
        assert_eq!(out.lines.len(), 2);
    }

    #[test]
    fn test_sticky_carries_to_next_line() {
        let out = split_resolve("a: one\ntwo\nb: three\nfour", &candidates(), StickyState::EnabledUnset).unwrap();
        let names: Vec<&str> = out.lines.iter().map(|r| r.persona.display_name.as_str()).collect();
        assert_eq!(names, vec!["A", "A", "B", "B"]);
        assert_eq!(out.lines[1].tier, MatchTier::Sticky);
        assert_eq!(out.lines[1].content, "two");
        assert_eq!(out.sticky, StickyState::EnabledWith(PersonaId::new(2)));
    }

    #[test]
    fn test_single_persona_does_not_split() {
        let out = split_resolve("a: one\na: two", &candidates(), StickyState::Disabled).unwrap();
        assert_eq!(out.distinct_personas(), 1);
        assert!(!out.should_split(MIN_DISTINCT_PERSONAS));
    }

    #[test]
    fn test_empty_exact_match_is_not_counted() {
        let out = split_resolve("b:\na: hi", &candidates(), StickyState::EnabledUnset).unwrap();
        assert_eq!(out.lines.len(), 1);
        assert_eq!(out.sticky, StickyState::EnabledWith(PersonaId::new(1)));
    }

    #[test]
    fn test_nothing_matches() {
        assert!(split_resolve("hello\nworld", &candidates(), StickyState::Disabled).is_none());
    }
}
