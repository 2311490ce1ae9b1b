//! Trigger matching: pattern rules, priority resolution, multi-line
//! splitting, and conflict reporting.

pub mod conflicts;
pub mod pattern;
pub mod resolver;
pub mod splitter;

pub use conflicts::{find_conflicts, TriggerClaim, TriggerConflict};
pub use pattern::TriggerPattern;
pub use resolver::{resolve, resolve_explicit, CandidateSet, MatchTier, Resolution};
pub use splitter::{is_multiline, split_resolve, SplitOutcome, MIN_DISTINCT_PERSONAS};
