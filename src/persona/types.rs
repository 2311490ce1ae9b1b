//! Core types for the persona system.
//!
//! A persona is an alternate identity an operator posts under. Personas are
//! scoped to a guild, owned by one operator, and may be shared with other
//! operators through access grants.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{GuildId, PersonaId, UserId};

/// Longest trigger accepted for a persona or an override.
pub const MAX_TRIGGER_LEN: usize = 200;

/// Longest display name the delivery endpoint accepts as a username.
pub const MAX_NAME_LEN: usize = 80;

// ─────────────────────────────────────────────────────────────────
// Persona
// ─────────────────────────────────────────────────────────────────

/// An alternate named identity an operator can post under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: PersonaId,
    pub owner: UserId,
    pub guild: GuildId,
    /// Unique per owner and guild, compared without regard to case.
    pub display_name: String,
    pub trigger: String,
    /// Never empty; the store substitutes the default avatar.
    pub avatar_url: String,
    #[serde(default)]
    pub group: GroupPath,
    #[serde(default)]
    pub profile: PersonaProfile,
    #[serde(default)]
    pub usage: Usage,
}

impl Persona {
    /// True if `name` refers to this persona.
    pub fn is_named(&self, name: &str) -> bool {
        self.display_name.trim().to_lowercase() == name.trim().to_lowercase()
    }
}

/// Optional group/subgroup labels. Cosmetic except for group grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPath {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgroup: Option<String>,
}

impl GroupPath {
    pub fn new(group: Option<String>, subgroup: Option<String>) -> Self {
        Self {
            group: group.filter(|g| !g.trim().is_empty()),
            subgroup: subgroup.filter(|s| !s.trim().is_empty()),
        }
    }

    /// Whether this path falls under `group` (and `subgroup`, when given).
    pub fn is_within(&self, group: &str, subgroup: Option<&str>) -> bool {
        let Some(own_group) = self.group.as_deref() else {
            return false;
        };
        if own_group != group {
            return false;
        }
        match subgroup {
            Some(sub) => self.subgroup.as_deref() == Some(sub),
            None => true,
        }
    }
}

impl fmt::Display for GroupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.group, &self.subgroup) {
            (Some(g), Some(s)) => write!(f, "{}/{}", g, s),
            (Some(g), None) => write!(f, "{}", g),
            _ => write!(f, "-"),
        }
    }
}

/// Extended character sheet fields. All optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub race: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pronouns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backstory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goals: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet_url: Option<String>,
}

impl PersonaProfile {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Usage counters, incremented only after a confirmed delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub message_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Usage {
    pub fn record(&mut self, at: DateTime<Utc>) {
        self.message_count += 1;
        self.last_used_at = Some(at);
    }
}

/// Fields supplied when creating a persona.
#[derive(Debug, Clone, Default)]
pub struct PersonaDraft {
    pub display_name: String,
    pub trigger: String,
    pub avatar_url: Option<String>,
    pub group: GroupPath,
    pub profile: PersonaProfile,
}

impl PersonaDraft {
    pub fn new(display_name: impl Into<String>, trigger: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            trigger: trigger.into(),
            ..Default::default()
        }
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    pub fn in_group(mut self, group: impl Into<String>, subgroup: Option<String>) -> Self {
        self.group = GroupPath::new(Some(group.into()), subgroup);
        self
    }
}

/// Partial update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct PersonaUpdate {
    pub display_name: Option<String>,
    pub trigger: Option<String>,
    pub avatar_url: Option<String>,
    pub group: Option<GroupPath>,
    pub profile: Option<PersonaProfile>,
}

// ─────────────────────────────────────────────────────────────────
// Sharing
// ─────────────────────────────────────────────────────────────────

/// Permission level a grant confers on the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// May post as the persona.
    Speaker,
    /// May post and edit.
    Manager,
    /// Full control, including re-sharing.
    Owner,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Speaker => "speaker",
            AccessLevel::Manager => "manager",
            AccessLevel::Owner => "owner",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "speaker" => Ok(AccessLevel::Speaker),
            "manager" => Ok(AccessLevel::Manager),
            "owner" => Ok(AccessLevel::Owner),
            other => Err(format!(
                "unknown access level '{}': expected speaker, manager, or owner",
                other
            )),
        }
    }
}

/// What a grant shares: one persona, or every persona in an owner's group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantTarget {
    Persona(PersonaId),
    Group {
        owner: UserId,
        guild: GuildId,
        group: String,
        subgroup: Option<String>,
    },
}

impl GrantTarget {
    /// Whether `persona` is covered by this target.
    pub fn covers(&self, persona: &Persona) -> bool {
        match self {
            GrantTarget::Persona(id) => persona.id == *id,
            GrantTarget::Group {
                owner,
                guild,
                group,
                subgroup,
            } => {
                persona.owner == *owner
                    && persona.guild == *guild
                    && persona.group.is_within(group, subgroup.as_deref())
            }
        }
    }
}

/// Makes personas visible to a viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub target: GrantTarget,
    pub viewer: UserId,
    pub level: AccessLevel,
}

/// A viewer-private trigger for a persona shared with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaOverride {
    pub viewer: UserId,
    pub guild: GuildId,
    pub persona: PersonaId,
    pub trigger: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona_in(group: Option<&str>, subgroup: Option<&str>) -> Persona {
        Persona {
            id: PersonaId::new(1),
            owner: UserId::new(10),
            guild: GuildId::new(100),
            display_name: "Mira".into(),
            trigger: "mira:".into(),
            avatar_url: "https://example.com/a.png".into(),
            group: GroupPath::new(group.map(String::from), subgroup.map(String::from)),
            profile: PersonaProfile::default(),
            usage: Usage::default(),
        }
    }

    #[test]
    fn test_is_named_ignores_case() {
        let p = persona_in(None, None);
        assert!(p.is_named("mira"));
        assert!(p.is_named(" MIRA "));
        assert!(!p.is_named("mir"));
    }

    #[test]
    fn test_group_path_blank_labels_are_none() {
        let path = GroupPath::new(Some("  ".into()), Some(String::new()));
        assert_eq!(path, GroupPath::default());
        assert_eq!(path.to_string(), "-");
    }

    #[test]
    fn test_group_grant_coverage() {
        let p = persona_in(Some("Party"), Some("Rogues"));
        let whole_group = GrantTarget::Group {
            owner: UserId::new(10),
            guild: GuildId::new(100),
            group: "Party".into(),
            subgroup: None,
        };
        let other_sub = GrantTarget::Group {
            owner: UserId::new(10),
            guild: GuildId::new(100),
            group: "Party".into(),
            subgroup: Some("Mages".into()),
        };
        let other_owner = GrantTarget::Group {
            owner: UserId::new(11),
            guild: GuildId::new(100),
            group: "Party".into(),
            subgroup: None,
        };
        assert!(whole_group.covers(&p));
        assert!(!other_sub.covers(&p));
        assert!(!other_owner.covers(&p));
        assert!(GrantTarget::Persona(PersonaId::new(1)).covers(&p));
    }

    #[test]
    fn test_access_level_parse() {
        assert_eq!("Manager".parse::<AccessLevel>().unwrap(), AccessLevel::Manager);
        assert!("admin".parse::<AccessLevel>().is_err());
        assert!(AccessLevel::Owner > AccessLevel::Speaker);
    }

    #[test]
    fn test_usage_record() {
        let mut usage = Usage::default();
        let now = Utc::now();
        usage.record(now);
        usage.record(now);
        assert_eq!(usage.message_count, 2);
        assert_eq!(usage.last_used_at, Some(now));
    }
}
