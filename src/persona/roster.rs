//! Roster file loader.
//!
//! A roster is a TOML document that seeds the in-memory store at startup:
//!
//! ```toml
//! [[persona]]
//! owner = "1"
//! guild = "100"
//! name = "Mira"
//! trigger = "mira:"
//! group = "Party"
//!
//! [[grant]]
//! owner = "1"
//! guild = "100"
//! persona = "Mira"
//! viewer = "2"
//! level = "speaker"
//!
//! [[override]]
//! viewer = "2"
//! guild = "100"
//! owner = "1"
//! persona = "Mira"
//! trigger = "m."
//!
//! [[auto_proxy]]
//! user = "2"
//! guild = "100"
//! persona = "Mira"
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::ids::{GuildId, PersonaId, UserId};

use super::store::InMemoryPersonaStore;
use super::types::{AccessGrant, AccessLevel, GrantTarget, GroupPath, PersonaDraft, PersonaProfile};

// ─────────────────────────────────────────────────────────────────
// File Format
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RosterFile {
    persona: Vec<PersonaEntry>,
    grant: Vec<GrantEntry>,
    #[serde(rename = "override")]
    overrides: Vec<OverrideEntry>,
    auto_proxy: Vec<AutoProxyEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PersonaEntry {
    owner: UserId,
    guild: GuildId,
    name: String,
    trigger: String,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    subgroup: Option<String>,
    #[serde(default)]
    profile: PersonaProfile,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GrantEntry {
    owner: UserId,
    guild: GuildId,
    viewer: UserId,
    #[serde(default)]
    persona: Option<String>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    subgroup: Option<String>,
    #[serde(default = "default_level")]
    level: String,
}

fn default_level() -> String {
    AccessLevel::Speaker.as_str().to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OverrideEntry {
    viewer: UserId,
    guild: GuildId,
    owner: UserId,
    persona: String,
    trigger: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AutoProxyEntry {
    user: UserId,
    guild: GuildId,
    #[serde(default)]
    persona: Option<String>,
}

// ─────────────────────────────────────────────────────────────────
// Loaded Roster
// ─────────────────────────────────────────────────────────────────

/// Auto-proxy state to apply once the sticky registry exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoProxySeed {
    pub user: UserId,
    pub guild: GuildId,
    /// `None` arms auto-proxy without a current persona.
    pub persona: Option<PersonaId>,
}

/// A populated store plus the auto-proxy seeds from the same file.
pub struct Roster {
    pub store: InMemoryPersonaStore,
    pub auto_proxy: Vec<AutoProxySeed>,
}

impl Roster {
    /// Load a roster file.
    pub fn load(path: &Path, default_avatar: &str) -> Result<Self> {
        debug!(path = %path.display(), "Loading persona roster");
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let roster = Self::from_toml_str(&content, default_avatar)?;
        info!(
            path = %path.display(),
            personas = roster.store.persona_count(),
            grants = roster.store.grant_count(),
            overrides = roster.store.override_count(),
            auto_proxy = roster.auto_proxy.len(),
            "Persona roster loaded"
        );
        Ok(roster)
    }

    /// An empty roster, used when no roster path is configured.
    pub fn empty(default_avatar: &str) -> Self {
        Self {
            store: InMemoryPersonaStore::new(default_avatar),
            auto_proxy: Vec::new(),
        }
    }

    /// Parse and apply a roster document. Entries are applied in file order
    /// so store-defined priority follows the file.
    pub fn from_toml_str(content: &str, default_avatar: &str) -> Result<Self> {
        let file: RosterFile = toml::from_str(content).map_err(|e| Error::ConfigParse {
            message: format!("roster: {}", e),
            source: Some(e),
        })?;

        let store = InMemoryPersonaStore::new(default_avatar);

        for (i, entry) in file.persona.into_iter().enumerate() {
            let label = format!("persona #{} ({})", i + 1, entry.name);
            let draft = PersonaDraft {
                display_name: entry.name,
                trigger: entry.trigger,
                avatar_url: entry.avatar_url,
                group: GroupPath::new(entry.group, entry.subgroup),
                profile: entry.profile,
            };
            store
                .create_persona(entry.owner, entry.guild, draft)
                .map_err(|e| Error::roster_invalid(&label, e.to_string()))?;
        }

        for (i, entry) in file.grant.into_iter().enumerate() {
            let label = format!("grant #{}", i + 1);
            let level: AccessLevel = entry
                .level
                .parse()
                .map_err(|e: String| Error::roster_invalid(&label, e))?;
            let target = match (entry.persona, entry.group) {
                (Some(name), None) => {
                    let persona = store
                        .owned_by_name(entry.owner, entry.guild, &name)
                        .ok_or_else(|| Error::roster_invalid(&label, format!("unknown persona '{}'", name)))?;
                    GrantTarget::Persona(persona.id)
                }
                (None, Some(group)) => GrantTarget::Group {
                    owner: entry.owner,
                    guild: entry.guild,
                    group,
                    subgroup: entry.subgroup.filter(|s| !s.trim().is_empty()),
                },
                _ => {
                    return Err(Error::roster_invalid(
                        &label,
                        "exactly one of 'persona' or 'group' is required",
                    ))
                }
            };
            store
                .grant(AccessGrant {
                    target,
                    viewer: entry.viewer,
                    level,
                })
                .map_err(|e| Error::roster_invalid(&label, e.to_string()))?;
        }

        for (i, entry) in file.overrides.into_iter().enumerate() {
            let label = format!("override #{} ({})", i + 1, entry.trigger);
            let persona = store
                .owned_by_name(entry.owner, entry.guild, &entry.persona)
                .ok_or_else(|| Error::roster_invalid(&label, format!("unknown persona '{}'", entry.persona)))?;
            store
                .set_override(entry.viewer, entry.guild, persona.id, entry.trigger)
                .map_err(|e| Error::roster_invalid(&label, e.to_string()))?;
        }

        let mut auto_proxy = Vec::with_capacity(file.auto_proxy.len());
        for (i, entry) in file.auto_proxy.into_iter().enumerate() {
            let label = format!("auto_proxy #{}", i + 1);
            let persona = match entry.persona {
                Some(name) => Some(
                    store
                        .lookup_name(entry.user, entry.guild, &name)
                        .ok_or_else(|| Error::roster_invalid(&label, format!("unknown persona '{}'", name)))?
                        .id,
                ),
                None => None,
            };
            auto_proxy.push(AutoProxySeed {
                user: entry.user,
                guild: entry.guild,
                persona,
            });
        }

        Ok(Self { store, auto_proxy })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_AVATAR_URL;
    use crate::persona::store::PersonaStore;

    const ROSTER: &str = r#"
[[persona]]
owner = "1"
guild = "100"
name = "Mira"
trigger = "mira:"
group = "Party"

[persona.profile]
race = "Half-elf"
pronouns = "she/her"

[[persona]]
owner = "2"
guild = "100"
name = "Bran"
trigger = "b:"
avatar_url = "https://example.com/bran.png"

[[grant]]
owner = "1"
guild = "100"
group = "Party"
viewer = "2"

[[override]]
viewer = "2"
guild = "100"
owner = "1"
persona = "mira"
trigger = "m."

[[auto_proxy]]
user = "2"
guild = "100"
persona = "Mira"

[[auto_proxy]]
user = "1"
guild = "100"
"#;

    #[tokio::test]
    async fn test_load_full_roster() {
        let roster = Roster::from_toml_str(ROSTER, DEFAULT_AVATAR_URL).unwrap();
        let store = &roster.store;
        assert_eq!(store.persona_count(), 2);

        let shared = store.list_shared(UserId::new(2), GuildId::new(100)).await.unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].avatar_url, DEFAULT_AVATAR_URL);
        assert_eq!(shared[0].profile.race.as_deref(), Some("Half-elf"));

        let overrides = store.list_overrides(UserId::new(2), GuildId::new(100)).await.unwrap();
        assert_eq!(overrides[0].trigger, "m.");

        assert_eq!(roster.auto_proxy.len(), 2);
        assert_eq!(roster.auto_proxy[0].persona, Some(shared[0].id));
        assert_eq!(roster.auto_proxy[1].persona, None);
    }

    #[test]
    fn test_invalid_entry_is_named() {
        let content = r#"
[[persona]]
owner = "1"
guild = "100"
name = "Mira"
trigger = ""
"#;
        let err = Roster::from_toml_str(content, DEFAULT_AVATAR_URL).err().unwrap();
        assert!(matches!(err, Error::RosterInvalid { ref entry, .. } if entry == "persona #1 (Mira)"));
    }

    #[test]
    fn test_grant_requires_one_target() {
        let content = r#"
[[grant]]
owner = "1"
guild = "100"
viewer = "2"
"#;
        let err = Roster::from_toml_str(content, DEFAULT_AVATAR_URL).err().unwrap();
        assert!(err.to_string().contains("exactly one of"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let content = r#"
[[persona]]
owner = "1"
guild = "100"
name = "Mira"
trigger = "m:"
colour = "red"
"#;
        assert!(matches!(
            Roster::from_toml_str(content, DEFAULT_AVATAR_URL),
            Err(Error::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("roster.toml");
        std::fs::write(&path, ROSTER).unwrap();
        let roster = Roster::load(&path, DEFAULT_AVATAR_URL).unwrap();
        assert_eq!(roster.store.grant_count(), 1);

        let missing = Roster::load(&dir.path().join("nope.toml"), DEFAULT_AVATAR_URL);
        assert!(matches!(missing, Err(Error::IoRead { .. })));
    }
}
