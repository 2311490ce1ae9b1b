//! Persona store contract and the in-memory implementation.
//!
//! The dispatch engine only needs the read side plus usage increments
//! ([`PersonaStore`]). Management operations (create, share, override) live
//! on [`InMemoryPersonaStore`] and are used by the roster loader.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::DEFAULT_AVATAR_URL;
use crate::error::{Error, Result};
use crate::ids::{GuildId, PersonaId, UserId};

use super::types::{
    AccessGrant, GrantTarget, Persona, PersonaDraft, PersonaOverride, PersonaUpdate,
    MAX_NAME_LEN, MAX_TRIGGER_LEN,
};

// ─────────────────────────────────────────────────────────────────
// Store Contract
// ─────────────────────────────────────────────────────────────────

/// Read-mostly persona access used by the dispatcher.
///
/// List order is the store-defined priority order used by trigger resolution.
#[async_trait]
pub trait PersonaStore: Send + Sync {
    /// Personas owned by `operator` in `guild`, in creation order.
    async fn list_owned(&self, operator: UserId, guild: GuildId) -> Result<Vec<Persona>>;

    /// Personas other operators shared with `viewer` in `guild`, in grant order.
    async fn list_shared(&self, viewer: UserId, guild: GuildId) -> Result<Vec<Persona>>;

    /// Trigger overrides `viewer` set in `guild`, in creation order.
    async fn list_overrides(&self, viewer: UserId, guild: GuildId) -> Result<Vec<PersonaOverride>>;

    /// Record one confirmed delivery.
    async fn increment_usage(&self, persona: PersonaId) -> Result<()>;

    /// Find a persona by display name: owned first, then shared.
    async fn find_by_name(
        &self,
        operator: UserId,
        guild: GuildId,
        name: &str,
    ) -> Result<Option<Persona>> {
        if let Some(p) = self
            .list_owned(operator, guild)
            .await?
            .into_iter()
            .find(|p| p.is_named(name))
        {
            return Ok(Some(p));
        }
        Ok(self
            .list_shared(operator, guild)
            .await?
            .into_iter()
            .find(|p| p.is_named(name)))
    }
}

// ─────────────────────────────────────────────────────────────────
// In-Memory Store
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct StoreInner {
    personas: Vec<Persona>,
    grants: Vec<AccessGrant>,
    overrides: Vec<PersonaOverride>,
    next_id: u64,
}

impl StoreInner {
    fn find(&self, id: PersonaId) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    fn is_visible_to(&self, persona: &Persona, viewer: UserId) -> bool {
        persona.owner != viewer
            && self
                .grants
                .iter()
                .any(|g| g.viewer == viewer && g.target.covers(persona))
    }

    fn name_taken(&self, owner: UserId, guild: GuildId, name: &str, except: Option<PersonaId>) -> bool {
        self.personas.iter().any(|p| {
            p.owner == owner && p.guild == guild && Some(p.id) != except && p.is_named(name)
        })
    }
}

/// In-memory persona store guarded by a single lock.
pub struct InMemoryPersonaStore {
    inner: RwLock<StoreInner>,
    default_avatar: String,
}

impl Default for InMemoryPersonaStore {
    fn default() -> Self {
        Self::new(DEFAULT_AVATAR_URL)
    }
}

impl InMemoryPersonaStore {
    /// Create an empty store that substitutes `default_avatar` for blank avatars.
    pub fn new(default_avatar: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                next_id: 1,
                ..Default::default()
            }),
            default_avatar: default_avatar.into(),
        }
    }

    /// Get a persona by id
    pub fn get(&self, id: PersonaId) -> Option<Persona> {
        self.inner.read().find(id).cloned()
    }

    pub fn persona_count(&self) -> usize {
        self.inner.read().personas.len()
    }

    pub fn grant_count(&self) -> usize {
        self.inner.read().grants.len()
    }

    pub fn override_count(&self) -> usize {
        self.inner.read().overrides.len()
    }

    /// Synchronous name lookup with the same owned-then-shared order as
    /// [`PersonaStore::find_by_name`].
    pub fn lookup_name(&self, operator: UserId, guild: GuildId, name: &str) -> Option<Persona> {
        let inner = self.inner.read();
        let in_guild = |p: &&Persona| p.guild == guild && p.is_named(name);
        inner
            .personas
            .iter()
            .filter(in_guild)
            .find(|p| p.owner == operator)
            .or_else(|| {
                inner
                    .personas
                    .iter()
                    .filter(in_guild)
                    .find(|p| inner.is_visible_to(p, operator))
            })
            .cloned()
    }

    /// Owned persona by exact owner, used by loaders that address personas by name.
    pub fn owned_by_name(&self, owner: UserId, guild: GuildId, name: &str) -> Option<Persona> {
        self.inner
            .read()
            .personas
            .iter()
            .find(|p| p.owner == owner && p.guild == guild && p.is_named(name))
            .cloned()
    }

    /// Every (viewer, guild) pair that has at least one persona in reach.
    pub fn known_operators(&self) -> Vec<(UserId, GuildId)> {
        let inner = self.inner.read();
        let mut pairs: Vec<(UserId, GuildId)> =
            inner.personas.iter().map(|p| (p.owner, p.guild)).collect();
        for grant in &inner.grants {
            for persona in inner.personas.iter().filter(|p| grant.target.covers(p)) {
                pairs.push((grant.viewer, persona.guild));
            }
        }
        pairs.sort();
        pairs.dedup();
        pairs
    }

    /// Create a persona owned by `owner` in `guild`.
    pub fn create_persona(&self, owner: UserId, guild: GuildId, draft: PersonaDraft) -> Result<Persona> {
        let name = validate_name(&draft.display_name)?;
        validate_trigger(&name, &draft.trigger)?;

        let mut inner = self.inner.write();
        if inner.name_taken(owner, guild, &name, None) {
            return Err(Error::DuplicatePersona { name });
        }

        let id = PersonaId::new(inner.next_id);
        inner.next_id += 1;

        let persona = Persona {
            id,
            owner,
            guild,
            display_name: name,
            trigger: draft.trigger,
            avatar_url: self.avatar_or_default(draft.avatar_url),
            group: draft.group,
            profile: draft.profile,
            usage: Default::default(),
        };
        debug!(persona_id = %id, name = %persona.display_name, "Persona created");
        inner.personas.push(persona.clone());
        Ok(persona)
    }

    /// Apply a partial update.
    pub fn update_persona(&self, id: PersonaId, update: PersonaUpdate) -> Result<Persona> {
        let mut inner = self.inner.write();
        let current = inner
            .find(id)
            .cloned()
            .ok_or_else(|| Error::persona_not_found(id.to_string()))?;

        let name = match update.display_name {
            Some(ref n) => {
                let name = validate_name(n)?;
                if inner.name_taken(current.owner, current.guild, &name, Some(id)) {
                    return Err(Error::DuplicatePersona { name });
                }
                name
            }
            None => current.display_name.clone(),
        };
        if let Some(ref t) = update.trigger {
            validate_trigger(&name, t)?;
        }

        let avatar = update.avatar_url.map(|a| self.avatar_or_default(Some(a)));
        let Some(persona) = inner.personas.iter_mut().find(|p| p.id == id) else {
            return Err(Error::persona_not_found(id.to_string()));
        };
        persona.display_name = name;
        if let Some(t) = update.trigger {
            persona.trigger = t;
        }
        if let Some(a) = avatar {
            persona.avatar_url = a;
        }
        if let Some(g) = update.group {
            persona.group = g;
        }
        if let Some(p) = update.profile {
            persona.profile = p;
        }
        Ok(persona.clone())
    }

    /// Delete a persona together with grants and overrides that point at it.
    pub fn delete_persona(&self, id: PersonaId) -> Result<Persona> {
        let mut inner = self.inner.write();
        let pos = inner
            .personas
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| Error::persona_not_found(id.to_string()))?;
        let removed = inner.personas.remove(pos);
        inner.grants.retain(|g| g.target != GrantTarget::Persona(id));
        inner.overrides.retain(|o| o.persona != id);
        Ok(removed)
    }

    /// Share a persona or group. Re-granting the same target replaces the level.
    pub fn grant(&self, grant: AccessGrant) -> Result<()> {
        let mut inner = self.inner.write();
        match &grant.target {
            GrantTarget::Persona(id) => {
                let persona = inner
                    .find(*id)
                    .ok_or_else(|| Error::persona_not_found(id.to_string()))?;
                if persona.owner == grant.viewer {
                    return Err(Error::invalid_persona(
                        persona.display_name.clone(),
                        "cannot share a persona with its owner",
                    ));
                }
            }
            GrantTarget::Group { owner, group, .. } => {
                if *owner == grant.viewer {
                    return Err(Error::invalid_persona(
                        group.clone(),
                        "cannot share a group with its owner",
                    ));
                }
            }
        }

        if let Some(existing) = inner
            .grants
            .iter_mut()
            .find(|g| g.viewer == grant.viewer && g.target == grant.target)
        {
            existing.level = grant.level;
        } else {
            inner.grants.push(grant);
        }
        Ok(())
    }

    /// Remove a grant. Returns whether one existed.
    pub fn revoke(&self, target: &GrantTarget, viewer: UserId) -> bool {
        let mut inner = self.inner.write();
        let before = inner.grants.len();
        inner.grants.retain(|g| !(g.viewer == viewer && g.target == *target));
        before != inner.grants.len()
    }

    /// Set the viewer's personal trigger for a persona shared with them.
    pub fn set_override(
        &self,
        viewer: UserId,
        guild: GuildId,
        persona: PersonaId,
        trigger: impl Into<String>,
    ) -> Result<PersonaOverride> {
        let trigger = trigger.into();
        let mut inner = self.inner.write();

        let target = inner
            .find(persona)
            .ok_or_else(|| Error::persona_not_found(persona.to_string()))?;
        if target.guild != guild {
            return Err(Error::persona_not_found(target.display_name.clone()));
        }
        if target.owner == viewer {
            return Err(Error::invalid_override(format!(
                "'{}' is your own persona; edit its trigger instead",
                target.display_name
            )));
        }
        if !inner.is_visible_to(target, viewer) {
            return Err(Error::invalid_override(format!(
                "'{}' is not shared with you",
                target.display_name
            )));
        }

        check_trigger_len(&trigger).map_err(Error::invalid_override)?;
        let lowered = trigger.to_lowercase();
        if let Some(clash) = inner
            .personas
            .iter()
            .find(|p| p.owner == viewer && p.guild == guild && p.trigger.to_lowercase() == lowered)
        {
            return Err(Error::invalid_override(format!(
                "trigger '{}' is already used by your persona '{}'",
                trigger, clash.display_name
            )));
        }

        let entry = PersonaOverride {
            viewer,
            guild,
            persona,
            trigger,
        };
        if let Some(existing) = inner
            .overrides
            .iter_mut()
            .find(|o| o.viewer == viewer && o.guild == guild && o.persona == persona)
        {
            existing.trigger = entry.trigger.clone();
        } else {
            inner.overrides.push(entry.clone());
        }
        Ok(entry)
    }

    /// Remove an override. Returns whether one existed.
    pub fn remove_override(&self, viewer: UserId, guild: GuildId, persona: PersonaId) -> bool {
        let mut inner = self.inner.write();
        let before = inner.overrides.len();
        inner
            .overrides
            .retain(|o| !(o.viewer == viewer && o.guild == guild && o.persona == persona));
        before != inner.overrides.len()
    }

    /// Owned personas, most used first.
    pub fn usage_stats(&self, owner: UserId, guild: GuildId) -> Vec<Persona> {
        let mut owned: Vec<Persona> = self
            .inner
            .read()
            .personas
            .iter()
            .filter(|p| p.owner == owner && p.guild == guild)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.usage.message_count.cmp(&a.usage.message_count));
        owned
    }

    fn avatar_or_default(&self, avatar: Option<String>) -> String {
        avatar
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| self.default_avatar.clone())
    }
}

#[async_trait]
impl PersonaStore for InMemoryPersonaStore {
    async fn list_owned(&self, operator: UserId, guild: GuildId) -> Result<Vec<Persona>> {
        Ok(self
            .inner
            .read()
            .personas
            .iter()
            .filter(|p| p.owner == operator && p.guild == guild)
            .cloned()
            .collect())
    }

    async fn list_shared(&self, viewer: UserId, guild: GuildId) -> Result<Vec<Persona>> {
        let inner = self.inner.read();
        let mut shared: Vec<Persona> = Vec::new();
        for grant in inner.grants.iter().filter(|g| g.viewer == viewer) {
            for persona in inner.personas.iter() {
                if persona.guild == guild
                    && persona.owner != viewer
                    && grant.target.covers(persona)
                    && !shared.iter().any(|s| s.id == persona.id)
                {
                    shared.push(persona.clone());
                }
            }
        }
        Ok(shared)
    }

    async fn list_overrides(&self, viewer: UserId, guild: GuildId) -> Result<Vec<PersonaOverride>> {
        Ok(self
            .inner
            .read()
            .overrides
            .iter()
            .filter(|o| o.viewer == viewer && o.guild == guild)
            .cloned()
            .collect())
    }

    async fn increment_usage(&self, persona: PersonaId) -> Result<()> {
        let mut inner = self.inner.write();
        let target = inner
            .personas
            .iter_mut()
            .find(|p| p.id == persona)
            .ok_or_else(|| Error::persona_not_found(persona.to_string()))?;
        target.usage.record(Utc::now());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    if len == 0 {
        return Err(Error::invalid_persona(name, "display name cannot be empty"));
    }
    if len > MAX_NAME_LEN {
        return Err(Error::invalid_persona(
            name,
            format!("display name exceeds {} characters", MAX_NAME_LEN),
        ));
    }
    Ok(trimmed.to_string())
}

fn validate_trigger(name: &str, trigger: &str) -> Result<()> {
    check_trigger_len(trigger).map_err(|reason| Error::invalid_persona(name, reason))
}

fn check_trigger_len(trigger: &str) -> std::result::Result<(), String> {
    if trigger.trim().is_empty() {
        return Err("trigger cannot be empty".to_string());
    }
    if trigger.chars().count() > MAX_TRIGGER_LEN {
        return Err(format!("trigger exceeds {} characters", MAX_TRIGGER_LEN));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::types::AccessLevel;

    const ALICE: UserId = UserId::new(1);
    const BOB: UserId = UserId::new(2);
    const GUILD: GuildId = GuildId::new(100);

    fn share(store: &InMemoryPersonaStore, persona: PersonaId, viewer: UserId) {
        store
            .grant(AccessGrant {
                target: GrantTarget::Persona(persona),
                viewer,
                level: AccessLevel::Speaker,
            })
            .unwrap();
    }

    #[test]
    fn test_create_assigns_default_avatar() {
        let store = InMemoryPersonaStore::default();
        let p = store
            .create_persona(ALICE, GUILD, PersonaDraft::new("Kael", "k:").with_avatar("  "))
            .unwrap();
        assert_eq!(p.avatar_url, DEFAULT_AVATAR_URL);
        assert_eq!(p.id, PersonaId::new(1));
    }

    #[test]
    fn test_duplicate_name_is_case_insensitive_per_owner() {
        let store = InMemoryPersonaStore::default();
        store.create_persona(ALICE, GUILD, PersonaDraft::new("Kael", "k:")).unwrap();
        let err = store
            .create_persona(ALICE, GUILD, PersonaDraft::new("KAEL", "kk:"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatePersona { .. }));

        // Another owner or guild may reuse the name
        assert!(store.create_persona(BOB, GUILD, PersonaDraft::new("Kael", "k:")).is_ok());
        assert!(store
            .create_persona(ALICE, GuildId::new(101), PersonaDraft::new("Kael", "k:"))
            .is_ok());
    }

    #[test]
    fn test_trigger_length_limits() {
        let store = InMemoryPersonaStore::default();
        assert!(store.create_persona(ALICE, GUILD, PersonaDraft::new("A", "   ")).is_err());
        let long = "x".repeat(MAX_TRIGGER_LEN + 1);
        assert!(store.create_persona(ALICE, GUILD, PersonaDraft::new("A", long)).is_err());
    }

    #[tokio::test]
    async fn test_shared_list_respects_grants_and_guild() {
        let store = InMemoryPersonaStore::default();
        let mira = store.create_persona(ALICE, GUILD, PersonaDraft::new("Mira", "mira:")).unwrap();
        store
            .create_persona(ALICE, GuildId::new(101), PersonaDraft::new("Elsewhere", "e:"))
            .unwrap();

        assert!(store.list_shared(BOB, GUILD).await.unwrap().is_empty());
        share(&store, mira.id, BOB);

        let shared = store.list_shared(BOB, GUILD).await.unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].display_name, "Mira");
        assert!(store.list_shared(BOB, GuildId::new(101)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_group_grant_shares_each_persona_once() {
        let store = InMemoryPersonaStore::default();
        let a = store
            .create_persona(ALICE, GUILD, PersonaDraft::new("A", "a:").in_group("Party", None))
            .unwrap();
        store
            .create_persona(ALICE, GUILD, PersonaDraft::new("B", "b:").in_group("Party", None))
            .unwrap();
        store.create_persona(ALICE, GUILD, PersonaDraft::new("C", "c:")).unwrap();

        share(&store, a.id, BOB);
        store
            .grant(AccessGrant {
                target: GrantTarget::Group {
                    owner: ALICE,
                    guild: GUILD,
                    group: "Party".into(),
                    subgroup: None,
                },
                viewer: BOB,
                level: AccessLevel::Manager,
            })
            .unwrap();

        let names: Vec<String> = store
            .list_shared(BOB, GUILD)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.display_name)
            .collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_override_validation() {
        let store = InMemoryPersonaStore::default();
        let mira = store.create_persona(ALICE, GUILD, PersonaDraft::new("Mira", "mira:")).unwrap();
        store.create_persona(BOB, GUILD, PersonaDraft::new("Bran", "b:")).unwrap();

        // Not shared yet
        assert!(matches!(
            store.set_override(BOB, GUILD, mira.id, "m."),
            Err(Error::InvalidOverride { .. })
        ));

        share(&store, mira.id, BOB);

        // Owner cannot override their own persona
        assert!(store.set_override(ALICE, GUILD, mira.id, "m.").is_err());
        // Clashes with one of the viewer's own triggers
        assert!(store.set_override(BOB, GUILD, mira.id, "B:").is_err());
        // Too long
        assert!(store.set_override(BOB, GUILD, mira.id, "x".repeat(201)).is_err());

        store.set_override(BOB, GUILD, mira.id, "m.").unwrap();
        store.set_override(BOB, GUILD, mira.id, "mm.").unwrap();
        assert_eq!(store.override_count(), 1);
        assert!(store.remove_override(BOB, GUILD, mira.id));
        assert!(!store.remove_override(BOB, GUILD, mira.id));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = InMemoryPersonaStore::default();
        let mira = store.create_persona(ALICE, GUILD, PersonaDraft::new("Mira", "mira:")).unwrap();
        share(&store, mira.id, BOB);
        store.set_override(BOB, GUILD, mira.id, "m.").unwrap();

        store.delete_persona(mira.id).unwrap();
        assert_eq!(store.grant_count(), 0);
        assert!(store.list_overrides(BOB, GUILD).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_increment_usage_and_stats() {
        let store = InMemoryPersonaStore::default();
        let a = store.create_persona(ALICE, GUILD, PersonaDraft::new("A", "a:")).unwrap();
        let b = store.create_persona(ALICE, GUILD, PersonaDraft::new("B", "b:")).unwrap();

        store.increment_usage(b.id).await.unwrap();
        store.increment_usage(b.id).await.unwrap();
        store.increment_usage(a.id).await.unwrap();

        let stats = store.usage_stats(ALICE, GUILD);
        assert_eq!(stats[0].display_name, "B");
        assert_eq!(stats[0].usage.message_count, 2);
        assert!(stats[0].usage.last_used_at.is_some());

        assert!(store.increment_usage(PersonaId::new(99)).await.is_err());
    }

    #[tokio::test]
    async fn test_find_by_name_prefers_owned() {
        let store = InMemoryPersonaStore::default();
        let shared = store.create_persona(ALICE, GUILD, PersonaDraft::new("Rook", "r:")).unwrap();
        share(&store, shared.id, BOB);

        let found = store.find_by_name(BOB, GUILD, "rook").await.unwrap().unwrap();
        assert_eq!(found.owner, ALICE);

        store.create_persona(BOB, GUILD, PersonaDraft::new("Rook", "rr:")).unwrap();
        let found = store.find_by_name(BOB, GUILD, "ROOK").await.unwrap().unwrap();
        assert_eq!(found.owner, BOB);

        assert!(store.find_by_name(BOB, GUILD, "nobody").await.unwrap().is_none());
    }

    #[test]
    fn test_update_persona_rename_checks_duplicates() {
        let store = InMemoryPersonaStore::default();
        store.create_persona(ALICE, GUILD, PersonaDraft::new("A", "a:")).unwrap();
        let b = store.create_persona(ALICE, GUILD, PersonaDraft::new("B", "b:")).unwrap();

        let err = store
            .update_persona(
                b.id,
                PersonaUpdate {
                    display_name: Some("a".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatePersona { .. }));

        let updated = store
            .update_persona(
                b.id,
                PersonaUpdate {
                    trigger: Some("bee:".into()),
                    avatar_url: Some(String::new()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.trigger, "bee:");
        assert_eq!(updated.avatar_url, DEFAULT_AVATAR_URL);
    }
}
