//! Thread directory: thread channel id to parent channel id.
//!
//! Channels the directory has never seen are treated as top-level.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::ids::{ChannelId, GuildId};

use super::protocol::ChannelPayload;

#[derive(Debug, Default)]
pub struct ChannelDirectory {
    threads: RwLock<HashMap<ChannelId, (GuildId, ChannelId)>>,
}

impl ChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent_of(&self, channel: ChannelId) -> Option<ChannelId> {
        self.threads.read().get(&channel).map(|(_, parent)| *parent)
    }

    pub fn len(&self) -> usize {
        self.threads.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.read().is_empty()
    }

    /// Record a channel if it is a thread with a known parent.
    pub fn observe(&self, guild: GuildId, channel: &ChannelPayload) {
        if let (true, Some(parent)) = (channel.is_thread(), channel.parent_id) {
            self.threads.write().insert(channel.id, (guild, parent));
        }
    }

    pub fn forget(&self, channel: ChannelId) -> bool {
        self.threads.write().remove(&channel).is_some()
    }

    /// Replace everything known about `guild` with `threads`.
    pub fn sync_guild(&self, guild: GuildId, threads: &[ChannelPayload]) {
        let mut map = self.threads.write();
        map.retain(|_, (g, _)| *g != guild);
        for t in threads.iter().filter(|t| t.is_thread()) {
            if let Some(parent) = t.parent_id {
                map.insert(t.id, (guild, parent));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: GuildId = GuildId::new(100);

    fn thread(id: u64, parent: u64) -> ChannelPayload {
        ChannelPayload {
            id: ChannelId::new(id),
            kind: 11,
            parent_id: Some(ChannelId::new(parent)),
            guild_id: Some(GUILD),
        }
    }

    #[test]
    fn test_observe_and_forget() {
        let dir = ChannelDirectory::new();
        dir.observe(GUILD, &thread(5, 2));
        assert_eq!(dir.parent_of(ChannelId::new(5)), Some(ChannelId::new(2)));
        assert_eq!(dir.parent_of(ChannelId::new(2)), None);
        assert!(dir.forget(ChannelId::new(5)));
        assert!(dir.is_empty());
    }

    #[test]
    fn test_text_channels_ignored() {
        let dir = ChannelDirectory::new();
        let text = ChannelPayload {
            kind: 0,
            ..thread(3, 2)
        };
        dir.observe(GUILD, &text);
        assert!(dir.is_empty());
    }

    #[test]
    fn test_sync_replaces_guild_threads() {
        let dir = ChannelDirectory::new();
        dir.observe(GUILD, &thread(5, 2));
        dir.observe(GuildId::new(200), &thread(9, 8));
        dir.sync_guild(GUILD, &[thread(6, 2)]);
        assert_eq!(dir.parent_of(ChannelId::new(5)), None);
        assert_eq!(dir.parent_of(ChannelId::new(6)), Some(ChannelId::new(2)));
        assert_eq!(dir.parent_of(ChannelId::new(9)), Some(ChannelId::new(8)));
    }
}
