//! Fixtures shared by the integration tests
//!
//! Every test binary uses a different subset.

#![allow(dead_code)]

use std::path::PathBuf;

use persona_relay::dispatch::InboundMessage;
use persona_relay::ids::{ChannelId, GuildId, MessageId, UserId};

pub const GUILD: GuildId = GuildId::new(100);
pub const CHANNEL: ChannelId = ChannelId::new(10);

/// `tests/fixtures/<name>`
pub fn fixture(name: &str) -> PathBuf {
    [env!("CARGO_MANIFEST_DIR"), "tests", "fixtures", name].iter().collect()
}

pub fn valid_config_fixture() -> PathBuf {
    fixture("valid_config.toml")
}

/// Gateway URL uses http:// instead of ws://
pub fn invalid_config_fixture() -> PathBuf {
    fixture("invalid_config.toml")
}

/// Mira, Sol and Bran across two owners, with one grant and one override
pub fn roster_fixture() -> PathBuf {
    fixture("roster.toml")
}

/// A guild message from `author` in [`CHANNEL`].
pub fn guild_message(id: u64, author: u64, content: &str) -> InboundMessage {
    InboundMessage {
        id: MessageId::new(id),
        channel: CHANNEL,
        parent: None,
        guild: Some(GUILD),
        author: UserId::new(author),
        from_bot: false,
        content: content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_files_present() {
        for path in [valid_config_fixture(), invalid_config_fixture(), roster_fixture()] {
            assert!(path.is_file(), "missing fixture {}", path.display());
        }
    }
}
