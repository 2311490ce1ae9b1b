//! Inbound message as the dispatcher sees it.

use crate::delivery::ChannelTarget;
use crate::ids::{ChannelId, GuildId, MessageId, UserId};
use crate::sticky::StickyKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: MessageId,
    /// Channel the message was posted in, possibly a thread
    pub channel: ChannelId,
    /// Parent channel when `channel` is a thread
    pub parent: Option<ChannelId>,
    pub guild: Option<GuildId>,
    pub author: UserId,
    /// Bot accounts and webhook posts, including our own
    pub from_bot: bool,
    pub content: String,
}

impl InboundMessage {
    /// Serialization key for sticky state. `None` outside guilds.
    pub fn lane_key(&self) -> Option<StickyKey> {
        self.guild.map(|g| (self.author, g))
    }

    pub fn target(&self) -> ChannelTarget {
        ChannelTarget::for_channel(self.channel, self.parent)
    }

    /// Reasons the message is never proxied, checked before the guard.
    pub fn skip_reason(&self) -> Option<&'static str> {
        if self.from_bot {
            Some("bot author")
        } else if self.guild.is_none() {
            Some("direct message")
        } else if self.content.trim().is_empty() {
            Some("no text")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> InboundMessage {
        InboundMessage {
            id: MessageId::new(1),
            channel: ChannelId::new(5),
            parent: Some(ChannelId::new(2)),
            guild: Some(GuildId::new(100)),
            author: UserId::new(9),
            from_bot: false,
            content: "k: hi".into(),
        }
    }

    #[test]
    fn test_skip_reasons() {
        assert_eq!(message().skip_reason(), None);
        assert_eq!(InboundMessage { from_bot: true, ..message() }.skip_reason(), Some("bot author"));
        assert_eq!(InboundMessage { guild: None, ..message() }.skip_reason(), Some("direct message"));
        assert_eq!(InboundMessage { content: "  ".into(), ..message() }.skip_reason(), Some("no text"));
    }

    #[test]
    fn test_target_and_key() {
        let m = message();
        assert_eq!(m.target().channel, ChannelId::new(2));
        assert_eq!(m.target().thread, Some(ChannelId::new(5)));
        assert_eq!(m.lane_key(), Some((UserId::new(9), GuildId::new(100))));
    }
}
