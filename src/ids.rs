//! Snowflake identifier newtypes
//!
//! Discord sends ids as decimal strings. Each id kind gets its own type so a
//! channel id can never be passed where a message id is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                s.trim().parse::<u64>().map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                deserializer.deserialize_any(SnowflakeVisitor).map(Self)
            }
        }
    };
}

struct SnowflakeVisitor;

impl<'de> serde::de::Visitor<'de> for SnowflakeVisitor {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a snowflake id as a string or integer")
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<u64, E> {
        Ok(v)
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> std::result::Result<u64, E> {
        u64::try_from(v).map_err(|_| E::custom(format!("negative snowflake: {}", v)))
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<u64, E> {
        v.trim()
            .parse::<u64>()
            .map_err(|_| E::custom(format!("invalid snowflake: {:?}", v)))
    }
}

snowflake_id!(
    /// A platform user (an operator or a viewer)
    UserId
);
snowflake_id!(
    /// A guild, the scope personas and auto-proxy state live in
    GuildId
);
snowflake_id!(
    /// A text channel or thread
    ChannelId
);
snowflake_id!(
    /// A single chat message
    MessageId
);
snowflake_id!(
    /// A persona record in the store
    PersonaId
);
snowflake_id!(
    /// A delivery endpoint (channel webhook)
    EndpointId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_from_string_and_number() {
        let from_str: ChannelId = serde_json::from_str("\"123456789012345678\"").unwrap();
        let from_num: ChannelId = serde_json::from_str("123456789012345678").unwrap();
        assert_eq!(from_str, from_num);
        assert_eq!(from_str.get(), 123456789012345678);
    }

    #[test]
    fn test_serialize_as_string() {
        let json = serde_json::to_string(&MessageId::new(42)).unwrap();
        assert_eq!(json, "\"42\"");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(serde_json::from_str::<UserId>("\"abc\"").is_err());
        assert!(serde_json::from_str::<UserId>("-4").is_err());
    }

    #[test]
    fn test_parse_and_display() {
        let id: GuildId = " 77 ".parse().unwrap();
        assert_eq!(id.to_string(), "77");
    }
}
