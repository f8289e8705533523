//! Discord permission bitfield.
//!
//! Discord transmits permissions as a decimal string because the values no
//! longer fit in a JSON-safe integer; here they are a plain `u64`.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u64 {
        const CREATE_INSTANT_INVITE = 1 << 0;
        const KICK_MEMBERS = 1 << 1;
        const BAN_MEMBERS = 1 << 2;
        const ADMINISTRATOR = 1 << 3;
        const MANAGE_CHANNELS = 1 << 4;
        const MANAGE_GUILD = 1 << 5;
        const ADD_REACTIONS = 1 << 6;
        const VIEW_AUDIT_LOG = 1 << 7;
        const PRIORITY_SPEAKER = 1 << 8;
        const STREAM = 1 << 9;
        const VIEW_CHANNEL = 1 << 10;
        const SEND_MESSAGES = 1 << 11;
        const SEND_TTS_MESSAGES = 1 << 12;
        const MANAGE_MESSAGES = 1 << 13;
        const EMBED_LINKS = 1 << 14;
        const ATTACH_FILES = 1 << 15;
        const READ_MESSAGE_HISTORY = 1 << 16;
        const MENTION_EVERYONE = 1 << 17;
        const USE_EXTERNAL_EMOJIS = 1 << 18;
        const VIEW_GUILD_INSIGHTS = 1 << 19;
        const CONNECT = 1 << 20;
        const SPEAK = 1 << 21;
        const MUTE_MEMBERS = 1 << 22;
        const DEAFEN_MEMBERS = 1 << 23;
        const MOVE_MEMBERS = 1 << 24;
        const USE_VAD = 1 << 25;
        const CHANGE_NICKNAME = 1 << 26;
        const MANAGE_NICKNAMES = 1 << 27;
        const MANAGE_ROLES = 1 << 28;
        const MANAGE_WEBHOOKS = 1 << 29;
        const MANAGE_GUILD_EXPRESSIONS = 1 << 30;
        const USE_APPLICATION_COMMANDS = 1 << 31;
        const REQUEST_TO_SPEAK = 1 << 32;
        const MANAGE_EVENTS = 1 << 33;
        const MANAGE_THREADS = 1 << 34;
        const CREATE_PUBLIC_THREADS = 1 << 35;
        const CREATE_PRIVATE_THREADS = 1 << 36;
        const USE_EXTERNAL_STICKERS = 1 << 37;
        const SEND_MESSAGES_IN_THREADS = 1 << 38;
        const USE_EMBEDDED_ACTIVITIES = 1 << 39;
        const MODERATE_MEMBERS = 1 << 40;
        const VIEW_CREATOR_MONETIZATION_ANALYTICS = 1 << 41;
        const USE_SOUNDBOARD = 1 << 42;
        const CREATE_GUILD_EXPRESSIONS = 1 << 43;
        const CREATE_EVENTS = 1 << 44;
        const USE_EXTERNAL_SOUNDS = 1 << 45;
        const SEND_VOICE_MESSAGES = 1 << 46;
        const SEND_POLLS = 1 << 49;
        const USE_EXTERNAL_APPS = 1 << 50;
    }
}

impl Permissions {
    /// Whether every bit of `required` is set. Administrators have all
    /// permissions.
    pub fn has(&self, required: Permissions) -> bool {
        self.contains(Self::ADMINISTRATOR) || self.contains(required)
    }

    /// Whether at least one bit of `required` is set (or the holder is an
    /// administrator).
    pub fn any(&self, required: Permissions) -> bool {
        self.contains(Self::ADMINISTRATOR) || self.intersects(required)
    }

    /// Names of the permissions in `required` that are not granted.
    pub fn missing(&self, required: Permissions) -> Vec<&'static str> {
        if self.contains(Self::ADMINISTRATOR) {
            return Vec::new();
        }
        required
            .difference(*self)
            .iter_names()
            .map(|(name, _)| name)
            .collect()
    }

    /// The bitfield as Discord's decimal string.
    pub fn serialize_bits(&self) -> String {
        self.bits().to_string()
    }
}

/// `MANAGE_MESSAGES` -> `Manage Messages`.
pub fn display_name(flag_name: &str) -> String {
    flag_name
        .split('_')
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.serialize_bits())
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        let bits = match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.parse::<u64>().map_err(serde::de::Error::custom)?,
            Raw::Number(n) => n,
        };
        Ok(Self::from_bits_retain(bits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn administrator_has_everything() {
        let perms = Permissions::ADMINISTRATOR;
        assert!(perms.has(Permissions::BAN_MEMBERS | Permissions::MANAGE_GUILD));
        assert!(perms.missing(Permissions::KICK_MEMBERS).is_empty());
    }

    #[test]
    fn missing_lists_absent_flags() {
        let perms = Permissions::SEND_MESSAGES;
        let missing = perms.missing(
            Permissions::SEND_MESSAGES | Permissions::MANAGE_MESSAGES | Permissions::KICK_MEMBERS,
        );
        assert_eq!(missing, vec!["KICK_MEMBERS", "MANAGE_MESSAGES"]);
    }

    #[test]
    fn any_matches_partial_overlap() {
        let perms = Permissions::SEND_MESSAGES;
        assert!(perms.any(Permissions::SEND_MESSAGES | Permissions::KICK_MEMBERS));
        assert!(!perms.any(Permissions::KICK_MEMBERS));
    }

    #[test]
    fn deserializes_string_and_number() {
        let a: Permissions = serde_json::from_str("\"8192\"").unwrap();
        let b: Permissions = serde_json::from_str("8192").unwrap();
        assert_eq!(a, Permissions::MANAGE_MESSAGES);
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"8192\"");
    }

    #[test]
    fn unknown_bits_survive_round_trip() {
        let high = 1u64 << 60;
        let perms: Permissions = serde_json::from_value(serde_json::json!(high.to_string())).unwrap();
        assert_eq!(perms.bits(), high);
    }

    #[test]
    fn display_name_title_cases() {
        assert_eq!(display_name("MANAGE_MESSAGES"), "Manage Messages");
        assert_eq!(display_name("STREAM"), "Stream");
    }
}
