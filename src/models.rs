use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::permissions::Permissions;

// ─── Snowflake ─────────────────────────────────────────

/// Milliseconds since the Unix epoch of the service epoch (2015-01-01).
pub const EPOCH_MS: i64 = 1_420_070_400_000;

/// A 64-bit ID with an embedded creation timestamp. The zero value means
/// "invalid/none"; numeric ordering is chronological.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Snowflake(pub u64);

pub type UserId = Snowflake;
pub type GuildId = Snowflake;
pub type ChannelId = Snowflake;
pub type MessageId = Snowflake;
pub type RoleId = Snowflake;
pub type EmojiId = Snowflake;

impl Snowflake {
    pub const NONE: Snowflake = Snowflake(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Creation time embedded in the ID.
    pub fn timestamp(self) -> Option<DateTime<Utc>> {
        if !self.is_valid() {
            return None;
        }
        let ms = (self.0 >> 22) as i64 + EPOCH_MS;
        Utc.timestamp_millis_opt(ms).single()
    }

    /// An ID whose embedded timestamp is the given time. The low bits are
    /// zero, so two calls with the same time compare equal.
    pub fn from_time(time: DateTime<Utc>) -> Snowflake {
        let ms = time.timestamp_millis().saturating_sub(EPOCH_MS).max(0) as u64;
        Snowflake(ms << 22)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Snowflake)
    }
}

impl From<u64> for Snowflake {
    fn from(raw: u64) -> Self {
        Snowflake(raw)
    }
}

// IDs go over the wire as decimal strings, but some payloads carry them as
// bare integers. Accept both; always emit strings.
impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = Snowflake;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a snowflake string or integer")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Snowflake, E> {
                Ok(Snowflake(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Snowflake, E> {
                Ok(Snowflake(v.max(0) as u64))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Snowflake, E> {
                v.parse().map(Snowflake).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

// ─── Users & members ───────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
    /// Non-zero for paid accounts; gates animated/external emoji.
    #[serde(default)]
    pub premium_kind: u8,
}

impl User {
    /// Dummy user carrying only the ID, for rendering unknown authors.
    pub fn only_id(id: UserId) -> User {
        User {
            id,
            ..User::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Member {
    pub user: User,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

// ─── Guilds, roles, channels ───────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub position: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwriteKind {
    Role,
    Member,
}

impl Default for OverwriteKind {
    fn default() -> Self {
        OverwriteKind::Role
    }
}

/// A per-channel permission overwrite for a role or a member.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Overwrite {
    pub id: Snowflake,
    #[serde(default)]
    pub kind: OverwriteKind,
    #[serde(default)]
    pub allow: Permissions,
    #[serde(default)]
    pub deny: Permissions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ChannelKind {
    GuildText,
    Dm,
    GuildVoice,
    GroupDm,
    GuildCategory,
    GuildAnnouncement,
    AnnouncementThread,
    PublicThread,
    PrivateThread,
    Unknown(u8),
}

impl From<u8> for ChannelKind {
    fn from(raw: u8) -> Self {
        match raw {
            0 => ChannelKind::GuildText,
            1 => ChannelKind::Dm,
            2 => ChannelKind::GuildVoice,
            3 => ChannelKind::GroupDm,
            4 => ChannelKind::GuildCategory,
            5 => ChannelKind::GuildAnnouncement,
            10 => ChannelKind::AnnouncementThread,
            11 => ChannelKind::PublicThread,
            12 => ChannelKind::PrivateThread,
            other => ChannelKind::Unknown(other),
        }
    }
}

impl From<ChannelKind> for u8 {
    fn from(kind: ChannelKind) -> u8 {
        match kind {
            ChannelKind::GuildText => 0,
            ChannelKind::Dm => 1,
            ChannelKind::GuildVoice => 2,
            ChannelKind::GroupDm => 3,
            ChannelKind::GuildCategory => 4,
            ChannelKind::GuildAnnouncement => 5,
            ChannelKind::AnnouncementThread => 10,
            ChannelKind::PublicThread => 11,
            ChannelKind::PrivateThread => 12,
            ChannelKind::Unknown(other) => other,
        }
    }
}

impl Default for ChannelKind {
    fn default() -> Self {
        ChannelKind::GuildText
    }
}

impl ChannelKind {
    pub fn is_dm(self) -> bool {
        matches!(self, ChannelKind::Dm | ChannelKind::GroupDm)
    }

    pub fn is_thread(self) -> bool {
        matches!(
            self,
            ChannelKind::AnnouncementThread | ChannelKind::PublicThread | ChannelKind::PrivateThread
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    #[serde(default)]
    pub guild_id: GuildId,
    #[serde(default)]
    pub kind: ChannelKind,
    #[serde(default)]
    pub name: Option<String>,
    /// Parent category, or the parent channel for threads.
    #[serde(default)]
    pub parent_id: ChannelId,
    #[serde(default)]
    pub last_message_id: MessageId,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub overwrites: Vec<Overwrite>,
    /// DM and group-DM recipients.
    #[serde(default)]
    pub recipients: Vec<User>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Emoji {
    pub id: EmojiId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub animated: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Guild {
    pub id: GuildId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner_id: UserId,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub emojis: Vec<Emoji>,
    /// Server-side default notification level for members.
    #[serde(default)]
    pub default_notifications: NotificationLevel,
}

impl Guild {
    /// The implicit base role shared by every member; its ID equals the
    /// guild's own ID.
    pub fn everyone_role(&self) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == self.id)
    }
}

// ─── Messages ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: GuildId,
    #[serde(default)]
    pub author: User,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mentions: Vec<User>,
    #[serde(default)]
    pub mention_everyone: bool,
}

// ─── Presence ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Idle,
    Dnd,
    Invisible,
    Offline,
}

impl Default for Status {
    fn default() -> Self {
        Status::Offline
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ActivityKind {
    Playing,
    Streaming,
    Listening,
    Watching,
    Custom,
    Competing,
    Unknown(u8),
}

impl From<u8> for ActivityKind {
    fn from(raw: u8) -> Self {
        match raw {
            0 => ActivityKind::Playing,
            1 => ActivityKind::Streaming,
            2 => ActivityKind::Listening,
            3 => ActivityKind::Watching,
            4 => ActivityKind::Custom,
            5 => ActivityKind::Competing,
            other => ActivityKind::Unknown(other),
        }
    }
}

impl From<ActivityKind> for u8 {
    fn from(kind: ActivityKind) -> u8 {
        match kind {
            ActivityKind::Playing => 0,
            ActivityKind::Streaming => 1,
            ActivityKind::Listening => 2,
            ActivityKind::Watching => 3,
            ActivityKind::Custom => 4,
            ActivityKind::Competing => 5,
            ActivityKind::Unknown(other) => other,
        }
    }
}

impl Default for ActivityKind {
    fn default() -> Self {
        ActivityKind::Playing
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Activity {
    #[serde(default)]
    pub kind: ActivityKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub emoji: Option<Emoji>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: UserId,
    /// Guild the presence was observed in; invalid for the global fallback.
    #[serde(default)]
    pub guild_id: GuildId,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub activities: Vec<Activity>,
}

// ─── Read state ────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadState {
    #[serde(alias = "id")]
    pub channel_id: ChannelId,
    #[serde(default)]
    pub last_message_id: MessageId,
    #[serde(default)]
    pub mention_count: u32,
}

// ─── Notification settings ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum NotificationLevel {
    All,
    OnlyMentions,
    Nothing,
    Inherit,
}

impl From<u8> for NotificationLevel {
    fn from(raw: u8) -> Self {
        match raw {
            0 => NotificationLevel::All,
            1 => NotificationLevel::OnlyMentions,
            2 => NotificationLevel::Nothing,
            _ => NotificationLevel::Inherit,
        }
    }
}

impl From<NotificationLevel> for u8 {
    fn from(level: NotificationLevel) -> u8 {
        match level {
            NotificationLevel::All => 0,
            NotificationLevel::OnlyMentions => 1,
            NotificationLevel::Nothing => 2,
            NotificationLevel::Inherit => 3,
        }
    }
}

impl Default for NotificationLevel {
    fn default() -> Self {
        NotificationLevel::Inherit
    }
}

/// A timed mute. A missing end time means the mute is permanent; an end
/// time in the past means the mute no longer applies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MuteConfig {
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl MuteConfig {
    /// Whether this config cancels the mute it is attached to.
    pub fn expired(&self) -> bool {
        match self.end_time {
            Some(end) => end < Utc::now(),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelOverride {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub notifications: NotificationLevel,
    #[serde(default)]
    pub mute_config: Option<MuteConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildSettings {
    pub guild_id: GuildId,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub suppress_everyone: bool,
    /// Present in the payload but not consulted by the notification
    /// decision; role-wide suppression is unhandled upstream.
    #[serde(default)]
    pub suppress_roles: bool,
    #[serde(default)]
    pub notifications: NotificationLevel,
    #[serde(default)]
    pub mute_config: Option<MuteConfig>,
    #[serde(default)]
    pub channel_overrides: Vec<ChannelOverride>,
}

// ─── Relationships ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum RelationshipKind {
    None,
    Friend,
    Blocked,
    IncomingRequest,
    OutgoingRequest,
}

impl From<u8> for RelationshipKind {
    fn from(raw: u8) -> Self {
        match raw {
            1 => RelationshipKind::Friend,
            2 => RelationshipKind::Blocked,
            3 => RelationshipKind::IncomingRequest,
            4 => RelationshipKind::OutgoingRequest,
            _ => RelationshipKind::None,
        }
    }
}

impl From<RelationshipKind> for u8 {
    fn from(kind: RelationshipKind) -> u8 {
        match kind {
            RelationshipKind::None => 0,
            RelationshipKind::Friend => 1,
            RelationshipKind::Blocked => 2,
            RelationshipKind::IncomingRequest => 3,
            RelationshipKind::OutgoingRequest => 4,
        }
    }
}

impl Default for RelationshipKind {
    fn default() -> Self {
        RelationshipKind::None
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Relationship {
    pub user_id: UserId,
    #[serde(default)]
    pub kind: RelationshipKind,
}

// ─── Conversation summaries ────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Snowflake,
    #[serde(default)]
    pub start_id: MessageId,
    #[serde(default)]
    pub end_id: MessageId,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub people: Vec<UserId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_accepts_strings_and_integers() {
        let from_str: Snowflake = serde_json::from_str("\"361919857836425217\"").unwrap();
        let from_int: Snowflake = serde_json::from_str("361919857836425217").unwrap();
        assert_eq!(from_str, from_int);
        assert_eq!(serde_json::to_string(&from_str).unwrap(), "\"361919857836425217\"");
    }

    #[test]
    fn snowflake_timestamp_roundtrip() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap();
        let id = Snowflake::from_time(now);
        assert_eq!(id.timestamp(), Some(now));
        assert!(Snowflake::NONE.timestamp().is_none());
    }

    #[test]
    fn mute_config_expiry() {
        assert!(!MuteConfig { end_time: None }.expired());

        let past = MuteConfig {
            end_time: Some(Utc::now() - chrono::Duration::minutes(5)),
        };
        assert!(past.expired());

        let future = MuteConfig {
            end_time: Some(Utc::now() + chrono::Duration::minutes(5)),
        };
        assert!(!future.expired());
    }
}
