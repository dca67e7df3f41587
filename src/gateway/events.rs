use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::*;

/// Close codes that mean the session is permanently dead and the user has to
/// authenticate again.
pub const FATAL_CLOSE_CODES: &[i32] = &[4004, 4010, 4011, 4012, 4013, 4014];

/// Everything the gateway can deliver, plus the synthetic events this crate
/// injects (`Connected`, `Disconnected`, `ReadUpdate`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "d")]
pub enum Event {
    /// Initial state snapshot after identifying.
    Ready(Ready),
    /// Session resumed after a reconnect.
    Resumed,
    MessageCreate(Message),
    /// Another session acknowledged reading a channel.
    MessageAck(MessageAck),
    UserGuildSettingsUpdate(GuildSettings),
    UserNoteUpdate(NoteUpdate),
    UserSettingsUpdate(UserSettingsUpdate),
    RelationshipAdd(Relationship),
    RelationshipRemove(Relationship),
    GuildCreate(GuildCreate),
    /// Operation stream for a lazy member list.
    GuildMemberListUpdate(MemberListUpdate),
    /// Reply to a request-guild-members command.
    GuildMembersChunk(MembersChunk),
    /// Full replacement of the user's own session list.
    SessionsReplace(Vec<UserSession>),
    ThreadMembersUpdate(ThreadMembersUpdate),
    ThreadMemberUpdate(ThreadMember),
    ConversationSummaryUpdate(SummaryUpdate),
    /// The transport closed. Delivered by the embedder; a terminated feed
    /// synthesizes one with no close code.
    Closed(CloseEvent),

    /// Synthetic: raised on `Ready`/`Resumed`, after every prehandler ran.
    Connected(Box<Event>),
    /// Synthetic: raised when the transport closes.
    Disconnected(CloseEvent),
    /// Synthetic: a channel's read state changed.
    ReadUpdate(ReadUpdate),
}

// ─── Payloads ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ready {
    pub user: User,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub guilds: Vec<GuildCreate>,
    #[serde(default)]
    pub private_channels: Vec<Channel>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub read_states: Vec<ReadState>,
    /// Undocumented alternate shape for read states. Either shape, or both,
    /// may appear; a malformed value is treated as absent.
    #[serde(
        default,
        rename = "read_state",
        deserialize_with = "lenient_read_state"
    )]
    pub read_state_alt: Option<ReadStateEntries>,
    #[serde(default)]
    pub user_guild_settings: Vec<GuildSettings>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub notes: HashMap<UserId, String>,
}

impl Ready {
    /// Read states from both the documented and the alternate shape, in
    /// application order (alternate entries last, so they win).
    pub fn all_read_states(&self) -> impl Iterator<Item = &ReadState> {
        self.read_states
            .iter()
            .chain(self.read_state_alt.iter().flat_map(|alt| alt.entries.iter()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadStateEntries {
    #[serde(default)]
    pub entries: Vec<ReadState>,
}

fn lenient_read_state<'de, D>(deserializer: D) -> Result<Option<ReadStateEntries>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildCreate {
    #[serde(flatten)]
    pub guild: Guild,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub threads: Vec<Channel>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub presences: Vec<Presence>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageAck {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteUpdate {
    #[serde(alias = "id")]
    pub user_id: UserId,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomStatus {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub emoji_id: EmojiId,
    #[serde(default)]
    pub emoji_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserSettingsUpdate {
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub custom_status: Option<CustomStatus>,
}

/// One connected session of the current user, as reported by the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserSession {
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub activities: Vec<Activity>,
}

// ─── Member list ───────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListGroup {
    /// `"online"`, `"offline"`, or a hoisted role ID.
    pub id: String,
    #[serde(default)]
    pub count: u32,
}

/// A member row of the list, with the presence the server saw fit to attach.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListMember {
    #[serde(flatten)]
    pub member: Member,
    #[serde(default)]
    pub presence: Option<Presence>,
}

/// One slot of the list: a group header, a member row, or nothing at all
/// when the server sent an empty placeholder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListItem {
    #[serde(default)]
    pub group: Option<ListGroup>,
    #[serde(default)]
    pub member: Option<ListMember>,
}

impl ListItem {
    pub fn is_empty(&self) -> bool {
        self.group.is_none() && self.member.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListOp {
    Sync {
        range: [usize; 2],
        #[serde(default)]
        items: Vec<ListItem>,
    },
    Invalidate {
        range: [usize; 2],
        /// Filled in locally with the slots that were dropped, so observers
        /// behind the dispatcher still see what disappeared.
        #[serde(default)]
        items: Vec<ListItem>,
    },
    Insert {
        index: usize,
        item: ListItem,
    },
    Update {
        index: usize,
        item: ListItem,
    },
    Delete {
        index: usize,
        /// Filled in locally with the removed slot.
        #[serde(default)]
        item: Option<ListItem>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberListUpdate {
    pub guild_id: GuildId,
    #[serde(rename = "id")]
    pub list_id: String,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default)]
    pub online_count: u32,
    #[serde(default)]
    pub groups: Vec<ListGroup>,
    #[serde(default)]
    pub ops: Vec<ListOp>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MembersChunk {
    pub guild_id: GuildId,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub presences: Vec<Presence>,
    #[serde(default)]
    pub chunk_index: u32,
    #[serde(default)]
    pub chunk_count: u32,
    #[serde(default)]
    pub not_found: Vec<UserId>,
}

// ─── Threads ───────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadMember {
    #[serde(default, alias = "id")]
    pub thread_id: ChannelId,
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub join_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadMembersUpdate {
    #[serde(alias = "id")]
    pub thread_id: ChannelId,
    #[serde(default)]
    pub guild_id: GuildId,
    #[serde(default)]
    pub added_members: Vec<ThreadMember>,
    #[serde(default)]
    pub removed_member_ids: Vec<UserId>,
    #[serde(default)]
    pub member_count: u32,
}

// ─── Summaries ─────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryUpdate {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: GuildId,
    #[serde(default)]
    pub summaries: Vec<ConversationSummary>,
}

// ─── Synthetic payloads ────────────────────────────────

/// The transport's close report. `code` is -1 when the connection dropped
/// without a close frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseEvent {
    pub code: i32,
    #[serde(default)]
    pub reason: String,
}

impl CloseEvent {
    pub fn no_close() -> CloseEvent {
        CloseEvent {
            code: -1,
            reason: String::new(),
        }
    }

    /// True if the peer performed a websocket close handshake rather than
    /// dropping the connection.
    pub fn is_graceful(&self) -> bool {
        self.code != -1
    }

    /// True if the session is now outdated and the user must log in again.
    pub fn is_logged_out(&self) -> bool {
        self.code != -1 && FATAL_CLOSE_CODES.contains(&self.code)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadUpdate {
    pub read_state: ReadState,
    #[serde(default)]
    pub guild_id: GuildId,
    pub unread: bool,
}
