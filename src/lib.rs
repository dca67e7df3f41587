//! Client-side state mirror for a chat gateway.
//!
//! The mirror sits between a persistent gateway connection and a chat UI:
//! every inbound event runs through a synchronous prehandler chain that
//! keeps each substate current (unreads, mutes, member lists, presences,
//! relationships, summaries), then gets redispatched asynchronously to the
//! application. Queries answer synchronously from the mirrored state.

pub mod cabinet;
pub mod config;
pub mod errors;
mod fanout;
pub mod gateway;
pub mod models;
pub mod permissions;
pub mod state;
pub mod store;

use std::collections::HashMap;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use cabinet::Cabinet;
use fanout::{Dispatcher, Kernel, Substate};
use gateway::events::CustomStatus;
use state::{emoji, guild, member, member_list, mute, note, read, relationship, summary, thread};

pub use config::MirrorConfig;
pub use errors::{Error, Result};
pub use gateway::events::Event;
pub use gateway::{Command, CommandSink, GatewayConn, GatewayDriver};
pub use models::*;
pub use permissions::Permissions;

// ─── Query result types ────────────────────────────────

/// Outcome of the notification decision for a message. Zero means the
/// message warrants nothing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MentionFlags(u8);

impl MentionFlags {
    pub const NONE: MentionFlags = MentionFlags(0);
    /// The message mentions the user.
    pub const MENTIONS: MentionFlags = MentionFlags(1);
    /// The message should raise a visible notification.
    pub const NOTIFIES: MentionFlags = MentionFlags(1 << 1);

    pub fn has(self, other: MentionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for MentionFlags {
    type Output = MentionFlags;

    fn bitor(self, rhs: MentionFlags) -> MentionFlags {
        MentionFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for MentionFlags {
    fn bitor_assign(&mut self, rhs: MentionFlags) {
        self.0 |= rhs.0;
    }
}

/// Whether a channel should be shown as read, unread, or carrying mentions.
/// Mentioned implies unread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnreadIndication {
    Read,
    Unread,
    Mentioned,
}

// ─── The mirror ────────────────────────────────────────

/// The aggregate state mirror. Cheap to clone; clones share all state.
///
/// [`Mirror::offline`] derives a handle whose outbound operations all fail
/// fast, so a UI can render purely from cached state.
#[derive(Clone)]
pub struct Mirror {
    inner: Arc<Inner>,
    commands: CommandSink,
}

struct Inner {
    config: MirrorConfig,
    cabinet: Arc<Cabinet>,
    kernel: Kernel,

    notes: Arc<note::State>,
    reads: Arc<read::State>,
    mutes: Arc<mute::State>,
    joins: Arc<guild::State>,
    threads: Arc<thread::State>,
    members: Arc<member::State>,
    relationships: Arc<relationship::State>,
    summaries: Arc<summary::State>,
    emojis: emoji::State,
}

impl Mirror {
    pub fn new(config: MirrorConfig) -> Mirror {
        let cabinet = Arc::new(Cabinet::new());
        let dispatcher = Dispatcher::new(config.event_capacity);
        let commands = CommandSink::new();

        let notes = Arc::new(note::State::new());
        let reads = Arc::new(read::State::new(
            cabinet.clone(),
            dispatcher.clone(),
            commands.clone(),
        ));
        let mutes = Arc::new(mute::State::new(cabinet.clone()));
        let joins = Arc::new(guild::State::new());
        let threads = Arc::new(thread::State::new());
        let members = Arc::new(member::State::new(
            cabinet.clone(),
            commands.clone(),
            config.clone(),
        ));
        let relationships = Arc::new(relationship::State::new());
        let summaries = Arc::new(summary::State::new(&config));
        let emojis = emoji::State::new(cabinet.clone());

        // Registration order is delivery order: the cabinet goes first so
        // every later substate sees the entities an event refers to.
        let chain: Vec<Arc<dyn Substate>> = vec![
            cabinet.clone(),
            notes.clone(),
            reads.clone(),
            mutes.clone(),
            joins.clone(),
            threads.clone(),
            members.clone(),
            relationships.clone(),
            summaries.clone(),
        ];
        let kernel = Kernel::new(chain, dispatcher, cabinet.clone());

        Mirror {
            inner: Arc::new(Inner {
                config,
                cabinet,
                kernel,
                notes,
                reads,
                mutes,
                joins,
                threads,
                members,
                relationships,
                summaries,
                emojis,
            }),
            commands,
        }
    }

    /// Attach the gateway and block until the first ready event has been
    /// fully absorbed by every substate.
    pub async fn open(&self, conn: GatewayConn) -> Result<()> {
        self.inner.summaries.spawn_loader();
        self.inner
            .kernel
            .open(conn, &self.commands, self.inner.config.open_timeout)
            .await
    }

    /// Stop consuming events. Waits for the summary loader and outstanding
    /// persistence writes first. Shutting down the transport itself is the
    /// embedder's job.
    pub async fn close(&self) {
        self.inner.summaries.wait_loaded().await;
        self.inner.summaries.flush().await;
        self.inner.kernel.shutdown();
    }

    /// Subscribe to the asynchronous application-facing event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.kernel.subscribe()
    }

    /// A handle whose outbound operations fail fast with [`Error::Offline`].
    /// Queries keep answering from shared state.
    pub fn offline(&self) -> Mirror {
        Mirror {
            inner: self.inner.clone(),
            commands: self.commands.to_offline(),
        }
    }

    /// The online counterpart of [`Mirror::offline`].
    pub fn online(&self) -> Mirror {
        Mirror {
            inner: self.inner.clone(),
            commands: self.commands.to_online(),
        }
    }

    pub fn is_offline(&self) -> bool {
        self.commands.is_offline()
    }

    // ─── Substate access ───────────────────────────────

    pub fn cabinet(&self) -> &Cabinet {
        &self.inner.cabinet
    }

    pub fn reads(&self) -> &read::State {
        &self.inner.reads
    }

    pub fn mutes(&self) -> &mute::State {
        &self.inner.mutes
    }

    pub fn members(&self) -> &member::State {
        &self.inner.members
    }

    pub fn notes(&self) -> &note::State {
        &self.inner.notes
    }

    pub fn relationships(&self) -> &relationship::State {
        &self.inner.relationships
    }

    pub fn threads(&self) -> &thread::State {
        &self.inner.threads
    }

    pub fn summaries(&self) -> &Arc<summary::State> {
        &self.inner.summaries
    }

    pub fn emojis(&self) -> &emoji::State {
        &self.inner.emojis
    }

    /// When the user joined the guild, if known.
    pub fn joined_at(&self, guild_id: GuildId) -> Option<DateTime<Utc>> {
        self.inner.joins.joined_at(guild_id)
    }

    // ─── Async commands ────────────────────────────────

    /// Fetch a member over the gateway; bursts coalesce into one request.
    pub fn request_member(&self, guild_id: GuildId, user_id: UserId) {
        self.inner.members.request_member(guild_id, user_id);
    }

    /// Subscribe to the member-list windows needed to show `chunk`.
    pub fn request_member_list(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        chunk: usize,
    ) -> Vec<[usize; 2]> {
        self.inner
            .members
            .request_member_list(guild_id, channel_id, chunk)
    }

    /// Query the guild for members matching a name prefix.
    pub fn search_member(&self, guild_id: GuildId, query: impl Into<String>) {
        self.inner.members.search_member(guild_id, query);
    }

    /// Mark the channel read up to the message and acknowledge it.
    pub fn mark_read(&self, channel_id: ChannelId, message_id: MessageId) {
        self.inner.reads.mark_read(channel_id, message_id);
    }

    /// Register an unread message with a mention count.
    pub fn mark_unread(&self, channel_id: ChannelId, message_id: MessageId, mentions: u32) {
        self.inner.reads.mark_unread(channel_id, message_id, mentions);
    }

    /// Update the user's presence on the gateway and persist the status
    /// through the settings endpoint. Omitted fields keep their current
    /// values.
    pub async fn set_status(
        &self,
        status: Option<Status>,
        custom: Option<CustomStatus>,
        activities: Vec<Activity>,
    ) -> Result<()> {
        let me = self
            .inner
            .cabinet
            .me()
            .ok_or(Error::NotFound("current user"))?;
        let current = self.inner.cabinet.presences.global(me.id);

        let mut acts = activities;
        if let Some(custom) = &custom {
            acts.push(fanout::custom_activity(custom));
        }

        let status = status
            .or(current.as_ref().map(|p| p.status))
            .unwrap_or(Status::Online);
        if acts.is_empty() {
            if let Some(p) = &current {
                acts = p.activities.clone();
            }
        }

        self.commands
            .send(Command::UpdatePresence {
                status,
                activities: acts,
            })
            .await?;
        self.commands
            .send(Command::PatchUserSettings {
                status,
                custom_status: custom,
            })
            .await
    }

    // ─── Synchronous queries ───────────────────────────

    /// The user's own presence status.
    pub fn status(&self) -> Status {
        let Some(me) = self.inner.cabinet.me() else {
            return Status::Offline;
        };
        self.inner
            .cabinet
            .presences
            .global(me.id)
            .map(|p| p.status)
            .unwrap_or(Status::Offline)
    }

    pub fn user_is_blocked(&self, user_id: UserId) -> bool {
        self.inner.relationships.is_blocked(user_id)
    }

    /// Whether the channel, or optionally its parent category, is muted.
    pub fn channel_is_muted(&self, channel_id: ChannelId, category: bool) -> bool {
        if self.inner.mutes.channel(channel_id) {
            return true;
        }
        if !category {
            return false;
        }
        self.inner.mutes.category(channel_id)
    }

    /// Decide what a message warrants, layering guild settings, channel
    /// overrides, everyone-suppression, blocked authors and the DM default.
    pub fn message_mentions(&self, msg: &Message) -> MentionFlags {
        let Some(me) = self.inner.cabinet.me() else {
            return MentionFlags::NONE;
        };

        // Own messages never notify.
        if msg.author.id == me.id {
            return MentionFlags::NONE;
        }
        if self.user_is_blocked(msg.author.id) {
            return MentionFlags::NONE;
        }

        let mut guild_settings = None;
        if msg.guild_id.is_valid() {
            let settings = self.inner.mutes.guild_settings(msg.guild_id);

            // @everyone pings cut through a guild mute unless suppressed.
            if msg.mention_everyone && !settings.suppress_everyone {
                return MentionFlags::MENTIONS | MentionFlags::NOTIFIES;
            }

            if mute::State::settings_muted(&settings) {
                return MentionFlags::NONE;
            }

            guild_settings = Some(settings);
        }

        let mut flags = if msg.mentions.iter().any(|u| u.id == me.id) {
            MentionFlags::MENTIONS
        } else {
            MentionFlags::NONE
        };

        // Channel overrides take precedence over guild settings.
        let channel_override = self.inner.mutes.channel_overrides(msg.channel_id);
        match channel_override.notifications {
            NotificationLevel::Nothing => return MentionFlags::NONE,
            NotificationLevel::All => {
                if mute::State::override_muted(&channel_override) {
                    return flags;
                }
            }
            NotificationLevel::OnlyMentions => {
                if !flags.is_none() {
                    flags |= MentionFlags::NOTIFIES;
                }
                return flags;
            }
            NotificationLevel::Inherit => {}
        }

        if let Some(settings) = &guild_settings {
            match settings.notifications {
                NotificationLevel::Nothing => return MentionFlags::NONE,
                NotificationLevel::All => {
                    if !mute::State::settings_muted(settings) {
                        flags |= MentionFlags::NOTIFIES;
                    }
                    return flags;
                }
                NotificationLevel::OnlyMentions => {
                    if !flags.is_none() {
                        flags |= MentionFlags::NOTIFIES;
                    }
                    return flags;
                }
                NotificationLevel::Inherit => {}
            }
        }

        // Direct messages always notify.
        if let Some(channel) = self.inner.cabinet.channel(msg.channel_id) {
            if channel.kind.is_dm() {
                return flags | MentionFlags::NOTIFIES;
            }
        }

        flags
    }

    /// The newest known message ID in the channel.
    pub fn last_message(&self, channel_id: ChannelId) -> MessageId {
        let messages = self.inner.cabinet.messages(channel_id);
        if let Some(newest) = messages.first() {
            return newest.id;
        }
        self.inner
            .cabinet
            .channel(channel_id)
            .map(|c| c.last_message_id)
            .unwrap_or(MessageId::NONE)
    }

    /// Whether the channel has unread messages, and whether any mention the
    /// user. Mentions show through mutes; everything else a mute silences.
    pub fn channel_is_unread(&self, channel_id: ChannelId) -> UnreadIndication {
        let Some(state) = self.inner.reads.read_state(channel_id) else {
            return UnreadIndication::Read;
        };

        if state.mention_count > 0 {
            return UnreadIndication::Mentioned;
        }

        if self.inner.mutes.channel(channel_id) || self.inner.mutes.category(channel_id) {
            return UnreadIndication::Read;
        }

        let last = self.last_message(channel_id);
        if !last.is_valid() {
            return UnreadIndication::Read;
        }

        if !self.has_permissions(channel_id, permissions::VIEW_CHANNEL) {
            return UnreadIndication::Read;
        }

        if state.last_message_id < last {
            UnreadIndication::Unread
        } else {
            UnreadIndication::Read
        }
    }

    /// Roll channel unread states up to the guild. Muted guilds still show
    /// mention badges, but plain unreads stay hidden.
    pub fn guild_is_unread(
        &self,
        guild_id: GuildId,
        types: &[ChannelKind],
    ) -> UnreadIndication {
        let mut indication = UnreadIndication::Read;

        for channel in self.inner.cabinet.channels_of(guild_id) {
            if !types.contains(&channel.kind) {
                continue;
            }
            indication = indication.max(self.channel_is_unread(channel.id));
        }

        if self.inner.mutes.guild(guild_id, false) && indication != UnreadIndication::Mentioned {
            return UnreadIndication::Read;
        }

        indication
    }

    /// Count unread messages in the channel from the cached message ring.
    /// Without a read state the whole ring counts; without cached messages
    /// an unread channel counts as one.
    pub fn channel_count_unreads(&self, channel_id: ChannelId) -> usize {
        let messages = self.inner.cabinet.messages(channel_id);

        match self.inner.reads.read_state(channel_id) {
            None => {
                if messages.is_empty() {
                    1
                } else {
                    messages.len()
                }
            }
            Some(state) => {
                if !messages.is_empty() {
                    messages
                        .iter()
                        .take_while(|m| m.id > state.last_message_id)
                        .count()
                } else if self.channel_is_unread(channel_id) != UnreadIndication::Read {
                    1
                } else {
                    0
                }
            }
        }
    }

    /// Visible channels of a guild, filtered by type and view permission.
    /// Categories left with no children are dropped.
    pub fn channels(&self, guild_id: GuildId, allowed_types: &[ChannelKind]) -> Vec<Channel> {
        let mut filtered = Vec::new();
        for channel in self.inner.cabinet.channels_of(guild_id) {
            if !allowed_types.contains(&channel.kind) {
                continue;
            }
            // Categories are pruned by emptiness below, not by permission.
            if channel.kind != ChannelKind::GuildCategory
                && !self.has_permissions(channel.id, permissions::VIEW_CHANNEL)
            {
                continue;
            }
            filtered.push(channel);
        }

        let mut children: HashMap<ChannelId, usize> = filtered
            .iter()
            .filter(|c| c.kind == ChannelKind::GuildCategory)
            .map(|c| (c.id, 0))
            .collect();
        for channel in &filtered {
            if let Some(count) = children.get_mut(&channel.parent_id) {
                *count += 1;
            }
        }

        filtered.retain(|c| children.get(&c.id).map_or(true, |&count| count > 0));
        filtered
    }

    /// DM and group-DM channels, most recently active first. Group DMs that
    /// lost all their recipients are dropped.
    pub fn private_channels(&self) -> Vec<Channel> {
        let mut channels = self.inner.cabinet.private_channels();
        channels.retain(|c| !(c.kind == ChannelKind::GroupDm && c.recipients.is_empty()));
        channels.sort_by(|a, b| b.last_message_id.cmp(&a.last_message_id));
        channels
    }

    /// Member lists a channel observes; see [`member::State::member_list`].
    pub fn member_list(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<member_list::List>> {
        self.inner.members.member_list(guild_id, channel_id)
    }

    // ─── Permissions ───────────────────────────────────

    /// The user's effective permissions in the channel. DMs grant
    /// everything; guild channels resolve roles and overwrites.
    pub fn permissions(&self, channel_id: ChannelId, user_id: UserId) -> Result<Permissions> {
        let channel = self
            .inner
            .cabinet
            .channel(channel_id)
            .ok_or(Error::NotFound("channel"))?;

        if !channel.guild_id.is_valid() {
            return Ok(permissions::ALL);
        }

        let guild = self
            .inner
            .cabinet
            .guild(channel.guild_id)
            .ok_or(Error::NotFound("guild"))?;
        let member = self
            .inner
            .cabinet
            .members
            .member(guild.id, user_id)
            .ok_or(Error::NotFound("member"))?;

        let base = permissions::compute_base(&guild, &member);
        Ok(permissions::apply_overwrites(
            base,
            &channel.overwrites,
            &member.roles,
            user_id,
            guild.id,
        ))
    }

    pub fn has_permissions(&self, channel_id: ChannelId, wanted: Permissions) -> bool {
        self.assert_permissions(channel_id, wanted).is_ok()
    }

    /// Assert the current user holds the given permissions in the channel;
    /// the error carries what they actually have.
    pub fn assert_permissions(&self, channel_id: ChannelId, wanted: Permissions) -> Result<()> {
        let me = self
            .inner
            .cabinet
            .me()
            .ok_or(Error::NotFound("current user"))?;
        let has = self.permissions(channel_id, me.id)?;

        if !permissions::has(has, wanted) {
            return Err(Error::NoPermission { has, wanted });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mention_flags_compose() {
        let flags = MentionFlags::MENTIONS | MentionFlags::NOTIFIES;
        assert!(flags.has(MentionFlags::MENTIONS));
        assert!(flags.has(MentionFlags::NOTIFIES));
        assert!(MentionFlags::MENTIONS.has(MentionFlags::MENTIONS));
        assert!(!MentionFlags::MENTIONS.has(MentionFlags::NOTIFIES));
        assert!(MentionFlags::NONE.is_none());
    }

    #[test]
    fn unread_indication_orders() {
        assert!(UnreadIndication::Mentioned > UnreadIndication::Unread);
        assert!(UnreadIndication::Unread > UnreadIndication::Read);
    }
}
