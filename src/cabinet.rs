use std::sync::RwLock;

use dashmap::DashMap;

use crate::fanout::Substate;
use crate::gateway::events::{Event, GuildCreate};
use crate::models::*;
use crate::store::{MemberStore, PresenceStore};

/// Messages kept per channel, newest first.
const MAX_MESSAGES: usize = 50;

/// The entity cache: users, channels, guilds and a bounded message ring per
/// channel, plus the member and presence stores. Substates read and write it
/// through its own lock discipline; reads are cheap clones.
#[derive(Default)]
pub struct Cabinet {
    me: RwLock<Option<User>>,
    users: DashMap<UserId, User>,
    channels: DashMap<ChannelId, Channel>,
    guilds: DashMap<GuildId, Guild>,
    messages: DashMap<ChannelId, Vec<Message>>,

    pub members: MemberStore,
    pub presences: PresenceStore,
}

impl Cabinet {
    pub fn new() -> Cabinet {
        Cabinet::default()
    }

    pub fn me(&self) -> Option<User> {
        self.me.read().unwrap().clone()
    }

    pub fn set_me(&self, user: User) {
        self.users.insert(user.id, user.clone());
        *self.me.write().unwrap() = Some(user);
    }

    pub fn user(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|u| u.clone())
    }

    /// Look up a user, falling back to a dummy carrying only the ID so that
    /// rendering can proceed.
    pub fn resolve_user(&self, id: UserId) -> User {
        self.user(id).unwrap_or_else(|| User::only_id(id))
    }

    pub fn user_set(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn channel(&self, id: ChannelId) -> Option<Channel> {
        self.channels.get(&id).map(|c| c.clone())
    }

    pub fn channel_set(&self, channel: Channel) {
        self.channels.insert(channel.id, channel);
    }

    pub fn guild(&self, id: GuildId) -> Option<Guild> {
        self.guilds.get(&id).map(|g| g.clone())
    }

    pub fn guild_set(&self, guild: Guild) {
        self.guilds.insert(guild.id, guild);
    }

    pub fn guilds(&self) -> Vec<Guild> {
        self.guilds.iter().map(|g| g.clone()).collect()
    }

    /// Guild channels sorted by position, then ID.
    pub fn channels_of(&self, guild_id: GuildId) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .channels
            .iter()
            .filter(|c| c.guild_id == guild_id)
            .map(|c| c.clone())
            .collect();
        channels.sort_by_key(|c| (c.position, c.id));
        channels
    }

    pub fn private_channels(&self) -> Vec<Channel> {
        self.channels
            .iter()
            .filter(|c| c.kind.is_dm())
            .map(|c| c.clone())
            .collect()
    }

    pub fn message(&self, channel_id: ChannelId, message_id: MessageId) -> Option<Message> {
        let ring = self.messages.get(&channel_id)?;
        ring.iter().find(|m| m.id == message_id).cloned()
    }

    /// Cached messages for the channel, newest first.
    pub fn messages(&self, channel_id: ChannelId) -> Vec<Message> {
        self.messages
            .get(&channel_id)
            .map(|ring| ring.clone())
            .unwrap_or_default()
    }

    fn message_push(&self, message: Message) {
        let mut ring = self.messages.entry(message.channel_id).or_default();
        if ring.iter().any(|m| m.id == message.id) {
            return;
        }
        ring.insert(0, message);
        ring.truncate(MAX_MESSAGES);
    }

    fn reset(&self) {
        *self.me.write().unwrap() = None;
        self.users.clear();
        self.channels.clear();
        self.guilds.clear();
        self.messages.clear();
        self.members.reset();
        self.presences.reset();
    }

    fn ingest_guild(&self, gc: &GuildCreate) {
        let guild_id = gc.guild.id;
        self.guild_set(gc.guild.clone());

        for channel in gc.channels.iter().chain(gc.threads.iter()) {
            let mut channel = channel.clone();
            channel.guild_id = guild_id;
            self.channel_set(channel);
        }
        for member in &gc.members {
            self.user_set(member.user.clone());
            self.members.set(guild_id, member.clone());
        }
        for presence in &gc.presences {
            self.presences.set(guild_id, presence.clone());
        }
    }
}

impl Substate for Cabinet {
    fn prehandle(&self, ev: &mut Event) {
        match ev {
            Event::Ready(ready) => {
                self.reset();
                self.set_me(ready.user.clone());
                for user in &ready.users {
                    self.user_set(user.clone());
                }
                for channel in &ready.private_channels {
                    self.channel_set(channel.clone());
                }
                for gc in &ready.guilds {
                    self.ingest_guild(gc);
                }
            }

            Event::GuildCreate(gc) => self.ingest_guild(gc),

            Event::MessageCreate(msg) => {
                if msg.author.id.is_valid() {
                    self.user_set(msg.author.clone());
                }
                self.message_push(msg.clone());
            }

            Event::GuildMembersChunk(chunk) => {
                for member in &chunk.members {
                    self.user_set(member.user.clone());
                    self.members.set(chunk.guild_id, member.clone());
                }
                for presence in &chunk.presences {
                    self.presences.set(chunk.guild_id, presence.clone());
                }
            }

            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: u64, channel: u64) -> Message {
        Message {
            id: Snowflake(id),
            channel_id: Snowflake(channel),
            ..Message::default()
        }
    }

    #[test]
    fn message_ring_is_bounded_and_newest_first() {
        let cab = Cabinet::new();
        for id in 1..=60 {
            cab.message_push(message(id, 1));
        }

        let ring = cab.messages(Snowflake(1));
        assert_eq!(ring.len(), MAX_MESSAGES);
        assert_eq!(ring[0].id, Snowflake(60));
        assert!(cab.message(Snowflake(1), Snowflake(5)).is_none());
        assert!(cab.message(Snowflake(1), Snowflake(60)).is_some());
    }

    #[test]
    fn resolve_user_falls_back_to_dummy() {
        let cab = Cabinet::new();
        let dummy = cab.resolve_user(Snowflake(42));
        assert_eq!(dummy.id, Snowflake(42));
        assert!(dummy.username.is_empty());
    }
}
