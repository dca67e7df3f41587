use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::{GuildId, Presence, Snowflake, UserId};

/// Per-user presence cache, queryable regardless of the guild the presence
/// was observed in.
///
/// Each user maps to a list holding one entry per guild (plus possibly a
/// guild-zero global entry), newest last. A guild-scoped lookup returns the
/// matching entry when there is one, otherwise the newest entry.
#[derive(Default)]
pub struct PresenceStore {
    users: RwLock<HashMap<UserId, Vec<Presence>>>,
}

impl PresenceStore {
    pub fn new() -> PresenceStore {
        PresenceStore::default()
    }

    pub fn reset(&self) {
        self.users.write().unwrap().clear();
    }

    pub fn presence(&self, guild_id: GuildId, user_id: UserId) -> Option<Presence> {
        let users = self.users.read().unwrap();
        let list = users.get(&user_id)?;

        if guild_id.is_valid() {
            if let Some(p) = list.iter().find(|p| p.guild_id == guild_id) {
                return Some(p.clone());
            }
        }
        list.last().cloned()
    }

    /// Store a presence for the guild, replacing any previous entry for the
    /// same guild and keeping the list newest-last.
    pub fn set(&self, guild_id: GuildId, mut presence: Presence) {
        presence.guild_id = guild_id;

        let mut users = self.users.write().unwrap();
        let list = users.entry(presence.user_id).or_default();
        list.retain(|p| p.guild_id != guild_id);
        list.push(presence);
    }

    pub fn remove(&self, guild_id: GuildId, user_id: UserId) {
        let mut users = self.users.write().unwrap();
        if let Some(list) = users.get_mut(&user_id) {
            list.retain(|p| p.guild_id != guild_id);
            if list.is_empty() {
                users.remove(&user_id);
            }
        }
    }

    /// Iterate one presence per known user under the read lock. With a valid
    /// guild ID the guild-scoped entry is preferred, else the newest. The
    /// callback must not retain the reference; return true to stop.
    pub fn each(&self, guild_id: GuildId, mut f: impl FnMut(&Presence) -> bool) {
        let users = self.users.read().unwrap();
        for list in users.values() {
            let chosen = if guild_id.is_valid() {
                list.iter().find(|p| p.guild_id == guild_id).or(list.last())
            } else {
                list.last()
            };
            if let Some(p) = chosen {
                if f(p) {
                    break;
                }
            }
        }
    }

    /// Convenience for self-presence and other guild-less lookups.
    pub fn global(&self, user_id: UserId) -> Option<Presence> {
        self.presence(Snowflake::NONE, user_id)
    }
}
