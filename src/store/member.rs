use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::models::{GuildId, Member, UserId};

/// Per-guild member cache.
///
/// Two-level locking: the outer mutex only guards the guild map itself, each
/// guild's member map has its own read-write lock. Event handling is the
/// single writer; queries take the inner read lock.
#[derive(Default)]
pub struct MemberStore {
    guilds: Mutex<HashMap<GuildId, Arc<GuildMembers>>>,
}

#[derive(Default)]
struct GuildMembers {
    members: RwLock<HashMap<UserId, Member>>,
}

impl MemberStore {
    pub fn new() -> MemberStore {
        MemberStore::default()
    }

    pub fn reset(&self) {
        self.guilds.lock().unwrap().clear();
    }

    fn guild(&self, guild_id: GuildId, create: bool) -> Option<Arc<GuildMembers>> {
        let mut guilds = self.guilds.lock().unwrap();
        if create {
            Some(guilds.entry(guild_id).or_default().clone())
        } else {
            guilds.get(&guild_id).cloned()
        }
    }

    pub fn member(&self, guild_id: GuildId, user_id: UserId) -> Option<Member> {
        let guild = self.guild(guild_id, false)?;
        let members = guild.members.read().unwrap();
        members.get(&user_id).cloned()
    }

    pub fn members(&self, guild_id: GuildId) -> Vec<Member> {
        match self.guild(guild_id, false) {
            Some(guild) => guild.members.read().unwrap().values().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn set(&self, guild_id: GuildId, member: Member) {
        let guild = self.guild(guild_id, true).expect("create always succeeds");
        let mut members = guild.members.write().unwrap();
        members.insert(member.user.id, member);
    }

    pub fn remove(&self, guild_id: GuildId, user_id: UserId) {
        if let Some(guild) = self.guild(guild_id, false) {
            guild.members.write().unwrap().remove(&user_id);
        }
    }

    /// Iterate the guild's members under the read lock, in undefined order,
    /// until the callback returns true. The callback must not retain the
    /// reference and must not call back into store operations that take the
    /// write lock.
    pub fn each(&self, guild_id: GuildId, mut f: impl FnMut(&Member) -> bool) {
        let Some(guild) = self.guild(guild_id, false) else {
            return;
        };
        let members = guild.members.read().unwrap();
        for member in members.values() {
            if f(member) {
                break;
            }
        }
    }
}
