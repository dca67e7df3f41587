use std::sync::Mutex;

use dashmap::DashMap;

use crate::fanout::Substate;
use crate::gateway::events::Event;
use crate::models::{ChannelId, UserId};

/// Which threads the current user has joined. The entity cache knows the
/// threads themselves; membership only arrives through events.
#[derive(Default)]
pub struct State {
    self_id: Mutex<UserId>,
    joined: DashMap<ChannelId, ()>,
}

impl State {
    pub fn new() -> State {
        State::default()
    }

    pub fn thread_is_joined(&self, thread_id: ChannelId) -> bool {
        self.joined.contains_key(&thread_id)
    }

    fn self_id(&self) -> UserId {
        *self.self_id.lock().unwrap()
    }
}

impl Substate for State {
    fn prehandle(&self, ev: &mut Event) {
        match ev {
            Event::Ready(ready) => {
                *self.self_id.lock().unwrap() = ready.user.id;

                self.joined.clear();
                for gc in &ready.guilds {
                    for thread in &gc.threads {
                        self.joined.insert(thread.id, ());
                    }
                }
            }

            Event::GuildCreate(gc) => {
                for thread in &gc.threads {
                    self.joined.insert(thread.id, ());
                }
            }

            Event::ThreadMembersUpdate(update) => {
                let self_id = self.self_id();
                if update.added_members.iter().any(|m| m.user_id == self_id) {
                    self.joined.insert(update.thread_id, ());
                    return;
                }
                if update.removed_member_ids.contains(&self_id) {
                    self.joined.remove(&update.thread_id);
                }
            }

            Event::ThreadMemberUpdate(member) => {
                if member.user_id == self.self_id() && member.thread_id.is_valid() {
                    self.joined.insert(member.thread_id, ());
                }
            }

            _ => {}
        }
    }
}

impl State {
    /// Seed the self ID without a full ready, for tests.
    #[cfg(test)]
    fn set_self(&self, id: UserId) {
        *self.self_id.lock().unwrap() = id;
    }
}
