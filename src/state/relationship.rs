use dashmap::DashMap;

use crate::fanout::Substate;
use crate::gateway::events::Event;
use crate::models::{RelationshipKind, UserId};

/// Friend/block relationships with other users.
#[derive(Default)]
pub struct State {
    relationships: DashMap<UserId, RelationshipKind>,
}

impl State {
    pub fn new() -> State {
        State::default()
    }

    /// The relationship with the given user, or `None` if there is none.
    pub fn relationship(&self, user_id: UserId) -> RelationshipKind {
        self.relationships
            .get(&user_id)
            .map(|r| *r)
            .unwrap_or(RelationshipKind::None)
    }

    pub fn is_blocked(&self, user_id: UserId) -> bool {
        self.relationship(user_id) == RelationshipKind::Blocked
    }

    /// All blocked users, sorted by ID.
    pub fn blocked_user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .relationships
            .iter()
            .filter(|r| *r.value() == RelationshipKind::Blocked)
            .map(|r| *r.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Iterate all relationships in undefined order; return true to stop.
    pub fn each(&self, mut f: impl FnMut(UserId, RelationshipKind) -> bool) {
        for entry in self.relationships.iter() {
            if f(*entry.key(), *entry.value()) {
                return;
            }
        }
    }
}

impl Substate for State {
    fn prehandle(&self, ev: &mut Event) {
        match ev {
            Event::Ready(ready) => {
                self.relationships.clear();
                for rel in &ready.relationships {
                    self.relationships.insert(rel.user_id, rel.kind);
                }
            }
            Event::RelationshipAdd(rel) => {
                self.relationships.insert(rel.user_id, rel.kind);
            }
            Event::RelationshipRemove(rel) => {
                self.relationships.remove(&rel.user_id);
            }
            _ => {}
        }
    }
}
