use dashmap::DashMap;

use crate::fanout::Substate;
use crate::gateway::events::Event;
use crate::models::UserId;

/// The user's private notes about other users.
#[derive(Default)]
pub struct State {
    notes: DashMap<UserId, String>,
}

impl State {
    pub fn new() -> State {
        State::default()
    }

    /// The note for the given user, or an empty string if none.
    pub fn note(&self, user_id: UserId) -> String {
        self.notes.get(&user_id).map(|n| n.clone()).unwrap_or_default()
    }
}

impl Substate for State {
    fn prehandle(&self, ev: &mut Event) {
        match ev {
            Event::Ready(ready) => {
                self.notes.clear();
                for (user_id, note) in &ready.notes {
                    self.notes.insert(*user_id, note.clone());
                }
            }
            Event::UserNoteUpdate(update) => {
                self.notes.insert(update.user_id, update.note.clone());
            }
            _ => {}
        }
    }
}
