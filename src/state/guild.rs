use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::fanout::Substate;
use crate::gateway::events::Event;
use crate::models::GuildId;

/// Guild metadata that is only delivered on join, not queryable later.
#[derive(Default)]
pub struct State {
    joins: DashMap<GuildId, DateTime<Utc>>,
}

impl State {
    pub fn new() -> State {
        State::default()
    }

    /// When the user joined the guild, if known.
    pub fn joined_at(&self, guild_id: GuildId) -> Option<DateTime<Utc>> {
        self.joins.get(&guild_id).map(|t| *t)
    }
}

impl Substate for State {
    fn prehandle(&self, ev: &mut Event) {
        match ev {
            Event::Ready(ready) => {
                self.joins.clear();
                for gc in &ready.guilds {
                    if let Some(joined) = gc.joined_at {
                        self.joins.insert(gc.guild.id, joined);
                    }
                }
            }
            Event::GuildCreate(gc) => {
                if let Some(joined) = gc.joined_at {
                    self.joins.insert(gc.guild.id, joined);
                }
            }
            _ => {}
        }
    }
}
