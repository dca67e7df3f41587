use std::sync::Arc;

use crate::cabinet::Cabinet;
use crate::models::{Emoji, Guild, GuildId};

/// A guild together with the emojis available from it.
#[derive(Debug, Clone)]
pub struct GuildEmojis {
    pub guild: Guild,
    pub emojis: Vec<Emoji>,
}

/// Emoji availability. Paid accounts can use every guild's emojis anywhere;
/// everyone else only gets the current guild's static emojis.
pub struct State {
    cabinet: Arc<Cabinet>,
}

impl State {
    pub fn new(cabinet: Arc<Cabinet>) -> State {
        State { cabinet }
    }

    /// Emojis usable in the given guild, grouped per source guild. The
    /// queried guild sorts first when the account has access to the rest.
    pub fn get(&self, guild_id: GuildId) -> Vec<GuildEmojis> {
        let premium = self
            .cabinet
            .me()
            .map(|me| me.premium_kind != 0)
            .unwrap_or(false);

        if premium {
            return self.all_emojis(guild_id);
        }

        if !guild_id.is_valid() {
            return Vec::new();
        }

        let Some(guild) = self.cabinet.guild(guild_id) else {
            return Vec::new();
        };

        let emojis: Vec<Emoji> = guild
            .emojis
            .iter()
            .filter(|e| !e.animated)
            .cloned()
            .collect();
        if emojis.is_empty() {
            return Vec::new();
        }

        vec![GuildEmojis { guild, emojis }]
    }

    fn all_emojis(&self, first_guild: GuildId) -> Vec<GuildEmojis> {
        let mut groups: Vec<GuildEmojis> = self
            .cabinet
            .guilds()
            .into_iter()
            .filter(|g| !g.emojis.is_empty())
            .map(|g| GuildEmojis {
                emojis: g.emojis.clone(),
                guild: g,
            })
            .collect();

        groups.sort_by_key(|g| g.guild.id);
        if first_guild.is_valid() {
            // Stable, so everything else keeps its order.
            groups.sort_by_key(|g| g.guild.id != first_guild);
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Snowflake, User};

    fn emoji(id: u64, animated: bool) -> Emoji {
        Emoji {
            id: Snowflake(id),
            name: format!("e{id}"),
            animated,
        }
    }

    fn guild(id: u64, emojis: Vec<Emoji>) -> Guild {
        Guild {
            id: Snowflake(id),
            emojis,
            ..Guild::default()
        }
    }

    #[test]
    fn free_accounts_get_static_emojis_of_the_guild_only() {
        let cabinet = Arc::new(Cabinet::new());
        cabinet.set_me(User {
            id: Snowflake(1),
            ..User::default()
        });
        cabinet.guild_set(guild(10, vec![emoji(1, false), emoji(2, true)]));
        cabinet.guild_set(guild(11, vec![emoji(3, false)]));

        let state = State::new(cabinet);
        let groups = state.get(Snowflake(10));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].emojis.len(), 1);
        assert_eq!(groups[0].emojis[0].id, Snowflake(1));

        assert!(state.get(Snowflake::NONE).is_empty());
    }

    #[test]
    fn premium_accounts_get_everything_queried_guild_first() {
        let cabinet = Arc::new(Cabinet::new());
        cabinet.set_me(User {
            id: Snowflake(1),
            premium_kind: 2,
            ..User::default()
        });
        cabinet.guild_set(guild(10, vec![emoji(1, false)]));
        cabinet.guild_set(guild(11, vec![emoji(2, true)]));
        cabinet.guild_set(guild(12, vec![]));

        let state = State::new(cabinet);
        let groups = state.get(Snowflake(11));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].guild.id, Snowflake(11));
        assert_eq!(groups[1].guild.id, Snowflake(10));
    }
}
