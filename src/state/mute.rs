use std::sync::Arc;

use dashmap::DashMap;

use crate::cabinet::Cabinet;
use crate::fanout::Substate;
use crate::gateway::events::Event;
use crate::models::{
    ChannelId, ChannelOverride, GuildId, GuildSettings, MuteConfig, NotificationLevel,
};

/// Queryable per-guild and per-channel mute settings. Seeded from the ready
/// payload, kept current by settings updates.
pub struct State {
    cabinet: Arc<Cabinet>,
    guilds: DashMap<GuildId, GuildSettings>,
    channels: DashMap<ChannelId, ChannelOverride>,
}

/// A mute whose config carries an end time in the past no longer applies.
fn mute_expired(config: &Option<MuteConfig>) -> bool {
    config.as_ref().map(|c| c.expired()).unwrap_or(false)
}

impl State {
    pub fn new(cabinet: Arc<Cabinet>) -> State {
        State {
            cabinet,
            guilds: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    fn insert_settings(&self, settings: &GuildSettings) {
        for ov in &settings.channel_overrides {
            self.channels.insert(ov.channel_id, ov.clone());
        }
        self.guilds.insert(settings.guild_id, settings.clone());
    }

    /// Whether the channel itself is muted.
    pub fn channel(&self, channel_id: ChannelId) -> bool {
        match self.channels.get(&channel_id) {
            Some(ov) if !mute_expired(&ov.mute_config) => ov.muted,
            _ => false,
        }
    }

    /// Whether the channel's parent category is muted.
    pub fn category(&self, channel_id: ChannelId) -> bool {
        match self.cabinet.channel(channel_id) {
            Some(ch) if ch.parent_id.is_valid() => self.channel(ch.parent_id),
            _ => false,
        }
    }

    /// Whether the ping should be silenced guild-wide. With `everyone` the
    /// check is against @everyone suppression instead of the full mute.
    pub fn guild(&self, guild_id: GuildId, everyone: bool) -> bool {
        match self.guilds.get(&guild_id) {
            Some(s) if !mute_expired(&s.mute_config) => {
                (!everyone && s.muted) || (everyone && s.suppress_everyone)
            }
            _ => false,
        }
    }

    /// The channel's notification override. When no override exists, one is
    /// synthesized inheriting the guild's notification level.
    pub fn channel_overrides(&self, channel_id: ChannelId) -> ChannelOverride {
        if let Some(ov) = self.channels.get(&channel_id) {
            return ov.clone();
        }

        let notifications = match self.cabinet.channel(channel_id) {
            Some(ch) => self.guild_settings(ch.guild_id).notifications,
            None => NotificationLevel::All,
        };

        ChannelOverride {
            channel_id,
            muted: false,
            notifications,
            mute_config: None,
        }
    }

    /// The guild's settings, falling back to the guild's own default
    /// notification level (or all messages) when the user never configured
    /// anything.
    pub fn guild_settings(&self, guild_id: GuildId) -> GuildSettings {
        if let Some(s) = self.guilds.get(&guild_id) {
            return s.clone();
        }

        let notifications = match self.cabinet.guild(guild_id) {
            Some(g) if g.default_notifications == NotificationLevel::OnlyMentions => {
                NotificationLevel::OnlyMentions
            }
            _ => NotificationLevel::All,
        };

        GuildSettings {
            guild_id,
            notifications,
            ..GuildSettings::default()
        }
    }

    /// Effective mute of the given guild settings, accounting for expiry.
    pub fn settings_muted(settings: &GuildSettings) -> bool {
        settings.muted && !mute_expired(&settings.mute_config)
    }

    /// Effective mute of the given channel override, accounting for expiry.
    pub fn override_muted(ov: &ChannelOverride) -> bool {
        ov.muted && !mute_expired(&ov.mute_config)
    }
}

impl Substate for State {
    fn prehandle(&self, ev: &mut Event) {
        match ev {
            Event::Ready(ready) => {
                self.guilds.clear();
                self.channels.clear();
                for settings in &ready.user_guild_settings {
                    self.insert_settings(settings);
                }
            }
            Event::UserGuildSettingsUpdate(settings) => {
                self.insert_settings(settings);
            }
            _ => {}
        }
    }
}
