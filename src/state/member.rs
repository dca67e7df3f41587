use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashMap;

use crate::cabinet::Cabinet;
use crate::config::MirrorConfig;
use crate::errors::{Error, Result};
use crate::fanout::Substate;
use crate::gateway::events::{Event, ListItem, ListOp, MemberListUpdate};
use crate::gateway::{Command, CommandSink};
use crate::models::{ChannelId, GuildId, UserId};
use crate::state::member_list::{compute_list_id, List, CHUNK_SIZE};

type ErrorHook = Arc<dyn Fn(anyhow::Error) + Send + Sync>;

/// Members and member lists.
///
/// Individual members are requested over the gateway, batched behind a
/// per-guild coalescing timer so a burst of lookups produces one command.
/// Member lists mirror the server's windowed operation stream; subscription
/// windows are bounded and window 0 stays alive for every observed channel.
pub struct State {
    cabinet: Arc<Cabinet>,
    commands: CommandSink,
    config: MirrorConfig,
    guilds: DashMap<GuildId, Arc<GuildTrack>>,
    /// Current chunk per channel, to skip redundant subscriptions.
    min_fetched: DashMap<ChannelId, usize>,
    on_error: Mutex<ErrorHook>,
}

struct GuildTrack {
    id: GuildId,
    subscribed: AtomicBool,
    requests: Mutex<Requests>,
    last_search: Mutex<Option<Instant>>,
    lists: DashMap<String, Arc<List>>,
    /// Windows currently subscribed per channel of this guild.
    windows: Mutex<HashMap<ChannelId, Vec<[usize; 2]>>>,
}

#[derive(Default)]
struct Requests {
    /// Users waiting for a member fetch; true once actually sent.
    pending: HashMap<UserId, bool>,
    /// Whether a coalescing timer is already running.
    coalescing: bool,
}

impl GuildTrack {
    fn new(id: GuildId) -> GuildTrack {
        GuildTrack {
            id,
            subscribed: AtomicBool::new(false),
            requests: Mutex::new(Requests::default()),
            last_search: Mutex::new(None),
            lists: DashMap::new(),
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl State {
    pub fn new(cabinet: Arc<Cabinet>, commands: CommandSink, config: MirrorConfig) -> State {
        State {
            cabinet,
            commands,
            config,
            guilds: DashMap::new(),
            min_fetched: DashMap::new(),
            on_error: Mutex::new(Arc::new(|err| {
                tracing::error!(error = %err, "member state error");
            })),
        }
    }

    /// Replace the error callback that detached send tasks report through.
    pub fn set_on_error(&self, hook: impl Fn(anyhow::Error) + Send + Sync + 'static) {
        *self.on_error.lock().unwrap() = Arc::new(hook);
    }

    fn hook(&self) -> ErrorHook {
        self.on_error.lock().unwrap().clone()
    }

    fn track(&self, guild_id: GuildId) -> Arc<GuildTrack> {
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| Arc::new(GuildTrack::new(guild_id)))
            .clone()
    }

    /// Subscribe the guild to typing events and activities. Safe to call
    /// repeatedly; only one command goes out.
    pub fn subscribe(&self, guild_id: GuildId) {
        let track = self.track(guild_id);
        if track.subscribed.swap(true, Ordering::SeqCst) {
            return;
        }

        let commands = self.commands.clone();
        let hook = self.hook();
        tokio::spawn(async move {
            let cmd = Command::GuildSubscribe {
                guild_id: track.id,
                typing: true,
                threads: true,
                activities: true,
                channels: HashMap::new(),
            };
            if let Err(err) = commands.send(cmd).await {
                track.subscribed.store(false, Ordering::SeqCst);
                hook(anyhow::anyhow!("failed to subscribe guild: {err}"));
            }
        });
    }

    /// Ask the gateway for a single member. Calls within the coalescing
    /// window are batched into one command; members already cached or
    /// already in flight are skipped.
    pub fn request_member(&self, guild_id: GuildId, user_id: UserId) {
        if self.cabinet.members.member(guild_id, user_id).is_some() {
            return;
        }

        let track = self.track(guild_id);
        {
            let mut requests = track.requests.lock().unwrap();
            if requests.pending.contains_key(&user_id) {
                return;
            }
            requests.pending.insert(user_id, false);

            if requests.coalescing {
                return;
            }
            requests.coalescing = true;
        }

        let commands = self.commands.clone();
        let hook = self.hook();
        let presences = self.config.request_presences;
        let delay = self.config.batch_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let user_ids: Vec<UserId> = {
                let mut requests = track.requests.lock().unwrap();
                requests.coalescing = false;
                requests
                    .pending
                    .iter_mut()
                    .filter(|(_, sent)| !**sent)
                    .map(|(id, sent)| {
                        *sent = true;
                        *id
                    })
                    .collect()
            };
            if user_ids.is_empty() {
                return;
            }

            tracing::debug!(guild_id = %track.id, count = user_ids.len(), "requesting members");

            let cmd = Command::RequestGuildMembers {
                guild_ids: vec![track.id],
                user_ids: user_ids.clone(),
                query: None,
                presences,
                limit: 0,
            };
            if let Err(err) = commands.send(cmd).await {
                // Roll the markers back so a retry can request them again.
                let mut requests = track.requests.lock().unwrap();
                for id in &user_ids {
                    if let Some(sent) = requests.pending.get_mut(id) {
                        *sent = false;
                    }
                }
                hook(anyhow::anyhow!("failed to request guild members: {err}"));
            }
        });
    }

    /// Query the guild for members matching a name prefix. Rate-limited per
    /// guild; calls inside the window are dropped.
    pub fn search_member(&self, guild_id: GuildId, query: impl Into<String>) {
        let track = self.track(guild_id);
        {
            let mut last = track.last_search.lock().unwrap();
            if let Some(at) = *last {
                if at.elapsed() < self.config.search_frequency {
                    return;
                }
            }
            *last = Some(Instant::now());
        }

        let commands = self.commands.clone();
        let hook = self.hook();
        let query = query.into();
        let limit = self.config.search_limit;
        tokio::spawn(async move {
            let cmd = Command::RequestGuildMembers {
                guild_ids: vec![track.id],
                user_ids: vec![],
                query: Some(query),
                presences: true,
                limit,
            };
            if let Err(err) = commands.send(cmd).await {
                hook(anyhow::anyhow!("failed to search guild members: {err}"));
            }
        });
    }

    /// The chunk the channel is currently scrolled to, if any.
    pub fn member_list_chunk(&self, channel_id: ChannelId) -> Option<usize> {
        self.min_fetched.get(&channel_id).map(|c| *c)
    }

    /// Subscribe to the windows needed to show `chunk` of the channel's
    /// member list. Window 0 is always kept; at most `max_active_windows`
    /// trailing windows stay alive; every sibling channel of the guild is
    /// collapsed back to window 0. Returns the window set subscribed to, or
    /// nothing when the subscription is already current.
    pub fn request_member_list(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        chunk: usize,
    ) -> Vec<[usize; 2]> {
        // Cap against what the list can actually show, when known.
        let total = self
            .member_list(guild_id, channel_id)
            .ok()
            .map(|l| l.total_visible() as usize / CHUNK_SIZE);

        let prev = self.min_fetched.get(&channel_id).map(|c| *c);
        if prev == Some(chunk) {
            return Vec::new();
        }
        self.min_fetched.insert(channel_id, chunk);

        let mut end = chunk + 1;
        if let Some(total) = total {
            end = end.min(total);
        }
        if let Some(prev) = prev {
            if end < prev {
                return Vec::new();
            }
        }

        let first = end.saturating_sub(self.config.max_active_windows).max(1);
        let mut windows = Vec::with_capacity(end.saturating_sub(first) + 1);
        windows.push([0, CHUNK_SIZE - 1]);
        for i in first..end {
            windows.push([i * CHUNK_SIZE, i * CHUNK_SIZE + CHUNK_SIZE - 1]);
        }

        let track = self.track(guild_id);
        let commands = self.commands.clone();
        let hook = self.hook();
        let subscribed = windows.clone();
        tokio::spawn(async move {
            let channels = {
                let mut all = track.windows.lock().unwrap();
                if all.get(&channel_id) == Some(&subscribed) {
                    return;
                }
                // Only the active channel keeps extra windows alive.
                for windows in all.values_mut() {
                    *windows = vec![[0, CHUNK_SIZE - 1]];
                }
                all.insert(channel_id, subscribed);
                track.subscribed.store(true, Ordering::SeqCst);
                all.clone()
            };

            let cmd = Command::GuildSubscribe {
                guild_id: track.id,
                typing: true,
                threads: true,
                activities: true,
                channels,
            };
            if let Err(err) = commands.send(cmd).await {
                hook(anyhow::anyhow!("failed to subscribe to member list: {err}"));
            }
        });

        windows
    }

    /// The member list a channel observes, resolved through its overwrites.
    pub fn member_list(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Arc<List>> {
        let channel = self
            .cabinet
            .channel(channel_id)
            .ok_or(Error::NotFound("channel"))?;
        self.member_list_direct(guild_id, &compute_list_id(&channel.overwrites))
    }

    /// Look up a member list by its raw list ID.
    pub fn member_list_direct(&self, guild_id: GuildId, list_id: &str) -> Result<Arc<List>> {
        let track = self
            .guilds
            .get(&guild_id)
            .ok_or(Error::NotFound("member list"))?;
        let list = track
            .lists
            .get(list_id)
            .ok_or(Error::NotFound("member list"))?;
        Ok(list.clone())
    }

    /// Write member/presence data carried by list ops into the stores. Runs
    /// before the list itself applies the ops, so captured DELETE and
    /// INVALIDATE rewrites never reach the stores.
    fn denormalize(&self, update: &MemberListUpdate) {
        for op in &update.ops {
            match op {
                ListOp::Sync { items, .. } => {
                    for item in items {
                        self.store_item(update.guild_id, item);
                    }
                }
                ListOp::Insert { item, .. } | ListOp::Update { item, .. } => {
                    self.store_item(update.guild_id, item);
                }
                _ => {}
            }
        }
    }

    fn store_item(&self, guild_id: GuildId, item: &ListItem) {
        let Some(lm) = &item.member else { return };

        self.cabinet.user_set(lm.member.user.clone());
        self.cabinet.members.set(guild_id, lm.member.clone());

        if let Some(presence) = &lm.presence {
            let mut presence = presence.clone();
            if !presence.user_id.is_valid() {
                presence.user_id = lm.member.user.id;
            }
            self.cabinet.presences.set(guild_id, presence);
        }
    }
}

impl Substate for State {
    fn prehandle(&self, ev: &mut Event) {
        match ev {
            Event::Ready(_) => {
                self.guilds.clear();
                self.min_fetched.clear();
            }

            Event::GuildMemberListUpdate(update) => {
                self.denormalize(update);

                let track = self.track(update.guild_id);
                let list = track
                    .lists
                    .entry(update.list_id.clone())
                    .or_insert_with(|| Arc::new(List::new(update.list_id.clone(), update.guild_id)))
                    .clone();

                let hook = self.hook();
                list.apply(update, |err| hook(err));
            }

            Event::GuildMembersChunk(chunk) => {
                let track = self.track(chunk.guild_id);
                let mut requests = track.requests.lock().unwrap();
                for member in &chunk.members {
                    requests.pending.remove(&member.user.id);
                }
                for user_id in &chunk.not_found {
                    requests.pending.remove(user_id);
                }
            }

            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Snowflake;

    fn state_with_sink() -> (State, tokio::sync::mpsc::Receiver<Command>) {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let sink = CommandSink::new();
        sink.bind(tx).unwrap();

        let mut config = MirrorConfig::default();
        config.batch_delay = std::time::Duration::from_millis(50);
        config.search_frequency = std::time::Duration::from_millis(100);

        (
            State::new(Arc::new(Cabinet::new()), sink, config),
            rx,
        )
    }

    #[tokio::test]
    async fn request_member_coalesces_bursts() {
        let (state, mut rx) = state_with_sink();
        let guild = Snowflake(1);

        state.request_member(guild, Snowflake(10));
        state.request_member(guild, Snowflake(11));
        state.request_member(guild, Snowflake(10)); // duplicate, dropped

        let cmd = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("one batched request")
            .unwrap();

        match cmd {
            Command::RequestGuildMembers {
                guild_ids,
                mut user_ids,
                query,
                ..
            } => {
                assert_eq!(guild_ids, vec![guild]);
                user_ids.sort_unstable();
                assert_eq!(user_ids, vec![Snowflake(10), Snowflake(11)]);
                assert!(query.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }

        // Nothing else was sent.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn search_is_rate_limited_per_guild() {
        let (state, mut rx) = state_with_sink();
        let guild = Snowflake(1);

        state.search_member(guild, "foo");
        state.search_member(guild, "bar"); // inside the window, dropped

        let cmd = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            cmd,
            Command::RequestGuildMembers { query: Some(q), .. } if q == "foo"
        ));
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        state.search_member(guild, "baz");
        let cmd = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            cmd,
            Command::RequestGuildMembers { query: Some(q), .. } if q == "baz"
        ));
    }

    #[tokio::test]
    async fn window_sets_are_bounded_and_anchored() {
        let (state, _rx) = state_with_sink();
        let guild = Snowflake(1);
        let channel = Snowflake(10);

        let windows = state.request_member_list(guild, channel, 5);
        assert_eq!(windows[0], [0, 99]);
        assert!(windows.len() <= state.config.max_active_windows + 1);
        assert_eq!(*windows.last().unwrap(), [500, 599]);

        // Same chunk again: already subscribed, nothing to do.
        assert!(state.request_member_list(guild, channel, 5).is_empty());

        // Chunk 0 is only the initial window.
        let windows = state.request_member_list(guild, channel, 0);
        assert_eq!(windows, vec![[0, 99]]);
    }

    #[tokio::test]
    async fn switching_channels_collapses_siblings() {
        let (state, mut rx) = state_with_sink();
        let guild = Snowflake(1);

        state.request_member_list(guild, Snowflake(10), 3);
        let _ = rx.recv().await;

        state.request_member_list(guild, Snowflake(11), 2);
        let cmd = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();

        match cmd {
            Command::GuildSubscribe { channels, .. } => {
                assert_eq!(channels[&Snowflake(10)], vec![[0, 99]]);
                assert_eq!(
                    channels[&Snowflake(11)],
                    vec![[0, 99], [100, 199], [200, 299]]
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
