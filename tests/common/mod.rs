use std::collections::VecDeque;
use std::mem::discriminant;
use std::time::Duration;

use tokio::sync::broadcast;

use tidemark::gateway::events::{Event, GuildCreate, Ready, ReadUpdate};
use tidemark::gateway::{self, Command, GatewayDriver};
use tidemark::permissions;
use tidemark::{
    Channel, ChannelKind, Guild, Member, Mirror, MirrorConfig, Role, Snowflake, User,
};

pub const SELF_ID: Snowflake = Snowflake(1);
pub const GUILD_ID: Snowflake = Snowflake(100);
pub const CHANNEL_ID: Snowflake = Snowflake(10);
pub const DM_CHANNEL_ID: Snowflake = Snowflake(20);

/// A mirror wired to an in-process gateway pair, with helpers to feed
/// events and observe the redispatched stream.
pub struct TestMirror {
    pub mirror: Mirror,
    pub driver: GatewayDriver,
    pub events: broadcast::Receiver<Event>,
    /// Events drained past while waiting for something else; read-state
    /// emissions race the event echo, so they must not be lost.
    skipped: VecDeque<Event>,
}

impl TestMirror {
    /// Open a mirror with the standard fixture ready payload.
    pub async fn open() -> TestMirror {
        Self::open_with(MirrorConfig::default(), base_ready()).await
    }

    pub async fn open_with(mut config: MirrorConfig, ready: Ready) -> TestMirror {
        init_tracing();

        // Keep test runs hermetic unless a test opts into persistence.
        if config.cache_dir.is_none() {
            config.cache_dir = Some(std::env::temp_dir().join(format!(
                "tidemark-test-{}-{}",
                std::process::id(),
                rand_suffix(),
            )));
        }

        let mirror = Mirror::new(config);
        let events = mirror.subscribe();

        let (driver, conn) = gateway::channel(64);
        driver.events.send(Event::Ready(ready)).await.unwrap();
        mirror.open(conn).await.expect("open failed");

        let mut this = TestMirror {
            mirror,
            driver,
            events,
            skipped: VecDeque::new(),
        };
        // Swallow the synthetic connected event and the ready echo.
        this.wait_for(|ev| matches!(ev, Event::Ready(_))).await;
        this
    }

    /// Feed an event and wait until the prehandler chain has processed it,
    /// using the phase-2 redispatch as the completion signal.
    pub async fn dispatch(&mut self, ev: Event) {
        let kind = discriminant(&ev);
        self.driver.events.send(ev).await.unwrap();
        self.wait_for(|got| discriminant(got) == kind).await;
    }

    /// Drain the application event stream until a matching event arrives.
    /// Non-matching events are buffered for later helpers.
    pub async fn wait_for(&mut self, matches: impl Fn(&Event) -> bool) -> Event {
        if let Some(pos) = self.skipped.iter().position(&matches) {
            return self.skipped.remove(pos).unwrap();
        }
        loop {
            let ev = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event stream closed");
            if matches(&ev) {
                return ev;
            }
            self.skipped.push_back(ev);
        }
    }

    /// The next read-state emission, or None if nothing arrives in time.
    pub async fn try_read_update(&mut self) -> Option<ReadUpdate> {
        if let Some(pos) = self
            .skipped
            .iter()
            .position(|ev| matches!(ev, Event::ReadUpdate(_)))
        {
            let Some(Event::ReadUpdate(update)) = self.skipped.remove(pos) else {
                unreachable!()
            };
            return Some(update);
        }

        let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
        loop {
            let recv = tokio::time::timeout_at(deadline, self.events.recv()).await;
            match recv {
                Ok(Ok(Event::ReadUpdate(update))) => return Some(update),
                Ok(Ok(_)) => continue,
                _ => return None,
            }
        }
    }

    /// The next outbound command, if the mirror sends one in time.
    pub async fn try_command(&mut self) -> Option<Command> {
        tokio::time::timeout(Duration::from_secs(1), self.driver.commands.recv())
            .await
            .ok()
            .flatten()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn rand_suffix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .subsec_nanos() as u64
}

pub fn self_user() -> User {
    User {
        id: SELF_ID,
        username: "self".into(),
        ..User::default()
    }
}

pub fn user(id: u64) -> User {
    User {
        id: Snowflake(id),
        username: format!("user-{id}"),
        ..User::default()
    }
}

pub fn text_channel(id: Snowflake, guild_id: Snowflake) -> Channel {
    Channel {
        id,
        guild_id,
        kind: ChannelKind::GuildText,
        name: Some(format!("channel-{id}")),
        ..Channel::default()
    }
}

pub fn dm_channel(id: Snowflake, recipient: User) -> Channel {
    Channel {
        id,
        kind: ChannelKind::Dm,
        recipients: vec![recipient],
        ..Channel::default()
    }
}

/// One guild, one visible text channel, one DM, the self member seeded.
pub fn base_ready() -> Ready {
    let everyone = Role {
        id: GUILD_ID,
        name: "@everyone".into(),
        permissions: permissions::VIEW_CHANNEL
            | permissions::SEND_MESSAGES
            | permissions::READ_MESSAGE_HISTORY,
        position: 0,
    };

    Ready {
        user: self_user(),
        session_id: "session".into(),
        guilds: vec![GuildCreate {
            guild: Guild {
                id: GUILD_ID,
                name: "fixture".into(),
                owner_id: Snowflake(999),
                roles: vec![everyone],
                ..Guild::default()
            },
            channels: vec![text_channel(CHANNEL_ID, GUILD_ID)],
            members: vec![Member {
                user: self_user(),
                ..Member::default()
            }],
            ..GuildCreate::default()
        }],
        private_channels: vec![dm_channel(DM_CHANNEL_ID, user(2))],
        ..Ready::default()
    }
}

pub fn message(id: u64, channel_id: Snowflake, author: User) -> tidemark::Message {
    tidemark::Message {
        id: Snowflake(id),
        channel_id,
        author,
        content: "hello".into(),
        ..tidemark::Message::default()
    }
}
