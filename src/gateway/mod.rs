//! The seam between the mirror and the transport that owns the websocket.
//!
//! Wire framing, heartbeating and authentication live with the embedder; the
//! mirror consumes decoded [`Event`]s from a channel and pushes outbound
//! [`Command`]s into another. `channel()` builds the connected pair.

pub mod events;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::{Error, Result};
use crate::models::{Activity, ChannelId, GuildId, MessageId, Status, UserId};

pub use events::{CloseEvent, Event};

/// Outbound commands the mirror asks the transport to deliver. Acks and
/// settings patches go over the REST side; the rest are gateway frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "d", rename_all = "snake_case")]
pub enum Command {
    GuildSubscribe {
        guild_id: GuildId,
        typing: bool,
        threads: bool,
        activities: bool,
        /// Index windows per channel; empty for a plain guild subscription.
        #[serde(default)]
        channels: HashMap<ChannelId, Vec<[usize; 2]>>,
    },
    RequestGuildMembers {
        guild_ids: Vec<GuildId>,
        #[serde(default)]
        user_ids: Vec<UserId>,
        #[serde(default)]
        query: Option<String>,
        presences: bool,
        limit: u32,
    },
    UpdatePresence {
        status: Status,
        activities: Vec<Activity>,
    },
    AckMessage {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    PatchUserSettings {
        status: Status,
        #[serde(default)]
        custom_status: Option<events::CustomStatus>,
    },
}

/// The mirror's half of the transport pair.
pub struct GatewayConn {
    pub events: mpsc::Receiver<Event>,
    pub commands: mpsc::Sender<Command>,
}

/// The transport's half: feed events in, drain commands out.
pub struct GatewayDriver {
    pub events: mpsc::Sender<Event>,
    pub commands: mpsc::Receiver<Command>,
}

/// Build a connected transport pair with the given channel capacity.
pub fn channel(capacity: usize) -> (GatewayDriver, GatewayConn) {
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let (command_tx, command_rx) = mpsc::channel(capacity);
    (
        GatewayDriver {
            events: event_tx,
            commands: command_rx,
        },
        GatewayConn {
            events: event_rx,
            commands: command_tx,
        },
    )
}

/// Clonable handle for outbound sends. An offline handle fails every send
/// immediately, which lets a UI render from cached state while every
/// outbound operation short-circuits.
#[derive(Clone)]
pub struct CommandSink {
    tx: Arc<OnceLock<mpsc::Sender<Command>>>,
    offline: bool,
}

impl CommandSink {
    pub(crate) fn new() -> CommandSink {
        CommandSink {
            tx: Arc::new(OnceLock::new()),
            offline: false,
        }
    }

    /// Attach the transport sender. Fails if the sink was already bound.
    pub(crate) fn bind(&self, tx: mpsc::Sender<Command>) -> Result<()> {
        self.tx.set(tx).map_err(|_| Error::AlreadyOpen)
    }

    /// A shadow of this sink whose sends fail fast with [`Error::Offline`].
    pub(crate) fn to_offline(&self) -> CommandSink {
        CommandSink {
            tx: self.tx.clone(),
            offline: true,
        }
    }

    pub(crate) fn to_online(&self) -> CommandSink {
        CommandSink {
            tx: self.tx.clone(),
            offline: false,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub async fn send(&self, command: Command) -> Result<()> {
        if self.offline {
            return Err(Error::Offline);
        }
        let tx = self.tx.get().ok_or(Error::NotOpen)?;
        tx.send(command)
            .await
            .map_err(|_| Error::Transport("command channel closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offline_sink_fails_fast() {
        let sink = CommandSink::new();
        let (tx, mut rx) = mpsc::channel(1);
        sink.bind(tx).unwrap();

        let offline = sink.to_offline();
        assert!(matches!(
            offline
                .send(Command::UpdatePresence {
                    status: Status::Online,
                    activities: vec![],
                })
                .await,
            Err(Error::Offline)
        ));
        assert!(rx.try_recv().is_err());

        let online = offline.to_online();
        online
            .send(Command::UpdatePresence {
                status: Status::Idle,
                activities: vec![],
            })
            .await
            .unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unbound_sink_reports_not_open() {
        let sink = CommandSink::new();
        assert!(matches!(
            sink.send(Command::AckMessage {
                channel_id: crate::models::Snowflake(1),
                message_id: crate::models::Snowflake(2),
            })
            .await,
            Err(Error::NotOpen)
        ));
    }
}
