use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::cabinet::Cabinet;
use crate::fanout::{Dispatcher, Substate};
use crate::gateway::events::{Event, ReadUpdate};
use crate::gateway::{Command, CommandSink};
use crate::models::{ChannelId, GuildId, MessageId, ReadState, UserId};

/// Per-channel unread and mention tracking.
///
/// The ack path (gateway-originated) and the mark-read path (user-initiated)
/// both run under the engine's single mutex, so duplicate-ack suppression
/// observes a consistent snapshot.
pub struct State {
    cabinet: Arc<Cabinet>,
    dispatcher: Dispatcher,
    commands: CommandSink,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    self_id: UserId,
    states: HashMap<ChannelId, ReadState>,
}

impl State {
    pub(crate) fn new(cabinet: Arc<Cabinet>, dispatcher: Dispatcher, commands: CommandSink) -> State {
        State {
            cabinet,
            dispatcher,
            commands,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn self_id(&self) -> UserId {
        self.inner.lock().unwrap().self_id
    }

    /// The read state for a channel, if it has ever been acked.
    pub fn read_state(&self, channel_id: ChannelId) -> Option<ReadState> {
        let inner = self.inner.lock().unwrap();
        inner
            .states
            .get(&channel_id)
            .filter(|rs| rs.last_message_id.is_valid())
            .cloned()
    }

    /// Register an unread message, bumping the mention counter. Called from
    /// event handling, but also usable by the application to replay a
    /// message it knows about.
    pub fn mark_unread(&self, channel_id: ChannelId, message_id: MessageId, mentions: u32) {
        let update = {
            let mut inner = self.inner.lock().unwrap();
            let self_id = inner.self_id;
            let rs = inner.states.entry(channel_id).or_insert_with(|| ReadState {
                channel_id,
                ..ReadState::default()
            });

            rs.mention_count += mentions;

            // Keep the channel's last-message marker moving forward.
            if let Some(mut channel) = self.cabinet.channel(channel_id) {
                if channel.last_message_id < message_id {
                    channel.last_message_id = message_id;
                    self.cabinet.channel_set(channel);
                }
            }

            // A self-authored message observed through any path counts as
            // already read; the server pre-acks it.
            if let Some(msg) = self.cabinet.message(channel_id, message_id) {
                if msg.author.id == self_id {
                    rs.last_message_id = message_id;
                    rs.mention_count = 0;
                }
            }

            // Strict: the newest message may have been deleted, so an equal
            // ID still counts as read.
            let unread = rs.last_message_id < message_id;
            (rs.clone(), unread)
        };

        self.emit(update.0, update.1);
    }

    /// User-initiated read marker; acknowledges to the server.
    pub fn mark_read(&self, channel_id: ChannelId, message_id: MessageId) {
        self.mark_read_inner(channel_id, message_id, true);
    }

    fn mark_read_inner(&self, channel_id: ChannelId, message_id: MessageId, send_ack: bool) {
        let state = {
            let mut inner = self.inner.lock().unwrap();
            let self_id = inner.self_id;
            let rs = inner.states.entry(channel_id).or_insert_with(|| ReadState {
                channel_id,
                ..ReadState::default()
            });

            // Already marked: do not emit, do not ack again.
            if rs.last_message_id == message_id && rs.mention_count == 0 {
                return;
            }

            rs.last_message_id = message_id;
            rs.mention_count = 0;

            if send_ack {
                // Only ack messages we know and did not author; our own are
                // pre-acked server-side.
                if let Some(msg) = self.cabinet.message(channel_id, message_id) {
                    if msg.author.id != self_id {
                        self.send_ack(channel_id, message_id);
                    }
                }
            }

            rs.clone()
        };

        self.emit(state, false);
    }

    fn send_ack(&self, channel_id: ChannelId, message_id: MessageId) {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let cmd = Command::AckMessage {
                channel_id,
                message_id,
            };
            if let Err(err) = commands.send(cmd).await {
                tracing::error!(%channel_id, %message_id, error = %err, "message ack failed");
            }
        });
    }

    /// Detached emission so callers marking reads from a UI thread never
    /// wait on subscriber callbacks.
    fn emit(&self, read_state: ReadState, unread: bool) {
        let cabinet = self.cabinet.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let guild_id = cabinet
                .channel(read_state.channel_id)
                .map(|ch| ch.guild_id)
                .unwrap_or(GuildId::NONE);

            dispatcher.emit(Event::ReadUpdate(ReadUpdate {
                read_state,
                guild_id,
                unread,
            }));
        });
    }
}

impl Substate for State {
    fn prehandle(&self, ev: &mut Event) {
        match ev {
            Event::Ready(ready) => {
                let mut inner = self.inner.lock().unwrap();
                inner.self_id = ready.user.id;
                inner.states.clear();
                for rs in ready.all_read_states() {
                    inner.states.insert(rs.channel_id, rs.clone());
                }
            }

            Event::MessageAck(ack) => {
                // Another session already told the server; no echo.
                self.mark_read_inner(ack.channel_id, ack.message_id, false);
            }

            Event::MessageCreate(msg) => {
                if let Some(mut channel) = self.cabinet.channel(msg.channel_id) {
                    channel.last_message_id = msg.id;
                    self.cabinet.channel_set(channel);
                }

                let self_id = self.self_id();
                if msg.author.id == self_id {
                    self.mark_read_inner(msg.channel_id, msg.id, false);
                    return;
                }

                let mentions = msg.mentions.iter().filter(|u| u.id == self_id).count() as u32;
                self.mark_unread(msg.channel_id, msg.id, mentions);
            }

            _ => {}
        }
    }
}
