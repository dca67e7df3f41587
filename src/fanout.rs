//! Event fanout: a synchronous prehandler chain feeding every substate in
//! registration order, a one-shot ready barrier gating `open`, and an
//! asynchronous application-facing dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::cabinet::Cabinet;
use crate::errors::{Error, Result};
use crate::gateway::events::{CloseEvent, Event};
use crate::gateway::{CommandSink, GatewayConn};
use crate::models::{Activity, ActivityKind, Emoji, Presence, Snowflake, Status};

/// A synchronous event consumer in the single-writer chain. Handlers must
/// self-contain failures; a misbehaving substate must not prevent later
/// substates from seeing the event.
pub(crate) trait Substate: Send + Sync {
    fn prehandle(&self, ev: &mut Event);
}

/// Application-facing event channel. Sending never blocks the prehandler
/// chain; subscribers that fall behind drop the oldest events.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    tx: broadcast::Sender<Event>,
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Dispatcher {
        let (tx, _) = broadcast::channel(capacity);
        Dispatcher { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn emit(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }
}

pub(crate) struct Kernel {
    chain: Vec<Arc<dyn Substate>>,
    dispatcher: Dispatcher,
    cabinet: Arc<Cabinet>,

    opened: AtomicBool,
    ready_tx: Mutex<Option<mpsc::Sender<()>>>,
    ready_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Kernel {
    pub fn new(
        chain: Vec<Arc<dyn Substate>>,
        dispatcher: Dispatcher,
        cabinet: Arc<Cabinet>,
    ) -> Kernel {
        // One-buffered so the pump's offer never blocks and a reconnect's
        // second ready cannot re-arm the barrier.
        let (ready_tx, ready_rx) = mpsc::channel(1);

        Kernel {
            chain,
            dispatcher,
            cabinet,
            opened: AtomicBool::new(false),
            ready_tx: Mutex::new(Some(ready_tx)),
            ready_rx: tokio::sync::Mutex::new(ready_rx),
            pump: Mutex::new(None),
        }
    }

    /// Start consuming the gateway feed and block until the first `Ready`
    /// has passed through every prehandler.
    pub async fn open(
        &self,
        conn: GatewayConn,
        sink: &CommandSink,
        timeout: Duration,
    ) -> Result<()> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyOpen);
        }

        sink.bind(conn.commands)?;

        let ready_tx = self
            .ready_tx
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::AlreadyOpen)?;

        let pump = Pump {
            chain: self.chain.clone(),
            dispatcher: self.dispatcher.clone(),
            cabinet: self.cabinet.clone(),
        };
        let handle = tokio::spawn(pump.run(conn.events, ready_tx));
        *self.pump.lock().unwrap() = Some(handle);

        let mut ready_rx = self.ready_rx.lock().await;
        match tokio::time::timeout(timeout, ready_rx.recv()).await {
            Err(_) => Err(Error::OpenTimeout),
            Ok(None) => Err(Error::Transport(
                "event feed closed before the first ready".into(),
            )),
            Ok(Some(())) => Ok(()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.dispatcher.subscribe()
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.pump.lock().unwrap().take() {
            handle.abort();
        }
    }
}

struct Pump {
    chain: Vec<Arc<dyn Substate>>,
    dispatcher: Dispatcher,
    cabinet: Arc<Cabinet>,
}

impl Pump {
    async fn run(self, mut events: mpsc::Receiver<Event>, ready_tx: mpsc::Sender<()>) {
        while let Some(mut ev) = events.recv().await {
            // Phase 1: the synchronous chain, one event at a time.
            for substate in &self.chain {
                substate.prehandle(&mut ev);
            }
            self.fold_self_presence(&ev);

            // The barrier is raised only after the whole chain has run, and
            // at most once: later readies find the buffer full.
            if matches!(ev, Event::Ready(_)) {
                let _ = ready_tx.try_send(());
            }

            // Phase 2: the application dispatcher, never blocking phase 1.
            match &ev {
                Event::Ready(_) | Event::Resumed => {
                    self.dispatcher.emit(Event::Connected(Box::new(ev.clone())));
                }
                Event::Closed(close) => {
                    self.dispatcher.emit(Event::Disconnected(close.clone()));
                }
                _ => {}
            }
            self.dispatcher.emit(ev);
        }

        tracing::debug!("gateway event feed ended");
        self.dispatcher
            .emit(Event::Disconnected(CloseEvent::no_close()));
    }

    /// Kernel-level bookkeeping of the user's own presence, which arrives
    /// outside the per-guild presence traffic.
    fn fold_self_presence(&self, ev: &Event) {
        match ev {
            Event::SessionsReplace(sessions) => {
                let Some(me) = self.cabinet.me() else { return };

                let mut status = Status::Offline;
                let mut activities = Vec::new();
                for session in sessions.iter().rev() {
                    if let Some(s) = session.status {
                        status = s;
                    }
                    activities.extend(session.activities.iter().cloned());
                }

                self.cabinet.presences.set(
                    Snowflake::NONE,
                    Presence {
                        user_id: me.id,
                        guild_id: Snowflake::NONE,
                        status,
                        activities,
                    },
                );
            }

            Event::UserSettingsUpdate(update) => {
                let Some(me) = self.cabinet.me() else { return };
                let Some(mut presence) = self.cabinet.presences.global(me.id) else {
                    return;
                };

                if let Some(status) = update.status {
                    presence.status = status;
                }

                if let Some(custom) = &update.custom_status {
                    let activity = custom_activity(custom);
                    match presence
                        .activities
                        .iter_mut()
                        .find(|a| a.kind == ActivityKind::Custom)
                    {
                        Some(existing) => *existing = activity,
                        None => presence.activities.push(activity),
                    }
                }

                let guild_id = presence.guild_id;
                self.cabinet.presences.set(guild_id, presence);
            }

            _ => {}
        }
    }
}

pub(crate) fn custom_activity(custom: &crate::gateway::events::CustomStatus) -> Activity {
    let emoji = (!custom.emoji_name.is_empty()).then(|| Emoji {
        id: custom.emoji_id,
        name: custom.emoji_name.clone(),
        animated: false,
    });

    Activity {
        kind: ActivityKind::Custom,
        name: "Custom Status".into(),
        state: Some(custom.text.clone()),
        emoji,
    }
}
