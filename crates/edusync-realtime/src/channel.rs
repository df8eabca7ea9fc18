use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use edusync_shared::protocol::ChannelEvent;
use edusync_shared::ThreadId;

use crate::socket::{SocketCommand, Topic, Uplink};

const CHANNEL_CAPACITY: usize = 64;

type Registry = Arc<Mutex<HashMap<ThreadId, broadcast::Sender<ChannelEvent>>>>;

/// Drop `thread` from the registry once nothing can use its bus any more:
/// no receivers and no senders besides the registry's own and the `held`
/// ones the caller is about to release. The socket topic stays joined.
fn release(registry: &Registry, thread: &ThreadId, held: usize) {
    let Ok(mut channels) = registry.lock() else {
        return;
    };
    let idle = channels
        .get(thread)
        .is_some_and(|tx| tx.receiver_count() == 0 && tx.strong_count() <= 1 + held);
    if idle {
        channels.remove(thread);
        debug!(thread = %thread, "thread channel released");
    }
}

/// Registry of ephemeral per-thread channels. An entry lives while any
/// [`ThreadChannel`] handle or listener for it does.
#[derive(Clone)]
pub struct ThreadChannels {
    channels: Registry,
    uplink: Uplink,
}

impl ThreadChannels {
    pub fn new(uplink: Uplink) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            uplink,
        }
    }

    /// The channel for `thread`, opened on first use.
    pub fn channel(&self, thread: &ThreadId) -> ThreadChannel {
        let (tx, opened) = match self.channels.lock() {
            Ok(mut channels) => match channels.get(thread) {
                Some(tx) => (tx.clone(), false),
                None => {
                    let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
                    channels.insert(thread.clone(), tx.clone());
                    (tx, true)
                }
            },
            Err(_) => {
                warn!(thread = %thread, "thread channel registry poisoned");
                (broadcast::channel(CHANNEL_CAPACITY).0, false)
            }
        };

        if opened {
            debug!(thread = %thread, "thread channel opened");
            self.uplink.join(Topic::Thread(thread.clone()));
        }

        ThreadChannel {
            thread: thread.clone(),
            tx,
            uplink: self.uplink.clone(),
            registry: self.channels.clone(),
        }
    }

    /// Hand an event that arrived from outside to local listeners only.
    pub fn deliver(&self, thread: &ThreadId, event: ChannelEvent) {
        let tx = self
            .channels
            .lock()
            .ok()
            .and_then(|channels| channels.get(thread).cloned());
        if let Some(tx) = tx {
            let _ = tx.send(event);
        }
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.channels
            .lock()
            .map(|channels| channels.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// One thread's ephemeral bus. Nothing is persisted and late listeners never
/// see earlier events. Local listeners also receive this client's own
/// broadcasts.
#[derive(Clone)]
pub struct ThreadChannel {
    thread: ThreadId,
    tx: broadcast::Sender<ChannelEvent>,
    uplink: Uplink,
    registry: Registry,
}

impl ThreadChannel {
    pub fn thread(&self) -> &ThreadId {
        &self.thread
    }

    pub fn broadcast(&self, event: &str, payload: Value) {
        let event = ChannelEvent {
            event: event.to_string(),
            payload,
        };

        if self.uplink.is_connected() {
            let command = SocketCommand::Broadcast {
                topic: self.thread.to_topic(),
                event: event.clone(),
            };
            if let Err(e) = self.uplink.send(command) {
                debug!(thread = %self.thread, error = %e, "broadcast not sent upstream");
            }
        }

        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.tx.subscribe()
    }

    /// Call `handler` with the payload of every `event` from now on.
    pub fn on<F>(&self, event: &str, handler: F) -> Listener
    where
        F: Fn(Value) + Send + 'static,
    {
        let mut rx = self.subscribe();
        let event = event.to_string();
        let thread = self.thread.clone();
        let registry = self.registry.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let mut detached = false;
            loop {
                tokio::select! {
                    biased;
                    stop = &mut stop_rx, if !detached => match stop {
                        Ok(()) => break,
                        // Listener dropped without `off`.
                        Err(_) => detached = true,
                    },
                    received = rx.recv() => match received {
                        Ok(received) if received.event == event => handler(received.payload),
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(thread = %thread, skipped = n, "thread listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            drop(rx);
            drop(handler);
            release(&registry, &thread, 0);
        });

        Listener { stop: stop_tx }
    }
}

impl Drop for ThreadChannel {
    fn drop(&mut self) {
        release(&self.registry, &self.thread, 1);
    }
}

/// A running [`ThreadChannel::on`] handler. Dropping it leaves the handler
/// running; call [`Listener::off`] to stop it.
#[must_use = "dropping a Listener leaves the handler running"]
pub struct Listener {
    stop: oneshot::Sender<()>,
}

impl Listener {
    pub fn off(self) {
        let _ = self.stop.send(());
    }
}
