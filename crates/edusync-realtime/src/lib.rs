//! # edusync-realtime
//!
//! Two independent event streams behind one [`Multiplexer`]:
//!
//! - durable change feeds, one per table ([`ChangeFeedHub`]), consumed
//!   through the sync engine's subscriptions;
//! - ephemeral per-thread buses ([`ThreadChannels`]) used for typing
//!   indicators.
//!
//! Events come from an in-process source ([`Multiplexer::attach_changes`]) or
//! a Phoenix websocket ([`Multiplexer::attach_socket`]).

pub mod bridge;
pub mod channel;
pub mod error;
pub mod feed;
pub mod socket;
pub mod typing;

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use edusync_shared::protocol::RowChange;
use edusync_shared::ThreadId;

pub use channel::{Listener, ThreadChannel, ThreadChannels};
pub use error::RealtimeError;
pub use feed::ChangeFeedHub;
pub use socket::{SocketCommand, SocketConfig, SocketNotification, Topic, Uplink};
pub use typing::TypingNotifier;

/// Owner of both event streams and the tasks that feed them.
#[derive(Clone)]
pub struct Multiplexer {
    feed: ChangeFeedHub,
    channels: ThreadChannels,
    uplink: Uplink,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer {
    pub fn new() -> Self {
        let uplink = Uplink::default();
        Self {
            feed: ChangeFeedHub::new(uplink.clone()),
            channels: ThreadChannels::new(uplink.clone()),
            uplink,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn feed(&self) -> &ChangeFeedHub {
        &self.feed
    }

    pub fn channels(&self) -> &ThreadChannels {
        &self.channels
    }

    pub fn thread(&self, thread: &ThreadId) -> ThreadChannel {
        self.channels.channel(thread)
    }

    /// Feed row changes from an in-process backend.
    pub fn attach_changes(&self, changes: broadcast::Receiver<RowChange>) {
        let task = tokio::spawn(bridge::pump_changes(changes, self.feed.clone()));
        self.track(task);
    }

    /// Connect to a realtime server and join every topic already in use.
    pub fn attach_socket(&self, config: SocketConfig) {
        info!(url = %config.url, "attaching realtime socket");
        // The socket task ends by itself on Shutdown or when the uplink drops
        // its sender, so it is not tracked for abort.
        let (cmd_tx, notif_rx, _socket_task) = socket::spawn_socket(config);
        self.uplink.connect(cmd_tx);

        for table in self.feed.tables() {
            self.uplink.join(Topic::Table(table));
        }
        for thread in self.channels.threads() {
            self.uplink.join(Topic::Thread(thread));
        }

        let bridge_task = tokio::spawn(bridge::notification_loop(
            notif_rx,
            self.feed.clone(),
            self.channels.clone(),
        ));
        self.track(bridge_task);
    }

    pub fn is_socket_attached(&self) -> bool {
        self.uplink.is_connected()
    }

    /// Close the socket (if any) and stop every feeding task.
    pub fn shutdown(&self) {
        if let Some(tx) = self.uplink.disconnect() {
            let _ = tx.try_send(SocketCommand::Shutdown);
        }
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => {
                warn!("realtime task registry poisoned");
                return;
            }
        };
        for task in tasks {
            task.abort();
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_attach_changes_drives_feed() {
        let mux = Multiplexer::new();
        let mut rx = mux.feed().subscribe("chats");
        let (tx, source) = broadcast::channel(8);
        mux.attach_changes(source);

        tx.send(RowChange::insert("chats", json!({"id": "m1"}))).unwrap();
        assert_eq!(rx.recv().await.unwrap().row_id(), Some("m1"));

        mux.shutdown();
        assert!(!mux.is_socket_attached());
    }
}
