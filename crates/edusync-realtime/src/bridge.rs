//! Loops that feed external event sources into the local hubs.

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use edusync_shared::protocol::RowChange;

use crate::channel::ThreadChannels;
use crate::feed::ChangeFeedHub;
use crate::socket::{thread_for_topic, SocketNotification};

/// Dispatch socket notifications until the socket task ends.
pub async fn notification_loop(
    mut notif_rx: mpsc::Receiver<SocketNotification>,
    feed: ChangeFeedHub,
    channels: ThreadChannels,
) {
    info!("realtime notification bridge started");

    while let Some(notification) = notif_rx.recv().await {
        match notification {
            SocketNotification::Connected => info!("realtime connected (bridge)"),
            SocketNotification::Disconnected { reason } => {
                warn!(reason = %reason, "realtime disconnected (bridge)");
            }
            SocketNotification::Joined { topic } => debug!(topic = %topic, "topic joined"),
            SocketNotification::RowChanged(change) => {
                debug!(table = %change.table, kind = ?change.kind, "row change received");
                feed.ingest(change);
            }
            SocketNotification::Broadcast { topic, event } => match thread_for_topic(&topic) {
                Some(thread) => channels.deliver(&thread, event),
                None => debug!(topic = %topic, "broadcast on a non-thread topic ignored"),
            },
        }
    }

    info!("realtime notification bridge stopped");
}

/// Forward an in-process change stream into the hub.
pub async fn pump_changes(mut changes: broadcast::Receiver<RowChange>, feed: ChangeFeedHub) {
    loop {
        match changes.recv().await {
            Ok(change) => feed.ingest(change),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "change source lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("change source closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::Uplink;
    use edusync_shared::protocol::ChannelEvent;
    use edusync_shared::ThreadId;
    use serde_json::json;

    #[tokio::test]
    async fn test_notifications_reach_hubs() {
        let feed = ChangeFeedHub::new(Uplink::default());
        let channels = ThreadChannels::new(Uplink::default());
        let mut students = feed.subscribe("students");
        let mut thread_rx = channels.channel(&ThreadId::between("p1", "p2")).subscribe();

        let (tx, rx) = mpsc::channel(8);
        let bridge = tokio::spawn(notification_loop(rx, feed.clone(), channels.clone()));

        tx.send(SocketNotification::Connected).await.unwrap();
        tx.send(SocketNotification::RowChanged(RowChange::insert("students", json!({"id": "s1"}))))
            .await
            .unwrap();
        tx.send(SocketNotification::Broadcast {
            topic: "realtime:p1:p2".into(),
            event: ChannelEvent {
                event: "typing".into(),
                payload: json!({"userId": "p2", "isTyping": true}),
            },
        })
        .await
        .unwrap();

        assert_eq!(students.recv().await.unwrap().row_id(), Some("s1"));
        assert_eq!(thread_rx.recv().await.unwrap().event, "typing");

        drop(tx);
        bridge.await.unwrap();
    }

    #[tokio::test]
    async fn test_pump_stops_when_source_closes() {
        let feed = ChangeFeedHub::new(Uplink::default());
        let mut notices = feed.subscribe("notices");
        let (tx, rx) = broadcast::channel(8);
        let pump = tokio::spawn(pump_changes(rx, feed));

        tx.send(RowChange::insert("notices", json!({"id": "n1"}))).unwrap();
        assert_eq!(notices.recv().await.unwrap().row_id(), Some("n1"));

        drop(tx);
        pump.await.unwrap();
    }
}
