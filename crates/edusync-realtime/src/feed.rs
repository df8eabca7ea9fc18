use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use edusync_shared::protocol::RowChange;

use crate::socket::{Topic, Uplink};

const FEED_CAPACITY: usize = 256;

/// Durable change feeds, one per table.
///
/// Delivery is at-most-once: a subscriber that falls more than the channel
/// capacity behind skips ahead, and changes for a table nobody subscribed to
/// are dropped.
#[derive(Clone)]
pub struct ChangeFeedHub {
    feeds: Arc<Mutex<HashMap<String, broadcast::Sender<RowChange>>>>,
    uplink: Uplink,
}

impl ChangeFeedHub {
    pub fn new(uplink: Uplink) -> Self {
        Self {
            feeds: Arc::new(Mutex::new(HashMap::new())),
            uplink,
        }
    }

    /// Receive every change to `table` from now on.
    pub fn subscribe(&self, table: &str) -> broadcast::Receiver<RowChange> {
        let Ok(mut feeds) = self.feeds.lock() else {
            warn!(table, "change feed registry poisoned");
            return broadcast::channel(1).1;
        };

        if let Some(tx) = feeds.get(table) {
            return tx.subscribe();
        }

        let (tx, rx) = broadcast::channel(FEED_CAPACITY);
        feeds.insert(table.to_string(), tx);
        drop(feeds);

        debug!(table, "change feed opened");
        self.uplink.join(Topic::Table(table.to_string()));
        rx
    }

    /// Deliver a change to the subscribers of its table.
    pub fn ingest(&self, change: RowChange) {
        let tx = match self.feeds.lock() {
            Ok(feeds) => feeds.get(&change.table).cloned(),
            Err(_) => None,
        };
        match tx {
            Some(tx) => {
                let _ = tx.send(change);
            }
            None => debug!(table = %change.table, "no subscribers, change dropped"),
        }
    }

    /// Tables with an open feed.
    pub fn tables(&self) -> Vec<String> {
        self.feeds
            .lock()
            .map(|feeds| feeds.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_changes_reach_only_their_table() {
        let hub = ChangeFeedHub::new(Uplink::default());
        let mut students = hub.subscribe("students");
        let mut staff = hub.subscribe("staff");

        hub.ingest(RowChange::insert("students", json!({"id": "s1"})));

        assert_eq!(students.recv().await.unwrap().row_id(), Some("s1"));
        assert!(staff.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_subscribers_miss_earlier_changes() {
        let hub = ChangeFeedHub::new(Uplink::default());
        let _early = hub.subscribe("notices");
        hub.ingest(RowChange::insert("notices", json!({"id": "n1"})));

        let mut late = hub.subscribe("notices");
        assert!(late.try_recv().is_err());
        assert_eq!(hub.tables(), vec!["notices".to_string()]);
    }

    #[test]
    fn test_unsubscribed_table_is_dropped() {
        let hub = ChangeFeedHub::new(Uplink::default());
        hub.ingest(RowChange::insert("invoices", json!({"id": "i1"})));
        assert!(hub.tables().is_empty());
    }
}
