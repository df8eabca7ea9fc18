use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;

use edusync_shared::protocol::RowChange;

use crate::error::RemoteError;
use crate::transport::RemoteStore;

const CHANGE_CAPACITY: usize = 256;

struct Inner {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    reachable: AtomicBool,
    changes: broadcast::Sender<RowChange>,
}

/// Embedded remote store.
///
/// Clones share the same tables. Reachability can be switched off to
/// simulate losing the network; every successful write is published as a
/// [`RowChange`].
#[derive(Clone)]
pub struct InMemoryRemote {
    inner: Arc<Inner>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(HashMap::new()),
                reachable: AtomicBool::new(true),
                changes,
            }),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::SeqCst)
    }

    /// Live row changes from this point on.
    pub fn changes(&self) -> broadcast::Receiver<RowChange> {
        self.inner.changes.subscribe()
    }

    /// Current rows of `table`, regardless of reachability.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock_tables()
            .map(|tables| tables.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Load rows without publishing changes.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        if let Ok(mut tables) = self.lock_tables() {
            tables.insert(table.to_string(), rows);
        }
    }

    fn lock_tables(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<Value>>>, RemoteError> {
        self.inner.tables.lock().map_err(|_| RemoteError::Unreachable)
    }

    fn check_reachable(&self) -> Result<(), RemoteError> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(RemoteError::Unreachable)
        }
    }

    fn publish(&self, change: RowChange) {
        // No receivers is fine.
        let _ = self.inner.changes.send(change);
    }
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

impl RemoteStore for InMemoryRemote {
    async fn select_all(&self, table: &str) -> Result<Vec<Value>, RemoteError> {
        self.check_reachable()?;
        Ok(self.rows(table))
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), RemoteError> {
        self.check_reachable()?;
        let id = row_id(&row)
            .ok_or_else(|| RemoteError::Status {
                status: 400,
                body: "row has no id".into(),
            })?
            .to_string();

        {
            let mut tables = self.lock_tables()?;
            let rows = tables.entry(table.to_string()).or_default();
            if rows.iter().any(|r| row_id(r) == Some(id.as_str())) {
                return Err(RemoteError::Status {
                    status: 409,
                    body: format!("duplicate key value violates unique constraint (id={id})"),
                });
            }
            rows.push(row.clone());
        }

        debug!(table, id, "row inserted");
        self.publish(RowChange::insert(table, row));
        Ok(())
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<(), RemoteError> {
        self.check_reachable()?;
        let Value::Object(fields) = patch else {
            return Err(RemoteError::Status {
                status: 400,
                body: "patch must be an object".into(),
            });
        };

        let change = {
            let mut tables = self.lock_tables()?;
            let Some(row) = tables
                .get_mut(table)
                .and_then(|rows| rows.iter_mut().find(|r| row_id(r) == Some(id)))
            else {
                return Ok(());
            };
            let old = row.clone();
            if let Value::Object(existing) = row {
                merge(existing, fields);
            }
            RowChange::update(table, row.clone(), Some(old))
        };

        debug!(table, id, "row updated");
        self.publish(change);
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError> {
        self.check_reachable()?;
        let removed = {
            let mut tables = self.lock_tables()?;
            tables.get_mut(table).and_then(|rows| {
                let pos = rows.iter().position(|r| row_id(r) == Some(id))?;
                Some(rows.remove(pos))
            })
        };

        if let Some(old) = removed {
            debug!(table, id, "row deleted");
            self.publish(RowChange::delete(table, old));
        }
        Ok(())
    }
}

fn merge(target: &mut Map<String, Value>, fields: Map<String, Value>) {
    for (k, v) in fields {
        target.insert(k, v);
    }
}
