//! Local-first reads and writes over the cache and the remote store.
//!
//! Every write lands in the local cache before the remote store is tried,
//! and the cache write happens-before the call returns. Reads prefer the
//! remote store and fall back to the cache when it cannot be reached.

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use edusync_realtime::ChangeFeedHub;
use edusync_remote::adapter::{self, table_name};
use edusync_remote::{RemoteError, RemoteStore};
use edusync_shared::protocol::{ChangeKind, RowChange};
use edusync_shared::CollectionRecord;
use edusync_store::{LocalCache, Slot, StoreError};

use crate::error::SyncError;

// ---------------------------------------------------------------------------
// Write outcome
// ---------------------------------------------------------------------------

/// Result of a write that reached the local cache.
#[derive(Debug)]
#[must_use = "a LocalOnly outcome means the remote store was not updated"]
pub enum WriteOutcome {
    /// Local cache and remote store both hold the change.
    Synced,
    /// The change is kept locally; the remote store rejected it or was
    /// unreachable.
    LocalOnly(RemoteError),
}

impl WriteOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced)
    }

    /// Treat a local-only write as a failure.
    pub fn require_synced(self) -> Result<(), SyncError> {
        match self {
            Self::Synced => Ok(()),
            Self::LocalOnly(e) => Err(SyncError::RemoteSync(e)),
        }
    }
}

impl From<Result<(), RemoteError>> for WriteOutcome {
    fn from(result: Result<(), RemoteError>) -> Self {
        match result {
            Ok(()) => Self::Synced,
            Err(e) => Self::LocalOnly(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// Partial update, keyed by camelCase field names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch(Map<String, Value>);

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge into `record`, producing the updated record.
    pub fn apply<K: CollectionRecord>(&self, record: &K) -> Result<K, SyncError> {
        let invalid = |reason: String| SyncError::InvalidPatch {
            collection: K::COLLECTION,
            id: record.id().to_string(),
            reason,
        };

        if let Some(id) = self.0.get("id") {
            if id.as_str() != Some(record.id()) {
                return Err(invalid("the id field cannot be changed".into()));
            }
        }

        let mut value = serde_json::to_value(record)?;
        if let Value::Object(fields) = &mut value {
            for (k, v) in &self.0 {
                fields.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
    }

    fn to_wire(&self) -> Value {
        adapter::to_wire(Value::Object(self.0.clone()))
    }
}

// ---------------------------------------------------------------------------
// Change delivery
// ---------------------------------------------------------------------------

/// A decoded change-feed event.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<K> {
    Insert(K),
    Update(K),
    Delete(String),
}

/// Fold a change-feed event into a local list without duplicating ids.
///
/// An insert for an id already present is ignored (it is usually the echo of
/// this client's own write). An update replaces by id, or inserts if the id
/// is unknown. A delete removes. Returns whether `records` changed.
pub fn apply_change<K: CollectionRecord + PartialEq>(records: &mut Vec<K>, change: Change<K>) -> bool {
    match change {
        Change::Insert(record) => {
            if records.iter().any(|r| r.id() == record.id()) {
                return false;
            }
            records.push(record);
            true
        }
        Change::Update(record) => match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) if *existing == record => false,
            Some(existing) => {
                *existing = record;
                true
            }
            None => {
                records.push(record);
                true
            }
        },
        Change::Delete(id) => {
            let before = records.len();
            records.retain(|r| r.id() != id);
            records.len() != before
        }
    }
}

type RecordHandler<K> = Box<dyn Fn(K) + Send + Sync>;

/// Callbacks for [`SyncEngine::subscribe`].
pub struct ChangeHandlers<K> {
    on_insert: Option<RecordHandler<K>>,
    on_update: Option<RecordHandler<K>>,
    on_delete: Option<Box<dyn Fn(String) + Send + Sync>>,
}

impl<K: CollectionRecord> Default for ChangeHandlers<K> {
    fn default() -> Self {
        Self {
            on_insert: None,
            on_update: None,
            on_delete: None,
        }
    }
}

impl<K: CollectionRecord> ChangeHandlers<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route all three kinds of change into one callback.
    pub fn from_fn(handler: impl Fn(Change<K>) + Send + Sync + 'static) -> Self {
        let handler = Arc::new(handler);
        let (on_update, on_delete) = (handler.clone(), handler.clone());
        Self::new()
            .on_insert(move |r| handler(Change::Insert(r)))
            .on_update(move |r| on_update(Change::Update(r)))
            .on_delete(move |id| on_delete(Change::Delete(id)))
    }

    pub fn on_insert(mut self, handler: impl Fn(K) + Send + Sync + 'static) -> Self {
        self.on_insert = Some(Box::new(handler));
        self
    }

    pub fn on_update(mut self, handler: impl Fn(K) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Box::new(handler));
        self
    }

    pub fn on_delete(mut self, handler: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_delete = Some(Box::new(handler));
        self
    }

    fn dispatch(&self, change: RowChange) {
        match change.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let handler = match change.kind {
                    ChangeKind::Insert => &self.on_insert,
                    _ => &self.on_update,
                };
                let Some(handler) = handler else { return };
                let Some(row) = change.record else {
                    debug!(table = %change.table, "change without a record image");
                    return;
                };
                match adapter::decode::<K>(row) {
                    Ok(record) => handler(record),
                    Err(e) => warn!(table = %change.table, error = %e, "undecodable row in change feed"),
                }
            }
            ChangeKind::Delete => {
                let Some(handler) = &self.on_delete else { return };
                match change.row_id() {
                    Some(id) => handler(id.to_string()),
                    None => debug!(table = %change.table, "delete without a row id"),
                }
            }
        }
    }
}

/// A running change-feed subscription.
///
/// Dropping the handle leaves the listener running for the life of the
/// process; call [`SubscriptionHandle::unsubscribe`] to stop it.
#[must_use = "dropping a SubscriptionHandle leaves the listener running"]
pub struct SubscriptionHandle {
    table: String,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn unsubscribe(self) {
        debug!(table = %self.table, "unsubscribing");
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Generic CRUD over every collection, local first.
pub struct SyncEngine<R> {
    cache: Mutex<LocalCache>,
    remote: R,
    feed: ChangeFeedHub,
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(cache: LocalCache, remote: R, feed: ChangeFeedHub) -> Self {
        Self {
            cache: Mutex::new(cache),
            remote,
            feed,
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    // The guard never outlives this call, so it is never held across an await.
    fn with_cache<T>(
        &self,
        f: impl FnOnce(&mut LocalCache) -> Result<T, StoreError>,
    ) -> Result<T, SyncError> {
        let mut cache = self.cache.lock().map_err(|_| SyncError::LockPoisoned)?;
        Ok(f(&mut cache)?)
    }

    /// Fetch the whole collection from the remote store and mirror it
    /// locally. Falls back to the cached copy when the remote fails.
    pub async fn get_all<K: Slot>(&self) -> Result<Vec<K>, SyncError> {
        let table = table_name(K::COLLECTION);

        let rows = match self.remote.select_all(&table).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(collection = %K::COLLECTION, error = %e, "remote read failed, serving cached copy");
                return self.get_cached::<K>();
            }
        };

        let total = rows.len();
        let records: Vec<K> = rows
            .into_iter()
            .filter_map(|row| match adapter::decode::<K>(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(collection = %K::COLLECTION, error = %e, "skipping undecodable row");
                    None
                }
            })
            .collect();
        debug!(collection = %K::COLLECTION, total, kept = records.len(), "remote rows fetched");

        let mirrored = records.clone();
        if let Err(e) = self.with_cache(|cache| cache.commit(|s| s.replace_all(mirrored))) {
            warn!(collection = %K::COLLECTION, error = %e, "could not mirror remote rows locally");
        }
        Ok(records)
    }

    /// The cached collection, without touching the remote store.
    pub fn get_cached<K: Slot>(&self) -> Result<Vec<K>, SyncError> {
        self.with_cache(|cache| Ok(cache.snapshot().records::<K>().to_vec()))
    }

    pub fn find<K: Slot>(&self, id: &str) -> Result<Option<K>, SyncError> {
        self.with_cache(|cache| Ok(cache.snapshot().get::<K>(id).cloned()))
    }

    /// Store `record` locally (replacing any record with the same id), then
    /// insert it remotely.
    pub async fn create<K: Slot>(&self, record: K) -> Result<WriteOutcome, SyncError> {
        let row = adapter::encode(&record)?;
        let id = record.id().to_string();

        self.with_cache(|cache| cache.commit(|s| s.upsert(record)))?;
        debug!(collection = %K::COLLECTION, id = %id, "created locally");

        let outcome = self.remote.insert(&table_name(K::COLLECTION), row).await.into();
        log_outcome(K::COLLECTION, "create", &id, &outcome);
        Ok(outcome)
    }

    /// Merge `patch` into the cached record, then send it remotely. A record
    /// that is not cached is only patched remotely.
    pub async fn update<K: Slot>(&self, id: &str, patch: Patch) -> Result<WriteOutcome, SyncError> {
        // Lookup, merge and write happen under one lock.
        let cached = {
            let mut cache = self.cache.lock().map_err(|_| SyncError::LockPoisoned)?;
            match cache.snapshot().get::<K>(id) {
                Some(current) => {
                    let record = patch.apply(current)?;
                    cache.commit(|s| s.upsert(record))?;
                    true
                }
                None => false,
            }
        };

        if cached {
            debug!(collection = %K::COLLECTION, id, "updated locally");
        } else {
            debug!(collection = %K::COLLECTION, id, "update for an uncached record");
        }

        let outcome = self
            .remote
            .update(&table_name(K::COLLECTION), id, patch.to_wire())
            .await
            .into();
        log_outcome(K::COLLECTION, "update", id, &outcome);
        Ok(outcome)
    }

    /// Remove locally, then remotely.
    pub async fn delete<K: Slot>(&self, id: &str) -> Result<WriteOutcome, SyncError> {
        let removed = self.with_cache(|cache| cache.commit(|s| s.remove::<K>(id)))?;
        debug!(collection = %K::COLLECTION, id, existed = removed.is_some(), "deleted locally");

        let outcome = self
            .remote
            .delete(&table_name(K::COLLECTION), id)
            .await
            .into();
        log_outcome(K::COLLECTION, "delete", id, &outcome);
        Ok(outcome)
    }

    /// Listen to the change feed of `K`'s collection.
    pub fn subscribe<K: CollectionRecord>(&self, handlers: ChangeHandlers<K>) -> SubscriptionHandle {
        let table = table_name(K::COLLECTION);
        let mut rx = self.feed.subscribe(&table);
        info!(table = %table, "subscribed to change feed");

        let task_table = table.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => handlers.dispatch(change),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(table = %task_table, skipped = n, "subscriber lagged, changes dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        SubscriptionHandle { table, task }
    }
}

fn log_outcome(collection: edusync_shared::Collection, op: &str, id: &str, outcome: &WriteOutcome) {
    match outcome {
        WriteOutcome::Synced => debug!(collection = %collection, op, id, "synced"),
        WriteOutcome::LocalOnly(e) => {
            warn!(collection = %collection, op, id, error = %e, "remote write failed, kept locally")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use edusync_remote::InMemoryRemote;
    use edusync_shared::records::{ChatMessage, LeaveRequest, LeaveStatus};
    use edusync_shared::MessageKind;
    use edusync_store::Database;
    use serde_json::json;
    use tempfile::TempDir;

    fn engine() -> (SyncEngine<InMemoryRemote>, InMemoryRemote, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("engine.db"), None).unwrap();
        let remote = InMemoryRemote::new();
        let feed = ChangeFeedHub::new(Default::default());
        let engine = SyncEngine::new(LocalCache::open(db).unwrap(), remote.clone(), feed);
        (engine, remote, dir)
    }

    fn leave(id: &str) -> LeaveRequest {
        LeaveRequest {
            id: id.into(),
            requester_id: "S1".into(),
            requester_name: "Asha".into(),
            from_date: chrono::NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            to_date: chrono::NaiveDate::from_ymd_opt(2024, 6, 4).unwrap(),
            reason: "Fever".into(),
            status: LeaveStatus::Pending,
            reviewed_by: None,
        }
    }

    fn chat(id: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            sender_id: "p1".into(),
            receiver_id: "p2".into(),
            sender_name: "P1".into(),
            sender_role: "Parent".into(),
            text: "hi".into(),
            timestamp: Utc::now(),
            is_read: false,
            kind: MessageKind::Private,
        }
    }

    #[tokio::test]
    async fn test_create_synced() {
        let (engine, remote, _dir) = engine();
        let outcome = engine.create(leave("lr1")).await.unwrap();

        assert!(outcome.is_synced());
        assert_eq!(engine.get_cached::<LeaveRequest>().unwrap(), vec![leave("lr1")]);
        let rows = remote.rows("leave_requests");
        assert_eq!(rows[0]["requester_id"], "S1");
    }

    #[tokio::test]
    async fn test_create_offline_is_local_only() {
        let (engine, remote, _dir) = engine();
        remote.set_reachable(false);

        let outcome = engine.create(leave("lr1")).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::LocalOnly(RemoteError::Unreachable)));
        assert_eq!(engine.find::<LeaveRequest>("lr1").unwrap(), Some(leave("lr1")));

        let err = outcome.require_synced().unwrap_err();
        assert!(err.to_string().contains("sync failed"));
    }

    #[tokio::test]
    async fn test_create_same_id_replaces() {
        let (engine, _remote, _dir) = engine();
        let _ = engine.create(leave("lr1")).await.unwrap();
        let mut edited = leave("lr1");
        edited.reason = "Wedding".into();
        let _ = engine.create(edited.clone()).await.unwrap();

        assert_eq!(engine.get_cached::<LeaveRequest>().unwrap(), vec![edited]);
    }

    #[tokio::test]
    async fn test_update_and_delete_offline_keep_local_change() {
        let (engine, remote, _dir) = engine();
        let _ = engine.create(leave("lr1")).await.unwrap();
        remote.set_reachable(false);

        let outcome = engine
            .update::<LeaveRequest>("lr1", Patch::new().set("status", "Approved"))
            .await
            .unwrap();
        assert!(!outcome.is_synced());
        assert_eq!(
            engine.find::<LeaveRequest>("lr1").unwrap().unwrap().status,
            LeaveStatus::Approved
        );

        let outcome = engine.delete::<LeaveRequest>("lr1").await.unwrap();
        assert!(!outcome.is_synced());
        assert!(engine.find::<LeaveRequest>("lr1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_sends_wire_patch() {
        let (engine, remote, _dir) = engine();
        let _ = engine.create(chat("m1")).await.unwrap();

        let outcome = engine
            .update::<ChatMessage>("m1", Patch::new().set("isRead", true))
            .await
            .unwrap();
        assert!(outcome.is_synced());
        assert_eq!(remote.rows("chats")[0]["is_read"], true);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_patches_to_one_record_both_land() {
        let (engine, _remote, _dir) = engine();
        let engine = Arc::new(engine);

        for round in 0..50 {
            let id = format!("lr{round}");
            let _ = engine.create(leave(&id)).await.unwrap();

            let status = {
                let (engine, id) = (engine.clone(), id.clone());
                tokio::spawn(async move {
                    let _ = engine
                        .update::<LeaveRequest>(&id, Patch::new().set("status", "Approved"))
                        .await
                        .unwrap();
                })
            };
            let reviewer = {
                let (engine, id) = (engine.clone(), id.clone());
                tokio::spawn(async move {
                    let _ = engine
                        .update::<LeaveRequest>(&id, Patch::new().set("reviewedBy", "T1"))
                        .await
                        .unwrap();
                })
            };
            status.await.unwrap();
            reviewer.await.unwrap();

            let merged = engine.find::<LeaveRequest>(&id).unwrap().unwrap();
            assert_eq!(merged.status, LeaveStatus::Approved);
            assert_eq!(merged.reviewed_by.as_deref(), Some("T1"));
        }
    }

    #[tokio::test]
    async fn test_invalid_patch_is_rejected_before_writing() {
        let (engine, remote, _dir) = engine();
        let _ = engine.create(leave("lr1")).await.unwrap();

        let err = engine
            .update::<LeaveRequest>("lr1", Patch::new().set("status", "Maybe"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidPatch { .. }));

        let err = engine
            .update::<LeaveRequest>("lr1", Patch::new().set("id", "lr2"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidPatch { .. }));

        assert_eq!(engine.find::<LeaveRequest>("lr1").unwrap(), Some(leave("lr1")));
        assert_eq!(remote.rows("leave_requests")[0]["status"], "Pending");
    }

    #[tokio::test]
    async fn test_get_all_mirrors_remote_and_degrades() {
        let (engine, remote, _dir) = engine();
        remote.seed(
            "leave_requests",
            vec![
                json!({"id": "lr1", "requester_id": "S1", "from_date": "2024-06-03", "to_date": "2024-06-04", "reason": null}),
                json!({"id": "broken"}),
            ],
        );

        let fetched = engine.get_all::<LeaveRequest>().await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].reason, "");

        remote.set_reachable(false);
        let cached = engine.get_all::<LeaveRequest>().await.unwrap();
        assert_eq!(cached, fetched);
    }

    #[test]
    fn test_apply_change_dedups() {
        let mut list = vec![leave("lr1")];

        assert!(!apply_change(&mut list, Change::Insert(leave("lr1"))));
        assert_eq!(list.len(), 1);

        assert!(apply_change(&mut list, Change::Insert(leave("lr2"))));
        let mut approved = leave("lr2");
        approved.status = LeaveStatus::Approved;
        assert!(apply_change(&mut list, Change::Update(approved.clone())));
        assert!(!apply_change(&mut list, Change::Update(approved)));
        assert!(apply_change(&mut list, Change::Update(leave("lr3"))));
        assert!(apply_change(&mut list, Change::Delete("lr1".into())));
        assert!(!apply_change(&mut list, Change::Delete("lr1".into())));

        let ids: Vec<_> = list.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["lr2", "lr3"]);
    }

    #[test]
    fn test_patch_from_value() {
        assert!(Patch::from_value(json!({"isRead": true})).is_some());
        assert!(Patch::from_value(json!([1, 2])).is_none());
        assert!(Patch::new().is_empty());
    }
}
