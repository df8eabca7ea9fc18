use edusync_shared::constants::SNAPSHOT_KEY;
use tracing::{debug, warn};

use crate::database::Database;
use crate::error::Result;
use crate::snapshot::Snapshot;

/// The durable local mirror.
///
/// Holds the decoded snapshot in memory and writes it back whole on every
/// change. When the database refuses a write for lack of space, or the stored
/// document cannot be decoded, both copies are discarded and the cache starts
/// over empty.
pub struct LocalCache {
    db: Database,
    snapshot: Snapshot,
}

impl LocalCache {
    /// Wrap `db` and load whatever snapshot it holds.
    pub fn open(db: Database) -> Result<Self> {
        let mut cache = Self {
            db,
            snapshot: Snapshot::default(),
        };
        cache.load()?;
        Ok(cache)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The in-memory copy, without touching the database.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Re-read the persisted snapshot. A cold device yields an empty one.
    pub fn load(&mut self) -> Result<&Snapshot> {
        self.snapshot = match self.db.get_value(SNAPSHOT_KEY)? {
            None => Snapshot::default(),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(error = %e, "persisted snapshot is unreadable, discarding it");
                    self.purge()?;
                    Snapshot::default()
                }
            },
        };
        Ok(&self.snapshot)
    }

    /// Replace the whole snapshot and persist it.
    pub fn save(&mut self, snapshot: Snapshot) -> Result<()> {
        match self.persist(&snapshot) {
            Ok(()) => {
                self.snapshot = snapshot;
                Ok(())
            }
            Err(e) if e.is_quota_exceeded() => {
                warn!(error = %e, "storage quota exhausted, discarding local cache");
                self.purge()
            }
            Err(e) => Err(e),
        }
    }

    /// Apply `mutate` to a copy of the snapshot and save it. The in-memory
    /// copy only changes if the save goes through (or the cache is purged).
    pub fn commit<T>(&mut self, mutate: impl FnOnce(&mut Snapshot) -> T) -> Result<T> {
        let mut next = self.snapshot.clone();
        let out = mutate(&mut next);
        self.save(next)?;
        Ok(out)
    }

    fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let raw = serde_json::to_string(snapshot)?;
        debug!(bytes = raw.len(), "saving snapshot");
        self.db.put_value(SNAPSHOT_KEY, &raw)
    }

    fn purge(&mut self) -> Result<()> {
        self.snapshot = Snapshot::default();
        self.db.delete_value(SNAPSHOT_KEY)?;
        Ok(())
    }
}
