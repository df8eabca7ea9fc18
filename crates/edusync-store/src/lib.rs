//! # edusync-store
//!
//! Durable on-device mirror of every collection, backed by SQLite.
//!
//! The whole mirror is one [`Snapshot`] persisted as a single JSON document
//! in a key/value table. [`LocalCache`] keeps the in-memory copy and the
//! persisted copy in step, and discards both when the device runs out of
//! space instead of failing the write.

pub mod cache;
pub mod database;
pub mod identities;
pub mod migrations;
pub mod snapshot;

mod error;

pub use cache::LocalCache;
pub use database::Database;
pub use error::{Result, StoreError};
pub use snapshot::{Slot, Snapshot};
