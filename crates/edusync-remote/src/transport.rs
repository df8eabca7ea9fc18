use std::future::Future;

use serde_json::Value;

use crate::error::RemoteError;

/// Row-level access to the remote store.
///
/// Rows cross this boundary already in wire form (snake_case keys). Tables
/// are addressed by their snake_case names.
pub trait RemoteStore: Send + Sync + 'static {
    fn select_all(&self, table: &str) -> impl Future<Output = Result<Vec<Value>, RemoteError>> + Send;

    fn insert(&self, table: &str, row: Value) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Merge `patch` into the row with `id`. Updating a missing row is not an
    /// error.
    fn update(
        &self,
        table: &str,
        id: &str,
        patch: Value,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Deleting a missing row is not an error.
    fn delete(&self, table: &str, id: &str) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
