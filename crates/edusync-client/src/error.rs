use thiserror::Error;

use edusync_remote::RemoteError;
use edusync_shared::Collection;
use edusync_store::StoreError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The local cache could not be read or written.
    #[error("Local cache error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    /// The local write persisted but the remote store did not accept it.
    #[error("sync failed: change kept locally, remote store not updated: {0}")]
    RemoteSync(#[source] RemoteError),

    #[error("Invalid patch for {collection} record {id}: {reason}")]
    InvalidPatch {
        collection: Collection,
        id: String,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Local cache lock poisoned")]
    LockPoisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_errors_convert_and_keep_their_message() {
        let store: SyncError = StoreError::NoDataDir.into();
        assert!(matches!(store, SyncError::Store(StoreError::NoDataDir)));
        assert_eq!(
            store.to_string(),
            "Local cache error: Could not determine application data directory"
        );

        let remote: SyncError = RemoteError::Unreachable.into();
        assert!(matches!(remote, SyncError::Remote(RemoteError::Unreachable)));

        let sync = SyncError::RemoteSync(RemoteError::Unreachable);
        assert!(sync.to_string().starts_with("sync failed: change kept locally"));
        assert!(std::error::Error::source(&sync).is_some());
    }
}
