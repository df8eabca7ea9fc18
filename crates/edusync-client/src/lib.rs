//! # edusync-client
//!
//! Local-first sync and encrypted messaging for the school admin console.
//! A [`Session`] owns the local cache, the remote store, the realtime
//! multiplexer and the messaging orchestrator.

pub mod config;
pub mod engine;
pub mod error;
pub mod messaging;
pub mod session;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::{ClientConfig, KeyScheme};
pub use engine::{
    apply_change, Change, ChangeHandlers, Patch, SubscriptionHandle, SyncEngine, WriteOutcome,
};
pub use error::SyncError;
pub use messaging::{Author, BroadcastSent, MessagingOrchestrator, Sent};
pub use session::Session;

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// filter. Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "edusync_node=debug,edusync_client=debug,edusync_realtime=info,edusync_store=info,warn",
        )
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
