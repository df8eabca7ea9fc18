//! # edusync-node
//!
//! Headless sync node. Mirrors every collection from the remote store into
//! the local cache on start, then follows the change feeds and logs each
//! row change until Ctrl+C.

use anyhow::Context;
use tracing::{info, warn};

use edusync_client::{ChangeHandlers, ClientConfig, Session, SubscriptionHandle};
use edusync_shared::records::{
    AttendanceLog, AttendanceRecord, Certificate, ChatMessage, Invoice, LeaveRequest, Notice, Staff,
    Student,
};
use edusync_shared::CollectionRecord;
use edusync_store::Slot;

/// Run `$body` once per record type, with `$K` bound to the type.
macro_rules! for_each_record {
    ($K:ident => $body:expr) => {{
        {
            type $K = Student;
            $body
        }
        {
            type $K = Staff;
            $body
        }
        {
            type $K = Invoice;
            $body
        }
        {
            type $K = LeaveRequest;
            $body
        }
        {
            type $K = Notice;
            $body
        }
        {
            type $K = ChatMessage;
            $body
        }
        {
            type $K = Certificate;
            $body
        }
        {
            type $K = AttendanceRecord;
            $body
        }
        {
            type $K = AttendanceLog;
            $body
        }
    }};
}

async fn warm<K: Slot>(session: &Session) -> usize {
    match session.engine().get_all::<K>().await {
        Ok(records) => records.len(),
        Err(e) => {
            warn!(collection = %K::COLLECTION, error = %e, "warm-up failed");
            0
        }
    }
}

fn follow<K: CollectionRecord>(session: &Session) -> SubscriptionHandle {
    let handlers = ChangeHandlers::<K>::new()
        .on_insert(|record| info!(collection = %K::COLLECTION, id = record.id(), "inserted"))
        .on_update(|record| info!(collection = %K::COLLECTION, id = record.id(), "updated"))
        .on_delete(|id| info!(collection = %K::COLLECTION, id = %id, "deleted"));
    session.engine().subscribe(handlers)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    edusync_client::init_tracing();
    info!("Starting EduSync node v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let session = Session::open(config).context("failed to open session")?;

    let mut total = 0;
    for_each_record!(K => total += warm::<K>(&session).await);
    info!(records = total, "local cache warmed");

    let mut subscriptions = Vec::new();
    for_each_record!(K => subscriptions.push(follow::<K>(&session)));
    info!(feeds = subscriptions.len(), "following change feeds");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down");

    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    session.shutdown();
    Ok(())
}
