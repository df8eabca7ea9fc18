//! One client session: local cache, remote store, realtime and messaging
//! wired together from a [`ClientConfig`].

use std::sync::Arc;

use tracing::{info, warn};

use edusync_realtime::{Multiplexer, SocketConfig};
use edusync_remote::{HttpRemote, InMemoryRemote, RemoteStore};
use edusync_shared::{EnvelopeService, ExchangedThreadKeys, ThreadKeys};
use edusync_store::{Database, LocalCache};

use crate::config::{ClientConfig, KeyScheme};
use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::messaging::MessagingOrchestrator;

pub struct Session<R = HttpRemote> {
    config: ClientConfig,
    engine: Arc<SyncEngine<R>>,
    messaging: MessagingOrchestrator<R>,
    realtime: Multiplexer,
    identity: Option<Arc<ExchangedThreadKeys>>,
}

impl Session<HttpRemote> {
    /// Session against the hosted remote store. Must be called inside a
    /// tokio runtime when a realtime URL is configured.
    pub fn open(config: ClientConfig) -> Result<Self, SyncError> {
        let remote = HttpRemote::new(&config.remote_url, config.api_key.clone(), config.request_timeout)?;
        let realtime_url = config.realtime_url.clone();
        let api_key = config.api_key.clone();

        let session = Self::with_remote(config, remote)?;
        match realtime_url {
            Some(url) => session.realtime.attach_socket(SocketConfig::new(url, api_key)),
            None => info!("no realtime URL configured, change feeds stay silent"),
        }
        Ok(session)
    }
}

impl Session<InMemoryRemote> {
    /// Session against an embedded remote whose writes drive the change feeds.
    pub fn in_memory(config: ClientConfig, remote: InMemoryRemote) -> Result<Self, SyncError> {
        let changes = remote.changes();
        let session = Self::with_remote(config, remote)?;
        session.realtime.attach_changes(changes);
        Ok(session)
    }
}

impl<R: RemoteStore> Session<R> {
    /// Wire a session around any remote store. No realtime source is attached.
    pub fn with_remote(config: ClientConfig, remote: R) -> Result<Self, SyncError> {
        let db = match &config.cache_path {
            Some(path) => Database::open_at(path, config.cache_max_pages)?,
            None => Database::new(config.cache_max_pages)?,
        };

        let (envelopes, identity) = match config.key_scheme {
            KeyScheme::Derived => {
                warn!(
                    "derived key scheme active: keys come from public thread ids and threads \
                     sharing a 32-byte id prefix share a key; set EDUSYNC_KEY_SCHEME=exchanged \
                     for confidentiality"
                );
                (EnvelopeService::derived(), None)
            }
            KeyScheme::Exchanged => {
                let user_id = config.user_id.as_deref().ok_or_else(|| {
                    SyncError::Config("the exchanged key scheme needs EDUSYNC_USER_ID".into())
                })?;
                let keys = Arc::new(load_or_create_identity(&db, user_id)?);
                let service = EnvelopeService::new(keys.clone() as Arc<dyn ThreadKeys>);
                (service, Some(keys))
            }
        };

        let cache = LocalCache::open(db)?;
        let realtime = Multiplexer::new();
        let engine = Arc::new(SyncEngine::new(cache, remote, realtime.feed().clone()));
        let messaging = MessagingOrchestrator::new(
            engine.clone(),
            envelopes,
            realtime.clone(),
            config.typing_debounce,
        );

        info!(
            scheme = %config.key_scheme,
            envelope = messaging.envelopes().version(),
            "session ready"
        );

        Ok(Self {
            config,
            engine,
            messaging,
            realtime,
            identity,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    pub fn messaging(&self) -> &MessagingOrchestrator<R> {
        &self.messaging
    }

    pub fn realtime(&self) -> &Multiplexer {
        &self.realtime
    }

    /// The local X25519 identity, under the exchanged key scheme.
    pub fn identity(&self) -> Option<&ExchangedThreadKeys> {
        self.identity.as_deref()
    }

    pub fn shutdown(self) {
        info!("session shutting down");
        self.realtime.shutdown();
    }
}

fn load_or_create_identity(db: &Database, user_id: &str) -> Result<ExchangedThreadKeys, SyncError> {
    if let Some(secret) = db.load_identity_secret(user_id)? {
        return Ok(ExchangedThreadKeys::from_secret_bytes(user_id, secret));
    }

    let keys = ExchangedThreadKeys::generate(user_id);
    if let Err(e) = db.save_identity_secret(user_id, &keys.secret_bytes()) {
        warn!(user = user_id, error = %e, "identity key not persisted, it will change next session");
    } else {
        info!(user = user_id, public = %keys.public_key_hex(), "generated identity key");
    }
    Ok(keys)
}
