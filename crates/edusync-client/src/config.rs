//! Client configuration loaded from environment variables.
//!
//! All settings have defaults so a session can start against a local
//! development stack with zero configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use edusync_shared::constants::DEFAULT_TYPING_DEBOUNCE_MS;

/// Where per-thread message keys come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyScheme {
    /// Envelope v1: key derived from the thread id alone.
    #[default]
    Derived,
    /// Envelope v2: X25519 exchange between the participants.
    Exchanged,
}

impl FromStr for KeyScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "derived" | "v1" => Ok(Self::Derived),
            "exchanged" | "v2" => Ok(Self::Exchanged),
            other => Err(format!("unknown key scheme: {other}")),
        }
    }
}

impl fmt::Display for KeyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Derived => f.write_str("derived"),
            Self::Exchanged => f.write_str("exchanged"),
        }
    }
}

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the remote store.
    /// Env: `EDUSYNC_REMOTE_URL`
    /// Default: `http://localhost:54321`
    pub remote_url: String,

    /// API key sent as `apikey` and bearer token.
    /// Env: `EDUSYNC_API_KEY`
    /// Default: empty.
    pub api_key: String,

    /// Realtime websocket endpoint.
    /// Env: `EDUSYNC_REALTIME_URL`
    /// Default: none (no realtime socket).
    pub realtime_url: Option<String>,

    /// Local cache database file.
    /// Env: `EDUSYNC_CACHE_PATH`
    /// Default: none (platform data directory).
    pub cache_path: Option<PathBuf>,

    /// Local storage quota in SQLite pages.
    /// Env: `EDUSYNC_CACHE_MAX_PAGES`
    /// Default: none (unbounded).
    pub cache_max_pages: Option<u32>,

    /// Env: `EDUSYNC_REQUEST_TIMEOUT_SECS`
    /// Default: 10 s.
    pub request_timeout: Duration,

    /// Env: `EDUSYNC_TYPING_DEBOUNCE_MS`
    /// Default: 2000 ms.
    pub typing_debounce: Duration,

    /// Env: `EDUSYNC_KEY_SCHEME` (`derived` / `exchanged`)
    /// Default: `derived`.
    pub key_scheme: KeyScheme,

    /// Local user. Required by the `exchanged` key scheme.
    /// Env: `EDUSYNC_USER_ID`
    pub user_id: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            realtime_url: None,
            cache_path: None,
            cache_max_pages: None,
            request_timeout: Duration::from_secs(10),
            typing_debounce: Duration::from_millis(DEFAULT_TYPING_DEBOUNCE_MS),
            key_scheme: KeyScheme::Derived,
            user_id: None,
        }
    }
}

// The API key stays out of logs.
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("remote_url", &self.remote_url)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("realtime_url", &self.realtime_url)
            .field("cache_path", &self.cache_path)
            .field("cache_max_pages", &self.cache_max_pages)
            .field("request_timeout", &self.request_timeout)
            .field("typing_debounce", &self.typing_debounce)
            .field("key_scheme", &self.key_scheme)
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("EDUSYNC_REMOTE_URL") {
            config.remote_url = url;
        }

        if let Some(key) = lookup("EDUSYNC_API_KEY") {
            config.api_key = key;
        }

        if let Some(url) = lookup("EDUSYNC_REALTIME_URL") {
            if !url.is_empty() {
                config.realtime_url = Some(url);
            }
        }

        if let Some(path) = lookup("EDUSYNC_CACHE_PATH") {
            if !path.is_empty() {
                config.cache_path = Some(PathBuf::from(path));
            }
        }

        if let Some(val) = lookup("EDUSYNC_CACHE_MAX_PAGES") {
            match val.parse::<u32>() {
                Ok(pages) if pages > 0 => config.cache_max_pages = Some(pages),
                _ => tracing::warn!(value = %val, "Invalid EDUSYNC_CACHE_MAX_PAGES, using default"),
            }
        }

        if let Some(val) = lookup("EDUSYNC_REQUEST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(
                    value = %val,
                    "Invalid EDUSYNC_REQUEST_TIMEOUT_SECS, using default"
                ),
            }
        }

        if let Some(val) = lookup("EDUSYNC_TYPING_DEBOUNCE_MS") {
            match val.parse::<u64>() {
                Ok(ms) => config.typing_debounce = Duration::from_millis(ms),
                Err(_) => tracing::warn!(
                    value = %val,
                    "Invalid EDUSYNC_TYPING_DEBOUNCE_MS, using default"
                ),
            }
        }

        if let Some(val) = lookup("EDUSYNC_KEY_SCHEME") {
            match val.parse::<KeyScheme>() {
                Ok(scheme) => config.key_scheme = scheme,
                Err(e) => tracing::warn!(error = %e, "Invalid EDUSYNC_KEY_SCHEME, using default"),
            }
        }

        if let Some(user) = lookup("EDUSYNC_USER_ID") {
            if !user.is_empty() {
                config.user_id = Some(user);
            }
        }

        config
    }
}
