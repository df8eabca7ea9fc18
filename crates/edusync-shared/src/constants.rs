/// Application name
pub const APP_NAME: &str = "EduSync";

/// Receiver id that marks a school-wide broadcast message
pub const BROADCAST_RECEIVER: &str = "ALL";

/// Leading tag of every encrypted message body
pub const ENVELOPE_TAG: &str = "ENC";

/// ChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Symmetric key size in bytes (for ChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Filler byte used when a thread id is shorter than the key
pub const KEY_PAD_BYTE: u8 = b'0';

/// Rendered in place of a message body that failed to decrypt
pub const DECRYPTION_FAILED_PLACEHOLDER: &str = "[unable to decrypt message]";

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_THREAD_KEY: &str = "edusync-thread-key-v2";

/// Key under which the local cache snapshot is persisted
pub const SNAPSHOT_KEY: &str = "edusync.snapshot";

/// Ephemeral event name for typing indicators
pub const TYPING_EVENT: &str = "typing";

/// Inactivity window after which typing stops on its own
pub const DEFAULT_TYPING_DEBOUNCE_MS: u64 = 2_000;

/// Realtime socket heartbeat interval in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
