use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unsupported envelope version v{0}")]
    UnsupportedVersion(u8),

    #[error("No public key registered for participant {0}")]
    UnknownPeer(String),

    #[error("{user} is not a participant of thread {thread}")]
    NotAParticipant { user: String, thread: String },

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Key store unavailable")]
    KeyStoreUnavailable,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ThreadIdError {
    #[error("Thread id must have the form <a>:<b>, got {0:?}")]
    MissingSeparator(String),

    #[error("Thread id has an empty participant: {0:?}")]
    EmptyParticipant(String),
}
