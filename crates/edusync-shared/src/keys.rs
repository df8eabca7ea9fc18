//! Per-thread key sources for the envelope service.
//!
//! Version 1 derives the key from the thread id alone: anyone who knows both
//! participant ids can compute it. Version 2 runs an X25519 exchange between
//! the participants' static keys and feeds the shared secret into BLAKE3.

use std::collections::HashMap;
use std::sync::RwLock;

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::constants::{KDF_CONTEXT_THREAD_KEY, KEY_PAD_BYTE, SYMMETRIC_KEY_SIZE};
use crate::crypto::SymmetricKey;
use crate::error::CryptoError;
use crate::types::ThreadId;

/// Source of the symmetric key for one conversation thread.
pub trait ThreadKeys: Send + Sync {
    /// Envelope version produced and accepted with these keys.
    fn version(&self) -> u8;

    fn thread_key(&self, thread: &ThreadId) -> Result<SymmetricKey, CryptoError>;
}

/// Thread id bytes, padded with `'0'` or truncated to the key size.
///
/// Thread ids that agree on their first 32 bytes share a key, so a long
/// participant id that sorts first collapses all of its threads onto one key.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivedThreadKeys;

impl DerivedThreadKeys {
    pub const VERSION: u8 = 1;
}

impl ThreadKeys for DerivedThreadKeys {
    fn version(&self) -> u8 {
        Self::VERSION
    }

    fn thread_key(&self, thread: &ThreadId) -> Result<SymmetricKey, CryptoError> {
        let mut key = [KEY_PAD_BYTE; SYMMETRIC_KEY_SIZE];
        let raw = thread.to_string();
        let len = raw.len().min(SYMMETRIC_KEY_SIZE);
        key[..len].copy_from_slice(&raw.as_bytes()[..len]);
        Ok(key)
    }
}

/// Keys agreed between participants' X25519 static key pairs.
pub struct ExchangedThreadKeys {
    me: String,
    secret: StaticSecret,
    peers: RwLock<HashMap<String, PublicKey>>,
}

impl ExchangedThreadKeys {
    pub const VERSION: u8 = 2;

    pub fn new(me: impl Into<String>, secret: StaticSecret) -> Self {
        Self {
            me: me.into(),
            secret,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Fresh random key pair for `me`.
    pub fn generate(me: impl Into<String>) -> Self {
        Self::new(me, StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_secret_bytes(me: impl Into<String>, secret: [u8; 32]) -> Self {
        Self::new(me, StaticSecret::from(secret))
    }

    pub fn user_id(&self) -> &str {
        &self.me
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.secret)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().as_bytes())
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    pub fn register_peer(&self, user_id: impl Into<String>, public: PublicKey) -> Result<(), CryptoError> {
        let mut peers = self
            .peers
            .write()
            .map_err(|_| CryptoError::KeyStoreUnavailable)?;
        peers.insert(user_id.into(), public);
        Ok(())
    }

    pub fn register_peer_hex(&self, user_id: impl Into<String>, public_hex: &str) -> Result<(), CryptoError> {
        let bytes = hex::decode(public_hex.trim()).map_err(|_| CryptoError::InvalidKeyLength)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength)?;
        self.register_peer(user_id, PublicKey::from(bytes))
    }

    fn peer_key(&self, user_id: &str) -> Result<PublicKey, CryptoError> {
        if user_id == self.me {
            return Ok(self.public_key());
        }
        let peers = self
            .peers
            .read()
            .map_err(|_| CryptoError::KeyStoreUnavailable)?;
        peers
            .get(user_id)
            .copied()
            .ok_or_else(|| CryptoError::UnknownPeer(user_id.to_string()))
    }
}

impl ThreadKeys for ExchangedThreadKeys {
    fn version(&self) -> u8 {
        Self::VERSION
    }

    fn thread_key(&self, thread: &ThreadId) -> Result<SymmetricKey, CryptoError> {
        let peer_id = thread
            .counterpart(&self.me)
            .ok_or_else(|| CryptoError::NotAParticipant {
                user: self.me.clone(),
                thread: thread.to_string(),
            })?;
        let peer = self.peer_key(peer_id)?;
        let shared = self.secret.diffie_hellman(&peer);

        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_THREAD_KEY);
        hasher.update(shared.as_bytes());
        hasher.update(thread.to_string().as_bytes());
        Ok(*hasher.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::constants::DECRYPTION_FAILED_PLACEHOLDER;
    use crate::crypto::EnvelopeService;

    #[test]
    fn test_derived_key_pads_short_ids() {
        let key = DerivedThreadKeys
            .thread_key(&ThreadId::between("p1", "p2"))
            .unwrap();
        assert_eq!(&key[..5], b"p1:p2");
        assert!(key[5..].iter().all(|b| *b == b'0'));
    }

    #[test]
    fn test_derived_key_truncates_long_ids() {
        let a = "a".repeat(40);
        let key = DerivedThreadKeys
            .thread_key(&ThreadId::between(&a, "b"))
            .unwrap();
        assert_eq!(key, [b'a'; 32]);
    }

    // "parent-0123456789abcdef0123456789:" is 34 bytes, so both thread ids
    // below truncate to the same 32-byte key under v1.
    const LONG_PARENT: &str = "parent-0123456789abcdef0123456789";

    #[test]
    fn test_derived_keys_collide_on_shared_prefix() {
        let first = ThreadId::between(LONG_PARENT, "zz-teacher-1");
        let second = ThreadId::between(LONG_PARENT, "zz-teacher-2");
        assert_ne!(first, second);

        let keys = DerivedThreadKeys;
        assert_eq!(keys.thread_key(&first).unwrap(), keys.thread_key(&second).unwrap());

        let envelopes = EnvelopeService::derived();
        let sealed = envelopes.encrypt("secret", &first);
        assert_eq!(envelopes.decrypt(&sealed, &second), "secret");
    }

    #[test]
    fn test_exchanged_keys_do_not_collide_on_shared_prefix() {
        let parent = Arc::new(ExchangedThreadKeys::generate(LONG_PARENT));
        let teacher_1 = ExchangedThreadKeys::generate("zz-teacher-1");
        let teacher_2 = ExchangedThreadKeys::generate("zz-teacher-2");
        parent.register_peer("zz-teacher-1", teacher_1.public_key()).unwrap();
        parent.register_peer("zz-teacher-2", teacher_2.public_key()).unwrap();

        let first = ThreadId::between(LONG_PARENT, "zz-teacher-1");
        let second = ThreadId::between(LONG_PARENT, "zz-teacher-2");
        assert_ne!(parent.thread_key(&first).unwrap(), parent.thread_key(&second).unwrap());

        let envelopes = EnvelopeService::new(parent);
        let sealed = envelopes.encrypt("secret", &first);
        assert!(sealed.starts_with("ENC:v2:"));
        assert_eq!(envelopes.decrypt(&sealed, &second), DECRYPTION_FAILED_PLACEHOLDER);
        assert_eq!(envelopes.decrypt(&sealed, &first), "secret");
    }

    #[test]
    fn test_exchanged_keys_agree_between_participants() {
        let alice = ExchangedThreadKeys::generate("alice");
        let bob = ExchangedThreadKeys::generate("bob");
        alice.register_peer("bob", bob.public_key()).unwrap();
        bob.register_peer_hex("alice", &alice.public_key_hex()).unwrap();

        let thread = ThreadId::between("alice", "bob");
        assert_eq!(
            alice.thread_key(&thread).unwrap(),
            bob.thread_key(&thread).unwrap()
        );
    }

    #[test]
    fn test_exchanged_keys_differ_per_thread() {
        let alice = ExchangedThreadKeys::generate("alice");
        let bob = ExchangedThreadKeys::generate("bob");
        let carol = ExchangedThreadKeys::generate("carol");
        alice.register_peer("bob", bob.public_key()).unwrap();
        alice.register_peer("carol", carol.public_key()).unwrap();

        let with_bob = alice.thread_key(&ThreadId::between("alice", "bob")).unwrap();
        let with_carol = alice.thread_key(&ThreadId::between("alice", "carol")).unwrap();
        assert_ne!(with_bob, with_carol);
    }

    #[test]
    fn test_exchanged_keys_unknown_peer_fails() {
        let alice = ExchangedThreadKeys::generate("alice");
        let result = alice.thread_key(&ThreadId::between("alice", "mallory"));
        assert!(matches!(result, Err(CryptoError::UnknownPeer(id)) if id == "mallory"));
    }

    #[test]
    fn test_exchanged_keys_reject_outsiders() {
        let eve = ExchangedThreadKeys::generate("eve");
        let result = eve.thread_key(&ThreadId::between("alice", "bob"));
        assert!(matches!(result, Err(CryptoError::NotAParticipant { .. })));
    }

    #[test]
    fn test_secret_bytes_restore_same_identity() {
        let original = ExchangedThreadKeys::generate("alice");
        let restored = ExchangedThreadKeys::from_secret_bytes("alice", original.secret_bytes());
        assert_eq!(original.public_key(), restored.public_key());
    }
}
