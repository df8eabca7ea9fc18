use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use tracing::{debug, warn};

use crate::constants::{DECRYPTION_FAILED_PLACEHOLDER, ENVELOPE_TAG, NONCE_SIZE, SYMMETRIC_KEY_SIZE};
use crate::error::CryptoError;
use crate::keys::{DerivedThreadKeys, ThreadKeys};
use crate::types::ThreadId;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (12 bytes nonce prepended)
pub fn seal(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn open(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Split `ENC:v<n>:<body>` into its version and body. Anything else is
/// plaintext.
pub fn parse_envelope(text: &str) -> Option<(u8, &str)> {
    let rest = text.strip_prefix(ENVELOPE_TAG)?.strip_prefix(":v")?;
    let (version, body) = rest.split_once(':')?;
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((version.parse().ok()?, body))
}

pub fn is_envelope(text: &str) -> bool {
    parse_envelope(text).is_some()
}

/// Seals private message bodies into versioned envelopes.
///
/// Both directions are infallible from the caller's side: a failed encrypt
/// yields the plaintext, a failed decrypt yields
/// [`DECRYPTION_FAILED_PLACEHOLDER`].
#[derive(Clone)]
pub struct EnvelopeService {
    keys: Arc<dyn ThreadKeys>,
}

impl EnvelopeService {
    pub fn new(keys: Arc<dyn ThreadKeys>) -> Self {
        Self { keys }
    }

    /// Version 1 service keyed by the thread id alone.
    pub fn derived() -> Self {
        Self::new(Arc::new(DerivedThreadKeys))
    }

    pub fn version(&self) -> u8 {
        self.keys.version()
    }

    pub fn prefix(&self) -> String {
        format!("{ENVELOPE_TAG}:v{}:", self.version())
    }

    pub fn encrypt(&self, plaintext: &str, thread: &ThreadId) -> String {
        match self.try_encrypt(plaintext, thread) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(thread = %thread, error = %e, "Encryption failed, sending plaintext");
                plaintext.to_string()
            }
        }
    }

    pub fn try_encrypt(&self, plaintext: &str, thread: &ThreadId) -> Result<String, CryptoError> {
        let key = self.keys.thread_key(thread)?;
        let sealed = seal(&key, plaintext.as_bytes())?;
        Ok(format!("{}{}", self.prefix(), BASE64.encode(sealed)))
    }

    pub fn decrypt(&self, text: &str, thread: &ThreadId) -> String {
        match self.try_decrypt(text, thread) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                debug!(thread = %thread, error = %e, "Decryption failed");
                DECRYPTION_FAILED_PLACEHOLDER.to_string()
            }
        }
    }

    /// Text without an envelope prefix passes through unchanged.
    pub fn try_decrypt(&self, text: &str, thread: &ThreadId) -> Result<String, CryptoError> {
        let Some((version, body)) = parse_envelope(text) else {
            return Ok(text.to_string());
        };
        if version != self.version() {
            return Err(CryptoError::UnsupportedVersion(version));
        }

        let data = BASE64
            .decode(body)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
        let key = self.keys.thread_key(thread)?;
        let plaintext = open(&key, &data)?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
    }
}

impl std::fmt::Debug for EnvelopeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeService")
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TAG_SIZE;
    use crate::keys::ExchangedThreadKeys;

    fn thread(s: &str) -> ThreadId {
        s.parse().unwrap()
    }

    #[test]
    fn test_encrypt_produces_v1_envelope() {
        let service = EnvelopeService::derived();
        let envelope = service.encrypt("Pickup is at 3pm", &thread("p1:p2"));

        assert!(envelope.starts_with("ENC:v1:"));
        assert_eq!(service.decrypt(&envelope, &thread("p1:p2")), "Pickup is at 3pm");
    }

    #[test]
    fn test_wrong_thread_yields_placeholder() {
        let service = EnvelopeService::derived();
        let envelope = service.encrypt("Pickup is at 3pm", &thread("p1:p2"));

        assert_eq!(
            service.decrypt(&envelope, &thread("p1:p3")),
            DECRYPTION_FAILED_PLACEHOLDER
        );
    }

    #[test]
    fn test_roundtrip_various_plaintexts() {
        let service = EnvelopeService::derived();
        let threads = ["a:b", "teacher-42:parent-7", "x:y"];
        let texts = ["", "hello", "ünïcødé ✓ 你好", &"long message ".repeat(500)];

        for t in threads {
            for p in texts {
                let envelope = service.encrypt(p, &thread(t));
                assert_eq!(service.decrypt(&envelope, &thread(t)), p);
            }
        }
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let service = EnvelopeService::derived();
        let a = service.encrypt("same", &thread("p1:p2"));
        let b = service.encrypt("same", &thread("p1:p2"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_plaintext_passes_through() {
        let service = EnvelopeService::derived();
        assert_eq!(service.decrypt("Bus delayed", &thread("p1:p2")), "Bus delayed");
        assert_eq!(service.decrypt("ENC is short for", &thread("p1:p2")), "ENC is short for");
        assert_eq!(service.decrypt("ENC:vX:abc", &thread("p1:p2")), "ENC:vX:abc");
    }

    #[test]
    fn test_corrupted_envelope_yields_placeholder() {
        let service = EnvelopeService::derived();
        let envelope = service.encrypt("secret", &thread("p1:p2"));

        let mut tampered = envelope.clone().into_bytes();
        let last = tampered.len() - 3;
        tampered[last] = if tampered[last] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(tampered).unwrap();

        assert_eq!(service.decrypt(&tampered, &thread("p1:p2")), DECRYPTION_FAILED_PLACEHOLDER);
        assert_eq!(service.decrypt("ENC:v1:!!!", &thread("p1:p2")), DECRYPTION_FAILED_PLACEHOLDER);
        assert_eq!(service.decrypt("ENC:v1:", &thread("p1:p2")), DECRYPTION_FAILED_PLACEHOLDER);
    }

    #[test]
    fn test_foreign_version_yields_placeholder() {
        let service = EnvelopeService::derived();
        assert_eq!(service.decrypt("ENC:v9:AAAA", &thread("p1:p2")), DECRYPTION_FAILED_PLACEHOLDER);
    }

    #[test]
    fn test_sealed_layout() {
        let key = [7u8; 32];
        let sealed = seal(&key, b"test").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 4 + TAG_SIZE);
        assert_eq!(open(&key, &sealed).unwrap(), b"test");
        assert!(open(&key, &sealed[..NONCE_SIZE - 1]).is_err());
    }

    #[test]
    fn test_exchanged_keys_envelope() {
        let alice = Arc::new(ExchangedThreadKeys::generate("alice"));
        let bob = Arc::new(ExchangedThreadKeys::generate("bob"));
        alice.register_peer("bob", bob.public_key()).unwrap();
        bob.register_peer("alice", alice.public_key()).unwrap();

        let alice_service = EnvelopeService::new(alice);
        let bob_service = EnvelopeService::new(bob);
        let t = ThreadId::between("alice", "bob");

        let envelope = alice_service.encrypt("field trip form", &t);
        assert!(envelope.starts_with("ENC:v2:"));
        assert_eq!(bob_service.decrypt(&envelope, &t), "field trip form");

        // A v1 reader holding only the public thread id cannot open it.
        assert_eq!(
            EnvelopeService::derived().decrypt(&envelope, &t),
            DECRYPTION_FAILED_PLACEHOLDER
        );
    }

    #[test]
    fn test_encrypt_falls_back_to_plaintext_without_peer_key() {
        let service = EnvelopeService::new(Arc::new(ExchangedThreadKeys::generate("alice")));
        let t = ThreadId::between("alice", "stranger");
        assert_eq!(service.encrypt("hello", &t), "hello");
    }

    #[test]
    fn test_parse_envelope() {
        assert_eq!(parse_envelope("ENC:v1:abc"), Some((1, "abc")));
        assert_eq!(parse_envelope("ENC:v12:"), Some((12, "")));
        assert_eq!(parse_envelope("ENC:v:abc"), None);
        assert_eq!(parse_envelope("enc:v1:abc"), None);
        assert!(!is_envelope("hello"));
    }
}
