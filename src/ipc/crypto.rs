use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::ipc::IpcError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
/// Largest plaintext a single frame may carry.
pub const MAX_PLAINTEXT_LEN: usize = 1024 * 1024;

/// Fresh 128-bit session token, sent by clients to authenticate. Retrieved
/// only through the in-process API; never logged.
pub fn generate_session_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Fresh 256-bit session key for the data phase.
pub fn generate_session_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Key for the handshake leg: SHA-256 over the token bytes. Both ends can
/// derive it, so the session key can travel encrypted.
pub fn derive_handshake_key(token: &str) -> [u8; KEY_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

/// AES-256-GCM seal/open with a random 96-bit IV per message.
///
/// One instance per connection handler; the cipher state is reused across
/// frames rather than rebuilt per message. IVs come from the OS generator
/// and are never reused under a given key.
pub struct SessionCrypto {
    cipher: Aes256Gcm,
}

impl SessionCrypto {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new_from_slice(key).expect("key length is fixed"),
        }
    }

    /// Encrypts to `iv || ciphertext+tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, IpcError> {
        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(IpcError::MessageTooLarge(plaintext.len()));
        }
        let mut iv = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut iv);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| IpcError::Crypto)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts `iv || ciphertext+tag`. Tampering fails the GCM tag check.
    pub fn open(&self, frame: &[u8]) -> Result<Vec<u8>, IpcError> {
        if frame.len() < NONCE_LEN {
            return Err(IpcError::InvalidFrame(format!(
                "frame too short: {} bytes",
                frame.len()
            )));
        }
        let (iv, ciphertext) = frame.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| IpcError::Crypto)?;
        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(IpcError::MessageTooLarge(plaintext.len()));
        }
        Ok(plaintext)
    }
}
