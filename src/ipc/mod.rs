//! Secure IPC: session handshake, AES-256-GCM framing, rate limiting.

pub mod crypto;
pub mod frame;
pub mod server;

use thiserror::Error;

pub use crypto::{SessionCrypto, KEY_LEN, MAX_PLAINTEXT_LEN, NONCE_LEN};
pub use server::{IpcServer, IpcServerConfig};

#[derive(Debug, Error)]
pub enum IpcError {
    /// Handshake token mismatch; the connection is closed immediately.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Too many messages inside the rate window; the connection is closed.
    #[error("message rate limit exceeded")]
    RateLimitExceeded,

    #[error("plaintext exceeds {MAX_PLAINTEXT_LEN} bytes: {0}")]
    MessageTooLarge(usize),

    #[error("frame is malformed or too large: {0}")]
    InvalidFrame(String),

    #[error("cipher failure")]
    Crypto,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
