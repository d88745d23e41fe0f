//! Error types for locktree.
//!
//! Every variant is a distinct failure mode of the encryption layer. Messages
//! say *what* failed and never echo key material, plaintext, or ciphertext.

use thiserror::Error;

pub type LockResult<T> = Result<T, LockError>;

/// The single error type for all locktree operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// AEAD sealing failed inside `ring`.
    #[error("encryption failed")]
    EncryptionFailure,

    /// Wrong key, tampered ciphertext, or a bad GCM tag.
    #[error("decryption failed")]
    DecryptionFailure,

    /// PBKDF2 could not produce key material.
    #[error("key derivation failed")]
    KeyDerivationFailure,

    /// The system's random number generator failed to produce bytes.
    #[error("randomness source failed")]
    RandomnessFailure,

    /// The envelope was not base64, or too short to hold salt and nonce.
    #[error("invalid ciphertext envelope")]
    InvalidEnvelope,

    /// The supplied secret is empty or otherwise unusable.
    #[error("invalid secret")]
    InvalidSecret,

    /// A form body or embedded payload could not be parsed.
    #[error("codec error: {0}")]
    Codec(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session refused a required decryption and no longer talks to
    /// the server. Only a reload clears this.
    #[error("session quarantined")]
    Quarantined,
}
