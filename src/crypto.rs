//! Low-level cryptographic operations.
//!
//! This module is one of exactly two places in the crate that import `ring`
//! directly (the other is `keys`). All other modules encrypt and decrypt
//! exclusively through the functions exposed here.
//!
//! Primitive choices:
//! - **KDF**: PBKDF2-HMAC-SHA256, 250,000 iterations, 16-byte random salt
//! - **Cipher**: AES-256-GCM (authenticated encryption)
//! - **Nonce**: 96-bit (12 bytes), generated fresh per operation via `SystemRandom`
//!
//! # Envelope layout
//! ```text
//! base64( salt (16) || nonce (12) || ciphertext + GCM tag )
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::warn;

use crate::error::{LockError, LockResult};
use crate::keys;

/// The AEAD algorithm used throughout locktree.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the PBKDF2 salt in bytes.
pub const SALT_LEN: usize = 16;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of a derived key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Default PBKDF2 iteration count.
pub const DEFAULT_ITERATIONS: u32 = 250_000;

fn random_bytes<const N: usize>() -> LockResult<[u8; N]> {
    let mut buf = [0u8; N];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| LockError::RandomnessFailure)?;
    Ok(buf)
}

/// Lowercase hex of `len` random bytes. Used for request ids, not keys.
pub(crate) fn random_token(len: usize) -> LockResult<String> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| LockError::RandomnessFailure)?;
    Ok(buf.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Seal `plaintext` under a raw AES-256 key.
///
/// # Layout of returned bytes
/// ```text
/// [ nonce (12 bytes) ][ ciphertext + GCM tag ]
/// ```
fn seal(key_bytes: &[u8; KEY_LEN], plaintext: &[u8]) -> LockResult<Vec<u8>> {
    let unbound =
        UnboundKey::new(ALGORITHM, key_bytes).map_err(|_| LockError::KeyDerivationFailure)?;
    let key = LessSafeKey::new(unbound);

    // Fresh per call; the `Nonce` is moved into the seal and cannot be reused.
    let nonce_bytes = random_bytes::<NONCE_LEN>()?;
    let mut output = Vec::with_capacity(NONCE_LEN + plaintext.len() + ALGORITHM.tag_len());
    output.extend_from_slice(&nonce_bytes);

    let mut sealed = plaintext.to_vec();
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut sealed)
        .map_err(|_| LockError::EncryptionFailure)?;
    output.extend_from_slice(&sealed);

    Ok(output)
}

/// Open bytes produced by [`seal`]. No partial plaintext on failure.
fn open(key_bytes: &[u8; KEY_LEN], sealed: &[u8]) -> LockResult<Vec<u8>> {
    if sealed.len() < NONCE_LEN + ALGORITHM.tag_len() {
        return Err(LockError::InvalidEnvelope);
    }

    let nonce_bytes: [u8; NONCE_LEN] = sealed[..NONCE_LEN]
        .try_into()
        .map_err(|_| LockError::InvalidEnvelope)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let unbound =
        UnboundKey::new(ALGORITHM, key_bytes).map_err(|_| LockError::KeyDerivationFailure)?;
    let key = LessSafeKey::new(unbound);

    let mut payload = sealed[NONCE_LEN..].to_vec();
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut payload)
        .map_err(|_| LockError::DecryptionFailure)?;

    Ok(plaintext.to_vec())
}

/// Password-based string cipher producing base64 envelopes.
///
/// `try_*` methods report failures; `encrypt`/`decrypt` apply the empty
/// string sentinel instead, which is what the field-level layers consume.
#[derive(Debug, Clone, Copy)]
pub struct Cipher {
    iterations: u32,
}

impl Default for Cipher {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

impl Cipher {
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn try_encrypt(&self, plaintext: &str, password: &str) -> LockResult<String> {
        let salt = random_bytes::<SALT_LEN>()?;
        let key = keys::derive_key(password, &salt, self.iterations)?;
        let sealed = seal(key.as_bytes(), plaintext.as_bytes())?;

        let mut envelope = Vec::with_capacity(SALT_LEN + sealed.len());
        envelope.extend_from_slice(&salt);
        envelope.extend_from_slice(&sealed);
        Ok(STANDARD.encode(envelope))
    }

    pub fn try_decrypt(&self, envelope: &str, password: &str) -> LockResult<String> {
        let raw = STANDARD
            .decode(envelope.as_bytes())
            .map_err(|_| LockError::InvalidEnvelope)?;
        if raw.len() < SALT_LEN + NONCE_LEN {
            return Err(LockError::InvalidEnvelope);
        }

        let (salt, sealed) = raw.split_at(SALT_LEN);
        let salt: [u8; SALT_LEN] = salt.try_into().map_err(|_| LockError::InvalidEnvelope)?;
        let key = keys::derive_key(password, &salt, self.iterations)?;
        let plaintext = open(key.as_bytes(), sealed)?;

        String::from_utf8(plaintext).map_err(|_| LockError::DecryptionFailure)
    }

    /// Encrypt, returning `""` on any internal failure.
    pub fn encrypt(&self, plaintext: &str, password: &str) -> String {
        self.try_encrypt(plaintext, password).unwrap_or_else(|e| {
            warn!(error = %e, "encryption failed");
            String::new()
        })
    }

    /// Decrypt, returning `""` on malformed envelopes, wrong passwords, or
    /// tampering. Callers treat `""` as "keep the ciphertext".
    pub fn decrypt(&self, envelope: &str, password: &str) -> String {
        self.try_decrypt(envelope, password).unwrap_or_else(|e| {
            warn!(error = %e, "decryption failed");
            String::new()
        })
    }
}

/// Encrypt with the default iteration count.
pub fn encrypt(plaintext: &str, password: &str) -> String {
    Cipher::default().encrypt(plaintext, password)
}

/// Decrypt with the default iteration count.
pub fn decrypt(envelope: &str, password: &str) -> String {
    Cipher::default().decrypt(envelope, password)
}
