//! Secret ownership and password-based key derivation.
//!
//! This module owns two responsibilities:
//! 1. Holding the user's secret in a type that is opaque, non-cloneable,
//!    and zeroised on drop.
//! 2. Deriving per-envelope AES keys from that secret with PBKDF2-HMAC-SHA256.
//!
//! This is one of exactly two modules permitted to import `ring` directly
//! (the other is `crypto`).
//!
//! ## Derivation structure
//!
//! ```text
//! PBKDF2-HMAC-SHA256(
//!     password   = secret (UTF-8 bytes),
//!     salt       = 16 random bytes, stored in the envelope,
//!     iterations = 250_000 by default,
//!     dk_len     = 32
//! )
//! ```
//!
//! Every envelope carries its own salt, so every encryption call derives a
//! fresh key.

use std::fmt;
use std::num::NonZeroU32;

use ring::pbkdf2;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{KEY_LEN, SALT_LEN};
use crate::error::{LockError, LockResult};

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

// ---------------------------------------------------------------------------
// Secret
// ---------------------------------------------------------------------------

/// The user's encryption secret.
///
/// - Not `Clone`. The only copy lives wherever the caller put it.
/// - Zeroised on drop.
/// - `Debug` prints a redaction marker instead of the value.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Secret {
    value: String,
}

impl Secret {
    /// Wrap a secret string after validating it with [`is_valid_secret`].
    pub fn new(value: impl Into<String>) -> LockResult<Self> {
        let value = value.into();
        if !is_valid_secret(&value) {
            return Err(LockError::InvalidSecret);
        }
        Ok(Self { value })
    }

    /// Borrow the secret for key derivation.
    ///
    /// `pub(crate)`: the secret never leaves the crate once wrapped.
    pub(crate) fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret").field("value", &"[REDACTED]").finish()
    }
}

/// A secret is usable when, ignoring spaces, it is non-empty and is not the
/// literal string `"null"` (what a browser stores for a missing value).
pub fn is_valid_secret(candidate: &str) -> bool {
    let compact: String = candidate.chars().filter(|c| *c != ' ').collect();
    !compact.is_empty() && compact != "null"
}

// ---------------------------------------------------------------------------
// Derived key
// ---------------------------------------------------------------------------

/// An AES-256 key derived for exactly one envelope.
///
/// - Not `Clone`.
/// - Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct DerivedKey {
    bytes: [u8; KEY_LEN],
}

impl DerivedKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

/// Derive the AES key for one envelope from a password and its salt.
pub(crate) fn derive_key(
    password: &str,
    salt: &[u8; SALT_LEN],
    iterations: u32,
) -> LockResult<DerivedKey> {
    let iterations = NonZeroU32::new(iterations).ok_or(LockError::KeyDerivationFailure)?;

    let mut bytes = [0u8; KEY_LEN];
    pbkdf2::derive(PBKDF2_ALG, iterations, salt, password.as_bytes(), &mut bytes);

    Ok(DerivedKey { bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_validation() {
        assert!(is_valid_secret("correct horse"));
        assert!(!is_valid_secret(""));
        assert!(!is_valid_secret("   "));
        assert!(!is_valid_secret("null"));
        assert!(!is_valid_secret("nu ll"));
        assert!(Secret::new("").is_err());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("hunter2").unwrap();
        let printed = format!("{:?}", secret);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("REDACTED"));
    }

    #[test]
    fn test_derivation_depends_on_salt_and_password() {
        let a = derive_key("pw", &[1u8; SALT_LEN], 10).unwrap();
        let b = derive_key("pw", &[2u8; SALT_LEN], 10).unwrap();
        let c = derive_key("other", &[1u8; SALT_LEN], 10).unwrap();
        let a_again = derive_key("pw", &[1u8; SALT_LEN], 10).unwrap();

        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
        assert_eq!(a.as_bytes(), a_again.as_bytes());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        assert!(derive_key("pw", &[0u8; SALT_LEN], 0).is_err());
    }
}
