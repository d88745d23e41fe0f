//! Field-level encryption with the marker convention and the decryption cache.
//!
//! The transform pipeline only ever talks to [`FieldCipher`]. [`Encrypter`]
//! is the production implementation: it owns the loaded secret, prefixes
//! ciphertext with the marker, and consults the cache before paying for a
//! PBKDF2 derivation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::DecryptionCache;
use crate::config::LockConfig;
use crate::crypto::Cipher;
use crate::error::LockResult;
use crate::keys::{is_valid_secret, Secret};
use crate::storage::{KeyValueStore, SECRET_KEY};

/// What the transform pipeline needs from an encryption provider.
///
/// Both directions are infallible by contract: with no secret loaded they
/// pass text through, and a failed decryption yields the input unchanged.
#[async_trait]
pub trait FieldCipher: Send + Sync {
    async fn encrypt(&self, plaintext: &str) -> String;
    async fn decrypt(&self, text: &str) -> String;
    async fn secret_loaded(&self) -> bool;
}

pub struct Encrypter {
    cipher: Cipher,
    marker: char,
    secret: RwLock<Option<Secret>>,
    cache: DecryptionCache,
    storage: Arc<dyn KeyValueStore>,
    sweep_interval: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Encrypter {
    pub fn new(config: &LockConfig, storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            cipher: Cipher::new(config.crypto.kdf_iterations),
            marker: config.boundary.marker,
            secret: RwLock::new(None),
            cache: DecryptionCache::new(storage.clone(), config.cache.retention()),
            storage,
            sweep_interval: config.cache.sweep_interval(),
            sweeper: Mutex::new(None),
        }
    }

    /// Host-facing setup: load the persisted secret and start the cache
    /// sweeper. Must be called from within a tokio runtime.
    pub async fn open(config: &LockConfig, storage: Arc<dyn KeyValueStore>) -> LockResult<Self> {
        let encrypter = Self::new(config, storage);
        encrypter.load_secret().await?;
        encrypter.start_sweeper().await;
        Ok(encrypter)
    }

    pub fn cache(&self) -> &DecryptionCache {
        &self.cache
    }

    /// Sweep the cache every configured interval until this encrypter is
    /// dropped. Restarting replaces the running sweeper.
    pub async fn start_sweeper(&self) {
        let handle = self.cache.spawn_sweeper(self.sweep_interval);
        if let Some(previous) = self.sweeper.lock().await.replace(handle) {
            previous.abort();
        }
        debug!(interval_secs = self.sweep_interval.as_secs(), "cache sweeper started");
    }

    pub async fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Load the persisted secret. Returns whether one is now loaded.
    pub async fn load_secret(&self) -> LockResult<bool> {
        let stored = self.storage.get(SECRET_KEY).await?;
        let secret = stored
            .filter(|s| is_valid_secret(s))
            .map(Secret::new)
            .transpose()?;
        let loaded = secret.is_some();
        *self.secret.write().await = secret;
        if !loaded {
            warn!("no usable secret stored; encryption is pass-through");
        }
        Ok(loaded)
    }

    /// Replace the secret. Clears the whole cache first, since entries made
    /// under the previous secret no longer correspond to anything decryptable.
    pub async fn set_secret(&self, secret: Secret) -> LockResult<()> {
        self.cache.clear(false).await?;
        self.storage
            .set(SECRET_KEY, secret.expose().to_string())
            .await?;
        *self.secret.write().await = Some(secret);
        info!("secret updated");
        Ok(())
    }

    pub async fn unload_secret(&self) {
        *self.secret.write().await = None;
    }

    pub async fn clear_cache(&self, light: bool) -> LockResult<usize> {
        self.cache.clear(light).await
    }
}

impl Drop for Encrypter {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl FieldCipher for Encrypter {
    async fn encrypt(&self, plaintext: &str) -> String {
        let guard = self.secret.read().await;
        let Some(secret) = guard.as_ref() else {
            return plaintext.to_string();
        };
        let envelope = self.cipher.encrypt(plaintext, secret.expose());
        if envelope.is_empty() {
            return plaintext.to_string();
        }
        let encrypted = format!("{}{}", self.marker, envelope);
        if let Err(e) = self.cache.set(&encrypted, plaintext).await {
            warn!(error = %e, "failed to cache encryption");
        }
        encrypted
    }

    async fn decrypt(&self, text: &str) -> String {
        let Some(envelope) = text.strip_prefix(self.marker) else {
            return text.to_string();
        };
        let guard = self.secret.read().await;
        let Some(secret) = guard.as_ref() else {
            return text.to_string();
        };

        match self.cache.get(text).await {
            Ok(Some(hit)) => return hit,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "decryption cache unavailable"),
        }

        let plaintext = self.cipher.decrypt(envelope, secret.expose());
        if plaintext.is_empty() {
            // Wrong key or not ours: keep the ciphertext visible as-is.
            return text.to_string();
        }
        if let Err(e) = self.cache.set(text, &plaintext).await {
            warn!(error = %e, "failed to cache decryption");
        }
        plaintext
    }

    async fn secret_loaded(&self) -> bool {
        self.secret.read().await.is_some()
    }
}
