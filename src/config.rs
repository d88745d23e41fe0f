use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::DEFAULT_ITERATIONS;
use crate::error::{LockError, LockResult};

/// Top-level configuration (loadable from `locktree.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub boundary: BoundaryConfig,
    pub endpoints: EndpointConfig,
    pub crypto: CryptoConfig,
    pub cache: CacheConfig,
}

/// Boundary tag and ciphertext marker conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryConfig {
    /// Substring that marks a node as the root of an encrypted subtree
    pub lock_tag: String,
    /// Single-character prefix carried by every ciphertext field
    pub marker: char,
    /// Hard cap on parent-pointer walks (guards against cycles)
    pub max_tree_depth: usize,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            lock_tag: "#private".to_string(),
            marker: '_',
            max_tree_depth: 10_000,
        }
    }
}

/// Which requests the interceptor rewrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub domain: String,
    pub push_and_poll: String,
    pub tree_data: String,
    pub initialization_data: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            domain: "https://workflowy.com".to_string(),
            push_and_poll: "/push_and_poll".to_string(),
            tree_data: "/get_tree_data".to_string(),
            initialization_data: "/get_initialization_data".to_string(),
        }
    }
}

impl EndpointConfig {
    pub fn push_and_poll_url(&self) -> String {
        format!("{}{}", self.domain, self.push_and_poll)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2 iterations (default: 250000)
    pub kdf_iterations: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: DEFAULT_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries untouched for longer than this are swept (default: 7 days)
    pub retention_secs: u64,
    /// How often the background sweeper runs (default: 1 hour)
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retention_secs: 60 * 60 * 24 * 7,
            sweep_interval_secs: 60 * 60,
        }
    }
}

impl CacheConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl LockConfig {
    pub fn from_toml_str(raw: &str) -> LockResult<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| LockError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> LockResult<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> LockResult<()> {
        if self.boundary.lock_tag.is_empty() {
            return Err(LockError::Config("lock_tag must not be empty".into()));
        }
        if self.boundary.lock_tag.contains(self.boundary.marker) {
            return Err(LockError::Config(
                "lock_tag must not contain the ciphertext marker".into(),
            ));
        }
        if self.boundary.max_tree_depth == 0 {
            return Err(LockError::Config("max_tree_depth must be positive".into()));
        }
        if self.crypto.kdf_iterations == 0 {
            return Err(LockError::Config("kdf_iterations must be positive".into()));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(LockError::Config("sweep_interval_secs must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol() {
        let config = LockConfig::default();
        assert_eq!(config.boundary.lock_tag, "#private");
        assert_eq!(config.boundary.marker, '_');
        assert_eq!(config.crypto.kdf_iterations, 250_000);
        assert_eq!(config.cache.retention(), Duration::from_secs(604_800));
        assert_eq!(
            config.endpoints.push_and_poll_url(),
            "https://workflowy.com/push_and_poll"
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LockConfig::from_toml_str(
            r##"
            [boundary]
            lock_tag = "#secret"

            [crypto]
            kdf_iterations = 1000
            "##,
        )
        .unwrap();
        assert_eq!(config.boundary.lock_tag, "#secret");
        assert_eq!(config.boundary.marker, '_');
        assert_eq!(config.crypto.kdf_iterations, 1000);
        assert_eq!(config.endpoints.domain, "https://workflowy.com");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(LockConfig::from_toml_str("[boundary]\nlock_tag = \"\"").is_err());
        assert!(LockConfig::from_toml_str("[crypto]\nkdf_iterations = 0").is_err());
        assert!(LockConfig::from_toml_str("[boundary]\nlock_tag = \"_x\"").is_err());
        assert!(LockConfig::from_toml_str("not toml = = =").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locktree.toml");
        tokio::fs::write(&path, "[cache]\nretention_secs = 60\n")
            .await
            .unwrap();
        let config = LockConfig::load(&path).await.unwrap();
        assert_eq!(config.cache.retention_secs, 60);
    }
}
