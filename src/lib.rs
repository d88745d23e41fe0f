//! # locktree
//!
//! Tag-triggered client-side encryption for a synchronized outline tree.
//!
//! Any node whose name carries the lock tag (default `#private`) becomes an
//! encryption boundary: the names and descriptions of everything below it
//! are encrypted before they leave the client and decrypted when they come
//! back. The server only ever stores ciphertext for locked subtrees, while
//! the web client keeps working on plaintext.
//!
//! ## Layout
//!
//! - [`crypto`]: password-based AES-256-GCM envelopes.
//! - [`encrypter`]: marker convention, loaded secret, decryption cache.
//! - [`store`]: the client's view of the tree and lock-state derivation.
//! - [`codec`] and [`protocol`]: form bodies and typed sync payloads.
//! - [`transform`]: per-operation encrypt/decrypt plus boundary detection.
//! - [`reencrypt`]: rewriting whole subtrees when a boundary moves.
//! - [`interceptor`]: the coordinator that sits between client and network.
//!
//! ## Public API
//!
//! Embedders construct an [`Encrypter`] over a [`KeyValueStore`], hand it to
//! an [`Interceptor`] together with a [`Transport`] and a [`Host`], and route
//! every client request through [`Interceptor::fetch`].

pub mod cache;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod encrypter;
pub mod error;
pub mod host;
pub mod interceptor;
pub(crate) mod keys;
pub mod protocol;
pub mod reencrypt;
pub mod session;
pub mod storage;
pub mod store;
pub mod transform;

pub use cache::DecryptionCache;
pub use config::LockConfig;
pub use crypto::{decrypt, encrypt, Cipher};
pub use encrypter::{Encrypter, FieldCipher};
pub use error::{LockError, LockResult};
pub use host::{Host, HttpRequest, HttpResponse, Method, Transport};
pub use interceptor::Interceptor;
pub use keys::{is_valid_secret, Secret};
pub use reencrypt::{ReencryptFlags, SubtreeJob};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore};
pub use store::{Node, NodeId, NodePatch, NodeStore};
pub use transform::Direction;
