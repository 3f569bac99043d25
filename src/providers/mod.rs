//! Storage Providers Module
//!
//! This module provides the abstraction over the remote store that uploads are
//! delivered to. Every backend implements the `StorageProvider` trait, so the
//! upload orchestrator only ever sees put/session/folder primitives.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │           StorageProvider Trait             │
//! │  put, session start/append/finish, mkdir    │
//! └─────────────────────────────────────────────┘
//!                      │
//!              ┌───────┴────────┐
//!              ▼                ▼
//!         ┌─────────┐      ┌────────┐
//!         │ Dropbox │      │ Memory │
//!         └─────────┘      └────────┘
//! ```

pub mod types;
pub mod oauth2;
pub mod dropbox;
pub mod memory;

pub use types::*;
pub use dropbox::{DropboxConfig, DropboxProvider};
pub use memory::{CallKind, MemoryProvider, ProviderCall};
pub use oauth2::{OAuth2Manager, OAuthConfig};

use async_trait::async_trait;
use bytes::Bytes;

/// Unified remote-storage capability
///
/// Upload bodies are `Bytes` so chunks of one buffer are handed over without
/// copying.
///
/// Calls are issued one at a time by a single owner; implementations do not
/// need to handle concurrent sessions on the same instance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get the provider type identifier
    fn provider_type(&self) -> ProviderType;

    /// Get display name for this provider instance
    fn display_name(&self) -> String;

    /// Verify credentials and return the connected account
    async fn connect(&mut self) -> Result<AccountInfo, ProviderError>;

    /// Single-shot write of a whole object
    async fn put(
        &mut self,
        path: &str,
        content: Bytes,
        mode: WriteMode,
    ) -> Result<RemoteEntry, ProviderError>;

    /// Open an upload session with its first bytes; returns the session id
    async fn session_start(&mut self, content: Bytes) -> Result<String, ProviderError>;

    /// Append bytes to an open session at `cursor.offset`
    async fn session_append(
        &mut self,
        cursor: &SessionCursor,
        content: Bytes,
    ) -> Result<(), ProviderError>;

    /// Send the final bytes and atomically commit the session to `commit.path`
    async fn session_finish(
        &mut self,
        cursor: &SessionCursor,
        content: Bytes,
        commit: &CommitInfo,
    ) -> Result<RemoteEntry, ProviderError>;

    /// Create a single folder. An existing folder yields `ProviderError::AlreadyExists`.
    async fn create_folder(&mut self, path: &str) -> Result<(), ProviderError>;

    /// List files and folders directly under `path` ("/" is the root)
    async fn list_folder(&mut self, path: &str) -> Result<Vec<RemoteEntry>, ProviderError>;

    /// Check if a file or folder exists at `path`
    async fn exists(&mut self, path: &str) -> Result<bool, ProviderError>;

    /// Download a file to memory
    async fn download(&mut self, path: &str) -> Result<Vec<u8>, ProviderError>;

    /// Get space usage for the account
    async fn storage_info(&mut self) -> Result<StorageInfo, ProviderError>;
}
