//! Shared types for storage providers
//!
//! This module contains the types shared by every remote store implementation:
//! write modes, upload session cursors, file entry representations, account
//! information and the provider error type.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Supported storage provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Dropbox API v2 (OAuth2 refresh token)
    Dropbox,
    /// In-process store, used for dry runs and tests
    Memory,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::Dropbox => write!(f, "Dropbox"),
            ProviderType::Memory => write!(f, "Memory"),
        }
    }
}

/// What happens when an object already exists at the target path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Replace the existing object
    #[default]
    Overwrite,
    /// Never replace; a conflicting object makes the write fail
    Add,
}

impl WriteMode {
    /// Map the user-facing "overwrite existing" toggle to a write mode
    pub fn from_overwrite(overwrite: bool) -> Self {
        if overwrite {
            WriteMode::Overwrite
        } else {
            WriteMode::Add
        }
    }

    /// Tag used on the wire (`"overwrite"` / `"add"`)
    pub fn as_tag(&self) -> &'static str {
        match self {
            WriteMode::Overwrite => "overwrite",
            WriteMode::Add => "add",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Position inside a remote upload session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCursor {
    /// Opaque session token issued by the remote on session start
    pub session_id: String,
    /// Bytes the remote has accepted so far
    pub offset: u64,
}

/// Commit descriptor sent with the final chunk of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub path: String,
    pub mode: WriteMode,
}

/// Remote file/directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// File or directory name
    pub name: String,
    /// Full path from root, display casing
    pub path: String,
    /// Whether this is a directory
    pub is_dir: bool,
    /// File size in bytes (0 for directories)
    pub size: u64,
    /// Last server modification time (ISO 8601 string)
    pub modified: Option<String>,
}

impl RemoteEntry {
    /// Create a new directory entry
    pub fn directory(name: String, path: String) -> Self {
        Self {
            name,
            path,
            is_dir: true,
            size: 0,
            modified: None,
        }
    }

    /// Create a new file entry
    pub fn file(name: String, path: String, size: u64) -> Self {
        Self {
            name,
            path,
            is_dir: false,
            size,
            modified: None,
        }
    }
}

/// Connected account details
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Display name ("Given Surname")
    pub name: String,
    pub email: String,
    pub country: Option<String>,
    /// basic / pro / business
    pub account_type: String,
}

/// Storage quota information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    /// Bytes used
    pub used: u64,
    /// Bytes allocated to the account
    pub allocated: u64,
}

impl StorageInfo {
    /// Bytes still available
    pub fn free(&self) -> u64 {
        self.allocated.saturating_sub(self.used)
    }
}

/// Provider error type
///
/// Each remote failure mode has its own variant so callers can branch on the
/// kind (folder creation treats `AlreadyExists` as success).
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Not connected to Dropbox")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    #[error("Insufficient space: {0}")]
    InsufficientSpace(String),

    #[error("Incorrect upload offset, remote expected {correct_offset}")]
    IncorrectOffset { correct_offset: u64 },

    #[error("Upload session not found: {0}")]
    SessionNotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("{0}")]
    Other(String),
}

/// Maximum length kept from a remote error body
const MAX_API_ERROR_LEN: usize = 300;

/// Collapse whitespace and cap the length of a remote error body so it can be
/// shown to the user and written to the upload history.
pub fn sanitize_api_error(body: &str) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_API_ERROR_LEN {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(MAX_API_ERROR_LEN).collect();
    format!("{}...", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_mode_from_overwrite() {
        assert_eq!(WriteMode::from_overwrite(true), WriteMode::Overwrite);
        assert_eq!(WriteMode::from_overwrite(false), WriteMode::Add);
        assert_eq!(WriteMode::Add.as_tag(), "add");
        assert_eq!(serde_json::to_string(&WriteMode::Overwrite).unwrap(), "\"overwrite\"");
    }

    #[test]
    fn test_storage_info_free_saturates() {
        let info = StorageInfo { used: 10, allocated: 4 };
        assert_eq!(info.free(), 0);
        let info = StorageInfo { used: 4, allocated: 10 };
        assert_eq!(info.free(), 6);
    }

    #[test]
    fn test_sanitize_api_error() {
        assert_eq!(sanitize_api_error("  path/not_found/..\n\t "), "path/not_found/..");

        let long = "x".repeat(1000);
        let sanitized = sanitize_api_error(&long);
        assert!(sanitized.ends_with("..."));
        assert_eq!(sanitized.len(), MAX_API_ERROR_LEN + 3);
    }
}
