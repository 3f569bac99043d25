//! Upload orchestration
//!
//! Delivers one byte buffer to a remote path. Buffers below the small-file
//! threshold go out as a single `put`; larger ones go through an upload
//! session:
//!
//! ```text
//! session_start(first chunk) ─► session_append(chunk @ offset)* ─► session_finish(tail, commit)
//! ```
//!
//! The finish call is the only step that makes an object visible at the
//! destination, so a failed session never leaves a partial file behind. No
//! retry and no session cleanup happen here: the first failing call ends the
//! upload, and an abandoned session is left for the provider to expire.

use bytes::Bytes;
use std::ops::Range;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::file_info::{parent_folder, validate_destination_path};
use crate::providers::{CommitInfo, ProviderError, SessionCursor, StorageProvider, WriteMode};
use crate::settings::UploadSettings;

/// Default session chunk size: 4 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Buffers smaller than this are sent with a single put: 150 MiB
pub const SMALL_FILE_THRESHOLD: u64 = 150 * 1024 * 1024;

/// Largest payload the remote accepts in one request: 150 MiB
pub const MAX_CHUNK_SIZE: u64 = 150 * 1024 * 1024;

/// Remote call an upload failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Put,
    SessionStart,
    SessionAppend,
    SessionFinish,
}

impl std::fmt::Display for UploadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadStage::Put => write!(f, "Upload"),
            UploadStage::SessionStart => write!(f, "Upload session start"),
            UploadStage::SessionAppend => write!(f, "Upload session append"),
            UploadStage::SessionFinish => write!(f, "Upload session finish"),
        }
    }
}

/// Upload error type
#[derive(Error, Debug)]
pub enum UploadError {
    /// Rejected before any remote call
    #[error("{0}")]
    Validation(String),

    #[error("Failed to create parent folder {path}: {source}")]
    FolderCreation {
        path: String,
        #[source]
        source: ProviderError,
    },

    #[error("Parent folder does not exist: {0}")]
    MissingFolder(String),

    #[error("{stage} failed at offset {offset}: {source}")]
    Transport {
        stage: UploadStage,
        offset: u64,
        #[source]
        source: ProviderError,
    },
}

impl UploadError {
    fn transport(stage: UploadStage, offset: u64) -> impl FnOnce(ProviderError) -> UploadError {
        move |source| UploadError::Transport { stage, offset, source }
    }
}

/// One upload attempt: bytes, destination and write policy
#[derive(Debug, Clone)]
pub struct UploadRequest {
    content: Bytes,
    destination_path: String,
    chunk_size: u64,
    overwrite: bool,
}

impl UploadRequest {
    /// Build a request, validating the destination path and chunk size
    pub fn new(
        content: impl Into<Bytes>,
        destination_path: &str,
        chunk_size: u64,
        overwrite: bool,
    ) -> Result<Self, UploadError> {
        validate_destination_path(destination_path).map_err(UploadError::Validation)?;
        if chunk_size == 0 {
            return Err(UploadError::Validation("Chunk size must be greater than zero".to_string()));
        }
        if chunk_size > MAX_CHUNK_SIZE {
            return Err(UploadError::Validation(format!(
                "Chunk size {} exceeds the {} byte request limit",
                chunk_size, MAX_CHUNK_SIZE
            )));
        }

        Ok(Self {
            content: content.into(),
            destination_path: destination_path.to_string(),
            chunk_size,
            overwrite,
        })
    }

    /// Build a request using the chunk size and overwrite policy from settings
    pub fn from_settings(
        content: impl Into<Bytes>,
        destination_path: &str,
        settings: &UploadSettings,
    ) -> Result<Self, UploadError> {
        Self::new(content, destination_path, settings.chunk_size, settings.overwrite_existing)
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn destination_path(&self) -> &str {
        &self.destination_path
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn write_mode(&self) -> WriteMode {
        WriteMode::from_overwrite(self.overwrite)
    }

    fn len(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Outcome of one upload attempt
///
/// An error detail is present exactly when the upload failed.
#[derive(Debug)]
pub struct UploadResult {
    error: Option<UploadError>,
}

impl UploadResult {
    pub fn success() -> Self {
        Self { error: None }
    }

    pub fn failure(error: UploadError) -> Self {
        Self { error: Some(error) }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Human-readable failure message
    pub fn error_detail(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }

    /// Typed failure, for callers that branch on the kind
    pub fn error(&self) -> Option<&UploadError> {
        self.error.as_ref()
    }
}

impl From<Result<(), UploadError>> for UploadResult {
    fn from(result: Result<(), UploadError>) -> Self {
        match result {
            Ok(()) => Self::success(),
            Err(e) => Self::failure(e),
        }
    }
}

/// State of an in-flight upload session
#[derive(Debug)]
struct UploadSession {
    session_id: String,
    /// Bytes acknowledged by the remote so far
    offset: u64,
}

impl UploadSession {
    fn cursor(&self) -> SessionCursor {
        SessionCursor {
            session_id: self.session_id.clone(),
            offset: self.offset,
        }
    }

    fn advance(&mut self, acknowledged: usize) {
        self.offset += acknowledged as u64;
    }
}

/// Byte ranges of the session calls for a buffer of `len` bytes
///
/// The start call carries the first chunk, every full chunk that does not
/// reach the end of the buffer becomes an append, and the finish call carries
/// whatever is left (empty when the start call already sent everything).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    pub start: Range<usize>,
    pub appends: Vec<Range<usize>>,
    pub finish: Range<usize>,
}

impl SessionPlan {
    pub fn new(len: usize, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let start = 0..chunk_size.min(len);

        let mut appends = Vec::new();
        let mut offset = start.end;
        loop {
            let end = offset.saturating_add(chunk_size).min(len);
            if end == len {
                return Self {
                    start,
                    appends,
                    finish: offset..len,
                };
            }
            appends.push(offset..end);
            offset = end;
        }
    }
}

/// Drives uploads against a storage provider
pub struct UploadOrchestrator<'p> {
    provider: &'p mut dyn StorageProvider,
    small_file_threshold: u64,
}

impl<'p> UploadOrchestrator<'p> {
    pub fn new(provider: &'p mut dyn StorageProvider) -> Self {
        Self {
            provider,
            small_file_threshold: SMALL_FILE_THRESHOLD,
        }
    }

    /// Override the size at which uploads switch to a session
    pub fn with_small_file_threshold(mut self, threshold: u64) -> Self {
        self.small_file_threshold = threshold;
        self
    }

    /// Upload a buffer, choosing a single put or a chunked session by size
    pub async fn upload(&mut self, request: &UploadRequest) -> UploadResult {
        let result = if request.len() < self.small_file_threshold {
            self.upload_direct(request).await
        } else {
            self.upload_session(request).await
        };

        match &result {
            Ok(()) => info!("Uploaded {} bytes to {}", request.len(), request.destination_path),
            Err(e) => warn!("Upload to {} failed: {}", request.destination_path, e),
        }
        result.into()
    }

    /// Make sure the destination's parent folder exists, then upload
    ///
    /// With `create_missing_folders` every ancestor is created from the root
    /// down; otherwise a missing parent aborts the upload. Either way no bytes
    /// are sent until the folder is known to exist.
    pub async fn route_upload(
        &mut self,
        request: &UploadRequest,
        create_missing_folders: bool,
    ) -> UploadResult {
        let parent = parent_folder(&request.destination_path);

        let prepared = if create_missing_folders {
            ensure_folder_exists(self.provider, &parent).await
        } else {
            self.require_folder(&parent).await
        };
        if let Err(e) = prepared {
            warn!("Upload to {} aborted: {}", request.destination_path, e);
            return UploadResult::failure(e);
        }

        self.upload(request).await
    }

    async fn require_folder(&mut self, path: &str) -> Result<(), UploadError> {
        if path == "/" {
            return Ok(());
        }
        match self.provider.exists(path).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(UploadError::MissingFolder(path.to_string())),
            Err(source) => Err(UploadError::FolderCreation {
                path: path.to_string(),
                source,
            }),
        }
    }

    async fn upload_direct(&mut self, request: &UploadRequest) -> Result<(), UploadError> {
        debug!(
            "Direct upload of {} bytes to {} (mode {})",
            request.len(),
            request.destination_path,
            request.write_mode()
        );
        self.provider
            .put(&request.destination_path, request.content.clone(), request.write_mode())
            .await
            .map_err(UploadError::transport(UploadStage::Put, 0))?;
        Ok(())
    }

    async fn upload_session(&mut self, request: &UploadRequest) -> Result<(), UploadError> {
        let content = &request.content;
        let plan = SessionPlan::new(content.len(), request.chunk_size as usize);

        let session_id = self
            .provider
            .session_start(content.slice(plan.start.clone()))
            .await
            .map_err(UploadError::transport(UploadStage::SessionStart, 0))?;
        let mut session = UploadSession {
            session_id,
            offset: 0,
        };
        session.advance(plan.start.len());

        info!(
            "Started upload session {} for {} ({} bytes, {} appends)",
            session.session_id,
            request.destination_path,
            content.len(),
            plan.appends.len()
        );

        for range in plan.appends {
            debug_assert_eq!(range.start as u64, session.offset);
            self.provider
                .session_append(&session.cursor(), content.slice(range.clone()))
                .await
                .map_err(UploadError::transport(UploadStage::SessionAppend, session.offset))?;
            session.advance(range.len());
            debug!("Session {} acknowledged {} bytes", session.session_id, session.offset);
        }

        let commit = CommitInfo {
            path: request.destination_path.clone(),
            mode: request.write_mode(),
        };
        self.provider
            .session_finish(&session.cursor(), content.slice(plan.finish), &commit)
            .await
            .map_err(UploadError::transport(UploadStage::SessionFinish, session.offset))?;

        info!("Finished upload session {} at {}", session.session_id, commit.path);
        Ok(())
    }
}

/// Create `path` and each missing ancestor, one folder per segment from the
/// root down. Folders that already exist are fine; any other error aborts.
pub async fn ensure_folder_exists(
    provider: &mut dyn StorageProvider,
    path: &str,
) -> Result<(), UploadError> {
    let mut current = String::new();
    for component in path.split('/').filter(|c| !c.is_empty()) {
        current.push('/');
        current.push_str(component);

        match provider.create_folder(&current).await {
            Ok(()) => info!("Created folder: {}", current),
            Err(ProviderError::AlreadyExists(_)) => {}
            Err(source) => {
                return Err(UploadError::FolderCreation {
                    path: current,
                    source,
                });
            }
        }
    }
    Ok(())
}
