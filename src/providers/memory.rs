//! In-memory Storage Provider
//!
//! A Dropbox-like store kept entirely in process memory. It backs the CLI
//! `--dry-run` mode and is the remote double used throughout the tests:
//! every call is recorded, session offsets are enforced the same way the real
//! service enforces them, and a single failure can be injected on the n-th
//! call of a given kind.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use super::{
    AccountInfo, CommitInfo, ProviderError, ProviderType, RemoteEntry, SessionCursor, StorageInfo,
    StorageProvider, WriteMode,
};
use crate::file_info::parent_folder;

/// Default quota of the in-memory account: 2 GiB
const DEFAULT_QUOTA: u64 = 2 * 1024 * 1024 * 1024;

/// Kind of remote call, used for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Connect,
    Put,
    SessionStart,
    SessionAppend,
    SessionFinish,
    CreateFolder,
    ListFolder,
    Exists,
    Download,
    StorageInfo,
}

/// A recorded remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Connect,
    Put { path: String, len: usize, mode: WriteMode },
    SessionStart { len: usize },
    SessionAppend { session_id: String, offset: u64, len: usize },
    SessionFinish { session_id: String, offset: u64, len: usize, path: String, mode: WriteMode },
    CreateFolder { path: String },
    ListFolder { path: String },
    Exists { path: String },
    Download { path: String },
    StorageInfo,
}

impl ProviderCall {
    pub fn kind(&self) -> CallKind {
        match self {
            ProviderCall::Connect => CallKind::Connect,
            ProviderCall::Put { .. } => CallKind::Put,
            ProviderCall::SessionStart { .. } => CallKind::SessionStart,
            ProviderCall::SessionAppend { .. } => CallKind::SessionAppend,
            ProviderCall::SessionFinish { .. } => CallKind::SessionFinish,
            ProviderCall::CreateFolder { .. } => CallKind::CreateFolder,
            ProviderCall::ListFolder { .. } => CallKind::ListFolder,
            ProviderCall::Exists { .. } => CallKind::Exists,
            ProviderCall::Download { .. } => CallKind::Download,
            ProviderCall::StorageInfo => CallKind::StorageInfo,
        }
    }

    /// Whether the call sends file bytes to the remote
    pub fn is_write(&self) -> bool {
        matches!(
            self.kind(),
            CallKind::Put | CallKind::SessionStart | CallKind::SessionAppend | CallKind::SessionFinish
        )
    }
}

#[derive(Debug)]
struct InjectedFailure {
    kind: CallKind,
    remaining: usize,
    message: String,
}

#[derive(Debug, Clone)]
struct StoredFile {
    path: String,
    content: Vec<u8>,
    modified: String,
}

/// In-memory Storage Provider
#[derive(Debug)]
pub struct MemoryProvider {
    /// lowercase path -> file (paths are case-insensitive, like Dropbox)
    files: BTreeMap<String, StoredFile>,
    /// lowercase path -> display path
    folders: BTreeMap<String, String>,
    /// session id -> bytes received so far
    sessions: HashMap<String, Vec<u8>>,
    calls: Vec<ProviderCall>,
    failure: Option<InjectedFailure>,
    next_session: u64,
    quota: u64,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            folders: BTreeMap::new(),
            sessions: HashMap::new(),
            calls: Vec::new(),
            failure: None,
            next_session: 1,
            quota: DEFAULT_QUOTA,
        }
    }

    /// Limit the total bytes the store accepts
    pub fn with_quota(mut self, quota: u64) -> Self {
        self.quota = quota;
        self
    }

    /// Make the `nth` (1-based) upcoming call of `kind` fail with a server error
    pub fn fail_on(&mut self, kind: CallKind, nth: usize, message: &str) {
        self.failure = Some(InjectedFailure {
            kind,
            remaining: nth.max(1),
            message: message.to_string(),
        });
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> &[ProviderCall] {
        &self.calls
    }

    /// Number of calls of a given kind
    pub fn call_count(&self, kind: CallKind) -> usize {
        self.calls.iter().filter(|c| c.kind() == kind).count()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Stored bytes of a file, if present
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(&key(path)).map(|f| f.content.as_slice())
    }

    /// Number of sessions started but never finished
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn record(&mut self, call: ProviderCall) -> Result<(), ProviderError> {
        let kind = call.kind();
        self.calls.push(call);

        let fire = match self.failure.as_mut() {
            Some(failure) if failure.kind == kind => {
                failure.remaining -= 1;
                failure.remaining == 0
            }
            _ => false,
        };
        if fire {
            let message = self.failure.take().map(|f| f.message).unwrap_or_default();
            return Err(ProviderError::ServerError(message));
        }
        Ok(())
    }

    fn folder_exists(&self, path: &str) -> bool {
        path == "/" || self.folders.contains_key(&key(path))
    }

    fn used(&self) -> u64 {
        self.files.values().map(|f| f.content.len() as u64).sum()
    }

    /// Create `path` and any missing ancestors
    fn create_folders_recursive(&mut self, path: &str) {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            self.folders
                .entry(key(&current))
                .or_insert_with(|| current.clone());
        }
    }

    /// Commit bytes to `path` with Dropbox write-mode semantics
    fn commit(&mut self, path: &str, content: Vec<u8>, mode: WriteMode) -> Result<RemoteEntry, ProviderError> {
        check_path(path)?;
        let k = key(path);

        if self.folders.contains_key(&k) {
            return Err(ProviderError::AlreadyExists(format!("path/conflict/folder: {}", path)));
        }

        let replaced = match self.files.get(&k) {
            Some(existing) if mode == WriteMode::Add && existing.content != content => {
                return Err(ProviderError::AlreadyExists(format!("path/conflict/file: {}", path)));
            }
            Some(existing) => existing.content.len() as u64,
            None => 0,
        };

        if self.used() - replaced + content.len() as u64 > self.quota {
            return Err(ProviderError::InsufficientSpace(format!("path/insufficient_space: {}", path)));
        }

        let parent = parent_folder(path);
        self.create_folders_recursive(&parent);

        let stored = StoredFile {
            path: path.to_string(),
            content,
            modified: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        };
        let entry = to_remote_entry(&stored);
        self.files.insert(k, stored);
        Ok(entry)
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn key(path: &str) -> String {
    path.trim_end_matches('/').to_lowercase()
}

fn check_path(path: &str) -> Result<(), ProviderError> {
    if !path.starts_with('/') || path == "/" || path.contains("//") {
        return Err(ProviderError::InvalidPath(path.to_string()));
    }
    Ok(())
}

fn name_of(path: &str) -> String {
    path.rsplit('/').next().unwrap_or_default().to_string()
}

fn to_remote_entry(file: &StoredFile) -> RemoteEntry {
    RemoteEntry {
        name: name_of(&file.path),
        path: file.path.clone(),
        is_dir: false,
        size: file.content.len() as u64,
        modified: Some(file.modified.clone()),
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Memory
    }

    fn display_name(&self) -> String {
        "Memory (dry run)".to_string()
    }

    async fn connect(&mut self) -> Result<AccountInfo, ProviderError> {
        self.record(ProviderCall::Connect)?;
        Ok(AccountInfo {
            name: "Dry Run".to_string(),
            email: "dry-run@localhost".to_string(),
            country: None,
            account_type: "memory".to_string(),
        })
    }

    async fn put(&mut self, path: &str, content: Bytes, mode: WriteMode) -> Result<RemoteEntry, ProviderError> {
        self.record(ProviderCall::Put { path: path.to_string(), len: content.len(), mode })?;
        let entry = self.commit(path, content.to_vec(), mode)?;
        info!("Stored {} ({} bytes) in memory", path, content.len());
        Ok(entry)
    }

    async fn session_start(&mut self, content: Bytes) -> Result<String, ProviderError> {
        self.record(ProviderCall::SessionStart { len: content.len() })?;
        let session_id = format!("mem-session-{}", self.next_session);
        self.next_session += 1;
        self.sessions.insert(session_id.clone(), content.to_vec());
        Ok(session_id)
    }

    async fn session_append(&mut self, cursor: &SessionCursor, content: Bytes) -> Result<(), ProviderError> {
        self.record(ProviderCall::SessionAppend {
            session_id: cursor.session_id.clone(),
            offset: cursor.offset,
            len: content.len(),
        })?;
        let buffer = self
            .sessions
            .get_mut(&cursor.session_id)
            .ok_or_else(|| ProviderError::SessionNotFound(cursor.session_id.clone()))?;
        if buffer.len() as u64 != cursor.offset {
            return Err(ProviderError::IncorrectOffset { correct_offset: buffer.len() as u64 });
        }
        buffer.extend_from_slice(&content);
        debug!("Session {} now holds {} bytes", cursor.session_id, buffer.len());
        Ok(())
    }

    async fn session_finish(
        &mut self,
        cursor: &SessionCursor,
        content: Bytes,
        commit: &CommitInfo,
    ) -> Result<RemoteEntry, ProviderError> {
        self.record(ProviderCall::SessionFinish {
            session_id: cursor.session_id.clone(),
            offset: cursor.offset,
            len: content.len(),
            path: commit.path.clone(),
            mode: commit.mode,
        })?;
        let received = self
            .sessions
            .get(&cursor.session_id)
            .ok_or_else(|| ProviderError::SessionNotFound(cursor.session_id.clone()))?;
        if received.len() as u64 != cursor.offset {
            return Err(ProviderError::IncorrectOffset { correct_offset: received.len() as u64 });
        }

        let mut full = received.clone();
        full.extend_from_slice(&content);
        let entry = self.commit(&commit.path, full, commit.mode)?;
        self.sessions.remove(&cursor.session_id);
        info!("Committed session {} to {}", cursor.session_id, commit.path);
        Ok(entry)
    }

    async fn create_folder(&mut self, path: &str) -> Result<(), ProviderError> {
        self.record(ProviderCall::CreateFolder { path: path.to_string() })?;
        check_path(path)?;
        let k = key(path);
        if self.folders.contains_key(&k) {
            return Err(ProviderError::AlreadyExists(format!("path/conflict/folder: {}", path)));
        }
        if self.files.contains_key(&k) {
            return Err(ProviderError::AlreadyExists(format!("path/conflict/file: {}", path)));
        }
        self.create_folders_recursive(path);
        Ok(())
    }

    async fn list_folder(&mut self, path: &str) -> Result<Vec<RemoteEntry>, ProviderError> {
        self.record(ProviderCall::ListFolder { path: path.to_string() })?;
        if !self.folder_exists(path) {
            return Err(ProviderError::NotFound(path.to_string()));
        }
        let parent_key = key(path);

        let folders = self
            .folders
            .values()
            .filter(|p| key(&parent_folder(p)) == parent_key)
            .map(|p| RemoteEntry::directory(name_of(p), p.clone()));
        let files = self
            .files
            .values()
            .filter(|f| key(&parent_folder(&f.path)) == parent_key)
            .map(to_remote_entry);

        Ok(folders.chain(files).collect())
    }

    async fn exists(&mut self, path: &str) -> Result<bool, ProviderError> {
        self.record(ProviderCall::Exists { path: path.to_string() })?;
        Ok(self.folder_exists(path) || self.files.contains_key(&key(path)))
    }

    async fn download(&mut self, path: &str) -> Result<Vec<u8>, ProviderError> {
        self.record(ProviderCall::Download { path: path.to_string() })?;
        self.files
            .get(&key(path))
            .map(|f| f.content.clone())
            .ok_or_else(|| ProviderError::NotFound(path.to_string()))
    }

    async fn storage_info(&mut self) -> Result<StorageInfo, ProviderError> {
        self.record(ProviderCall::StorageInfo)?;
        Ok(StorageInfo {
            used: self.used(),
            allocated: self.quota,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(session_id: &str, offset: u64) -> SessionCursor {
        SessionCursor {
            session_id: session_id.to_string(),
            offset,
        }
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let mut store = MemoryProvider::new();
        let id = store.session_start(Bytes::from_static(b"hello ")).await.unwrap();
        store.session_append(&cursor(&id, 6), Bytes::from_static(b"big ")).await.unwrap();
        let commit = CommitInfo { path: "/a/b.txt".to_string(), mode: WriteMode::Overwrite };
        let entry = store.session_finish(&cursor(&id, 10), Bytes::from_static(b"world"), &commit).await.unwrap();

        assert_eq!(entry.size, 15);
        assert_eq!(store.file("/A/B.txt"), Some(&b"hello big world"[..]));
        assert_eq!(store.open_sessions(), 0);
        assert!(store.exists("/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_incorrect_offset_rejected() {
        let mut store = MemoryProvider::new();
        let id = store.session_start(Bytes::from_static(b"1234")).await.unwrap();
        let err = store.session_append(&cursor(&id, 3), Bytes::from_static(b"5")).await.unwrap_err();
        assert!(matches!(err, ProviderError::IncorrectOffset { correct_offset: 4 }));
    }

    #[tokio::test]
    async fn test_add_mode_conflicts_only_on_different_content() {
        let mut store = MemoryProvider::new();
        store.put("/x.bin", Bytes::from_static(b"one"), WriteMode::Add).await.unwrap();
        store.put("/x.bin", Bytes::from_static(b"one"), WriteMode::Add).await.unwrap();
        let err = store.put("/x.bin", Bytes::from_static(b"two"), WriteMode::Add).await.unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists(_)));

        store.put("/x.bin", Bytes::from_static(b"two"), WriteMode::Overwrite).await.unwrap();
        assert_eq!(store.file("/x.bin"), Some(&b"two"[..]));
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let mut store = MemoryProvider::new();
        store.fail_on(CallKind::CreateFolder, 2, "boom");
        store.create_folder("/one").await.unwrap();
        let err = store.create_folder("/two").await.unwrap_err();
        assert_eq!(err.to_string(), "Server error: boom");
        store.create_folder("/two").await.unwrap();
        assert_eq!(store.call_count(CallKind::CreateFolder), 3);
    }

    #[tokio::test]
    async fn test_list_folder_direct_children_only() {
        let mut store = MemoryProvider::new();
        store.put("/docs/a.txt", Bytes::from_static(b"a"), WriteMode::Overwrite).await.unwrap();
        store.put("/docs/deep/b.txt", Bytes::from_static(b"b"), WriteMode::Overwrite).await.unwrap();

        let mut names: Vec<String> = store.list_folder("/docs").await.unwrap().into_iter().map(|e| e.name).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "deep"]);

        let root = store.list_folder("/").await.unwrap();
        assert_eq!(root.len(), 1);
        assert!(root[0].is_dir);

        assert!(matches!(store.list_folder("/missing").await, Err(ProviderError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_quota_enforced() {
        let mut store = MemoryProvider::new().with_quota(4);
        let err = store.put("/big", Bytes::from_static(b"12345"), WriteMode::Overwrite).await.unwrap_err();
        assert!(matches!(err, ProviderError::InsufficientSpace(_)));
        let info = store.storage_info().await.unwrap();
        assert_eq!(info, StorageInfo { used: 0, allocated: 4 });
    }
}
