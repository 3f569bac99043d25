//! Application State - one uploader session
//!
//! Owns the settings, the upload history, the folder being browsed and the
//! connected remote store. A session starts unauthenticated; `connect` verifies
//! the credentials and `logout` returns to the initial state.

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::file_info::{
    format_size, is_valid_file_size, is_valid_file_type, join_remote_path, mime_type, normalize_path,
    parent_folder,
};
use crate::providers::{AccountInfo, ProviderError, RemoteEntry, StorageInfo, StorageProvider};
use crate::settings::{validate_settings, SettingsError, UploadSettings};
use crate::upload::{ensure_folder_exists, UploadError, UploadOrchestrator, UploadRequest, UploadResult};
use crate::upload_history::{HistoryEntry, UploadHistory, UploadStatus};

/// A local file queued for upload
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub name: String,
    pub content: Bytes,
}

impl PendingFile {
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn mime_type(&self) -> String {
        mime_type(&self.name)
    }
}

/// Folder contents split into folders and files, each sorted by name
#[derive(Debug, Clone, Default, Serialize)]
pub struct FolderListing {
    pub path: String,
    pub folders: Vec<RemoteEntry>,
    pub files: Vec<RemoteEntry>,
}

impl FolderListing {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }
}

/// Account space usage, ready for display
#[derive(Debug, Clone, Serialize)]
pub struct SpaceUsage {
    pub used: u64,
    pub allocated: u64,
    pub free: u64,
    pub used_formatted: String,
    pub allocated_formatted: String,
    pub free_formatted: String,
    /// 0.0 - 100.0
    pub percentage: f64,
}

impl From<StorageInfo> for SpaceUsage {
    fn from(info: StorageInfo) -> Self {
        let percentage = if info.allocated > 0 {
            info.used as f64 / info.allocated as f64 * 100.0
        } else {
            0.0
        };
        Self {
            used: info.used,
            allocated: info.allocated,
            free: info.free(),
            used_formatted: format_size(info.used),
            allocated_formatted: format_size(info.allocated),
            free_formatted: format_size(info.free()),
            percentage,
        }
    }
}

/// Counts for one batch upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn message(&self) -> String {
        if self.succeeded == self.total {
            format!("Successfully uploaded all {} files to Dropbox!", self.succeeded)
        } else if self.succeeded > 0 {
            format!(
                "Uploaded {} out of {} files. {} files failed.",
                self.succeeded, self.total, self.failed
            )
        } else {
            "Failed to upload any files. Please check the errors and try again.".to_string()
        }
    }
}

pub struct AppState {
    settings: UploadSettings,
    history: UploadHistory,
    current_folder: String,
    provider: Option<Box<dyn StorageProvider>>,
    account: Option<AccountInfo>,
}

impl AppState {
    pub fn new(settings: UploadSettings) -> Self {
        Self {
            settings,
            history: UploadHistory::new(),
            current_folder: "/".to_string(),
            provider: None,
            account: None,
        }
    }

    /// Verify the provider's credentials and keep it as the active store.
    /// Any previous connection is dropped first, so on failure the state is
    /// unauthenticated.
    pub async fn connect(&mut self, mut provider: Box<dyn StorageProvider>) -> Result<AccountInfo, ProviderError> {
        self.provider = None;
        self.account = None;

        let account = provider.connect().await?;
        info!("Authenticated with {} as {}", provider.display_name(), account.email);

        self.provider = Some(provider);
        self.account = Some(account.clone());
        Ok(account)
    }

    /// Drop the connection and reset the session
    pub fn logout(&mut self) {
        self.provider = None;
        self.account = None;
        self.current_folder = "/".to_string();
        self.history.clear();
        info!("Logged out");
    }

    pub fn is_authenticated(&self) -> bool {
        self.provider.is_some()
    }

    pub fn account(&self) -> Option<&AccountInfo> {
        self.account.as_ref()
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Replace the settings after validating them
    pub fn update_settings(&mut self, settings: UploadSettings) -> Result<(), SettingsError> {
        validate_settings(&settings)?;
        self.settings = settings;
        Ok(())
    }

    pub fn history(&self) -> &UploadHistory {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn current_folder(&self) -> &str {
        &self.current_folder
    }

    pub fn set_current_folder(&mut self, path: &str) {
        self.current_folder = normalize_path(path);
    }

    /// Move to the parent of the current folder
    pub fn go_up(&mut self) {
        self.current_folder = parent_folder(&self.current_folder);
    }

    fn provider_mut(&mut self) -> Result<&mut (dyn StorageProvider + 'static), ProviderError> {
        self.provider.as_deref_mut().ok_or(ProviderError::NotConnected)
    }

    pub async fn list_current_folder(&mut self) -> Result<FolderListing, ProviderError> {
        let path = self.current_folder.clone();
        let entries = self.provider_mut()?.list_folder(&path).await?;

        let (mut folders, mut files): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.is_dir);
        folders.sort_by_key(|e| e.name.to_lowercase());
        files.sort_by_key(|e| e.name.to_lowercase());

        Ok(FolderListing { path, folders, files })
    }

    /// Create a folder under the current folder, along with any missing
    /// parents. An existing folder counts as created.
    pub async fn create_folder(&mut self, name: &str) -> Result<String, ProviderError> {
        let path = join_remote_path(&self.current_folder, name);
        let provider = self.provider_mut()?;

        ensure_folder_exists(provider, &path).await.map_err(|e| match e {
            UploadError::FolderCreation { source, .. } => source,
            other => ProviderError::Other(other.to_string()),
        })?;
        Ok(path)
    }

    pub async fn download(&mut self, remote_path: &str) -> Result<Vec<u8>, ProviderError> {
        let path = normalize_path(remote_path);
        self.provider_mut()?.download(&path).await
    }

    pub async fn space_usage(&mut self) -> Result<SpaceUsage, ProviderError> {
        let info = self.provider_mut()?.storage_info().await?;
        Ok(SpaceUsage::from(info))
    }

    /// Upload files into `target_folder`, one at a time and in order.
    ///
    /// Every file ends up in the history, including those rejected by the
    /// type and size checks. `on_progress` is called after each file with the
    /// number done, the total and the new history entry.
    pub async fn upload_batch<F>(
        &mut self,
        target_folder: &str,
        files: &[PendingFile],
        mut on_progress: F,
    ) -> Result<BatchSummary, ProviderError>
    where
        F: FnMut(usize, usize, &HistoryEntry),
    {
        let target = normalize_path(target_folder);
        let total = files.len();
        let mut succeeded = 0;

        let provider = self.provider.as_deref_mut().ok_or(ProviderError::NotConnected)?;
        let settings = &self.settings;
        let history = &mut self.history;

        for (index, file) in files.iter().enumerate() {
            let target_path = join_remote_path(&target, &file.name);
            let size = file.size();

            let entry = if !is_valid_file_type(&file.name, &settings.allowed_extensions) {
                warn!("Rejected {}: file type not allowed", file.name);
                history.record_failure(&file.name, size, &target_path, "File type not allowed")
            } else if !is_valid_file_size(size, settings.max_file_size_mb) {
                warn!("Rejected {}: {} exceeds the size limit", file.name, format_size(size));
                let message = format!(
                    "File exceeds maximum size limit of {} MB",
                    settings.max_file_size_mb
                );
                history.record_failure(&file.name, size, &target_path, &message)
            } else {
                debug!(
                    "Uploading {} ({}, {}) to {}",
                    file.name,
                    file.mime_type(),
                    format_size(size),
                    target_path
                );
                let result = match UploadRequest::from_settings(file.content.clone(), &target_path, settings) {
                    Ok(request) => {
                        UploadOrchestrator::new(&mut *provider)
                            .with_small_file_threshold(settings.small_file_threshold)
                            .route_upload(&request, settings.create_folders_if_not_exist)
                            .await
                    }
                    Err(e) => UploadResult::failure(e),
                };
                history.record(&file.name, size, &target_path, &result)
            };

            if entry.status == UploadStatus::Success {
                succeeded += 1;
            }
            on_progress(index + 1, total, entry);
        }

        let summary = BatchSummary {
            total,
            succeeded,
            failed: total - succeeded,
        };
        info!("{}", summary.message());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CallKind, MemoryProvider, MockStorageProvider, WriteMode};

    async fn connected(store: MemoryProvider, settings: UploadSettings) -> AppState {
        let mut state = AppState::new(settings);
        state.connect(Box::new(store)).await.unwrap();
        state
    }

    #[tokio::test]
    async fn test_failed_connect_stays_unauthenticated() {
        let mut mock = MockStorageProvider::new();
        mock.expect_connect()
            .returning(|| Err(ProviderError::AuthenticationFailed("invalid_access_token".to_string())));
        mock.expect_display_name().returning(|| "Mock".to_string());

        let mut state = AppState::new(UploadSettings::default());
        assert!(state.connect(Box::new(mock)).await.is_err());
        assert!(!state.is_authenticated());
        assert!(matches!(state.list_current_folder().await, Err(ProviderError::NotConnected)));
    }

    #[tokio::test]
    async fn test_failed_reconnect_drops_previous_connection() {
        let mut state = connected(MemoryProvider::new(), UploadSettings::default()).await;
        assert!(state.is_authenticated());

        let mut mock = MockStorageProvider::new();
        mock.expect_connect()
            .returning(|| Err(ProviderError::AuthenticationFailed("invalid_access_token".to_string())));

        assert!(state.connect(Box::new(mock)).await.is_err());
        assert!(!state.is_authenticated());
        assert!(state.account().is_none());
        assert!(matches!(state.space_usage().await, Err(ProviderError::NotConnected)));
    }

    #[tokio::test]
    async fn test_navigation_and_listing() {
        let mut store = MemoryProvider::new();
        store.put("/Docs/b.txt", Bytes::from_static(b"b"), WriteMode::Overwrite).await.unwrap();
        store.put("/Docs/A.txt", Bytes::from_static(b"a"), WriteMode::Overwrite).await.unwrap();
        store.create_folder("/Docs/zeta").await.unwrap();
        store.create_folder("/Docs/Alpha").await.unwrap();
        let mut state = connected(store, UploadSettings::default()).await;

        state.set_current_folder("docs\\");
        assert_eq!(state.current_folder(), "/docs/");
        let listing = state.list_current_folder().await.unwrap();
        let folders: Vec<&str> = listing.folders.iter().map(|e| e.name.as_str()).collect();
        let files: Vec<&str> = listing.files.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(folders, vec!["Alpha", "zeta"]);
        assert_eq!(files, vec!["A.txt", "b.txt"]);

        state.set_current_folder("/Docs/zeta");
        assert!(state.list_current_folder().await.unwrap().is_empty());
        state.go_up();
        assert_eq!(state.current_folder(), "/Docs");
        state.go_up();
        assert_eq!(state.current_folder(), "/");
    }

    #[tokio::test]
    async fn test_create_folder_twice_is_fine() {
        let mut state = connected(MemoryProvider::new(), UploadSettings::default()).await;
        state.set_current_folder("/projects");
        assert_eq!(state.create_folder("2024/q1").await.unwrap(), "/projects/2024/q1");
        assert_eq!(state.create_folder("2024/q1").await.unwrap(), "/projects/2024/q1");
        state.set_current_folder("/projects/2024");
        assert_eq!(state.list_current_folder().await.unwrap().folders.len(), 1);
    }

    #[tokio::test]
    async fn test_upload_batch_records_every_file() {
        let settings = UploadSettings {
            max_file_size_mb: 1,
            allowed_extensions: ".txt, .bin".to_string(),
            chunk_size: 256 * 1024,
            small_file_threshold: 512 * 1024,
            ..UploadSettings::default()
        };
        let mut state = connected(MemoryProvider::new(), settings).await;

        let files = vec![
            PendingFile::new("notes.txt", b"hello".to_vec()),
            PendingFile::new("tool.exe", vec![0u8; 10]),
            PendingFile::new("huge.bin", vec![1u8; 2 * 1024 * 1024]),
            PendingFile::new("big.bin", vec![7u8; 900 * 1024]),
        ];
        let mut progress = Vec::new();
        let summary = state
            .upload_batch("uploads/today", &files, |done, total, entry| {
                progress.push((done, total, entry.file_name.clone()));
            })
            .await
            .unwrap();

        assert_eq!(summary, BatchSummary { total: 4, succeeded: 2, failed: 2 });
        assert_eq!(summary.message(), "Uploaded 2 out of 4 files. 2 files failed.");
        assert_eq!(progress.len(), 4);
        assert_eq!(progress[3], (4, 4, "big.bin".to_string()));

        let entries: Vec<_> = state.history().entries().collect();
        assert_eq!(entries[0].file_name, "big.bin");
        assert_eq!(entries[0].target_path, "/uploads/today/big.bin");
        assert_eq!(entries[0].status, UploadStatus::Success);
        assert_eq!(entries[1].error_message.as_deref(), Some("File exceeds maximum size limit of 1 MB"));
        assert_eq!(entries[2].error_message.as_deref(), Some("File type not allowed"));

        assert_eq!(state.download("/uploads/today/big.bin").await.unwrap(), vec![7u8; 900 * 1024]);
    }

    #[tokio::test]
    async fn test_upload_batch_without_folder_creation() {
        let settings = UploadSettings {
            create_folders_if_not_exist: false,
            ..UploadSettings::default()
        };
        let mut state = connected(MemoryProvider::new(), settings).await;

        let files = vec![PendingFile::new("a.txt", b"a".to_vec())];
        let summary = state.upload_batch("/missing", &files, |_, _, _| {}).await.unwrap();

        assert_eq!(summary.succeeded, 0);
        assert_eq!(
            summary.message(),
            "Failed to upload any files. Please check the errors and try again."
        );
        let entry = state.history().entries().next().unwrap();
        assert_eq!(entry.error_message.as_deref(), Some("Parent folder does not exist: /missing"));
    }

    #[tokio::test]
    async fn test_batch_continues_after_transport_failure() {
        let mut store = MemoryProvider::new();
        store.fail_on(CallKind::Put, 1, "timeout");
        let mut state = connected(store, UploadSettings::default()).await;

        let files = vec![
            PendingFile::new("first.txt", b"1".to_vec()),
            PendingFile::new("second.txt", b"2".to_vec()),
        ];
        let summary = state.upload_batch("/", &files, |_, _, _| {}).await.unwrap();

        assert_eq!(summary, BatchSummary { total: 2, succeeded: 1, failed: 1 });
        let failed = state.history().entries().last().unwrap();
        assert_eq!(failed.file_name, "first.txt");
        assert_eq!(failed.error_message.as_deref(), Some("Upload failed at offset 0: Server error: timeout"));
    }

    #[tokio::test]
    async fn test_space_usage_and_logout() {
        let mut store = MemoryProvider::new().with_quota(1000);
        store.put("/a.bin", Bytes::from(vec![0u8; 250]), WriteMode::Overwrite).await.unwrap();
        let mut state = connected(store, UploadSettings::default()).await;

        let usage = state.space_usage().await.unwrap();
        assert_eq!(usage.used_formatted, "250 B");
        assert_eq!(usage.free, 750);
        assert_eq!(usage.free_formatted, "750 B");
        assert!((usage.percentage - 25.0).abs() < f64::EPSILON);

        state.upload_batch("/", &[PendingFile::new("b.txt", vec![1u8])], |_, _, _| {}).await.unwrap();
        state.set_current_folder("/x");
        state.logout();

        assert!(!state.is_authenticated());
        assert!(state.account().is_none());
        assert!(state.history().is_empty());
        assert_eq!(state.current_folder(), "/");
    }

    #[test]
    fn test_pending_file_type() {
        let file = PendingFile::new("scan.PDF", b"%PDF".to_vec());
        assert_eq!(file.size(), 4);
        assert_eq!(file.mime_type(), "application/pdf");
        assert_eq!(PendingFile::new("blob.zzz", vec![0u8]).mime_type(), "application/octet-stream");
    }

    #[test]
    fn test_batch_summary_messages() {
        let all = BatchSummary { total: 3, succeeded: 3, failed: 0 };
        assert_eq!(all.message(), "Successfully uploaded all 3 files to Dropbox!");
        assert!(all.all_succeeded());
    }

    #[test]
    fn test_update_settings_validates() {
        let mut state = AppState::new(UploadSettings::default());
        let bad = UploadSettings { chunk_size: 0, ..UploadSettings::default() };
        assert!(state.update_settings(bad).is_err());
        assert_eq!(state.settings().chunk_size, crate::upload::DEFAULT_CHUNK_SIZE);
    }
}
