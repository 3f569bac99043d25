// Dropbox Uploader - browse, preview and upload files to Dropbox
// Large files go through chunked upload sessions

pub mod app_state;
pub mod file_info;
pub mod preview;
pub mod providers;
pub mod settings;
pub mod upload;
pub mod upload_history;

pub use app_state::{AppState, BatchSummary, FolderListing, PendingFile, SpaceUsage};
pub use providers::{DropboxConfig, DropboxProvider, MemoryProvider, ProviderError, StorageProvider};
pub use settings::{DropboxCredentials, SettingsError, UploadSettings};
pub use upload::{UploadError, UploadOrchestrator, UploadRequest, UploadResult};
pub use upload_history::{HistoryEntry, UploadHistory, UploadStatus};

use tracing::Level;

/// Install the stderr log subscriber: warnings by default, `-v` for info,
/// `-vv` and above for debug.
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };

    // A subscriber may already be installed (tests, embedding apps)
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
