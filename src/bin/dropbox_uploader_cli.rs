//! Dropbox Uploader CLI
//!
//! Usage:
//!   dropbox-uploader connect                      Show account and space usage
//!   dropbox-uploader ls [path]                    List a folder
//!   dropbox-uploader mkdir <path>                 Create a folder (with parents)
//!   dropbox-uploader put <files...> --to <dir>    Upload files
//!   dropbox-uploader get <remote> [local]         Download a file
//!   dropbox-uploader preview <file>               Print an HTML preview of a local file
//!   dropbox-uploader settings show|set            Show or change upload settings

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use dropbox_uploader::file_info::{file_icon, format_size, mime_type};
use dropbox_uploader::preview::render_preview;
use dropbox_uploader::settings::{self, credentials_path, load_settings, save_settings};
use dropbox_uploader::{
    init_tracing, AppState, DropboxCredentials, DropboxProvider, MemoryProvider, PendingFile, StorageProvider,
    UploadSettings, UploadStatus,
};

const MB: u64 = 1024 * 1024;

#[derive(Parser)]
#[command(
    name = "dropbox-uploader",
    about = "Dropbox Uploader - browse, preview and upload files to Dropbox",
    version,
    long_about = "Large files are sent in chunks through Dropbox upload sessions.\nCredentials come from flags, DROPBOX_* environment variables or the saved credentials file."
)]
struct Cli {
    #[command(flatten)]
    credentials: CredentialArgs,

    /// Use an in-memory store instead of Dropbox
    #[arg(long, global = true)]
    dry_run: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CredentialArgs {
    /// Dropbox app key
    #[arg(long, env = "DROPBOX_APP_KEY", global = true, hide_env_values = true)]
    app_key: Option<String>,

    /// Dropbox app secret
    #[arg(long, env = "DROPBOX_APP_SECRET", global = true, hide_env_values = true)]
    app_secret: Option<String>,

    /// Long-lived refresh token
    #[arg(long, env = "DROPBOX_REFRESH_TOKEN", global = true, hide_env_values = true)]
    refresh_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify credentials and show account details
    Connect,
    /// List a Dropbox folder
    Ls {
        /// Remote folder (default: /)
        #[arg(default_value = "/")]
        path: String,
    },
    /// Create a folder, including missing parents
    Mkdir {
        path: String,
    },
    /// Upload local files
    Put {
        /// Local files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Target folder in Dropbox
        #[arg(long, default_value = "/")]
        to: String,
        /// Upload session chunk size in MB
        #[arg(long)]
        chunk_size_mb: Option<u64>,
        /// Fail instead of replacing existing files
        #[arg(long)]
        no_overwrite: bool,
        /// Fail when the target folder does not exist
        #[arg(long)]
        no_create_folders: bool,
        /// Largest file accepted, in MB
        #[arg(long)]
        max_size_mb: Option<u64>,
        /// Comma-separated extensions (".pdf,.png") or "*"
        #[arg(long)]
        allowed_extensions: Option<String>,
    },
    /// Download a file
    Get {
        /// Remote file path
        remote: String,
        /// Local destination (default: remote file name)
        local: Option<PathBuf>,
    },
    /// Print the HTML preview of a local file
    Preview {
        file: PathBuf,
    },
    /// Show or change upload settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print current settings
    Show,
    /// Change and save settings
    Set(SettingsArgs),
}

#[derive(Args)]
struct SettingsArgs {
    #[arg(long)]
    max_file_size_mb: Option<u64>,
    #[arg(long)]
    allowed_extensions: Option<String>,
    #[arg(long)]
    chunk_size_mb: Option<u64>,
    #[arg(long)]
    small_file_threshold_mb: Option<u64>,
    #[arg(long)]
    create_folders: Option<bool>,
    #[arg(long)]
    overwrite: Option<bool>,
    #[arg(long)]
    save_credentials: Option<bool>,
}

impl SettingsArgs {
    fn apply(&self, settings: &mut UploadSettings) {
        if let Some(v) = self.max_file_size_mb {
            settings.max_file_size_mb = v;
        }
        if let Some(v) = &self.allowed_extensions {
            settings.allowed_extensions = v.clone();
        }
        if let Some(v) = self.chunk_size_mb {
            settings.chunk_size = v.saturating_mul(MB);
        }
        if let Some(v) = self.small_file_threshold_mb {
            settings.small_file_threshold = v.saturating_mul(MB);
        }
        if let Some(v) = self.create_folders {
            settings.create_folders_if_not_exist = v;
        }
        if let Some(v) = self.overwrite {
            settings.overwrite_existing = v;
        }
        if let Some(v) = self.save_credentials {
            settings.save_credentials = v;
        }
    }
}

/// Credentials from flags or env, falling back to the saved file.
/// The flag says whether they came from the command line.
fn resolve_credentials(args: &CredentialArgs) -> Result<(DropboxCredentials, bool)> {
    let from_args = DropboxCredentials::new(
        args.app_key.as_deref().unwrap_or_default(),
        args.app_secret.as_deref().unwrap_or_default(),
        args.refresh_token.as_deref().unwrap_or_default(),
    );
    if from_args.is_complete() {
        return Ok((from_args, true));
    }

    let path = credentials_path();
    if path.exists() {
        let saved = DropboxCredentials::load_from(&path)
            .with_context(|| format!("Failed to read saved credentials from {}", path.display()))?;
        if saved.is_complete() {
            return Ok((saved, false));
        }
    }

    bail!("Missing Dropbox credentials: pass --app-key, --app-secret and --refresh-token or set DROPBOX_APP_KEY, DROPBOX_APP_SECRET and DROPBOX_REFRESH_TOKEN")
}

async fn connect_state(cli: &Cli, settings: UploadSettings) -> Result<AppState> {
    let mut state = AppState::new(settings);

    if cli.dry_run {
        state.connect(Box::new(MemoryProvider::new())).await?;
        return Ok(state);
    }

    let (credentials, from_args) = resolve_credentials(&cli.credentials)?;
    let provider: Box<dyn StorageProvider> = Box::new(DropboxProvider::new(credentials.to_config()));
    state
        .connect(provider)
        .await
        .context("Error connecting to Dropbox")?;

    if from_args && state.settings().save_credentials {
        credentials
            .save_to(&credentials_path())
            .context("Failed to save credentials")?;
    }
    Ok(state)
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .with_context(|| format!("Not a file path: {}", path.display()))
}

async fn cmd_connect(cli: &Cli) -> Result<i32> {
    let mut state = connect_state(cli, load_settings()).await?;
    let usage = state.space_usage().await?;

    if let Some(account) = state.account() {
        println!("Connected to Dropbox");
        println!("  Name:         {}", account.name);
        println!("  Email:        {}", account.email);
        println!("  Country:      {}", account.country.as_deref().unwrap_or("-"));
        println!("  Account Type: {}", account.account_type);
    }
    println!(
        "  Storage:      {} of {} used ({:.1}%)",
        usage.used_formatted, usage.allocated_formatted, usage.percentage
    );
    println!("  Free:         {}", usage.free_formatted);
    Ok(0)
}

async fn cmd_ls(cli: &Cli, path: &str) -> Result<i32> {
    let mut state = connect_state(cli, load_settings()).await?;
    state.set_current_folder(path);
    let listing = state.list_current_folder().await?;

    if listing.is_empty() {
        println!("This folder is empty.");
        return Ok(0);
    }
    for folder in &listing.folders {
        println!("📁 {}/", folder.name);
    }
    for file in &listing.files {
        let modified = file.modified.as_deref().map(|m| m.get(..10).unwrap_or(m)).unwrap_or("");
        println!(
            "{} {:<40} {:>12}  {}",
            file_icon(&file.name),
            file.name,
            format_size(file.size),
            modified
        );
    }
    Ok(0)
}

async fn cmd_mkdir(cli: &Cli, path: &str) -> Result<i32> {
    let mut state = connect_state(cli, load_settings()).await?;
    let created = state.create_folder(path).await?;
    println!("Folder created: {}", created);
    Ok(0)
}

async fn cmd_put(cli: &Cli, files: &[PathBuf], to: &str, overrides: SettingsArgs) -> Result<i32> {
    let mut upload_settings = load_settings();
    overrides.apply(&mut upload_settings);
    settings::validate_settings(&upload_settings)?;

    let mut pending = Vec::with_capacity(files.len());
    for path in files {
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        pending.push(PendingFile::new(file_name_of(path)?, content));
    }

    let mut state = connect_state(cli, upload_settings).await?;

    let progress = ProgressBar::new(pending.len() as u64);
    progress.set_style(ProgressStyle::with_template(
        "{spinner} [{bar:40}] {pos}/{len} {msg}",
    )?);
    let summary = state
        .upload_batch(to, &pending, |done, _total, entry| {
            progress.set_position(done as u64);
            progress.set_message(entry.file_name.clone());
        })
        .await?;
    progress.finish_and_clear();

    for entry in state.history().entries().collect::<Vec<_>>().into_iter().rev() {
        match entry.status {
            UploadStatus::Success => println!("✅ {} ({}) → {}", entry.file_name, entry.file_size, entry.target_path),
            UploadStatus::Failed => println!(
                "❌ {} ({}) → {}: {}",
                entry.file_name,
                entry.file_size,
                entry.target_path,
                entry.error_message.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    println!("{}", summary.message());

    Ok(if summary.all_succeeded() { 0 } else { 1 })
}

async fn cmd_get(cli: &Cli, remote: &str, local: Option<&Path>) -> Result<i32> {
    let mut state = connect_state(cli, load_settings()).await?;
    let content = state.download(remote).await?;

    let local = match local {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(remote.rsplit('/').next().filter(|n| !n.is_empty()).unwrap_or("download")),
    };
    tokio::fs::write(&local, &content)
        .await
        .with_context(|| format!("Failed to write {}", local.display()))?;

    println!(
        "Downloaded {} → {} ({}, {})",
        remote,
        local.display(),
        format_size(content.len() as u64),
        mime_type(remote)
    );
    Ok(0)
}

async fn cmd_preview(file: &Path) -> Result<i32> {
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    println!("{}", render_preview(&file_name_of(file)?, &content));
    Ok(0)
}

fn cmd_settings(action: &SettingsAction) -> Result<i32> {
    let mut current = load_settings();
    match action {
        SettingsAction::Show => {
            println!("# {}", settings::settings_path().display());
            println!("{}", serde_json::to_string_pretty(&current)?);
        }
        SettingsAction::Set(args) => {
            args.apply(&mut current);
            save_settings(&current)?;
            println!("Settings saved successfully!");
        }
    }
    Ok(0)
}

async fn run(cli: Cli) -> Result<i32> {
    match &cli.command {
        Commands::Connect => cmd_connect(&cli).await,
        Commands::Ls { path } => cmd_ls(&cli, path).await,
        Commands::Mkdir { path } => cmd_mkdir(&cli, path).await,
        Commands::Put {
            files,
            to,
            chunk_size_mb,
            no_overwrite,
            no_create_folders,
            max_size_mb,
            allowed_extensions,
        } => {
            let overrides = SettingsArgs {
                max_file_size_mb: *max_size_mb,
                allowed_extensions: allowed_extensions.clone(),
                chunk_size_mb: *chunk_size_mb,
                small_file_threshold_mb: None,
                create_folders: no_create_folders.then_some(false),
                overwrite: no_overwrite.then_some(false),
                save_credentials: None,
            };
            cmd_put(&cli, files, to, overrides).await
        }
        Commands::Get { remote, local } => cmd_get(&cli, remote, local.as_deref()).await,
        Commands::Preview { file } => cmd_preview(file).await,
        Commands::Settings { action } => cmd_settings(action),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
