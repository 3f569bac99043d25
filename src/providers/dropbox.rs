//! Dropbox Storage Provider
//!
//! Implements StorageProvider for Dropbox using the Dropbox API v2.
//! Uses an OAuth2 refresh token for authentication.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    oauth2::{OAuth2Manager, OAuthConfig},
    sanitize_api_error, AccountInfo, CommitInfo, ProviderError, ProviderType, RemoteEntry,
    SessionCursor, StorageInfo, StorageProvider, WriteMode,
};

/// Dropbox API endpoints
const API_BASE: &str = "https://api.dropboxapi.com/2";
const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";

/// Header carrying the JSON arguments of content endpoints
const API_ARG_HEADER: &str = "Dropbox-API-Arg";

/// Only connecting is bounded: a 150 MiB body may take arbitrarily long on a
/// slow link, so there is no whole-request timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Dropbox file metadata
#[derive(Debug, Deserialize)]
struct DropboxMetadata {
    /// Absent on upload responses, which always describe a file
    #[serde(rename = ".tag", default)]
    tag: String,
    name: String,
    path_lower: Option<String>,
    path_display: Option<String>,
    #[serde(default)]
    size: u64,
    server_modified: Option<String>,
}

/// List folder response
#[derive(Debug, Deserialize)]
struct ListFolderResult {
    entries: Vec<DropboxMetadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct SessionStartResult {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct AccountName {
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct AccountType {
    #[serde(rename = ".tag")]
    tag: String,
}

#[derive(Debug, Deserialize)]
struct CurrentAccount {
    name: AccountName,
    email: String,
    country: Option<String>,
    account_type: AccountType,
}

#[derive(Debug, Deserialize)]
struct Allocation {
    #[serde(default)]
    allocated: u64,
}

#[derive(Debug, Deserialize)]
struct SpaceUsage {
    used: u64,
    allocation: Allocation,
}

/// Dropbox provider configuration
#[derive(Debug, Clone)]
pub struct DropboxConfig {
    pub app_key: String,
    pub app_secret: SecretString,
    pub refresh_token: SecretString,
}

impl DropboxConfig {
    pub fn new(app_key: &str, app_secret: &str, refresh_token: &str) -> Self {
        Self {
            app_key: app_key.to_string(),
            app_secret: SecretString::from(app_secret.to_string()),
            refresh_token: SecretString::from(refresh_token.to_string()),
        }
    }
}

/// Dropbox Storage Provider
pub struct DropboxProvider {
    oauth_manager: OAuth2Manager,
    client: reqwest::Client,
    /// Account confirmed by the last successful `connect`
    account: Option<AccountInfo>,
}

impl DropboxProvider {
    pub fn new(config: DropboxConfig) -> Self {
        let oauth_config = OAuthConfig::dropbox(&config.app_key, config.app_secret.expose_secret());
        Self {
            oauth_manager: OAuth2Manager::new(oauth_config, config.refresh_token),
            client: http_client(),
            account: None,
        }
    }

    /// Get authorization header
    async fn auth_header(&self) -> Result<HeaderValue, ProviderError> {
        let token = self.oauth_manager.get_valid_token().await?;
        HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|e| ProviderError::AuthenticationFailed(format!("Invalid token: {}", e)))
    }

    /// Make API call with RPC style. Endpoints without arguments take `None`.
    async fn rpc_call<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{}", API_BASE, endpoint);

        let mut request = self.client.post(&url).header(AUTHORIZATION, self.auth_header().await?);
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::ConnectionFailed(e.to_string()))?;

        let response = self.check_response(endpoint, response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(format!("{}: {}", endpoint, e)))
    }

    /// Make a content-upload call: arguments in the header, bytes in the body
    async fn content_upload<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        arg: &serde_json::Value,
        content: Bytes,
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{}", CONTENT_BASE, endpoint);

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.auth_header().await?)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(API_ARG_HEADER, api_arg(arg))
            .body(content)
            .send()
            .await
            .map_err(|e| ProviderError::ConnectionFailed(e.to_string()))?;

        let response = self.check_response(endpoint, response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(format!("{}: {}", endpoint, e)))
    }

    /// Pass successful responses through; turn the rest into typed errors
    async fn check_response(
        &self,
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        if status.as_u16() == 401 {
            self.oauth_manager.invalidate().await;
        }
        let error = classify_error(status.as_u16(), &text);
        warn!("Dropbox {} failed: HTTP {} ({})", endpoint, status.as_u16(), error);
        Err(error)
    }

    /// List folder with pagination
    async fn list_folder_all(&self, path: &str) -> Result<Vec<DropboxMetadata>, ProviderError> {
        let body = serde_json::json!({
            "path": normalize_path(path),
            "recursive": false,
            "include_deleted": false,
            "include_has_explicit_shared_members": false,
            "include_mounted_folders": true
        });

        let mut result: ListFolderResult = self.rpc_call("files/list_folder", Some(&body)).await?;
        let mut all_entries = result.entries;

        while result.has_more {
            let continue_body = serde_json::json!({
                "cursor": result.cursor
            });
            result = self
                .rpc_call("files/list_folder/continue", Some(&continue_body))
                .await?;
            all_entries.extend(result.entries);
        }

        Ok(all_entries)
    }
}

/// Normalize path for Dropbox API (empty string = root, paths start with /)
/// HTTP client shared by every call of one provider
fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_default()
}

fn normalize_path(path: &str) -> String {
    let path = path.trim_matches('/');
    if path.is_empty() {
        String::new()
    } else {
        format!("/{}", path)
    }
}

/// Convert Dropbox metadata to RemoteEntry
fn to_remote_entry(meta: DropboxMetadata) -> RemoteEntry {
    let path = meta
        .path_display
        .or(meta.path_lower)
        .unwrap_or_else(|| format!("/{}", meta.name));

    RemoteEntry {
        is_dir: meta.tag == "folder",
        size: meta.size,
        modified: meta.server_modified,
        name: meta.name,
        path,
    }
}

fn commit_arg(commit: &CommitInfo) -> serde_json::Value {
    serde_json::json!({
        "path": normalize_path(&commit.path),
        "mode": commit.mode.as_tag(),
        "autorename": false,
        "mute": false
    })
}

fn cursor_arg(cursor: &SessionCursor) -> serde_json::Value {
    serde_json::json!({
        "session_id": cursor.session_id,
        "offset": cursor.offset
    })
}

/// Serialize a `Dropbox-API-Arg` value. HTTP headers must be ASCII, so every
/// non-ASCII character is written as a JSON `\u` escape.
fn api_arg(arg: &serde_json::Value) -> String {
    let json = arg.to_string();
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

/// Map an HTTP error status and body onto a provider error.
///
/// Dropbox reports endpoint errors as HTTP 409 with an `error_summary` such
/// as `path/conflict/folder/...` or `incorrect_offset/...`.
fn classify_error(status: u16, body: &str) -> ProviderError {
    let detail = sanitize_api_error(body);

    match status {
        401 => ProviderError::AuthenticationFailed(detail),
        429 => ProviderError::RateLimited(detail),
        500..=599 => ProviderError::ServerError(format!("HTTP {}: {}", status, detail)),
        409 => {
            let parsed: serde_json::Value = serde_json::from_str(body).unwrap_or_default();
            let summary = parsed["error_summary"].as_str().unwrap_or(body);

            if summary.contains("incorrect_offset") {
                match find_correct_offset(&parsed["error"]) {
                    Some(correct_offset) => ProviderError::IncorrectOffset { correct_offset },
                    None => ProviderError::Other(detail),
                }
            } else if summary.contains("lookup_failed/not_found") || summary.contains("lookup_failed/closed") {
                ProviderError::SessionNotFound(detail)
            } else if summary.contains("insufficient_space") {
                ProviderError::InsufficientSpace(detail)
            } else if summary.contains("conflict") {
                ProviderError::AlreadyExists(detail)
            } else if summary.contains("not_found") {
                ProviderError::NotFound(detail)
            } else {
                ProviderError::Other(format!("API error 409: {}", detail))
            }
        }
        _ => ProviderError::Other(format!("API error {}: {}", status, detail)),
    }
}

/// Find `correct_offset` in a possibly nested error object
fn find_correct_offset(error: &serde_json::Value) -> Option<u64> {
    if let Some(offset) = error.get("correct_offset").and_then(|v| v.as_u64()) {
        return Some(offset);
    }
    error
        .as_object()?
        .values()
        .filter(|v| v.is_object())
        .find_map(find_correct_offset)
}

#[async_trait]
impl StorageProvider for DropboxProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Dropbox
    }

    fn display_name(&self) -> String {
        match &self.account {
            Some(account) => format!("Dropbox ({})", account.email),
            None => "Dropbox".to_string(),
        }
    }

    async fn connect(&mut self) -> Result<AccountInfo, ProviderError> {
        let account: CurrentAccount = self.rpc_call("users/get_current_account", None).await?;

        let info = AccountInfo {
            name: account.name.display_name,
            email: account.email,
            country: account.country,
            account_type: account.account_type.tag,
        };
        self.account = Some(info.clone());

        info!("Connected to Dropbox as {}", info.email);
        Ok(info)
    }

    async fn put(&mut self, path: &str, content: Bytes, mode: WriteMode) -> Result<RemoteEntry, ProviderError> {
        let len = content.len();
        let arg = commit_arg(&CommitInfo {
            path: path.to_string(),
            mode,
        });

        let meta: DropboxMetadata = self.content_upload("files/upload", &arg, content).await?;

        info!("Uploaded {} bytes to {}", len, path);
        Ok(to_remote_entry(meta))
    }

    async fn session_start(&mut self, content: Bytes) -> Result<String, ProviderError> {
        let len = content.len();
        let arg = serde_json::json!({ "close": false });

        let result: SessionStartResult = self
            .content_upload("files/upload_session/start", &arg, content)
            .await?;

        debug!("Upload session {} started with {} bytes", result.session_id, len);
        Ok(result.session_id)
    }

    async fn session_append(&mut self, cursor: &SessionCursor, content: Bytes) -> Result<(), ProviderError> {
        let len = content.len();
        let arg = serde_json::json!({
            "cursor": cursor_arg(cursor),
            "close": false
        });

        // append_v2 answers with a JSON `null`
        let _: serde_json::Value = self
            .content_upload("files/upload_session/append_v2", &arg, content)
            .await?;

        debug!(
            "Upload session {} appended {} bytes at offset {}",
            cursor.session_id,
            len,
            cursor.offset
        );
        Ok(())
    }

    async fn session_finish(
        &mut self,
        cursor: &SessionCursor,
        content: Bytes,
        commit: &CommitInfo,
    ) -> Result<RemoteEntry, ProviderError> {
        let arg = serde_json::json!({
            "cursor": cursor_arg(cursor),
            "commit": commit_arg(commit)
        });

        let meta: DropboxMetadata = self
            .content_upload("files/upload_session/finish", &arg, content)
            .await?;

        info!("Upload session {} committed to {}", cursor.session_id, commit.path);
        Ok(to_remote_entry(meta))
    }

    async fn create_folder(&mut self, path: &str) -> Result<(), ProviderError> {
        let body = serde_json::json!({
            "path": normalize_path(path),
            "autorename": false
        });

        let _: serde_json::Value = self.rpc_call("files/create_folder_v2", Some(&body)).await?;

        info!("Created folder: {}", path);
        Ok(())
    }

    async fn list_folder(&mut self, path: &str) -> Result<Vec<RemoteEntry>, ProviderError> {
        let entries = self.list_folder_all(path).await?;
        debug!("Listed {} entries in {}", entries.len(), path);
        Ok(entries.into_iter().map(to_remote_entry).collect())
    }

    async fn exists(&mut self, path: &str) -> Result<bool, ProviderError> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Ok(true);
        }

        let body = serde_json::json!({ "path": path });
        match self.rpc_call::<DropboxMetadata>("files/get_metadata", Some(&body)).await {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn download(&mut self, path: &str) -> Result<Vec<u8>, ProviderError> {
        let arg = serde_json::json!({ "path": normalize_path(path) });
        let url = format!("{}/files/download", CONTENT_BASE);

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.auth_header().await?)
            .header(API_ARG_HEADER, api_arg(&arg))
            .send()
            .await
            .map_err(|e| ProviderError::ConnectionFailed(e.to_string()))?;

        let response = self.check_response("files/download", response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::ConnectionFailed(format!("Read error: {}", e)))?;

        info!("Downloaded {} ({} bytes)", path, bytes.len());
        Ok(bytes.to_vec())
    }

    async fn storage_info(&mut self) -> Result<StorageInfo, ProviderError> {
        let usage: SpaceUsage = self.rpc_call("users/get_space_usage", None).await?;

        Ok(StorageInfo {
            used: usage.used,
            allocated: usage.allocation.allocated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/"), "");
        assert_eq!(normalize_path(""), "");
        assert_eq!(normalize_path("/docs/"), "/docs");
        assert_eq!(normalize_path("docs/a.txt"), "/docs/a.txt");
    }

    #[test]
    fn test_classify_status_codes() {
        assert!(matches!(classify_error(401, "expired_access_token"), ProviderError::AuthenticationFailed(_)));
        assert!(matches!(classify_error(429, "too_many_requests"), ProviderError::RateLimited(_)));
        assert!(matches!(classify_error(503, "unavailable"), ProviderError::ServerError(_)));
        assert!(matches!(classify_error(400, "bad input"), ProviderError::Other(_)));
    }

    #[test]
    fn test_classify_conflict_and_not_found() {
        let conflict = r#"{"error_summary": "path/conflict/folder/..", "error": {".tag": "path"}}"#;
        assert!(matches!(classify_error(409, conflict), ProviderError::AlreadyExists(_)));

        let missing = r#"{"error_summary": "path/not_found/..", "error": {".tag": "path"}}"#;
        assert!(matches!(classify_error(409, missing), ProviderError::NotFound(_)));

        let full = r#"{"error_summary": "path/insufficient_space/..", "error": {}}"#;
        assert!(matches!(classify_error(409, full), ProviderError::InsufficientSpace(_)));

        let session = r#"{"error_summary": "lookup_failed/not_found/..", "error": {}}"#;
        assert!(matches!(classify_error(409, session), ProviderError::SessionNotFound(_)));
    }

    #[test]
    fn test_classify_incorrect_offset() {
        let append = r#"{"error_summary": "incorrect_offset/..", "error": {".tag": "incorrect_offset", "correct_offset": 4194304}}"#;
        assert!(matches!(
            classify_error(409, append),
            ProviderError::IncorrectOffset { correct_offset: 4194304 }
        ));

        let finish = r#"{"error_summary": "lookup_failed/incorrect_offset/..", "error": {".tag": "lookup_failed", "lookup_failed": {".tag": "incorrect_offset", "correct_offset": 16}}}"#;
        assert!(matches!(
            classify_error(409, finish),
            ProviderError::IncorrectOffset { correct_offset: 16 }
        ));
    }

    #[test]
    fn test_api_arg_escapes_non_ascii() {
        let arg = serde_json::json!({ "path": "/Fotos/café 😀.jpg" });
        let header = api_arg(&arg);
        assert!(header.is_ascii());
        assert!(header.contains("caf\\u00e9"));
        assert!(header.contains("\\ud83d\\ude00"));

        let decoded: serde_json::Value = serde_json::from_str(&header).unwrap();
        assert_eq!(decoded, arg);
    }

    #[test]
    fn test_commit_arg_shape() {
        let arg = commit_arg(&CommitInfo {
            path: "/docs/a.txt".to_string(),
            mode: WriteMode::Add,
        });
        assert_eq!(
            arg,
            serde_json::json!({"path": "/docs/a.txt", "mode": "add", "autorename": false, "mute": false})
        );
    }

    #[test]
    fn test_upload_metadata_without_tag_is_a_file() {
        let meta: DropboxMetadata = serde_json::from_str(
            r#"{"name": "a.txt", "path_display": "/Docs/a.txt", "size": 12, "server_modified": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let entry = to_remote_entry(meta);
        assert!(!entry.is_dir);
        assert_eq!(entry.path, "/Docs/a.txt");
        assert_eq!(entry.size, 12);
    }

    /// Accept one request, read it whole, and answer `{}` after `delay`
    async fn slow_endpoint(delay: Duration) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/upload", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 8192];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received).to_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let body_len = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if received.len() >= end + 4 + body_len {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            tokio::time::sleep(delay).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{}")
                .await
                .unwrap();
        });
        url
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_upload_is_not_cut_off() {
        let url = slow_endpoint(Duration::from_secs(3 * 60 * 60)).await;

        let response = http_client()
            .post(&url)
            .body(Bytes::from(vec![7u8; 256 * 1024]))
            .send()
            .await
            .unwrap();

        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body, serde_json::json!({}));
    }
}
