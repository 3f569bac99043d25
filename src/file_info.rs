//! File helpers shared by the upload path and the CLI
//!
//! Remote path normalization and validation, human-readable sizes, file type
//! categories and the caller-side type/size checks applied before an upload.

use serde::Serialize;
use std::path::Path;

// ─── Remote paths ───────────────────────────────────────────────────────────

/// Normalize a user-entered remote path: forward slashes only, a leading `/`
/// and no doubled separators. An empty path is the root.
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut path = path.replace('\\', "/");
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    path
}

/// Join a folder and a file name into a normalized remote path
pub fn join_remote_path(folder: &str, name: &str) -> String {
    normalize_path(&format!("{}/{}", folder, name))
}

/// Parent folder of a remote path (`/` for top-level entries and the root)
pub fn parent_folder(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}

/// Validate a destination path for an upload. Rejects relative paths, the bare
/// root, backslashes, empty segments and `.`/`..` components.
pub fn validate_destination_path(path: &str) -> Result<(), String> {
    if path.len() > 4096 {
        return Err("Path exceeds 4096 character limit".to_string());
    }
    if path.contains('\0') {
        return Err("Path contains null bytes".to_string());
    }
    if !path.starts_with('/') {
        return Err(format!("Path must be absolute: {}", path));
    }
    if path == "/" {
        return Err("Path must name a file, not the root folder".to_string());
    }
    if path.contains('\\') {
        return Err(format!("Path contains backslashes: {}", path));
    }
    for segment in path[1..].split('/') {
        match segment {
            "" => return Err(format!("Path contains an empty segment: {}", path)),
            "." | ".." => return Err(format!("Relative segment '{}' not allowed: {}", segment, path)),
            _ => {}
        }
    }
    Ok(())
}

// ─── Sizes ──────────────────────────────────────────────────────────────────

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Format a byte count as B, KB, MB or GB with two decimals
pub fn format_size(size_bytes: u64) -> String {
    if size_bytes < KB {
        format!("{} B", size_bytes)
    } else if size_bytes < MB {
        format!("{:.2} KB", size_bytes as f64 / KB as f64)
    } else if size_bytes < GB {
        format!("{:.2} MB", size_bytes as f64 / MB as f64)
    } else {
        format!("{:.2} GB", size_bytes as f64 / GB as f64)
    }
}

// ─── File types ─────────────────────────────────────────────────────────────

/// Broad file category, derived from the extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Image,
    Pdf,
    Document,
    Spreadsheet,
    Presentation,
    Archive,
    Audio,
    Video,
    Text,
    Code,
    Other,
}

impl FileCategory {
    pub fn from_name(file_name: &str) -> Self {
        match extension_of(file_name).as_deref() {
            Some(".jpg" | ".jpeg" | ".png" | ".gif" | ".bmp" | ".webp") => FileCategory::Image,
            Some(".pdf") => FileCategory::Pdf,
            Some(".doc" | ".docx") => FileCategory::Document,
            Some(".xls" | ".xlsx") => FileCategory::Spreadsheet,
            Some(".ppt" | ".pptx") => FileCategory::Presentation,
            Some(".zip" | ".rar" | ".7z" | ".tar" | ".gz") => FileCategory::Archive,
            Some(".mp3" | ".wav" | ".ogg" | ".flac") => FileCategory::Audio,
            Some(".mp4" | ".avi" | ".mov" | ".wmv") => FileCategory::Video,
            Some(".txt" | ".md" | ".csv") => FileCategory::Text,
            Some(".py" | ".js" | ".html" | ".css" | ".java" | ".cpp") => FileCategory::Code,
            _ => FileCategory::Other,
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            FileCategory::Image => "🖼️",
            FileCategory::Pdf => "📄",
            FileCategory::Document => "📝",
            FileCategory::Spreadsheet => "📊",
            FileCategory::Presentation => "📽️",
            FileCategory::Archive => "🗜️",
            FileCategory::Audio => "🎵",
            FileCategory::Video => "🎬",
            FileCategory::Text => "📋",
            FileCategory::Code => "💻",
            FileCategory::Other => "📁",
        }
    }
}

/// Icon for a file name
pub fn file_icon(file_name: &str) -> &'static str {
    FileCategory::from_name(file_name).icon()
}

/// Lowercase extension including the dot (`".csv"`), if any
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
}

/// MIME type guessed from the file name
pub fn mime_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// Check a file name against a comma-separated extension allow-list.
/// `"*"` allows every file.
pub fn is_valid_file_type(file_name: &str, allowed_extensions: &str) -> bool {
    if allowed_extensions.trim() == "*" {
        return true;
    }

    let ext = extension_of(file_name).unwrap_or_default();
    allowed_extensions
        .split(',')
        .map(|e| e.trim().to_lowercase())
        .any(|allowed| allowed == ext)
}

/// Check a file size against the configured limit in MB
pub fn is_valid_file_size(file_size: u64, max_file_size_mb: u64) -> bool {
    file_size <= max_file_size_mb.saturating_mul(MB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("docs"), "/docs");
        assert_eq!(normalize_path("\\docs\\2024\\"), "/docs/2024/");
        assert_eq!(normalize_path("//a///b"), "/a/b");
    }

    #[test]
    fn test_join_and_parent() {
        assert_eq!(join_remote_path("/", "a.txt"), "/a.txt");
        assert_eq!(join_remote_path("/docs/", "a.txt"), "/docs/a.txt");
        assert_eq!(parent_folder("/docs/2024/a.txt"), "/docs/2024");
        assert_eq!(parent_folder("/a.txt"), "/");
        assert_eq!(parent_folder("/"), "/");
        assert_eq!(parent_folder("/docs/"), "/");
    }

    #[test]
    fn test_validate_destination_path() {
        assert!(validate_destination_path("/docs/a.txt").is_ok());
        assert!(validate_destination_path("docs/a.txt").is_err());
        assert!(validate_destination_path("/").is_err());
        assert!(validate_destination_path("/docs//a.txt").is_err());
        assert!(validate_destination_path("/docs/").is_err());
        assert!(validate_destination_path("/docs\\a.txt").is_err());
        assert!(validate_destination_path("/docs/../a.txt").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(10_000_000), "9.54 MB");
        assert_eq!(format_size(3 * GB), "3.00 GB");
    }

    #[test]
    fn test_file_category() {
        assert_eq!(FileCategory::from_name("photo.JPG"), FileCategory::Image);
        assert_eq!(FileCategory::from_name("notes.md"), FileCategory::Text);
        assert_eq!(FileCategory::from_name("Makefile"), FileCategory::Other);
        assert_eq!(file_icon("song.flac"), "🎵");
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(mime_type("a.png"), "image/png");
        assert_eq!(mime_type("unknown.zzz"), "application/octet-stream");
    }

    #[test]
    fn test_file_type_allow_list() {
        assert!(is_valid_file_type("a.exe", "*"));
        assert!(is_valid_file_type("a.PDF", ".pdf, .docx"));
        assert!(!is_valid_file_type("a.exe", ".pdf, .docx"));
        assert!(!is_valid_file_type("README", ".pdf"));
    }

    #[test]
    fn test_file_size_limit() {
        assert!(is_valid_file_size(500 * MB, 500));
        assert!(!is_valid_file_size(500 * MB + 1, 500));
        assert!(is_valid_file_size(0, 0));
    }
}
