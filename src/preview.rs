// ─── Local file previews ────────────────────────────────────────────────────
//
// Builds a small HTML preview of a file before it is uploaded: a scaled-down
// image, the start of a text file, or the first rows of a CSV table.

use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

use crate::file_info::extension_of;

/// Images wider than this are scaled down
pub const PREVIEW_MAX_WIDTH: u32 = 300;
/// Characters of text shown before truncation
pub const TEXT_PREVIEW_CHARS: usize = 500;
/// Data rows shown from a CSV file
pub const CSV_PREVIEW_ROWS: usize = 5;

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".bmp"];
const TEXT_EXTENSIONS: &[&str] = &[".txt", ".md", ".json"];

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("No preview available for {0}")]
    Unsupported(String),

    #[error("{0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    Text(#[from] std::str::Utf8Error),

    #[error("{0}")]
    Csv(String),
}

impl PreviewError {
    /// Preview kind named in error messages
    fn kind(&self) -> &'static str {
        match self {
            PreviewError::Unsupported(_) => "file",
            PreviewError::Image(_) => "image",
            PreviewError::Text(_) => "text",
            PreviewError::Csv(_) => "CSV",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilePreview {
    Image {
        data_uri: String,
        width: u32,
        height: u32,
    },
    Text {
        content: String,
        truncated: bool,
    },
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

impl FilePreview {
    pub fn to_html(&self) -> String {
        match self {
            FilePreview::Image { data_uri, .. } => {
                format!(r#"<img src="{}" style="max-width:100%;">"#, data_uri)
            }
            FilePreview::Text { content, truncated } => {
                let ellipsis = if *truncated { "..." } else { "" };
                format!(
                    r#"<pre style="background-color:#f5f5f5;padding:10px;border-radius:5px;max-height:200px;overflow:auto;">{}{}</pre>"#,
                    html_escape(content),
                    ellipsis
                )
            }
            FilePreview::Table { headers, rows } => {
                let mut html = String::from(r#"<div style="max-height:200px;overflow:auto;"><table border="1" class="dataframe">"#);
                html.push_str("<thead><tr>");
                for header in headers {
                    html.push_str(&format!("<th>{}</th>", html_escape(header)));
                }
                html.push_str("</tr></thead><tbody>");
                for row in rows {
                    html.push_str("<tr>");
                    for cell in row {
                        html.push_str(&format!("<td>{}</td>", html_escape(cell)));
                    }
                    html.push_str("</tr>");
                }
                html.push_str("</tbody></table></div>");
                html
            }
        }
    }
}

/// Whether a preview can be generated for this file name
pub fn can_preview(file_name: &str) -> bool {
    match extension_of(file_name) {
        Some(ext) => {
            IMAGE_EXTENSIONS.contains(&ext.as_str()) || TEXT_EXTENSIONS.contains(&ext.as_str()) || ext == ".csv"
        }
        None => false,
    }
}

pub fn generate_preview(file_name: &str, content: &[u8]) -> Result<FilePreview, PreviewError> {
    let ext = extension_of(file_name).unwrap_or_default();

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        image_preview(content)
    } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        text_preview(content)
    } else if ext == ".csv" {
        csv_preview(content)
    } else {
        Err(PreviewError::Unsupported(file_name.to_string()))
    }
}

/// HTML preview, with failures rendered inline
pub fn render_preview(file_name: &str, content: &[u8]) -> String {
    if !can_preview(file_name) {
        return "<p>No preview available for this file type.</p>".to_string();
    }
    match generate_preview(file_name, content) {
        Ok(preview) => preview.to_html(),
        Err(e) => format!(
            "<p>Error generating {} preview: {}</p>",
            e.kind(),
            html_escape(&e.to_string())
        ),
    }
}

fn image_preview(content: &[u8]) -> Result<FilePreview, PreviewError> {
    let format = image::guess_format(content)?;
    let mut img = image::load_from_memory_with_format(content, format)?;

    let (width, height) = img.dimensions();
    if width > PREVIEW_MAX_WIDTH {
        let new_height = ((height as f64 * PREVIEW_MAX_WIDTH as f64 / width as f64) as u32).max(1);
        img = img.resize_exact(PREVIEW_MAX_WIDTH, new_height, FilterType::Lanczos3);
    }

    // JPEG has no alpha channel
    if format == ImageFormat::Jpeg {
        img = DynamicImage::ImageRgb8(img.to_rgb8());
    }

    let mut encoded = Vec::new();
    img.write_to(&mut Cursor::new(&mut encoded), format)?;

    let (width, height) = img.dimensions();
    Ok(FilePreview::Image {
        data_uri: format!(
            "data:{};base64,{}",
            format.to_mime_type(),
            base64::engine::general_purpose::STANDARD.encode(&encoded)
        ),
        width,
        height,
    })
}

fn text_preview(content: &[u8]) -> Result<FilePreview, PreviewError> {
    let text = std::str::from_utf8(content)?;
    let truncated = text.chars().count() > TEXT_PREVIEW_CHARS;
    let content = if truncated {
        text.chars().take(TEXT_PREVIEW_CHARS).collect()
    } else {
        text.to_string()
    };
    Ok(FilePreview::Text { content, truncated })
}

fn csv_preview(content: &[u8]) -> Result<FilePreview, PreviewError> {
    let text = std::str::from_utf8(content).map_err(|e| PreviewError::Csv(e.to_string()))?;
    let mut records = parse_csv(text)?.into_iter();

    let headers = records
        .next()
        .ok_or_else(|| PreviewError::Csv("No columns to parse from file".to_string()))?;

    let mut rows = Vec::new();
    for (index, mut record) in records.enumerate() {
        if record.len() > headers.len() {
            return Err(PreviewError::Csv(format!(
                "Expected {} fields in line {}, saw {}",
                headers.len(),
                index + 2,
                record.len()
            )));
        }
        if rows.len() < CSV_PREVIEW_ROWS {
            record.resize(headers.len(), String::new());
            rows.push(record);
        }
    }

    Ok(FilePreview::Table { headers, rows })
}

/// Split CSV text into records. A quote opens a quoted field only at the start
/// of a field; quoted fields can hold commas, newlines and doubled quotes.
/// Quotes inside an unquoted field are kept as text. Blank lines are skipped.
fn parse_csv(text: &str) -> Result<Vec<Vec<String>>, PreviewError> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                if !record.is_empty() || !field.is_empty() {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(PreviewError::Csv("EOF inside quoted field".to_string()));
    }
    if !record.is_empty() || !field.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
