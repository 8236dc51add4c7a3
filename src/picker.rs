// File selection: turning a browsed, typed or dropped path into a
// `SelectedFile`. Dragging a file onto most terminals pastes its path,
// usually quoted or with backslash-escaped spaces; `parse_dropped`
// undoes that.

use crate::error::ClientError;
use crate::model::Capabilities;
use reqwest::Url;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A file chosen for upload. Replaced wholesale on every pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    path: PathBuf,
    name: String,
    size: u64,
}

impl SelectedFile {
    /// Stat `path` and record its name and size. Fails if it is not a
    /// regular file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path).map_err(|source| ClientError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if !meta.is_file() {
            return Err(ClientError::NotAFile {
                path: path.to_path_buf(),
            });
        }
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("audio")
            .to_string();
        Ok(SelectedFile {
            path: path.to_path_buf(),
            name,
            size: meta.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// File name without its extension; `None` when that leaves nothing.
    pub fn base_name(&self) -> Option<&str> {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
    }

    /// MIME type sent with the multipart upload.
    pub fn mime(&self) -> &'static str {
        let ext = Path::new(&self.name)
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase());
        match ext.as_deref() {
            Some("mp3") => "audio/mpeg",
            Some("m4a") => "audio/mp4",
            Some("wav") => "audio/wav",
            Some("flac") => "audio/flac",
            Some("aac") => "audio/aac",
            Some("ogg") => "audio/ogg",
            _ => "application/octet-stream",
        }
    }

    /// Soft checks against the advertised limits. Returns human-readable
    /// notes; the server stays the authority and nothing is rejected here.
    pub fn advisories(&self, caps: &Capabilities) -> Vec<String> {
        let mut notes = Vec::new();
        if !caps.allows(&self.name) {
            notes.push(format!(
                "{} is not one of the accepted formats ({})",
                self.name,
                caps.accept()
            ));
        }
        if self.size > caps.max_upload_bytes() {
            notes.push(format!(
                "{} is larger than the {} MB upload limit",
                format_size(self.size),
                caps.max_upload_mb
            ));
        }
        for note in &notes {
            warn!("{}", note);
        }
        notes
    }
}

/// Decode the text a terminal inserts when a file is dropped onto it.
/// Returns `None` for empty input.
pub fn parse_dropped(text: &str) -> Option<PathBuf> {
    let text = text.trim();
    let (text, quoted) = strip_quotes(text);
    if text.is_empty() {
        return None;
    }

    if let Some(path) = file_url_path(text) {
        return Some(path);
    }
    if quoted {
        return Some(PathBuf::from(text));
    }

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' && !cfg!(windows) {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    Some(PathBuf::from(out))
}

/// Strip one pair of matching surrounding quotes.
fn strip_quotes(text: &str) -> (&str, bool) {
    for quote in ['\'', '"'] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return (&text[1..text.len() - 1], true);
        }
    }
    (text, false)
}

/// Local path of a `file:` URL, with percent escapes decoded.
fn file_url_path(text: &str) -> Option<PathBuf> {
    Url::parse(text)
        .ok()
        .filter(|url| url.scheme() == "file")
        .and_then(|url| url.to_file_path().ok())
}

/// Human-readable size: `512 B`, `1.5 KB`, `3.2 MB`.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    }
}
