// Wire-level and domain types shared by the HTTP client and the job
// client: which flow a job belongs to, which result stems it yields, the
// capability descriptor advertised by the server and the progress events
// pushed while a job runs.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_MAX_UPLOAD_MB: u64 = 80;
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 6] = [".mp3", ".m4a", ".wav", ".flac", ".aac", ".ogg"];
pub const DEFAULT_DOWNLOAD_SUFFIX: &str = "_modified.mp3";
pub const VOCALS_SUFFIX: &str = "_vocals.mp3";
pub const INSTRUMENTAL_SUFFIX: &str = "_instrumental.mp3";

/// The two kinds of job the backend runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Convert,
    Separate,
}

impl FlowKind {
    /// First path segment of every endpoint belonging to this flow.
    pub fn route(self) -> &'static str {
        match self {
            FlowKind::Convert => "convert",
            FlowKind::Separate => "separate",
        }
    }

    /// Result files produced by a finished job, in download order.
    pub fn stems(self) -> &'static [Stem] {
        match self {
            FlowKind::Convert => &[Stem::Modified],
            FlowKind::Separate => &[Stem::Vocals, Stem::Instrumental],
        }
    }

    /// Message used when a rejected submission carries no usable text.
    pub fn rejected_message(self) -> &'static str {
        match self {
            FlowKind::Convert => "Conversion failed",
            FlowKind::Separate => "Separation failed",
        }
    }

    pub fn success_message(self) -> &'static str {
        match self {
            FlowKind::Convert => "Your file is ready. Same sound, different fingerprint.",
            FlowKind::Separate => "Vocals and instrumental are ready.",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FlowKind::Convert => "Convert",
            FlowKind::Separate => "Separate",
        }
    }
}

/// One downloadable output of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stem {
    /// The re-encoded file of a convert job.
    Modified,
    Vocals,
    Instrumental,
}

impl Stem {
    /// Extra path segment after the job id on the download endpoint.
    pub fn path_segment(self) -> Option<&'static str> {
        match self {
            Stem::Modified => None,
            Stem::Vocals => Some("vocals"),
            Stem::Instrumental => Some("instrumental"),
        }
    }

    /// Suffix appended to the upload's base name when the server does not
    /// name the file itself.
    pub fn fallback_suffix(self, caps: &Capabilities) -> &str {
        match self {
            Stem::Modified => caps.download_suffix(),
            Stem::Vocals => VOCALS_SUFFIX,
            Stem::Instrumental => INSTRUMENTAL_SUFFIX,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stem::Modified => "modified",
            Stem::Vocals => "vocals",
            Stem::Instrumental => "instrumental",
        }
    }
}

/// Opaque identifier the backend issues for each accepted upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        JobId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Limits and naming the server advertises on `/api/info`. Fields the
/// server leaves out keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default)]
    pub download_suffix: Option<String>,
}

fn default_max_upload_mb() -> u64 {
    DEFAULT_MAX_UPLOAD_MB
}

fn default_allowed_extensions() -> Vec<String> {
    DEFAULT_ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities {
            max_upload_mb: DEFAULT_MAX_UPLOAD_MB,
            allowed_extensions: default_allowed_extensions(),
            download_suffix: Some(DEFAULT_DOWNLOAD_SUFFIX.to_string()),
        }
    }
}

impl Capabilities {
    pub fn download_suffix(&self) -> &str {
        self.download_suffix
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_DOWNLOAD_SUFFIX)
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    /// Comma-joined extension list, e.g. `.mp3,.wav`.
    pub fn accept(&self) -> String {
        self.allowed_extensions.join(",")
    }

    /// Case-insensitive check of a file name against the allowed extensions.
    pub fn allows(&self, file_name: &str) -> bool {
        let lower = file_name.to_ascii_lowercase();
        self.allowed_extensions
            .iter()
            .any(|ext| lower.ends_with(&ext.to_ascii_lowercase()))
    }
}

/// One message of the progress stream.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProgressEvent {
    #[serde(default)]
    pub percent: u32,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn percent(&self) -> u8 {
        self.percent.min(100) as u8
    }

    /// Server-supplied failure text; an empty string counts as no error.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|m| !m.is_empty())
    }
}

static DISPOSITION_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"filename="?([^";]+)"?"#).expect("static regex"));

/// Extracts the `filename` parameter of a `Content-Disposition` header.
pub fn disposition_filename(header: &str) -> Option<String> {
    DISPOSITION_FILENAME
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}
