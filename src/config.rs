// Client settings. Read from `<config dir>/copyrem/config.json` when that
// file exists; command-line flags override individual fields afterwards.

use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the audio service.
    pub server_url: String,
    /// Where saved results are written.
    pub output_dir: PathBuf,
    pub connect_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            server_url: DEFAULT_SERVER_URL.to_string(),
            output_dir: PathBuf::from("."),
            connect_timeout_secs: 10,
        }
    }
}

impl Settings {
    /// Location of the per-user settings file, if the platform has a
    /// config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("copyrem").join("config.json"))
    }

    /// Load from the default location; a missing file yields defaults.
    pub fn load() -> Result<Self, ClientError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`; a missing file yields defaults, a malformed one
    /// is an error.
    pub fn load_from(path: &Path) -> Result<Self, ClientError> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ClientError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let settings: Settings = serde_json::from_str(&data).map_err(|e| {
            ClientError::Config(format!("{}: {}", path.display(), e))
        })?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Apply command-line overrides.
    pub fn with_overrides(mut self, server_url: Option<String>, output_dir: Option<PathBuf>) -> Self {
        if let Some(url) = server_url {
            self.server_url = url;
        }
        if let Some(dir) = output_dir {
            self.output_dir = dir;
        }
        self
    }
}
