// Error type shared by the library modules. The job client never hands
// these to its caller: it turns them into the short messages shown to the
// user. The binary wraps them in `anyhow` at its edges.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connect, TLS, body read).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status. `message` is the
    /// `error` field of a JSON body when one was present; `reason` is the
    /// canonical status text.
    #[error("server returned {status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Status {
        status: u16,
        reason: Option<String>,
        message: Option<String>,
    },

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The progress stream ended before a `done` or `error` event.
    #[error("progress stream closed before the job finished")]
    StreamClosed,

    #[error("not a regular file: '{}'", path.display())]
    NotAFile { path: PathBuf },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Best message for a failed submission: the server's own message,
    /// else the status text. `None` when neither is available.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ClientError::Status {
                message: Some(m), ..
            } if !m.is_empty() => Some(m),
            ClientError::Status {
                reason: Some(r), ..
            } if !r.is_empty() => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_prefers_body() {
        let e = ClientError::Status {
            status: 400,
            reason: Some("Bad Request".into()),
            message: Some("unsupported format".into()),
        };
        assert_eq!(e.server_message(), Some("unsupported format"));
        assert!(e.to_string().contains("unsupported format"));
    }

    #[test]
    fn server_message_falls_back_to_reason() {
        let e = ClientError::Status {
            status: 413,
            reason: Some("Payload Too Large".into()),
            message: Some(String::new()),
        };
        assert_eq!(e.server_message(), Some("Payload Too Large"));
    }

    #[test]
    fn stream_closed_has_no_server_message() {
        assert_eq!(ClientError::StreamClosed.server_message(), None);
    }
}
