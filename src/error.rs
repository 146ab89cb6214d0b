// Workers treat `Transient` as "try again next tick" and everything else as
// either a caller-visible failure or a reason to downgrade a comparison to
// `partial`/`error`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("file access denied: {0}")]
    FileAccessDenied(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl SyncError {
    pub fn not_found(what: impl Into<String>) -> Self {
        SyncError::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        SyncError::Conflict(what.into())
    }

    /// True for error kinds a worker iteration should treat as "no
    /// information this tick" rather than unwind on.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_) | SyncError::ConnectionFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                SyncError::FileAccessDenied(e.to_string())
            }
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                SyncError::Transient(e.to_string())
            }
            _ => SyncError::Fatal(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Parse(e.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(e: toml::de::Error) -> Self {
        SyncError::Validation(e.to_string())
    }
}

impl From<notify::Error> for SyncError {
    fn from(e: notify::Error) -> Self {
        SyncError::Transient(e.to_string())
    }
}

impl From<tiberius::error::Error> for SyncError {
    fn from(e: tiberius::error::Error) -> Self {
        // tiberius surfaces connection/auth/network failures as IO-flavored
        // variants; everything else (protocol errors, server-returned
        // failures) is treated as fatal to the calling comparison.
        let msg = e.to_string();
        if msg.to_lowercase().contains("connect") || msg.to_lowercase().contains("io error") {
            SyncError::ConnectionFailed(msg)
        } else {
            SyncError::Fatal(msg)
        }
    }
}
