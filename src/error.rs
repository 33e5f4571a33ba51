//! Error taxonomy shared by the pusher and the server
//!
//! Per-item failures (one file, one upload, one record) are isolated by the
//! callers; nothing here is fatal to the process.

use std::time::Duration;

use crate::state::data::Status;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The device is not reachable (not plugged in, not mounted)
    #[error("device unavailable")]
    DeviceUnavailable,

    /// A single file on the device could not be retrieved
    #[error("unable to read {filename} from device: {reason}")]
    DeviceIo { filename: String, reason: String },

    /// Uploaded bytes do not start with the JPEG signature
    #[error("file signature is incorrect")]
    InvalidFormat,

    #[error("image processing timed out after {0:?}")]
    ProcessingTimeout(Duration),

    /// No usable EXIF block could be decoded at all
    #[error("unable to decode metadata: {0}")]
    MetadataDecode(String),

    /// Network or remote-side failure talking to the catalog
    #[error("transport error: {0}")]
    Transport(String),

    /// Create without overwrite on an existing id, or a duplicate tag
    #[error("conflict: {0}")]
    StoreConflict(String),

    /// Caller contract violation (e.g. empty input to the digester)
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Errors that end one ingestion for good; the record must be marked Failed.
    pub fn is_terminal_for_ingest(&self) -> bool {
        matches!(
            self,
            Error::InvalidFormat | Error::ProcessingTimeout(_) | Error::MetadataDecode(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Error::Transport(format!("unexpected status code: {}", status.as_u16())),
            None => Error::Transport(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_kinds() {
        assert!(Error::InvalidFormat.is_terminal_for_ingest());
        assert!(Error::ProcessingTimeout(Duration::from_secs(5)).is_terminal_for_ingest());
        assert!(Error::MetadataDecode("no exif".into()).is_terminal_for_ingest());
        assert!(!Error::DeviceUnavailable.is_terminal_for_ingest());
        assert!(!Error::StoreConflict("x".into()).is_terminal_for_ingest());
    }
}
