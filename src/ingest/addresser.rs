//! Content addressing: a photo's id is the SHA-256 of its bytes

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Length of a hex-encoded SHA-256 digest
const ID_LEN: usize = 64;

/// Lowercase hex digest of a photo's raw bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Digest an in-memory buffer. Same as [`digest`].
    pub fn of(bytes: &[u8]) -> Result<Self> {
        digest(bytes)
    }

    /// Accept an id that came over the wire or out of the database
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() == ID_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidInput("malformed content id"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Digest a byte buffer. Empty input is a caller error.
pub fn digest(bytes: &[u8]) -> Result<ContentId> {
    if bytes.is_empty() {
        return Err(Error::InvalidInput("cannot digest empty input"));
    }
    Ok(ContentId(hex::encode(Sha256::digest(bytes))))
}

/// Digest everything left in a seekable reader, then put the read position
/// back where it was so the caller can read the same bytes again.
pub fn digest_reader<R: Read + Seek>(reader: &mut R) -> Result<ContentId> {
    let origin = reader.stream_position()?;

    let mut hasher = Sha256::new();
    let copied = io::copy(reader, &mut hasher);
    reader.seek(SeekFrom::Start(origin))?;

    if copied? == 0 {
        return Err(Error::InvalidInput("cannot digest empty input"));
    }
    Ok(ContentId(hex::encode(hasher.finalize())))
}
