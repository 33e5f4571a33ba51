//! Shared data structures for the photo catalog
//!
//! These structs represent the data model that flows between
//! the ingestion pipeline, the database layer and the HTTP layer.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ingest::addresser::ContentId;

/// Processing state of a photo record
///
/// A record starts at `Processing` and moves exactly once to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "processing succeeded")]
    Succeeded,
    #[serde(rename = "processing failed")]
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Processing => "processing",
            Status::Succeeded => "processing succeeded",
            Status::Failed => "processing failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Processing)
    }

    /// Validate a status change. Only Processing -> {Succeeded, Failed} is allowed.
    pub fn transition(self, next: Status) -> Result<Status> {
        match (self, next) {
            (Status::Processing, Status::Succeeded | Status::Failed) => Ok(next),
            (from, to) => Err(Error::InvalidTransition { from, to }),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "processing" => Ok(Status::Processing),
            "processing succeeded" => Ok(Status::Succeeded),
            "processing failed" => Ok(Status::Failed),
            _ => Err(Error::InvalidInput("unknown status")),
        }
    }
}

/// A single photo in the catalog, keyed by the digest of its bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: ContentId,
    pub uploaded_at: DateTime<Utc>,
    /// Capture time from EXIF (None if the tag was missing)
    pub taken_at: Option<DateTime<Utc>>,
    pub width: u32,
    pub height: u32,
    pub megapixels: f64,
    pub lat: Option<f64>,
    pub long: Option<f64>,
    pub cam_serial: Option<String>,
    pub cam_make: Option<String>,
    pub cam_model: Option<String>,
    pub status: Status,
    pub status_updated_at: DateTime<Utc>,
    /// Soft-delete flag
    pub deleted: bool,
    pub tags: BTreeSet<String>,
}

impl PhotoRecord {
    /// Fresh record for an upload that is about to be processed
    pub fn processing(id: ContentId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            uploaded_at: now,
            taken_at: None,
            width: 0,
            height: 0,
            megapixels: 0.0,
            lat: None,
            long: None,
            cam_serial: None,
            cam_make: None,
            cam_model: None,
            status: Status::Processing,
            status_updated_at: now,
            deleted: false,
            tags: BTreeSet::new(),
        }
    }
}

/// Partial update produced by the ingestion pipeline on success
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoUpdate {
    pub width: u32,
    pub height: u32,
    pub megapixels: f64,
    pub taken_at: Option<DateTime<Utc>>,
    pub lat: Option<f64>,
    pub long: Option<f64>,
    pub cam_serial: Option<String>,
    pub cam_make: Option<String>,
    pub cam_model: Option<String>,
}
