//! Ingestion pipeline
//!
//! One uploaded buffer fans out to three blocking-pool tasks:
//! - persist the original bytes verbatim
//! - decode, measure and write a 256px thumbnail
//! - decode the EXIF block
//!
//! The caller waits for all three or the deadline, whichever comes first.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future;
use tokio::task::{self, JoinHandle};

use super::addresser::ContentId;
use super::metadata::{read_metadata, PhotoMetadata};
use super::thumbnail::{render_thumbnail, Bounds};
use crate::error::{Error, Result};
use crate::state::data::PhotoUpdate;

/// JPEG Start Of Image marker followed by the first segment marker byte
pub const JPEG_SIGNATURE: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Default processing deadline for one photo
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Everything a successful ingestion learned about the photo
#[derive(Debug, Clone, PartialEq)]
pub struct Processed {
    pub metadata: PhotoMetadata,
    pub bounds: Bounds,
}

impl Processed {
    /// The record fields to write alongside the Succeeded transition
    pub fn into_update(self) -> PhotoUpdate {
        PhotoUpdate {
            width: self.bounds.width,
            height: self.bounds.height,
            megapixels: megapixels(self.bounds.width, self.bounds.height),
            taken_at: self.metadata.taken_at,
            lat: self.metadata.lat,
            long: self.metadata.long,
            cam_serial: self.metadata.cam_serial,
            cam_make: self.metadata.cam_make,
            cam_model: self.metadata.cam_model,
        }
    }
}

/// Megapixels rounded to 2 decimals, halves away from zero
pub fn megapixels(width: u32, height: u32) -> f64 {
    let raw = f64::from(width) * f64::from(height) / 1_000_000.0;
    (raw * 100.0).round() / 100.0
}

pub fn check_signature(data: &[u8]) -> Result<()> {
    if data.starts_with(&JPEG_SIGNATURE) {
        Ok(())
    } else {
        Err(Error::InvalidFormat)
    }
}

/// Process an uploaded photo into `full_path`, `thumb_path` and metadata.
///
/// A signature mismatch fails before any task is spawned. On any failure the
/// caller is responsible for removing whatever reached `full_path` and
/// `thumb_path`; tasks still running after a failure never publish their files.
pub async fn process(
    data: Bytes,
    id: &ContentId,
    full_path: &Path,
    thumb_path: &Path,
    deadline: Duration,
) -> Result<Processed> {
    check_signature(&data)?;

    tracing::info!(id = %id, bytes = data.len(), "processing photo");

    let commit = Arc::new(Commit::default());

    let original: JoinHandle<Result<()>> = task::spawn_blocking({
        let data = data.clone();
        let path = full_path.to_path_buf();
        let commit = commit.clone();
        move || commit.write(&path, &data)
    });

    let thumbnail: JoinHandle<Result<Bounds>> = task::spawn_blocking({
        let data = data.clone();
        let path = thumb_path.to_path_buf();
        let commit = commit.clone();
        move || {
            let (bounds, thumb) = render_thumbnail(&data)?;
            commit.write(&path, &thumb)?;
            Ok(bounds)
        }
    });

    let metadata: JoinHandle<Result<PhotoMetadata>> =
        task::spawn_blocking(move || read_metadata(&data));

    let joined = future::try_join3(joined(original), joined(thumbnail), joined(metadata));

    match tokio::time::timeout(deadline, joined).await {
        Ok(Ok(((), bounds, metadata))) => {
            tracing::info!(
                id = %id,
                width = bounds.width,
                height = bounds.height,
                "photo processed"
            );
            Ok(Processed { metadata, bounds })
        }
        Ok(Err(e)) => {
            commit.abandon();
            tracing::error!(id = %id, error = %e, "image processing failed");
            Err(e)
        }
        Err(_) => {
            commit.abandon();
            tracing::error!(id = %id, ?deadline, "image processing timed out");
            Err(Error::ProcessingTimeout(deadline))
        }
    }
}

async fn joined<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle.await?
}

/// Gate between task output and the final artifact paths.
///
/// Files are written next to their destination and renamed into place under
/// the lock; once the invocation is abandoned, nothing else gets published.
#[derive(Default)]
struct Commit {
    abandoned: Mutex<bool>,
}

impl Commit {
    fn abandon(&self) {
        *self.abandoned.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let staging = staging_path(path);
        fs::write(&staging, contents)?;

        let abandoned = self.abandoned.lock().unwrap_or_else(|e| e.into_inner());
        if *abandoned {
            tracing::debug!(path = %path.display(), "discarding output of abandoned task");
            remove_if_present(&staging)?;
            return Ok(());
        }
        if let Err(e) = fs::rename(&staging, path) {
            remove_if_present(&staging)?;
            return Err(e.into());
        }
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Remove a file, treating "already gone" as success
pub fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
