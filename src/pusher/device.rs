//! Device capability: enumerate photos on the camera and pull their bytes

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Only JPEGs are transferred
const PHOTO_EXTENSIONS: [&str; 2] = ["jpg", "jpeg"];

/// Where the pusher gets photos from.
///
/// `list_filenames` reports `Error::DeviceUnavailable` when the device is not
/// connected; per-file problems in `fetch` are `Error::DeviceIo`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceSource: Send + Sync {
    async fn list_filenames(&self) -> Result<Vec<String>>;
    async fn fetch(&self, filename: &str) -> Result<Vec<u8>>;
}

/// A camera exposed as a mounted directory (USB mass storage, card reader).
///
/// Filenames are paths relative to the mount point with `/` separators,
/// e.g. `DCIM/100CANON/IMG_0001.JPG`.
#[derive(Debug, Clone)]
pub struct DirectoryDevice {
    root: PathBuf,
}

impl DirectoryDevice {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn scan(root: &Path) -> Vec<String> {
        let mut filenames: Vec<String> = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| is_photo(entry.path()))
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(root).ok()?;
                let parts: Vec<_> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                Some(parts.join("/"))
            })
            .collect();

        filenames.sort();
        filenames
    }

    /// Resolve a device filename, refusing anything that escapes the root
    fn resolve(&self, filename: &str) -> Result<PathBuf> {
        let relative = Path::new(filename);
        let safe = !filename.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(Error::DeviceIo {
                filename: filename.to_string(),
                reason: "not a path on the device".into(),
            });
        }
        Ok(self.root.join(relative))
    }
}

fn is_photo(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| PHOTO_EXTENSIONS.contains(&ext.as_str()))
}

#[async_trait]
impl DeviceSource for DirectoryDevice {
    async fn list_filenames(&self) -> Result<Vec<String>> {
        if !tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(Error::DeviceUnavailable);
        }

        let root = self.root.clone();
        let filenames = tokio::task::spawn_blocking(move || Self::scan(&root)).await?;
        Ok(filenames)
    }

    async fn fetch(&self, filename: &str) -> Result<Vec<u8>> {
        let path = self.resolve(filename)?;

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) if !self.root.is_dir() => return Err(Error::DeviceUnavailable),
            Err(e) => {
                return Err(Error::DeviceIo {
                    filename: filename.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        if bytes.is_empty() {
            return Err(Error::DeviceIo {
                filename: filename.to_string(),
                reason: "file not transferred".into(),
            });
        }
        Ok(bytes)
    }
}
