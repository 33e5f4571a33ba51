//! Upload boundary: id assignment, duplicate handling, background processing

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::ingest::addresser::{self, ContentId};
use crate::ingest::pipeline::{self, remove_if_present};
use crate::state::data::{PhotoRecord, Status};
use crate::state::library::PhotoStore;

/// An upload that has been recorded and handed to the pipeline
#[derive(Debug)]
pub struct Accepted {
    pub id: ContentId,
    pub status: Status,
    /// Resolves to the terminal status once processing is over
    pub task: JoinHandle<Status>,
}

/// Accepts uploaded photos and drives them to a terminal status.
pub struct Ingestor {
    store: Arc<dyn PhotoStore>,
    img_dir: PathBuf,
    deadline: Duration,
}

impl Ingestor {
    pub fn new(store: Arc<dyn PhotoStore>, img_dir: impl Into<PathBuf>, deadline: Duration) -> Self {
        Self {
            store,
            img_dir: img_dir.into(),
            deadline,
        }
    }

    pub fn store(&self) -> &Arc<dyn PhotoStore> {
        &self.store
    }

    pub fn photo_path(&self, id: &ContentId) -> PathBuf {
        self.img_dir.join(format!("{id}.jpg"))
    }

    pub fn thumb_path(&self, id: &ContentId) -> PathBuf {
        self.img_dir.join(format!("{id}-thumb.jpg"))
    }

    /// Record a new upload and start processing it in the background.
    ///
    /// Returns as soon as the record exists in Processing. An existing id is
    /// a `StoreConflict` unless `overwrite` is set, in which case the old
    /// record and its files are removed first. A record still in Processing
    /// belongs to its running task and is never overwritten.
    pub async fn accept(&self, data: Bytes, overwrite: bool) -> Result<Accepted> {
        let id = addresser::digest(&data)?;
        pipeline::check_signature(&data)?;

        let full_path = self.photo_path(&id);
        let thumb_path = self.thumb_path(&id);

        if let Some(existing) = self.store.get(&id)? {
            if existing.status == Status::Processing {
                return Err(Error::StoreConflict(format!("photo {id} is still processing")));
            }
            if !overwrite {
                return Err(Error::StoreConflict(format!("photo {id} already exists")));
            }
            tracing::info!(id = %id, "overwriting existing photo");
            self.store.delete(&id)?;
            discard(&full_path, &thumb_path);
        }

        self.store.create(&PhotoRecord::processing(id.clone(), Utc::now()))?;

        let task = tokio::spawn(complete(
            Arc::clone(&self.store),
            id.clone(),
            data,
            full_path,
            thumb_path,
            self.deadline,
        ));

        Ok(Accepted {
            id,
            status: Status::Processing,
            task,
        })
    }
}

/// Run the pipeline and write the terminal status.
///
/// Files are only removed while this task still owns the record; once the
/// record is gone or already terminal they belong to someone else.
async fn complete(
    store: Arc<dyn PhotoStore>,
    id: ContentId,
    data: Bytes,
    full_path: PathBuf,
    thumb_path: PathBuf,
    deadline: Duration,
) -> Status {
    let failure = match pipeline::process(data, &id, &full_path, &thumb_path, deadline).await {
        Ok(processed) => {
            match store.finish(&id, Status::Succeeded, Some(&processed.into_update())) {
                Ok(()) => {
                    tracing::info!(id = %id, "photo ready");
                    return Status::Succeeded;
                }
                Err(e) if lost_ownership(&e) => {
                    tracing::warn!(id = %id, error = %e, "record changed during processing");
                    return Status::Failed;
                }
                Err(e) => e,
            }
        }
        Err(e) => e,
    };

    if failure.is_terminal_for_ingest() {
        tracing::warn!(id = %id, error = %failure, "photo rejected");
    } else {
        tracing::error!(id = %id, error = %failure, "ingestion failed");
    }

    match store.finish(&id, Status::Failed, None) {
        Err(e) if lost_ownership(&e) => {
            tracing::warn!(id = %id, error = %e, "record changed during processing");
        }
        result => {
            if let Err(e) = result {
                tracing::warn!(id = %id, error = %e, "unable to mark photo failed");
            }
            discard(&full_path, &thumb_path);
        }
    }
    Status::Failed
}

fn lost_ownership(e: &Error) -> bool {
    matches!(e, Error::InvalidTransition { .. } | Error::NotFound(_))
}

fn discard(full_path: &Path, thumb_path: &Path) {
    for path in [full_path, thumb_path] {
        if let Err(e) = remove_if_present(path) {
            tracing::warn!(path = %path.display(), error = %e, "unable to remove photo file");
        }
    }
}
