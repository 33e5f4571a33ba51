//! Remote catalog capability: what the server already has, and uploads

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;

use crate::error::{Error, Result};
use crate::ingest::addresser::ContentId;
use crate::state::data::Status;
use crate::state::library::PAGE_SIZE;
use crate::wire::{IdsResponse, UploadResponse};

const PHOTOS_ENDPOINT: &str = "/photos";
const PHOTO_IDS_ENDPOINT: &str = "/photos/ids";

/// Per-request timeout for id listing pages
const LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of handing one photo to the remote
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Accepted; the server is now processing it (or already done)
    Uploaded { id: ContentId, status: Status },
    /// The remote already holds this content id
    AlreadyExists,
}

/// Where the pusher sends photos.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Every content id the remote knows about
    async fn list_known_ids(&self) -> Result<HashSet<ContentId>>;
    async fn upload(&self, photo: Vec<u8>) -> Result<UploadOutcome>;
}

/// HTTP client for the server's photo API
pub struct HttpCatalog {
    client: reqwest::Client,
    base_url: String,
    page_size: usize,
    upload_timeout: Duration,
}

impl HttpCatalog {
    pub fn new(base_url: impl Into<String>, upload_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(LIST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: PAGE_SIZE,
            upload_timeout,
        })
    }

    async fn fetch_page(&self, start: usize) -> Result<Vec<ContentId>> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, PHOTO_IDS_ENDPOINT))
            .query(&[("start", start), ("limit", self.page_size)])
            .timeout(LIST_TIMEOUT)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Transport(format!(
                "unexpected status code: {}",
                resp.status().as_u16()
            )));
        }

        let page: IdsResponse = resp.json().await?;
        if !page.success {
            return Err(Error::Transport("unsuccessful response".into()));
        }
        Ok(page.ids)
    }
}

#[async_trait]
impl RemoteCatalog for HttpCatalog {
    async fn list_known_ids(&self) -> Result<HashSet<ContentId>> {
        let mut ids = HashSet::new();
        let mut start = 0;

        loop {
            let page = self.fetch_page(start).await?;
            let returned = page.len();
            let before = ids.len();
            ids.extend(page);

            if returned < self.page_size {
                break;
            }
            // A full page with nothing new means the server ignores `start`
            if ids.len() == before {
                tracing::warn!(start, "remote returned a repeated page, stopping listing");
                break;
            }
            start += self.page_size;
        }

        tracing::debug!(count = ids.len(), "listed remote photo ids");
        Ok(ids)
    }

    async fn upload(&self, photo: Vec<u8>) -> Result<UploadOutcome> {
        let part = Part::bytes(photo)
            .file_name("photo.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new().part("photo", part);

        let resp = self
            .client
            .post(format!("{}{}", self.base_url, PHOTOS_ENDPOINT))
            .multipart(form)
            .timeout(self.upload_timeout)
            .send()
            .await?;

        match resp.status() {
            StatusCode::CONFLICT => return Ok(UploadOutcome::AlreadyExists),
            status if !status.is_success() => {
                return Err(Error::Transport(format!(
                    "unexpected status code: {}",
                    status.as_u16()
                )))
            }
            _ => {}
        }

        let body: UploadResponse = resp.json().await?;
        match body {
            UploadResponse {
                success: true,
                status: Some(status),
                new_id: Some(id),
            } => Ok(UploadOutcome::Uploaded { id, status }),
            _ => Err(Error::Transport("unsuccessful response".into())),
        }
    }
}
