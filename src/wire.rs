//! JSON envelopes exchanged between the pusher and the server

use serde::{Deserialize, Serialize};

use crate::ingest::addresser::ContentId;
use crate::state::data::{PhotoRecord, Status};

/// `GET /photos/ids`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdsResponse {
    pub success: bool,
    pub ids: Vec<ContentId>,
}

/// `POST /photos`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_id: Option<ContentId>,
}

/// `GET /photos`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotosResponse {
    pub success: bool,
    pub photos: Vec<PhotoRecord>,
}

/// `GET /photos/pages`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagesResponse {
    pub success: bool,
    pub pages: usize,
}

/// `GET /photos/:pid/meta`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaResponse {
    pub success: bool,
    pub photo: PhotoRecord,
}

/// `GET /photos/:pid/tags`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagsResponse {
    pub success: bool,
    pub tags: Vec<String>,
}

/// Bare acknowledgement for mutations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotFoundResponse {
    pub success: bool,
    pub error: String,
    pub uri: String,
}
