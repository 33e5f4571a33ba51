//! HTTP handlers for the photo API

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;

use super::ingest::Ingestor;
use crate::error::{Error, Result};
use crate::ingest::addresser::ContentId;
use crate::state::data::{PhotoRecord, Status};
use crate::state::library::{PhotoFilter, PhotoQuery, PhotoStore, PAGE_SIZE};
use crate::wire::{
    ErrorResponse, IdsResponse, MetaResponse, NotFoundResponse, PagesResponse, PhotosResponse,
    SuccessResponse, TagsResponse, UploadResponse,
};

/// Largest accepted upload body
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    ingestor: Arc<Ingestor>,
}

impl AppState {
    pub fn new(ingestor: Arc<Ingestor>) -> Self {
        Self { ingestor }
    }

    fn store(&self) -> &dyn PhotoStore {
        self.ingestor.store().as_ref()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/photos", get(list_photos).post(upload_photo))
        .route("/photos/ids", get(photo_ids))
        .route("/photos/pages", get(page_count))
        .route("/photos/:pid", delete(delete_photo))
        .route("/photos/:pid/meta", get(photo_meta))
        .route("/photos/:pid/image.jpg", get(photo_image))
        .route("/photos/:pid/thumb.jpg", get(photo_thumb))
        .route("/photos/:pid/tags", get(photo_tags))
        .route("/photos/:pid/tags/:tag", post(add_tag).delete(remove_tag))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::InvalidInput(_)
            | Error::InvalidFormat
            | Error::MetadataDecode(_)
            | Error::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            Error::StoreConflict(_) => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Raw query parameters; parsed by hand so bad values get the JSON error shape
#[derive(Debug, Default, Deserialize)]
struct ListParams {
    start: Option<String>,
    limit: Option<String>,
    deleted: Option<String>,
    tag: Option<String>,
}

impl ListParams {
    fn page(&self) -> Result<(usize, usize)> {
        let start = parse_or(self.start.as_deref(), 0)?;
        let limit = parse_or(self.limit.as_deref(), PAGE_SIZE)?;
        if limit == 0 {
            return Err(Error::InvalidInput("limit must be positive"));
        }
        Ok((start, limit))
    }

    /// Succeeded records, hiding soft-deleted ones unless asked for
    fn filter(&self) -> Result<PhotoFilter> {
        Ok(PhotoFilter {
            status: Some(Status::Succeeded),
            deleted: Some(parse_or(self.deleted.as_deref(), false)?),
            tag: self.tag.clone().filter(|t| !t.is_empty()),
        })
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<&str>, default: T) -> Result<T> {
    match raw {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::InvalidInput("unable to parse query string")),
    }
}

/// A malformed id can never name a stored photo
fn photo_id(pid: &str) -> Result<ContentId> {
    ContentId::parse(pid).map_err(|_| Error::NotFound(format!("photo {pid}")))
}

fn load(state: &AppState, pid: &str) -> Result<PhotoRecord> {
    let id = photo_id(pid)?;
    state
        .store()
        .get(&id)?
        .ok_or_else(|| Error::NotFound(format!("photo {id}")))
}

async fn upload_photo(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut photo: Option<Bytes> = None;
    let mut overwrite = false;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "unable to read multipart body");
                return Err(Error::InvalidInput("unable to read multipart body"));
            }
        };

        match field.name() {
            Some("photo") => {
                let data = field.bytes().await.map_err(|e| {
                    tracing::warn!(error = %e, "unable to read photo field");
                    Error::InvalidInput("unable to read photo field")
                })?;
                photo = Some(data);
            }
            Some("overwrite") => {
                let value = field.text().await.map_err(|e| {
                    tracing::warn!(error = %e, "unable to read overwrite field");
                    Error::InvalidInput("unable to read overwrite field")
                })?;
                overwrite = value.trim().eq_ignore_ascii_case("true");
            }
            _ => {}
        }
    }

    let photo = photo.ok_or(Error::InvalidInput("missing photo field"))?;
    let accepted = state.ingestor.accept(photo, overwrite).await?;

    Ok(Json(UploadResponse {
        success: true,
        status: Some(accepted.status),
        new_id: Some(accepted.id),
    }))
}

/// Ids of every processed photo, soft-deleted ones included
async fn photo_ids(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<IdsResponse>> {
    let (start, limit) = params.page()?;
    let photos = state.store().query(&PhotoQuery {
        filter: PhotoFilter {
            status: Some(Status::Succeeded),
            ..Default::default()
        },
        start,
        limit,
    })?;

    Ok(Json(IdsResponse {
        success: true,
        ids: photos.into_iter().map(|p| p.id).collect(),
    }))
}

async fn list_photos(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<PhotosResponse>> {
    let (start, limit) = params.page()?;
    let photos = state.store().query(&PhotoQuery {
        filter: params.filter()?,
        start,
        limit,
    })?;

    Ok(Json(PhotosResponse {
        success: true,
        photos,
    }))
}

async fn page_count(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<PagesResponse>> {
    let (_, limit) = params.page()?;
    let count = state.store().count(&params.filter()?)?;

    Ok(Json(PagesResponse {
        success: true,
        pages: count.div_ceil(limit),
    }))
}

async fn photo_meta(
    State(state): State<AppState>,
    Path(pid): Path<String>,
) -> Result<Json<MetaResponse>> {
    let photo = load(&state, &pid)?;
    Ok(Json(MetaResponse {
        success: true,
        photo,
    }))
}

async fn photo_image(State(state): State<AppState>, Path(pid): Path<String>) -> Result<Response> {
    let photo = load(&state, &pid)?;
    serve_jpeg(&photo, state.ingestor.photo_path(&photo.id)).await
}

async fn photo_thumb(State(state): State<AppState>, Path(pid): Path<String>) -> Result<Response> {
    let photo = load(&state, &pid)?;
    serve_jpeg(&photo, state.ingestor.thumb_path(&photo.id)).await
}

async fn serve_jpeg(photo: &PhotoRecord, path: std::path::PathBuf) -> Result<Response> {
    if photo.status != Status::Succeeded {
        return Err(Error::InvalidInput("photo has not been processed"));
    }
    let data = tokio::fs::read(&path).await?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], data).into_response())
}

/// Soft delete; the id stays known so the pusher won't send it again
async fn delete_photo(
    State(state): State<AppState>,
    Path(pid): Path<String>,
) -> Result<Json<SuccessResponse>> {
    let id = photo_id(&pid)?;
    state.store().set_deleted(&id, true)?;
    tracing::info!(id = %id, "photo deleted");
    Ok(Json(SuccessResponse { success: true }))
}

async fn photo_tags(
    State(state): State<AppState>,
    Path(pid): Path<String>,
) -> Result<Json<TagsResponse>> {
    let photo = load(&state, &pid)?;
    Ok(Json(TagsResponse {
        success: true,
        tags: photo.tags.into_iter().collect(),
    }))
}

async fn add_tag(
    State(state): State<AppState>,
    Path((pid, tag)): Path<(String, String)>,
) -> Result<Json<SuccessResponse>> {
    let id = photo_id(&pid)?;
    state.store().add_tag(&id, &tag)?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn remove_tag(
    State(state): State<AppState>,
    Path((pid, tag)): Path<(String, String)>,
) -> Result<Json<SuccessResponse>> {
    let id = photo_id(&pid)?;
    state.store().remove_tag(&id, &tag)?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn not_found(uri: Uri) -> (StatusCode, Json<NotFoundResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(NotFoundResponse {
            success: false,
            error: "requested URI not found".into(),
            uri: uri.to_string(),
        }),
    )
}
