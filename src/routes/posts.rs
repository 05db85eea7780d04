use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppResult;
use crate::forum::domain::{CommentDraft, Post, PostDraft, PostId};
use crate::state::AppState;
use crate::storage::ImageUpload;

// --- Requests ---

#[derive(Deserialize, Default)]
pub struct ListQuery {
    pub category: Option<String>,
}

impl ListQuery {
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCommentRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub parent_comment_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/{id}", get(get_post))
        .route("/posts/{id}/comment", post(add_comment))
        .route("/posts/{id}/like", post(like_post))
}

// --- Handlers ---

async fn list_posts(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> AppResult<Json<Vec<Post>>> {
    let Query(query) = query?;
    let posts = state.forum.list_posts(query.category()).await?;
    Ok(Json(posts))
}

async fn get_post(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Post>> {
    let post = state.forum.get_post(&PostId::new(id)).await?;
    Ok(Json(post))
}

async fn create_post(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<(StatusCode, Json<Post>)> {
    let (draft, image) = read_post_form(multipart?).await?;
    let post = state.forum.create_post(draft, image).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn add_comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Result<Json<AddCommentRequest>, JsonRejection>,
) -> AppResult<Json<Post>> {
    let Json(request) = request?;
    let draft = CommentDraft {
        text: request.text,
        parent_comment_id: request.parent_comment_id,
        username: request.username,
    };
    let post = state.forum.add_comment(&PostId::new(id), draft).await?;
    Ok(Json(post))
}

async fn like_post(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Post>> {
    let post = state.forum.like_post(&PostId::new(id)).await?;
    Ok(Json(post))
}

// --- Form parsing ---

/// Collect the create-post fields; unknown fields are ignored.
async fn read_post_form(
    mut multipart: Multipart,
) -> AppResult<(PostDraft, Option<ImageUpload>)> {
    let mut draft = PostDraft::default();
    let mut image = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let file_name = field.file_name().map(String::from);
                let content_type = field.content_type().map(String::from);
                let data = field.bytes().await?;
                let upload = ImageUpload {
                    file_name,
                    content_type,
                    data,
                };
                image = (!upload.is_empty()).then_some(upload);
            }
            "title" | "content" | "category" | "username" => {
                let value = field.text().await?;
                match name.as_str() {
                    "title" => draft.title = Some(value),
                    "content" => draft.content = Some(value),
                    "category" => draft.category = Some(value),
                    _ => draft.username = Some(value),
                }
            }
            other => tracing::debug!("Ignoring form field '{}'", other),
        }
    }

    Ok((draft, image))
}
