use askama::Template;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::AppResult;
use crate::forum::domain::{Comment, Post};
use crate::routes::posts::ListQuery;
use crate::state::AppState;

const ANONYMOUS: &str = "Anonymous";

// --- View structs ---

pub struct PostView {
    pub id: String,
    pub title: String,
    pub category: String,
    pub content: String,
    pub image: String,
    pub author: String,
    pub created_at: String,
    pub likes: u64,
    pub comment_count: usize,
    pub comments: Vec<CommentRow>,
}

/// One comment of a thread, flattened with its depth for indentation
#[derive(Debug)]
pub struct CommentRow {
    pub id: String,
    pub author: String,
    pub text: String,
    pub created_at: String,
    pub depth: usize,
}

impl CommentRow {
    pub fn indent(&self) -> String {
        format!("{}rem", self.depth as f32 * 1.5)
    }
}

impl From<&Post> for PostView {
    fn from(post: &Post) -> Self {
        let mut comments = Vec::new();
        flatten_thread(&post.comments, 0, &mut comments);

        Self {
            id: post.id.to_string(),
            title: post.title.clone(),
            category: post.category.clone(),
            content: post.content.clone(),
            image: post.image.clone(),
            author: author(&post.username),
            created_at: format_timestamp(&post.created_at),
            likes: post.likes,
            comment_count: post.total_comments(),
            comments,
        }
    }
}

/// Depth-first, parents before their replies, replies in insertion order
fn flatten_thread(comments: &[Comment], depth: usize, rows: &mut Vec<CommentRow>) {
    for comment in comments {
        rows.push(CommentRow {
            id: comment.id.to_string(),
            author: author(&comment.username),
            text: comment.text.clone(),
            created_at: format_timestamp(&comment.created_at),
            depth,
        });
        flatten_thread(&comment.replies, depth + 1, rows);
    }
}

fn author(username: &Option<String>) -> String {
    username.clone().unwrap_or_else(|| ANONYMOUS.to_string())
}

// --- Templates ---

#[derive(Template)]
#[template(path = "pages/forum.html")]
pub struct ForumTemplate {
    pub posts: Vec<PostView>,
    pub category: Option<String>,
}

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

// --- Handlers ---

pub async fn index(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> AppResult<Html<ForumTemplate>> {
    let Query(query) = query?;
    let category = query.category().map(String::from);
    let posts = state.forum.list_posts(category.as_deref()).await?;

    Ok(Html(ForumTemplate {
        posts: posts.iter().map(PostView::from).collect(),
        category,
    }))
}

// --- Time formatting ---

fn format_timestamp(at: &DateTime<Utc>) -> String {
    format_relative_time(&at.naive_utc())
}

pub fn format_relative_time(dt: &NaiveDateTime) -> String {
    let now = Utc::now().naive_utc();
    let diff = now.signed_duration_since(*dt);

    let seconds = diff.num_seconds();
    if seconds < 60 {
        return "just now".to_string();
    }

    let minutes = diff.num_minutes();
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }

    let hours = diff.num_hours();
    if hours < 24 {
        return format!("{}h ago", hours);
    }

    let days = diff.num_days();
    if days < 7 {
        return format!("{}d ago", days);
    }

    dt.format("%b %-d, %Y").to_string()
}

// --- Tests ---
