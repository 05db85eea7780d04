use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::forum::service::ForumError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Request body or query the extractors could not accept
    #[error("Rejected request ({0}): {1}")]
    Rejected(StatusCode, String),

    #[error("Forum error: {0}")]
    Forum(#[from] ForumError),
}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::Rejected(status, msg) => (*status, msg.clone()),
            AppError::Forum(err) => match err {
                ForumError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
                ForumError::PostNotFound | ForumError::ParentNotFound => {
                    (StatusCode::NOT_FOUND, err.to_string())
                }
                ForumError::Persistence(e) => {
                    tracing::error!("Persistence error: {}", e);
                    internal()
                }
                ForumError::Storage(e) => {
                    tracing::error!("Image storage error: {}", e);
                    internal()
                }
            },
        }
    }
}

fn internal() -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        AppError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::Rejected(err.status(), err.body_text())
    }
}

pub type AppResult<T> = Result<T, AppError>;
