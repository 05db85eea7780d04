pub mod domain;
pub mod repository;
pub mod service;

pub use domain::{Comment, CommentDraft, CommentId, Post, PostDraft, PostId};
pub use repository::{DynPostRepository, PostRepository, RepositoryError, SqlitePostRepository};
pub use service::{ForumError, ForumService};
