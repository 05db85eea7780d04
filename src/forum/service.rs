use crate::forum::domain::*;
use crate::forum::repository::{DynPostRepository, RepositoryError};
use crate::realtime::{ForumEvent, Notifier};
use crate::storage::{ImageStore, ImageUpload};

#[derive(Debug, thiserror::Error)]
pub enum ForumError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Post not found")]
    PostNotFound,

    #[error("Parent comment not found")]
    ParentNotFound,

    #[error("Persistence error: {0}")]
    Persistence(RepositoryError),

    #[error("Image storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl From<RepositoryError> for ForumError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::PostNotFound(_) => ForumError::PostNotFound,
            RepositoryError::Thread(ThreadError::ParentNotFound(_)) => ForumError::ParentNotFound,
            other => ForumError::Persistence(other),
        }
    }
}

/// Forum operations. Every mutation is persisted before it is broadcast.
#[derive(Clone)]
pub struct ForumService {
    posts: DynPostRepository,
    notifier: Notifier,
    images: ImageStore,
}

impl ForumService {
    pub fn new(posts: DynPostRepository, notifier: Notifier, images: ImageStore) -> Self {
        Self {
            posts,
            notifier,
            images,
        }
    }

    pub async fn create_post(
        &self,
        draft: PostDraft,
        image: Option<ImageUpload>,
    ) -> Result<Post, ForumError> {
        let draft = draft.validate()?;
        if let Some(upload) = &image {
            upload.check()?;
        }

        let image_path = match image {
            Some(upload) => Some(self.images.save(upload).await?),
            None => None,
        };

        let post = Post::from_draft(draft, image_path);
        if let Err(e) = self.posts.insert(&post).await {
            if !post.image.is_empty() {
                self.images.remove(&post.image).await;
            }
            return Err(e.into());
        }

        tracing::info!("Created post {} in '{}'", post.id, post.category);
        self.notifier.publish(ForumEvent::NewPost(post.clone()));
        Ok(post)
    }

    pub async fn list_posts(&self, category: Option<&str>) -> Result<Vec<Post>, ForumError> {
        Ok(self.posts.list(category).await?)
    }

    pub async fn get_post(&self, id: &PostId) -> Result<Post, ForumError> {
        self.posts.load(id).await?.ok_or(ForumError::PostNotFound)
    }

    /// Add a top-level comment, or a reply when the draft names a parent.
    pub async fn add_comment(
        &self,
        post_id: &PostId,
        draft: CommentDraft,
    ) -> Result<Post, ForumError> {
        let (comment, parent) = draft.validate()?;
        let comment_id = comment.id.clone();

        let post = self
            .posts
            .add_comment(post_id, parent.as_ref(), comment)
            .await?;

        tracing::info!(
            "Added comment {} to post {} (parent: {:?})",
            comment_id,
            post_id,
            parent.as_ref().map(CommentId::as_str)
        );
        self.notifier.publish(ForumEvent::NewComment {
            post_id: post.id.clone(),
            updated_post: post.clone(),
        });
        Ok(post)
    }

    pub async fn like_post(&self, post_id: &PostId) -> Result<Post, ForumError> {
        let post = self.posts.increment_likes(post_id).await?;

        self.notifier.publish(ForumEvent::PostLiked {
            post_id: post.id.clone(),
            likes: post.likes,
        });
        Ok(post)
    }
}
