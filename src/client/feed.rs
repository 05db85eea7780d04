//! Local post list kept in step with the server.
//!
//! Updates arrive twice for the same mutation (the HTTP response and the
//! broadcast) in either order, or only once. Every merge is keyed by post id
//! and idempotent, so applying the same update again changes nothing.

use crate::forum::domain::{Post, PostId};
use crate::realtime::ForumEvent;

#[derive(Debug, Clone, Default)]
pub struct PostFeed {
    posts: Vec<Post>,
}

impl PostFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn get(&self, id: &PostId) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == *id)
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    /// Initial (or recovery) fetch: the server's list wins outright.
    pub fn replace_all(&mut self, posts: Vec<Post>) {
        self.posts = posts;
    }

    /// Prepend a post unless it is already present. Returns whether it was added.
    pub fn insert_new(&mut self, post: Post) -> bool {
        if self.get(&post.id).is_some() {
            return false;
        }
        self.posts.insert(0, post);
        true
    }

    /// Swap in a full snapshot at the same position. Unknown posts are left
    /// for the next full fetch.
    pub fn replace(&mut self, post: Post) -> bool {
        match self.posts.iter_mut().find(|p| p.id == post.id) {
            Some(existing) => {
                *existing = post;
                true
            }
            None => false,
        }
    }

    /// Set (not add to) the like counter of a post.
    pub fn set_likes(&mut self, id: &PostId, likes: u64) -> bool {
        match self.posts.iter_mut().find(|p| p.id == *id) {
            Some(existing) => {
                existing.likes = likes;
                true
            }
            None => false,
        }
    }

    /// Merge a broadcast event. Returns whether the feed changed.
    pub fn apply(&mut self, event: &ForumEvent) -> bool {
        match event {
            ForumEvent::NewPost(post) => self.insert_new(post.clone()),
            ForumEvent::NewComment {
                post_id,
                updated_post,
            } => {
                if updated_post.id != *post_id {
                    tracing::warn!(
                        "Ignoring comment event for {} carrying post {}",
                        post_id,
                        updated_post.id
                    );
                    return false;
                }
                self.replace(updated_post.clone())
            }
            ForumEvent::PostLiked { post_id, likes } => self.set_likes(post_id, *likes),
        }
    }
}
