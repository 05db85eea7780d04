//! Realtime fan-out of forum mutations to connected clients.
//!
//! Delivery is fire-and-forget: a subscriber that is not connected, or that
//! falls too far behind, simply misses events and catches up on its next
//! full fetch.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::forum::domain::{decode_json, Post, PostId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentNotice {
    pub post_id: PostId,
    pub updated_post: Post,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeNotice {
    pub post_id: PostId,
    pub likes: u64,
}

/// A mutation that already succeeded in the Post Store
#[derive(Debug, Clone, PartialEq)]
pub enum ForumEvent {
    NewPost(Post),
    NewComment { post_id: PostId, updated_post: Post },
    PostLiked { post_id: PostId, likes: u64 },
}

impl ForumEvent {
    pub const NEW_POST: &'static str = "newPost";
    pub const NEW_COMMENT: &'static str = "newComment";
    pub const POST_LIKED: &'static str = "postLiked";

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ForumEvent::NewPost(_) => Self::NEW_POST,
            ForumEvent::NewComment { .. } => Self::NEW_COMMENT,
            ForumEvent::PostLiked { .. } => Self::POST_LIKED,
        }
    }

    /// JSON payload sent alongside the event name
    pub fn payload(&self) -> Result<String, serde_json::Error> {
        match self {
            ForumEvent::NewPost(post) => serde_json::to_string(post),
            ForumEvent::NewComment {
                post_id,
                updated_post,
            } => serde_json::to_string(&CommentNotice {
                post_id: post_id.clone(),
                updated_post: updated_post.clone(),
            }),
            ForumEvent::PostLiked { post_id, likes } => serde_json::to_string(&LikeNotice {
                post_id: post_id.clone(),
                likes: *likes,
            }),
        }
    }

    /// Decode an event from its wire name and payload.
    ///
    /// Unknown event names yield `Ok(None)`.
    pub fn decode(name: &str, payload: &str) -> Result<Option<Self>, serde_json::Error> {
        let event = match name {
            Self::NEW_POST => ForumEvent::NewPost(decode_json(payload.as_bytes())?),
            Self::NEW_COMMENT => {
                let notice: CommentNotice = decode_json(payload.as_bytes())?;
                ForumEvent::NewComment {
                    post_id: notice.post_id,
                    updated_post: notice.updated_post,
                }
            }
            Self::POST_LIKED => {
                let notice: LikeNotice = decode_json(payload.as_bytes())?;
                ForumEvent::PostLiked {
                    post_id: notice.post_id,
                    likes: notice.likes,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn post_id(&self) -> &PostId {
        match self {
            ForumEvent::NewPost(post) => &post.id,
            ForumEvent::NewComment { post_id, .. } => post_id,
            ForumEvent::PostLiked { post_id, .. } => post_id,
        }
    }
}

/// Broadcast hub. Created once at startup and owned by the app state; each
/// connected client holds its own receiver for as long as it is connected.
#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<ForumEvent>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            sender,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ForumEvent> {
        self.sender.subscribe()
    }

    /// Send to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: ForumEvent) -> usize {
        let name = event.name();
        let post_id = event.post_id().clone();
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::debug!("Broadcast {} for post {} to {} client(s)", name, post_id, receivers);
                receivers
            }
            Err(_) => {
                tracing::debug!("No clients connected, dropping {} for post {}", name, post_id);
                0
            }
        }
    }

    pub fn connected_clients(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Tell every open client stream to finish, e.g. on server shutdown.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Resolves once `shutdown` has been called.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.shutdown.subscribe();
        async move {
            // An error means the sender is gone, which also ends the streams
            let _ = receiver.wait_for(|closed| *closed).await;
        }
    }
}
