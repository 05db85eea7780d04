//! Rust client for the forum: plain HTTP calls plus a live connection that
//! keeps a local [`PostFeed`] reconciled with the server.

pub mod feed;
pub mod sse;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::forum::domain::{decode_json, CommentId, Post, PostId};
use crate::realtime::ForumEvent;

pub use self::feed::PostFeed;
pub use self::sse::{SseDecoder, SseFrame};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },
}

/// Fields of the create-post form
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub category: String,
    pub username: Option<String>,
    pub image: Option<NewImage>,
}

#[derive(Debug, Clone)]
pub struct NewImage {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommentBody<'a> {
    text: &'a str,
    parent_comment_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
}

#[derive(Clone)]
pub struct ForumClient {
    http: reqwest::Client,
    base_url: String,
}

impl ForumClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn list_posts(&self, category: Option<&str>) -> Result<Vec<Post>, ClientError> {
        let mut request = self.http.get(self.url("/posts"));
        if let Some(category) = category {
            request = request.query(&[("category", category)]);
        }
        decode(request.send().await?).await
    }

    pub async fn get_post(&self, id: &PostId) -> Result<Post, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("/posts/{}", id)))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn create_post(&self, post: NewPost) -> Result<Post, ClientError> {
        let mut form = reqwest::multipart::Form::new()
            .text("title", post.title)
            .text("content", post.content)
            .text("category", post.category);
        if let Some(username) = post.username {
            form = form.text("username", username);
        }
        if let Some(image) = post.image {
            let part = reqwest::multipart::Part::bytes(image.data)
                .file_name(image.file_name)
                .mime_str(&image.content_type)?;
            form = form.part("image", part);
        }

        let response = self
            .http
            .post(self.url("/posts"))
            .multipart(form)
            .send()
            .await?;
        decode(response).await
    }

    /// Comment on a post, or reply to `parent` anywhere in its thread.
    pub async fn add_comment(
        &self,
        post_id: &PostId,
        text: &str,
        parent: Option<&CommentId>,
    ) -> Result<Post, ClientError> {
        let body = CommentBody {
            text,
            parent_comment_id: parent.map(CommentId::as_str),
            username: None,
        };
        let response = self
            .http
            .post(self.url(&format!("/posts/{}/comment", post_id)))
            .json(&body)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn like_post(&self, post_id: &PostId) -> Result<Post, ClientError> {
        let response = self
            .http
            .post(self.url(&format!("/posts/{}/like", post_id)))
            .send()
            .await?;
        decode(response).await
    }

    /// Open the realtime stream. The server has registered the subscription
    /// by the time this returns.
    pub async fn subscribe(&self) -> Result<EventStream, ClientError> {
        let response = self
            .http
            .get(self.url("/events"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: status.to_string(),
            });
        }

        Ok(EventStream {
            response,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
        })
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        // Posts carry comment trees of any depth
        let body = response.bytes().await?;
        return Ok(decode_json(&body)?);
    }

    let message = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|body| body["error"].as_str().map(String::from))
        .unwrap_or_else(|| status.to_string());
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Forum events read off an open `/events` response
pub struct EventStream {
    response: reqwest::Response,
    decoder: SseDecoder,
    pending: VecDeque<SseFrame>,
}

impl EventStream {
    /// Next forum event, or `None` once the server closes the stream.
    pub async fn next_event(&mut self) -> Result<Option<ForumEvent>, ClientError> {
        loop {
            while let Some(frame) = self.pending.pop_front() {
                match ForumEvent::decode(&frame.event, &frame.data) {
                    Ok(Some(event)) => return Ok(Some(event)),
                    Ok(None) => tracing::debug!("Skipping unknown event '{}'", frame.event),
                    Err(e) => tracing::warn!("Skipping malformed '{}' event: {}", frame.event, e),
                }
            }

            match self.response.chunk().await? {
                Some(chunk) => self.pending.extend(self.decoder.push(&chunk)),
                None => return Ok(None),
            }
        }
    }
}

/// A live view of the forum.
///
/// `connect` subscribes to the event stream before fetching the post list,
/// so nothing published in between is missed. The background task stops on
/// `disconnect` or when the connection is dropped.
pub struct ForumConnection {
    client: ForumClient,
    feed: Arc<RwLock<PostFeed>>,
    task: Option<JoinHandle<()>>,
}

impl ForumConnection {
    pub async fn connect(client: ForumClient) -> Result<Self, ClientError> {
        let mut events = client.subscribe().await?;

        let feed = Arc::new(RwLock::new(PostFeed::new()));
        let posts = client.list_posts(None).await?;
        feed.write().await.replace_all(posts);

        let task_feed = feed.clone();
        let task = tokio::spawn(async move {
            loop {
                match events.next_event().await {
                    Ok(Some(event)) => {
                        let changed = task_feed.write().await.apply(&event);
                        tracing::debug!(
                            "Applied {} for post {} (changed: {})",
                            event.name(),
                            event.post_id(),
                            changed
                        );
                    }
                    Ok(None) => {
                        tracing::info!("Event stream closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Event stream failed: {}", e);
                        break;
                    }
                }
            }
        });

        tracing::info!("Connected to forum at {}", client.base_url);
        Ok(Self {
            client,
            feed,
            task: Some(task),
        })
    }

    pub fn client(&self) -> &ForumClient {
        &self.client
    }

    /// Copy of the current local state
    pub async fn snapshot(&self) -> PostFeed {
        self.feed.read().await.clone()
    }

    /// Whether events are still being received
    pub fn is_live(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Refetch everything, e.g. after the event stream dropped.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let posts = self.client.list_posts(None).await?;
        self.feed.write().await.replace_all(posts);
        Ok(())
    }

    pub async fn create_post(&self, post: NewPost) -> Result<Post, ClientError> {
        let post = self.client.create_post(post).await?;
        self.feed.write().await.insert_new(post.clone());
        Ok(post)
    }

    pub async fn add_comment(
        &self,
        post_id: &PostId,
        text: &str,
        parent: Option<&CommentId>,
    ) -> Result<Post, ClientError> {
        let post = self.client.add_comment(post_id, text, parent).await?;
        self.feed.write().await.replace(post.clone());
        Ok(post)
    }

    pub async fn like_post(&self, post_id: &PostId) -> Result<Post, ClientError> {
        let post = self.client.like_post(post_id).await?;
        self.feed.write().await.replace(post.clone());
        Ok(post)
    }

    pub fn disconnect(mut self) {
        self.stop();
        tracing::info!("Disconnected from forum at {}", self.client.base_url);
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ForumConnection {
    fn drop(&mut self) {
        self.stop();
    }
}
