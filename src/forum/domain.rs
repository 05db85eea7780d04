// Domain types - pure data and tree operations, no side effects
use chrono::{DateTime, SubsecRound, Utc};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Newtypes for compile-time safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub String);

impl PostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(pub String);

impl CommentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node in a post's discussion tree. Every node owns its replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub dislikes: u64,
    #[serde(default, deserialize_with = "lenient_comments")]
    pub replies: Vec<Comment>,
}

impl Comment {
    /// Fresh leaf node with a server-assigned id and timestamp.
    pub fn new(text: impl Into<String>, username: Option<String>) -> Self {
        Self {
            id: CommentId::generate(),
            username,
            text: text.into(),
            created_at: Utc::now(),
            likes: 0,
            dislikes: 0,
            replies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    #[serde(default)]
    pub username: Option<String>,
    pub category: String,
    pub title: String,
    pub content: String,
    /// Path of the stored image, empty when the post has none
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub likes: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "lenient_comments")]
    pub comments: Vec<Comment>,
}

impl Post {
    /// Build a new post from a validated draft. Starts with no comments and no likes.
    pub fn from_draft(draft: ValidPostDraft, image: Option<String>) -> Self {
        Self {
            id: PostId::generate(),
            username: draft.username,
            category: draft.category,
            title: draft.title,
            content: draft.content,
            image: image.unwrap_or_default(),
            likes: 0,
            // Stored timestamps keep microsecond precision
            created_at: Utc::now().trunc_subsecs(6),
            comments: Vec::new(),
        }
    }

    /// Number of nodes in the whole comment tree.
    pub fn total_comments(&self) -> usize {
        fn count(comments: &[Comment]) -> usize {
            comments.iter().map(|c| 1 + count(&c.replies)).sum()
        }
        count(&self.comments)
    }
}

// --- Drafts ---

/// Unvalidated create-post input, as it arrives from a form.
#[derive(Debug, Clone, Default)]
pub struct PostDraft {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidPostDraft {
    pub title: String,
    pub content: String,
    pub category: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl PostDraft {
    pub fn validate(self) -> Result<ValidPostDraft, ValidationError> {
        let title = non_blank(self.title);
        let content = non_blank(self.content);
        let category = trimmed(self.category);

        match (title, content, category) {
            (Some(title), Some(content), Some(category)) => Ok(ValidPostDraft {
                title,
                content,
                category,
                username: trimmed(self.username),
            }),
            _ => Err(ValidationError("All fields are required".into())),
        }
    }
}

/// Add-comment input. A blank parent id means a top-level comment.
#[derive(Debug, Clone, Default)]
pub struct CommentDraft {
    pub text: String,
    pub parent_comment_id: Option<String>,
    pub username: Option<String>,
}

impl CommentDraft {
    pub fn validate(self) -> Result<(Comment, Option<CommentId>), ValidationError> {
        let text = non_blank(Some(self.text))
            .ok_or_else(|| ValidationError("Comment text is required".into()))?;
        let parent = trimmed(self.parent_comment_id).map(CommentId::new);
        Ok((Comment::new(text, trimmed(self.username)), parent))
    }
}

/// The value as submitted, or `None` when it is missing or only whitespace
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn trimmed(value: Option<String>) -> Option<String> {
    non_blank(value).map(|v| v.trim().to_string())
}

// --- Stored thread ---

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThreadError {
    #[error("Parent comment not found: {0}")]
    ParentNotFound(CommentId),
}

/// A post's comment tree exactly as it was stored.
///
/// Nodes are kept as raw JSON so a write touches nothing but the node it
/// appends; normalization into [`Comment`]s happens only on the way out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredThread {
    nodes: Vec<Value>,
}

impl StoredThread {
    /// Parse a stored tree of any depth. A document that is not an array
    /// holds no comments.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        let nodes = match decode_json::<Value>(json.as_bytes())? {
            Value::Array(nodes) => nodes,
            other => {
                tracing::warn!("Stored comment tree is not a list: {}", kind(&other));
                Vec::new()
            }
        };
        Ok(Self { nodes })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.nodes)
    }

    /// The tree as clients see it
    pub fn comments(&self) -> Vec<Comment> {
        normalize_nodes(&self.nodes)
    }

    /// Find the comment with `id` anywhere in the tree, depth-first in
    /// document order. Returns the child indexes leading to it.
    ///
    /// Only nodes a client can see are candidates: an unreadable node and
    /// everything below it are skipped.
    pub fn locate(&self, id: &CommentId) -> Option<Vec<usize>> {
        let mut stack: Vec<(Vec<usize>, &Value)> = self
            .nodes
            .iter()
            .enumerate()
            .rev()
            .map(|(i, node)| (vec![i], node))
            .collect();

        while let Some((path, node)) = stack.pop() {
            let Ok(comment) = decode_node(node) else {
                continue;
            };
            if comment.id == *id {
                return Some(path);
            }
            for (i, child) in replies_of(node).iter().enumerate().rev() {
                let mut child_path = path.clone();
                child_path.push(i);
                stack.push((child_path, child));
            }
        }
        None
    }

    /// Append `node` at top level or to the replies of `parent`.
    ///
    /// The tree is untouched when the parent does not exist.
    pub fn insert(&mut self, parent: Option<&CommentId>, node: Value) -> Result<(), ThreadError> {
        let siblings = match parent {
            None => &mut self.nodes,
            Some(parent_id) => {
                let not_found = || ThreadError::ParentNotFound(parent_id.clone());
                let path = self.locate(parent_id).ok_or_else(not_found)?;
                self.node_mut(&path)
                    .and_then(replies_mut)
                    .ok_or_else(not_found)?
            }
        };
        siblings.push(node);
        Ok(())
    }

    fn node_mut(&mut self, path: &[usize]) -> Option<&mut Value> {
        let (first, rest) = path.split_first()?;
        let mut node = self.nodes.get_mut(*first)?;
        for &i in rest {
            node = node.get_mut("replies")?.as_array_mut()?.get_mut(i)?;
        }
        Some(node)
    }
}

fn replies_of(node: &Value) -> &[Value] {
    node.get("replies")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// The reply list of `node`, created when it is missing or malformed
fn replies_mut(node: &mut Value) -> Option<&mut Vec<Value>> {
    let replies = node
        .as_object_mut()?
        .entry("replies")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !replies.is_array() {
        *replies = Value::Array(Vec::new());
    }
    replies.as_array_mut()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// --- Lenient decoding ---

/// Decode JSON with no nesting limit. Comment trees can be deeper than
/// serde_json's default of 128 levels.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_json::Error> {
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    deserializer.disable_recursion_limit();
    let value = T::deserialize(serde_stacker::Deserializer::new(&mut deserializer))?;
    deserializer.end()?;
    Ok(value)
}

/// A single node without its replies. Documents written with `_id` keys
/// are read as if the key were `id`.
fn decode_node(node: &Value) -> Result<Comment, serde_json::Error> {
    let Some(map) = node.as_object() else {
        return Err(de::Error::custom(format!(
            "expected a comment object, found {}",
            kind(node)
        )));
    };

    let mut fields: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| key.as_str() != "replies")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if !fields.contains_key("id") {
        if let Some(legacy) = map.get("_id") {
            fields.insert("id".to_string(), legacy.clone());
        }
    }
    serde_json::from_value(Value::Object(fields))
}

fn normalize_nodes(nodes: &[Value]) -> Vec<Comment> {
    nodes
        .iter()
        .filter_map(|node| match decode_node(node) {
            Ok(mut comment) => {
                comment.replies = normalize_nodes(replies_of(node));
                Some(comment)
            }
            Err(e) => {
                tracing::warn!("Dropping malformed comment: {}", e);
                None
            }
        })
        .collect()
}

/// Decode a comment list from loosely-shaped JSON.
///
/// Anything that is not an array becomes empty; entries that are not
/// comments are dropped.
pub fn comments_from_value(value: &Value) -> Vec<Comment> {
    value.as_array().map(|nodes| normalize_nodes(nodes)).unwrap_or_default()
}

fn lenient_comments<'de, D>(deserializer: D) -> Result<Vec<Comment>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(comments_from_value).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, replies: Vec<Value>) -> Value {
        json!({
            "id": id,
            "text": format!("text {}", id),
            "createdAt": "2025-01-15T12:00:00Z",
            "replies": replies,
        })
    }

    fn sample_thread() -> StoredThread {
        StoredThread {
            nodes: vec![
                node("a", vec![node("a1", vec![node("a1x", vec![])])]),
                node("b", vec![node("b1", vec![]), node("b2", vec![])]),
            ],
        }
    }

    /// A single reply chain `depth` levels below the top-level comment
    fn chain(depth: usize) -> Value {
        let mut current = node("leaf", vec![]);
        for level in (0..depth).rev() {
            current = node(&format!("n{}", level), vec![current]);
        }
        Value::Array(vec![current])
    }

    fn depth_of(comments: &[Comment]) -> usize {
        let mut depth = 0;
        let mut level = comments;
        while let Some(first) = level.first() {
            depth += 1;
            level = &first.replies;
        }
        depth
    }

    fn new_node(text: &str) -> (CommentId, Value) {
        let comment = Comment::new(text, None);
        (comment.id.clone(), serde_json::to_value(&comment).unwrap())
    }

    #[test]
    fn locate_finds_top_level_and_nested() {
        let thread = sample_thread();
        assert_eq!(thread.locate(&CommentId::new("b")), Some(vec![1]));
        assert_eq!(thread.locate(&CommentId::new("a1x")), Some(vec![0, 0, 0]));
        assert_eq!(thread.locate(&CommentId::new("b2")), Some(vec![1, 1]));
    }

    #[test]
    fn locate_returns_none_when_missing() {
        assert!(sample_thread().locate(&CommentId::new("zzz")).is_none());
        assert!(StoredThread::default().locate(&CommentId::new("a")).is_none());
    }

    #[test]
    fn locate_skips_unreadable_subtrees() {
        let thread = StoredThread {
            nodes: vec![json!({ "text": "no id", "replies": [node("hidden", vec![])] })],
        };
        assert!(thread.locate(&CommentId::new("hidden")).is_none());
        assert!(thread.comments().is_empty());
    }

    #[test]
    fn insert_top_level_appends_in_order() {
        let mut thread = sample_thread();
        let (id, new) = new_node("c");
        thread.insert(None, new).unwrap();

        let comments = thread.comments();
        assert_eq!(comments.len(), 3);
        assert_eq!(comments[2].id, id);
        assert!(comments[2].replies.is_empty());
    }

    #[test]
    fn insert_reply_appends_to_nested_parent_only() {
        let mut thread = sample_thread();
        let before = thread.clone();
        let (id, new) = new_node("new");
        thread.insert(Some(&CommentId::new("a1")), new).unwrap();

        let comments = thread.comments();
        let replies: Vec<&CommentId> = comments[0].replies[0].replies.iter().map(|c| &c.id).collect();
        assert_eq!(replies, vec![&CommentId::new("a1x"), &id]);

        // Everything outside the parent's reply list is unchanged
        assert_eq!(thread.nodes[1], before.nodes[1]);
        assert_eq!(thread.nodes[0]["replies"][0]["replies"][0], before.nodes[0]["replies"][0]["replies"][0]);
        assert_eq!(thread.nodes[0]["text"], before.nodes[0]["text"]);
    }

    #[test]
    fn insert_reply_to_missing_parent_leaves_thread_unchanged() {
        let mut thread = sample_thread();
        let before = thread.clone();
        let (_, new) = new_node("x");
        let err = thread.insert(Some(&CommentId::new("ghost")), new).unwrap_err();
        assert_eq!(err, ThreadError::ParentNotFound(CommentId::new("ghost")));
        assert_eq!(thread, before);
    }

    #[test]
    fn insert_keeps_stored_nodes_as_they_were() {
        let stored = json!([
            { "text": "no id at all" },
            42,
            { "id": "c1", "text": "no timestamp" }
        ]);
        let mut thread = StoredThread::parse(&stored.to_string()).unwrap();
        let (_, new) = new_node("new");
        thread.insert(None, new).unwrap();

        let written: Value = serde_json::from_str(&thread.to_json().unwrap()).unwrap();
        let written = written.as_array().unwrap();
        assert_eq!(written.len(), 4);
        assert_eq!(written[..3], stored.as_array().unwrap()[..]);
        assert!(written[2].get("createdAt").is_none());
    }

    #[test]
    fn reply_to_legacy_underscore_id() {
        let stored = json!([{ "_id": "m1", "text": "legacy", "replies": null }]);
        let mut thread = StoredThread::parse(&stored.to_string()).unwrap();
        assert_eq!(thread.comments()[0].id, CommentId::new("m1"));

        let (_, new) = new_node("re: legacy");
        thread.insert(Some(&CommentId::new("m1")), new).unwrap();
        assert_eq!(thread.comments()[0].replies[0].text, "re: legacy");
        assert_eq!(thread.nodes[0]["_id"], "m1");
    }

    #[test]
    fn deep_threads_parse_and_grow() {
        // Far past serde_json's default nesting limit of 128
        let json = chain(150).to_string();
        let mut thread = StoredThread::parse(&json).unwrap();
        assert_eq!(depth_of(&thread.comments()), 151);

        let (_, new) = new_node("deeper");
        thread.insert(Some(&CommentId::new("leaf")), new).unwrap();
        let reread = StoredThread::parse(&thread.to_json().unwrap()).unwrap();
        assert_eq!(depth_of(&reread.comments()), 152);
    }

    #[test]
    fn deep_posts_decode() {
        let json = json!({
            "id": "p1",
            "category": "general",
            "title": "Hello",
            "content": "World",
            "createdAt": "2025-01-15T12:00:00Z",
            "comments": chain(100),
        })
        .to_string();
        assert!(serde_json::from_str::<Post>(&json).is_err());
        let post: Post = decode_json(json.as_bytes()).unwrap();
        assert_eq!(depth_of(&post.comments), 101);
        assert_eq!(post.total_comments(), 101);
    }

    #[test]
    fn non_array_document_has_no_comments() {
        let thread = StoredThread::parse(r#"{"oops": true}"#).unwrap();
        assert!(thread.comments().is_empty());
        assert_eq!(thread.to_json().unwrap(), "[]");
    }

    #[test]
    fn missing_or_malformed_replies_decode_as_empty() {
        let value = json!([
            { "id": "1", "text": "no replies field", "createdAt": "2025-01-15T12:00:00Z" },
            { "id": "2", "text": "null replies", "replies": null },
            { "id": "3", "text": "object replies", "replies": { "oops": true } },
            { "id": "4", "text": "nested", "replies": [ { "id": "5", "text": "deep" } ] }
        ]);
        let comments = comments_from_value(&value);
        assert_eq!(comments.len(), 4);
        assert!(comments[0].replies.is_empty());
        assert!(comments[1].replies.is_empty());
        assert!(comments[2].replies.is_empty());
        assert_eq!(comments[3].replies.len(), 1);
        assert!(comments[3].replies[0].replies.is_empty());
    }

    #[test]
    fn undecodable_entries_are_dropped() {
        let value = json!([{ "text": "no id" }, 42, ["ok", "text"], { "id": "ok" }]);
        let comments = comments_from_value(&value);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].id, CommentId::new("ok"));
    }

    #[test]
    fn post_without_comments_field_decodes_with_empty_list() {
        let post: Post = serde_json::from_value(json!({
            "id": "p1",
            "category": "general",
            "title": "Hello",
            "content": "World",
            "createdAt": "2025-01-15T12:00:00Z"
        }))
        .unwrap();
        assert!(post.comments.is_empty());
        assert_eq!(post.likes, 0);
        assert_eq!(post.image, "");
    }

    #[test]
    fn draft_requires_title_content_and_category() {
        let draft = PostDraft {
            title: Some("Hello".into()),
            content: Some("   ".into()),
            category: Some("general".into()),
            username: None,
        };
        assert_eq!(
            draft.validate().unwrap_err(),
            ValidationError("All fields are required".into())
        );
    }

    #[test]
    fn draft_keeps_text_as_submitted() {
        let draft = PostDraft {
            title: Some(" Hello ".into()),
            content: Some("  World\n".into()),
            category: Some(" general ".into()),
            username: Some("".into()),
        };
        let valid = draft.validate().unwrap();
        assert_eq!(valid.title, " Hello ");
        assert_eq!(valid.content, "  World\n");
        assert_eq!(valid.category, "general");
        assert_eq!(valid.username, None);
    }

    #[test]
    fn comment_draft_treats_blank_parent_as_top_level() {
        let draft = CommentDraft {
            text: "first!".into(),
            parent_comment_id: Some("".into()),
            username: None,
        };
        let (comment, parent) = draft.validate().unwrap();
        assert_eq!(comment.text, "first!");
        assert!(comment.replies.is_empty());
        assert!(parent.is_none());
    }

    #[test]
    fn comment_draft_keeps_surrounding_whitespace() {
        let draft = CommentDraft {
            text: "  hi  ".into(),
            parent_comment_id: Some(" c1 ".into()),
            username: None,
        };
        let (comment, parent) = draft.validate().unwrap();
        assert_eq!(comment.text, "  hi  ");
        assert_eq!(parent, Some(CommentId::new("c1")));
    }

    #[test]
    fn comment_draft_rejects_blank_text() {
        let draft = CommentDraft {
            text: "  ".into(),
            ..Default::default()
        };
        assert!(draft.validate().is_err());
    }

    #[test]
    fn new_post_starts_empty() {
        let draft = PostDraft {
            title: Some("Hello".into()),
            content: Some("World".into()),
            category: Some("general".into()),
            username: None,
        }
        .validate()
        .unwrap();
        let post = Post::from_draft(draft, None);
        assert_eq!(post.likes, 0);
        assert!(post.comments.is_empty());
        assert_eq!(post.image, "");
        assert_eq!(post.total_comments(), 0);
    }

    #[test]
    fn total_comments_counts_every_node() {
        let draft = PostDraft {
            title: Some("t".into()),
            content: Some("c".into()),
            category: Some("g".into()),
            username: None,
        }
        .validate()
        .unwrap();
        let mut post = Post::from_draft(draft, None);
        post.comments = sample_thread().comments();
        assert_eq!(post.total_comments(), 7);
    }
}
