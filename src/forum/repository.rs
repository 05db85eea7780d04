// Repository pattern - isolates all database side effects
use crate::forum::domain::*;
use crate::state::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("Post not found: {0}")]
    PostNotFound(PostId),

    #[error(transparent)]
    Thread(#[from] ThreadError),
}

/// Post Store - each post is one document (row + JSON comment tree)
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Store a brand new post
    async fn insert(&self, post: &Post) -> Result<(), RepositoryError>;

    /// All posts, newest first, optionally restricted to one category
    async fn list(&self, category: Option<&str>) -> Result<Vec<Post>, RepositoryError>;

    /// Load a single post by id
    async fn load(&self, id: &PostId) -> Result<Option<Post>, RepositoryError>;

    /// Atomically append a comment (or reply) and save the whole document
    async fn add_comment(
        &self,
        id: &PostId,
        parent: Option<&CommentId>,
        comment: Comment,
    ) -> Result<Post, RepositoryError>;

    /// Atomically bump the like counter by one
    async fn increment_likes(&self, id: &PostId) -> Result<Post, RepositoryError>;
}

/// SQLite implementation
pub struct SqlitePostRepository {
    pool: DbPool,
}

impl SqlitePostRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_POST: &str = "SELECT id, username, category, title, content, image, likes, created_at, comments_json
     FROM posts";

struct PostRow {
    id: String,
    username: Option<String>,
    category: String,
    title: String,
    content: String,
    image: String,
    likes: i64,
    created_at: String,
    comments_json: String,
}

impl PostRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            category: row.get(2)?,
            title: row.get(3)?,
            content: row.get(4)?,
            image: row.get(5)?,
            likes: row.get(6)?,
            created_at: row.get(7)?,
            comments_json: row.get(8)?,
        })
    }

    fn into_post(self) -> Result<Post, RepositoryError> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)?.with_timezone(&Utc);
        let comments = StoredThread::parse(&self.comments_json)?.comments();

        Ok(Post {
            id: PostId::new(self.id),
            username: self.username,
            category: self.category,
            title: self.title,
            content: self.content,
            image: self.image,
            likes: self.likes.max(0) as u64,
            created_at,
            comments,
        })
    }
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    // Fixed width so ORDER BY on the text column is chronological
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn load_post(conn: &Connection, id: &PostId) -> Result<Option<Post>, RepositoryError> {
    let row = conn
        .query_row(
            &format!("{} WHERE id = ?1", SELECT_POST),
            params![id.as_str()],
            PostRow::from_row,
        )
        .optional()?;

    row.map(PostRow::into_post).transpose()
}

/// Run `f` inside a write transaction; commit on success, roll back otherwise.
fn with_write_lock<T>(
    conn: &Connection,
    f: impl FnOnce() -> Result<T, RepositoryError>,
) -> Result<T, RepositoryError> {
    // Serializes concurrent writers on the database
    conn.execute("BEGIN IMMEDIATE", [])?;

    match f() {
        Ok(value) => {
            conn.execute("COMMIT", [])?;
            Ok(value)
        }
        Err(e) => {
            conn.execute("ROLLBACK", [])?;
            Err(e)
        }
    }
}

#[async_trait]
impl PostRepository for SqlitePostRepository {
    async fn insert(&self, post: &Post) -> Result<(), RepositoryError> {
        let conn = self.pool.get()?;

        conn.execute(
            "INSERT INTO posts (id, username, category, title, content, image, likes, created_at, comments_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                post.id.as_str(),
                post.username,
                post.category,
                post.title,
                post.content,
                post.image,
                post.likes as i64,
                format_timestamp(&post.created_at),
                serde_json::to_string(&post.comments)?,
            ],
        )?;

        Ok(())
    }

    async fn list(&self, category: Option<&str>) -> Result<Vec<Post>, RepositoryError> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(&format!(
            "{} WHERE (?1 IS NULL OR category = ?1) ORDER BY created_at DESC, rowid DESC",
            SELECT_POST
        ))?;

        let rows: Vec<PostRow> = stmt
            .query_map(params![category], PostRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        // One unreadable document must not hide the rest of the forum
        let posts = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                match row.into_post() {
                    Ok(post) => Some(post),
                    Err(e) => {
                        tracing::warn!("Skipping unreadable post {}: {}", id, e);
                        None
                    }
                }
            })
            .collect();

        Ok(posts)
    }

    async fn load(&self, id: &PostId) -> Result<Option<Post>, RepositoryError> {
        let conn = self.pool.get()?;
        load_post(&conn, id)
    }

    async fn add_comment(
        &self,
        id: &PostId,
        parent: Option<&CommentId>,
        comment: Comment,
    ) -> Result<Post, RepositoryError> {
        let conn = self.pool.get()?;

        with_write_lock(&conn, || {
            let comments_json: String = conn
                .query_row(
                    "SELECT comments_json FROM posts WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| RepositoryError::PostNotFound(id.clone()))?;

            // Only the new node is added; stored nodes are written back as read
            let mut thread = StoredThread::parse(&comments_json)?;
            thread.insert(parent, serde_json::to_value(&comment)?)?;

            conn.execute(
                "UPDATE posts SET comments_json = ?2 WHERE id = ?1",
                params![id.as_str(), thread.to_json()?],
            )?;

            load_post(&conn, id)?.ok_or_else(|| RepositoryError::PostNotFound(id.clone()))
        })
    }

    async fn increment_likes(&self, id: &PostId) -> Result<Post, RepositoryError> {
        let conn = self.pool.get()?;

        with_write_lock(&conn, || {
            let rows = conn.execute(
                "UPDATE posts SET likes = likes + 1 WHERE id = ?1",
                params![id.as_str()],
            )?;
            if rows == 0 {
                return Err(RepositoryError::PostNotFound(id.clone()));
            }

            load_post(&conn, id)?.ok_or_else(|| RepositoryError::PostNotFound(id.clone()))
        })
    }
}

/// Type alias for Arc-wrapped repository (for AppState)
pub type DynPostRepository = Arc<dyn PostRepository>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    fn create_test_repo() -> (SqlitePostRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = db::create_pool(&db_path).unwrap();
        db::run_migrations(&pool).unwrap();

        (SqlitePostRepository::new(pool), temp_dir)
    }

    fn new_post(title: &str, category: &str) -> Post {
        let draft = PostDraft {
            title: Some(title.into()),
            content: Some("body".into()),
            category: Some(category.into()),
            username: Some("alice".into()),
        }
        .validate()
        .unwrap();
        Post::from_draft(draft, None)
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let (repo, _temp) = create_test_repo();
        let post = new_post("Hello", "general");

        repo.insert(&post).await.unwrap();

        let loaded = repo.load(&post.id).await.unwrap();
        assert_eq!(loaded, Some(post));
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let (repo, _temp) = create_test_repo();
        let loaded = repo.load(&PostId::new("nope")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first_with_category_filter() {
        let (repo, _temp) = create_test_repo();
        let first = new_post("first", "general");
        let second = new_post("second", "markets");
        let third = new_post("third", "general");
        for post in [&first, &second, &third] {
            repo.insert(post).await.unwrap();
        }

        let all = repo.list(None).await.unwrap();
        let titles: Vec<&str> = all.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["third", "second", "first"]);

        let general = repo.list(Some("general")).await.unwrap();
        let titles: Vec<&str> = general.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["third", "first"]);
    }

    #[tokio::test]
    async fn test_add_comment_and_reply_persist() {
        let (repo, _temp) = create_test_repo();
        let post = new_post("Hello", "general");
        repo.insert(&post).await.unwrap();

        let top = Comment::new("first!", None);
        let top_id = top.id.clone();
        repo.add_comment(&post.id, None, top).await.unwrap();

        let reply = Comment::new("re: first", None);
        let updated = repo
            .add_comment(&post.id, Some(&top_id), reply)
            .await
            .unwrap();

        let loaded = repo.load(&post.id).await.unwrap().unwrap();
        assert_eq!(loaded, updated);
        assert_eq!(loaded.comments.len(), 1);
        assert_eq!(loaded.comments[0].replies.len(), 1);
        assert_eq!(loaded.comments[0].replies[0].text, "re: first");
    }

    #[tokio::test]
    async fn test_add_comment_missing_parent_rolls_back() {
        let (repo, _temp) = create_test_repo();
        let post = new_post("Hello", "general");
        repo.insert(&post).await.unwrap();

        let result = repo
            .add_comment(
                &post.id,
                Some(&CommentId::new("ghost")),
                Comment::new("orphan", None),
            )
            .await;
        assert!(matches!(
            result,
            Err(RepositoryError::Thread(ThreadError::ParentNotFound(_)))
        ));

        let loaded = repo.load(&post.id).await.unwrap().unwrap();
        assert_eq!(loaded, post);

        // Connection is usable again after the rollback
        repo.add_comment(&post.id, None, Comment::new("ok", None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_add_comment_missing_post() {
        let (repo, _temp) = create_test_repo();
        let result = repo
            .add_comment(&PostId::new("nope"), None, Comment::new("x", None))
            .await;
        assert!(matches!(result, Err(RepositoryError::PostNotFound(_))));
    }

    #[tokio::test]
    async fn test_increment_likes() {
        let (repo, _temp) = create_test_repo();
        let post = new_post("Hello", "general");
        repo.insert(&post).await.unwrap();

        for _ in 0..5 {
            repo.increment_likes(&post.id).await.unwrap();
        }

        let loaded = repo.load(&post.id).await.unwrap().unwrap();
        assert_eq!(loaded.likes, 5);

        let missing = repo.increment_likes(&PostId::new("nope")).await;
        assert!(matches!(missing, Err(RepositoryError::PostNotFound(_))));
    }

    #[tokio::test]
    async fn test_malformed_stored_comments_are_normalized() {
        let (repo, _temp) = create_test_repo();
        let conn = repo.pool.get().unwrap();
        conn.execute(
            "INSERT INTO posts (id, category, title, content, created_at, comments_json)
             VALUES ('legacy', 'general', 't', 'c', '2025-01-15T12:00:00.000000Z',
                     '[{\"id\":\"c1\",\"text\":\"old\"},{\"id\":\"c2\",\"text\":\"x\",\"replies\":null}]')",
            [],
        )
        .unwrap();
        drop(conn);

        let post = repo.load(&PostId::new("legacy")).await.unwrap().unwrap();
        assert_eq!(post.comments.len(), 2);
        assert!(post.comments.iter().all(|c| c.replies.is_empty()));
        assert_eq!(post.image, "");
    }

    #[tokio::test]
    async fn test_deep_reply_chain_stays_readable() {
        let (repo, _temp) = create_test_repo();
        let post = new_post("Deep", "general");
        repo.insert(&post).await.unwrap();

        let mut parent = None;
        for level in 0..80 {
            let reply = Comment::new(format!("level {}", level), None);
            let reply_id = reply.id.clone();
            repo.add_comment(&post.id, parent.as_ref(), reply)
                .await
                .unwrap();
            parent = Some(reply_id);
        }

        let listed = repo.list(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].total_comments(), 80);

        let mut node = &listed[0].comments[0];
        while let Some(child) = node.replies.first() {
            node = child;
        }
        assert_eq!(node.text, "level 79");
    }

    #[tokio::test]
    async fn test_unreadable_post_does_not_break_list() {
        let (repo, _temp) = create_test_repo();
        let good = new_post("good", "general");
        repo.insert(&good).await.unwrap();

        let conn = repo.pool.get().unwrap();
        conn.execute(
            "INSERT INTO posts (id, category, title, content, created_at, comments_json)
             VALUES ('broken', 'general', 't', 'c', 'not a timestamp', '[]')",
            [],
        )
        .unwrap();
        drop(conn);

        let listed = repo.list(None).await.unwrap();
        assert_eq!(listed, vec![good]);
    }

    #[tokio::test]
    async fn test_add_comment_leaves_stored_nodes_untouched() {
        let (repo, _temp) = create_test_repo();
        let stored = serde_json::json!([
            { "legacy": "no id" },
            { "id": "c1", "text": "no timestamp" }
        ]);
        let conn = repo.pool.get().unwrap();
        conn.execute(
            "INSERT INTO posts (id, category, title, content, created_at, comments_json)
             VALUES ('legacy', 'general', 't', 'c', '2025-01-15T12:00:00.000000Z', ?1)",
            params![stored.to_string()],
        )
        .unwrap();
        drop(conn);

        let updated = repo
            .add_comment(&PostId::new("legacy"), None, Comment::new("new", None))
            .await
            .unwrap();
        assert_eq!(updated.comments.len(), 2);

        let conn = repo.pool.get().unwrap();
        let raw: String = conn
            .query_row(
                "SELECT comments_json FROM posts WHERE id = 'legacy'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        let raw: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let raw = raw.as_array().unwrap();
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0], stored[0]);
        assert_eq!(raw[1], stored[1]);
        assert_eq!(raw[2]["text"], "new");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_comments_are_all_kept() {
        let (repo, _temp) = create_test_repo();
        let repo = Arc::new(repo);
        let post = new_post("Busy", "general");
        repo.insert(&post).await.unwrap();

        let root = Comment::new("root", None);
        let root_id = root.id.clone();
        repo.add_comment(&post.id, None, root).await.unwrap();

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let repo = repo.clone();
                let post_id = post.id.clone();
                let root_id = root_id.clone();
                tokio::spawn(async move {
                    // Alternate top-level comments and replies to the root
                    let parent = (i % 2 == 1).then_some(&root_id);
                    repo.add_comment(&post_id, parent, Comment::new(format!("c{}", i), None))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let loaded = repo.load(&post.id).await.unwrap().unwrap();
        assert_eq!(loaded.total_comments(), 21);
        assert_eq!(loaded.comments.len(), 11);
        assert_eq!(loaded.comments[0].replies.len(), 10);
    }
}
