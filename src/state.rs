use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::forum::repository::SqlitePostRepository;
use crate::forum::service::ForumService;
use crate::realtime::Notifier;
use crate::storage::ImageStore;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub forum: ForumService,
    pub notifier: Notifier,
    pub images: ImageStore,
}

impl AppState {
    /// Wire the forum service, notifier and image store from config.
    pub fn new(config: Config, db: DbPool) -> Self {
        let notifier = Notifier::new(config.realtime.channel_capacity);
        let images = ImageStore::new(config.uploads_path());
        let forum = ForumService::new(
            Arc::new(SqlitePostRepository::new(db)),
            notifier.clone(),
            images.clone(),
        );

        Self {
            config,
            forum,
            notifier,
            images,
        }
    }
}
