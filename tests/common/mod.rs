// Shared setup: a real server on an ephemeral port backed by a temp data dir
#![allow(dead_code)]

use tempfile::TempDir;
use threadline::config::Config;
use threadline::db;
use threadline::routes;
use threadline::state::{AppState, DbPool};

pub struct TestServer {
    pub base_url: String,
    pub pool: DbPool,
    _data_dir: TempDir,
}

pub async fn spawn_server() -> TestServer {
    let data_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.database.path = Some(data_dir.path().join("test.db"));
    config.storage.path = Some(data_dir.path().join("uploads"));

    let pool = db::create_pool(config.db_path()).expect("Failed to create test database");
    db::run_migrations(&pool).expect("Failed to run migrations");

    let app = routes::router(AppState::new(config, pool.clone()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        pool,
        _data_dir: data_dir,
    }
}
