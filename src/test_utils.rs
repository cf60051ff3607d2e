//! Shared helpers for unit tests.

use std::path::PathBuf;

use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::db;
use crate::metadata::TagBundle;

/// Fresh migrated database in a temp directory.
///
/// Keep the returned TempDir alive for the duration of the test; dropping
/// it deletes the database file.
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db_path = dir.path().join("test.db");
    let pool = db::init_db(&db::db_url(Some(&db_path)))
        .await
        .expect("init test db");
    (pool, dir)
}

/// A plausible tag bundle, as if extracted from a well-tagged file.
///
/// Tests override the fields they care about via struct update syntax.
pub fn mock_bundle(path: &str) -> TagBundle {
    TagBundle {
        path: PathBuf::from(path),
        title: "Test Track".to_string(),
        artist: "Test Artist".to_string(),
        album_artist: None,
        album_title: "Test Album".to_string(),
        genre: None,
        year: None,
        track_number: Some(1),
        disc_number: None,
        duration: Some(180),
        compilation: false,
        artwork: None,
        mtime: Some(1_700_000_000),
    }
}
