//! Catalog persistence for tracks, artists, albums, genres and artwork.
//!
//! Uses SQLx with SQLite for lightweight, embedded storage. This module is
//! the single authority for identity resolution: every entity type has
//! exactly one lookup-or-insert operation here, and the reconciliation
//! engine consumes those uniformly instead of scattering cross-reference
//! logic across call sites.
//!
//! Race safety: identity keys are backed by UNIQUE indexes. Each
//! get-or-create first selects, then inserts with `ON CONFLICT DO NOTHING`,
//! and refetches if the insert lost a race. Callers never observe the
//! conflict.
//!
//! Mutating operations take `&mut SqliteConnection` so the engine can run
//! them inside a per-file transaction; read queries for the API layer take
//! the shared pool.

use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "shellac.db";

/// Display name of the shared sentinel genre used for files whose tags
/// carry no usable genre.
pub const UNKNOWN_GENRE: &str = "Unknown";

/// Build a SQLite database URL from an optional path.
pub fn db_url(path: Option<&std::path::Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Normalize a name or title for identity lookups: trim and case-fold.
///
/// Stored display values keep their first-seen casing; only the `*_norm`
/// key columns hold this form.
pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file if it doesn't exist, establishes a connection
/// pool with up to 5 connections, and runs all pending migrations.
///
/// # Errors
///
/// Returns an error if database creation, connection, or migration fails.
pub async fn init_db(db_url: &str) -> Result<SqlitePool, sqlx::Error> {
    if !sqlx::Sqlite::database_exists(db_url).await.unwrap_or(false) {
        sqlx::Sqlite::create_database(db_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

// ============================================================================
// Identity resolution (get-or-create per entity)
// ============================================================================

/// Get or create an artist by name.
///
/// Lookup is by normalized name; the stored display name keeps the casing
/// of whichever file was seen first. Idempotent: the same name (in any
/// casing) always resolves to the same ID.
pub async fn get_or_create_artist(conn: &mut SqliteConnection, name: &str) -> sqlx::Result<i64> {
    let norm = normalize(name);

    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM artists WHERE name_norm = ?")
        .bind(&norm)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some((id,)) = row {
        return Ok(id);
    }

    let result =
        sqlx::query("INSERT INTO artists (name, name_norm) VALUES (?, ?) ON CONFLICT(name_norm) DO NOTHING")
            .bind(name.trim())
            .bind(&norm)
            .execute(&mut *conn)
            .await?;
    if result.rows_affected() > 0 {
        return Ok(result.last_insert_rowid());
    }

    // Lost an insert race; the winner's row exists now
    let (id,): (i64,) = sqlx::query_as("SELECT id FROM artists WHERE name_norm = ?")
        .bind(&norm)
        .fetch_one(conn)
        .await?;
    Ok(id)
}

/// Get or create a genre by display name.
///
/// Callers are expected to have already mapped numeric tag codes and
/// rejected unusable values (see [`crate::metadata::resolve_genre_name`]);
/// this only handles identity.
pub async fn get_or_create_genre(conn: &mut SqliteConnection, name: &str) -> sqlx::Result<i64> {
    let norm = normalize(name);

    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM genres WHERE name_norm = ?")
        .bind(&norm)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some((id,)) = row {
        return Ok(id);
    }

    let result =
        sqlx::query("INSERT INTO genres (name, name_norm) VALUES (?, ?) ON CONFLICT(name_norm) DO NOTHING")
            .bind(name.trim())
            .bind(&norm)
            .execute(&mut *conn)
            .await?;
    if result.rows_affected() > 0 {
        return Ok(result.last_insert_rowid());
    }

    let (id,): (i64,) = sqlx::query_as("SELECT id FROM genres WHERE name_norm = ?")
        .bind(&norm)
        .fetch_one(conn)
        .await?;
    Ok(id)
}

/// Identity key for an album lookup.
///
/// `artist_id = None` means the compilation side of the key space; the
/// unique index treats (title, year, artist) and (title, year, compilation)
/// as disjoint identities for the same title and year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumKey {
    pub title_norm: String,
    pub year: Option<i64>,
    /// None for compilations
    pub artist_id: Option<i64>,
}

impl AlbumKey {
    pub fn is_compilation(&self) -> bool {
        self.artist_id.is_none()
    }
}

/// Find an album by identity key without creating it.
pub async fn find_album(conn: &mut SqliteConnection, key: &AlbumKey) -> sqlx::Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM albums
         WHERE title_norm = ? AND year IS ? AND artist_id IS ? AND compilation = ?",
    )
    .bind(&key.title_norm)
    .bind(key.year)
    .bind(key.artist_id)
    .bind(key.is_compilation())
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|(id,)| id))
}

/// Get or create an album by identity key.
///
/// `title` is the display title stored on first creation.
pub async fn get_or_create_album(
    conn: &mut SqliteConnection,
    title: &str,
    key: &AlbumKey,
) -> sqlx::Result<i64> {
    if let Some(id) = find_album(&mut *conn, key).await? {
        return Ok(id);
    }

    let result = sqlx::query(
        "INSERT INTO albums (title, title_norm, year, artist_id, compilation)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT DO NOTHING",
    )
    .bind(title.trim())
    .bind(&key.title_norm)
    .bind(key.year)
    .bind(key.artist_id)
    .bind(key.is_compilation())
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() > 0 {
        return Ok(result.last_insert_rowid());
    }

    match find_album(conn, key).await? {
        Some(id) => Ok(id),
        // Should be unreachable: the conflict implies the row exists
        None => Err(sqlx::Error::RowNotFound),
    }
}

/// Set an album's genre reference.
pub async fn set_album_genre(
    conn: &mut SqliteConnection,
    album_id: i64,
    genre_id: i64,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE albums SET genre_id = ? WHERE id = ?")
        .bind(genre_id)
        .bind(album_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Re-parent every track of the single-artist albums matching
/// (title_norm, year) onto the given compilation album.
///
/// The emptied single-artist rows are intentionally left behind for the
/// orphan collector. Returns the number of tracks moved.
pub async fn reparent_group_tracks(
    conn: &mut SqliteConnection,
    title_norm: &str,
    year: Option<i64>,
    compilation_album_id: i64,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE tracks SET album_id = ?
         WHERE album_id IN (
             SELECT id FROM albums
             WHERE title_norm = ? AND year IS ? AND compilation = 0
         )",
    )
    .bind(compilation_album_id)
    .bind(title_norm)
    .bind(year)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

// ============================================================================
// Tracks
// ============================================================================

/// Fields written when a track is created or its file has changed.
#[derive(Debug, Clone)]
pub struct TrackFields<'a> {
    pub title: &'a str,
    pub track_number: Option<i64>,
    pub disc_number: Option<i64>,
    pub duration: Option<i64>,
    pub mtime: Option<i64>,
    pub album_id: i64,
    pub artist_id: i64,
}

/// Stored mtime for a path, if the track exists.
///
/// Outer `None` = no such track; inner `None` = track exists but has no
/// recorded mtime (always treated as changed).
pub async fn get_track_mtime(
    conn: &mut SqliteConnection,
    path: &str,
) -> sqlx::Result<Option<Option<i64>>> {
    let row: Option<(Option<i64>,)> = sqlx::query_as("SELECT mtime FROM tracks WHERE path = ?")
        .bind(path)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(|(mtime,)| mtime))
}

/// Insert or update a track record, keyed by file path.
///
/// Uses SQLite's UPSERT so a path can never yield two rows. Returns the
/// track's database ID.
pub async fn upsert_track(
    conn: &mut SqliteConnection,
    path: &str,
    fields: &TrackFields<'_>,
) -> sqlx::Result<i64> {
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO tracks (path, title, track_number, disc_number, duration, mtime, album_id, artist_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            title = excluded.title,
            track_number = excluded.track_number,
            disc_number = excluded.disc_number,
            duration = excluded.duration,
            mtime = excluded.mtime,
            album_id = excluded.album_id,
            artist_id = excluded.artist_id
        RETURNING id
        "#,
    )
    .bind(path)
    .bind(fields.title)
    .bind(fields.track_number)
    .bind(fields.disc_number)
    .bind(fields.duration)
    .bind(fields.mtime)
    .bind(fields.album_id)
    .bind(fields.artist_id)
    .fetch_one(conn)
    .await?;
    Ok(row.0)
}

/// Get a track row by path.
pub async fn get_track_by_path(
    pool: &SqlitePool,
    path: &str,
) -> sqlx::Result<Option<crate::model::Track>> {
    sqlx::query_as(
        "SELECT id, path, title, track_number, disc_number, duration, mtime, album_id, artist_id
         FROM tracks WHERE path = ?",
    )
    .bind(path)
    .fetch_optional(pool)
    .await
}

/// All (id, path) pairs in the catalog, for orphan detection.
pub async fn get_all_track_paths(pool: &SqlitePool) -> sqlx::Result<Vec<(i64, String)>> {
    sqlx::query_as("SELECT id, path FROM tracks ORDER BY id")
        .fetch_all(pool)
        .await
}

/// Delete a single track row.
pub async fn delete_track(conn: &mut SqliteConnection, track_id: i64) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM tracks WHERE id = ?")
        .bind(track_id)
        .execute(conn)
        .await?;
    Ok(())
}

// ============================================================================
// Artwork
// ============================================================================

/// Stored artwork content hash for an album, if any.
pub async fn get_artwork_hash(
    conn: &mut SqliteConnection,
    album_id: i64,
) -> sqlx::Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT image_hash FROM artwork WHERE album_id = ?")
        .bind(album_id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(|(h,)| h))
}

/// Create or replace the artwork owned by an album.
pub async fn upsert_artwork(
    conn: &mut SqliteConnection,
    album_id: i64,
    image: &[u8],
    image_hash: &str,
    width: u32,
    height: u32,
) -> sqlx::Result<i64> {
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO artwork (album_id, image, image_hash, width, height)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(album_id) DO UPDATE SET
            image = excluded.image,
            image_hash = excluded.image_hash,
            width = excluded.width,
            height = excluded.height
        RETURNING id
        "#,
    )
    .bind(album_id)
    .bind(image)
    .bind(image_hash)
    .bind(width as i64)
    .bind(height as i64)
    .fetch_one(conn)
    .await?;
    Ok(row.0)
}

// ============================================================================
// Orphan pruning
// ============================================================================

/// Delete albums with zero referencing tracks, cascading their artwork.
///
/// Returns the number of albums deleted.
pub async fn delete_empty_albums(conn: &mut SqliteConnection) -> sqlx::Result<u64> {
    sqlx::query(
        "DELETE FROM artwork WHERE album_id IN (
             SELECT a.id FROM albums a
             LEFT JOIN tracks t ON t.album_id = a.id
             WHERE t.id IS NULL
         )",
    )
    .execute(&mut *conn)
    .await?;

    let result = sqlx::query(
        "DELETE FROM albums WHERE id IN (
             SELECT a.id FROM albums a
             LEFT JOIN tracks t ON t.album_id = a.id
             WHERE t.id IS NULL
         )",
    )
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Delete artists with zero referencing tracks.
pub async fn delete_empty_artists(conn: &mut SqliteConnection) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "DELETE FROM artists WHERE id NOT IN (
             SELECT DISTINCT artist_id FROM tracks WHERE artist_id IS NOT NULL
         ) AND id NOT IN (
             SELECT DISTINCT artist_id FROM albums WHERE artist_id IS NOT NULL
         )",
    )
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Delete genres no album references anymore.
///
/// Runs after empty albums are pruned, so a genre kept alive only by a
/// deleted album goes with it.
pub async fn delete_empty_genres(conn: &mut SqliteConnection) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "DELETE FROM genres WHERE id NOT IN (
             SELECT DISTINCT genre_id FROM albums WHERE genre_id IS NOT NULL
         )",
    )
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

// ============================================================================
// Read queries (served to the playback/API layer)
// ============================================================================

/// Track with joined artist and album names.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TrackWithMetadata {
    /// Database ID
    pub id: i64,
    /// Track title
    pub title: String,
    /// File path
    pub path: String,
    /// Duration in seconds
    pub duration: Option<i64>,
    /// Track number on album
    pub track_number: Option<i64>,
    /// Disc number
    pub disc_number: Option<i64>,
    /// Artist name (or "Unknown Artist")
    pub artist_name: String,
    /// Album title (or "Unknown Album")
    pub album_title: String,
    /// Release year (from album)
    pub year: Option<i64>,
}

/// Get all tracks with artist and album names.
///
/// LEFT JOINs so tracks survive missing references; missing names are
/// replaced with "Unknown" placeholders.
pub async fn get_all_tracks_with_metadata(
    pool: &SqlitePool,
) -> sqlx::Result<Vec<TrackWithMetadata>> {
    sqlx::query_as(
        r#"
        SELECT
            t.id, t.title, t.path, t.duration, t.track_number, t.disc_number,
            COALESCE(a.name, 'Unknown Artist') as artist_name,
            COALESCE(al.title, 'Unknown Album') as album_title,
            al.year
        FROM tracks t
        LEFT JOIN artists a ON t.artist_id = a.id
        LEFT JOIN albums al ON t.album_id = al.id
        ORDER BY artist_name, album_title, t.disc_number, t.track_number
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Album summary with joined artist/genre names and artwork presence.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlbumSummary {
    pub id: i64,
    pub title: String,
    pub year: Option<i64>,
    pub compilation: bool,
    /// Album artist name; None for compilations
    pub artist_name: Option<String>,
    pub genre_name: Option<String>,
    /// Artwork row ID, if the album has artwork
    pub artwork_id: Option<i64>,
    /// Number of tracks referencing this album
    pub track_count: i64,
}

/// Get all albums with their artist, genre and artwork references.
pub async fn get_album_summaries(pool: &SqlitePool) -> sqlx::Result<Vec<AlbumSummary>> {
    sqlx::query_as(
        r#"
        SELECT
            al.id, al.title, al.year, al.compilation,
            ar.name as artist_name,
            g.name as genre_name,
            aw.id as artwork_id,
            COUNT(t.id) as track_count
        FROM albums al
        LEFT JOIN artists ar ON al.artist_id = ar.id
        LEFT JOIN genres g ON al.genre_id = g.id
        LEFT JOIN artwork aw ON aw.album_id = al.id
        LEFT JOIN tracks t ON t.album_id = al.id
        GROUP BY al.id
        ORDER BY artist_name, al.title
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Resolve a track ID to its filesystem path, for playback.
pub async fn get_track_path(pool: &SqlitePool, track_id: i64) -> sqlx::Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT path FROM tracks WHERE id = ?")
        .bind(track_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(p,)| p))
}

/// Get an album row by ID.
pub async fn get_album_by_id(
    pool: &SqlitePool,
    album_id: i64,
) -> sqlx::Result<Option<crate::model::Album>> {
    sqlx::query_as(
        "SELECT id, title, title_norm, year, artist_id, compilation, genre_id
         FROM albums WHERE id = ?",
    )
    .bind(album_id)
    .fetch_optional(pool)
    .await
}

/// Get the artwork owned by an album, image bytes included.
pub async fn get_artwork_for_album(
    pool: &SqlitePool,
    album_id: i64,
) -> sqlx::Result<Option<crate::model::Artwork>> {
    sqlx::query_as(
        "SELECT id, album_id, image, image_hash, width, height
         FROM artwork WHERE album_id = ?",
    )
    .bind(album_id)
    .fetch_optional(pool)
    .await
}

/// All artists, ordered by name.
pub async fn get_all_artists(pool: &SqlitePool) -> sqlx::Result<Vec<crate::model::Artist>> {
    sqlx::query_as("SELECT id, name, name_norm FROM artists ORDER BY name")
        .fetch_all(pool)
        .await
}

/// All genres, ordered by name.
pub async fn get_all_genres(pool: &SqlitePool) -> sqlx::Result<Vec<crate::model::Genre>> {
    sqlx::query_as("SELECT id, name, name_norm FROM genres ORDER BY name")
        .fetch_all(pool)
        .await
}



#[cfg(test)]
mod orphan_delete_tests {
    use super::*;
    use crate::test_utils::temp_db;

    #[tokio::test]
    async fn test_delete_empty_artists_keeps_album_referenced_artist() {
        let (pool, _dir) = temp_db().await;
        let mut conn = pool.acquire().await.unwrap();

        // Artist with an album but no tracks yet; an album reference is
        // enough to keep it
        let a = get_or_create_artist(&mut conn, "Keeper").await.unwrap();
        get_or_create_album(
            &mut conn,
            "Upcoming",
            &AlbumKey {
                title_norm: normalize("Upcoming"),
                year: None,
                artist_id: Some(a),
            },
        )
        .await
        .unwrap();

        assert_eq!(delete_empty_artists(&mut conn).await.unwrap(), 0);
        assert_eq!(get_all_artists(&pool).await.unwrap().len(), 1);
    }
}
