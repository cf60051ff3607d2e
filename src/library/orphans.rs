//! Post-pass orphan collection.
//!
//! After a walk completes, any catalog track whose path was not seen on
//! disk is an orphan. Collection runs only after a pass that covered its
//! scope end to end; an aborted or cancelled pass never collects, because
//! an incomplete seen-set would delete live files' rows.
//!
//! Entity pruning runs strictly after track deletion and in dependency
//! order: empty albums (cascading their artwork), then artists nothing
//! references, then genres no album references.

use std::collections::HashSet;
use std::path::Path;

use sqlx::SqlitePool;

use crate::db;
use crate::error::{Result, ResultExt};

/// Counters from one collection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrphanStats {
    pub tracks_removed: u64,
    pub albums_removed: u64,
    pub artists_removed: u64,
    pub genres_removed: u64,
}

impl OrphanStats {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Remove catalog rows for files that no longer exist on disk.
///
/// `seen` is the set of paths the just-finished pass reconciled. When
/// `scope` is given (a subtree pass), only tracks under that scope are
/// candidates; everything outside it is untouched regardless of the
/// seen-set.
pub async fn collect(
    pool: &SqlitePool,
    seen: &HashSet<String>,
    scope: Option<&Path>,
) -> Result<OrphanStats> {
    let mut stats = OrphanStats::default();
    let mut conn = pool.acquire().await?;

    for (id, path) in db::get_all_track_paths(pool).await? {
        if seen.contains(&path) {
            continue;
        }
        if let Some(scope) = scope {
            if !Path::new(&path).starts_with(scope) {
                continue;
            }
        }
        tracing::debug!(target: "library", path = %path, "Removing orphaned track");
        db::delete_track(&mut conn, id).await?;
        stats.tracks_removed += 1;
    }

    stats.albums_removed = db::delete_empty_albums(&mut conn)
        .await
        .with_context("pruning empty albums")?;
    stats.artists_removed = db::delete_empty_artists(&mut conn)
        .await
        .with_context("pruning empty artists")?;
    stats.genres_removed = db::delete_empty_genres(&mut conn)
        .await
        .with_context("pruning empty genres")?;

    if !stats.is_empty() {
        tracing::info!(
            target: "library",
            tracks = stats.tracks_removed,
            albums = stats.albums_removed,
            artists = stats.artists_removed,
            genres = stats.genres_removed,
            "Collected orphans"
        );
    }
    Ok(stats)
}
