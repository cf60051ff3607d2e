//! Library reconciliation: turning per-file tag bundles into a consistent,
//! deduplicated catalog.
//!
//! The engine consumes [`TagBundle`]s one at a time, in file-arrival order,
//! and resolves each against the catalog inside a per-file transaction:
//! artist, compilation status, album, genre, artwork, then the track row
//! itself. All mutations for a pass flow through one engine instance, which
//! is what makes mid-pass identity corrections (compilation promotion)
//! safe: no two files can race on the same album group.
//!
//! Compilation status is re-evaluated, not set once. Every file casts a
//! vote for its (album title, year) group: an explicit compilation tag, or
//! a primary artist different from the one that opened the group. The
//! group's status is the OR of all votes so far; the first winning vote
//! promotes the group, re-parenting any tracks already attached to
//! single-artist rows onto the one compilation row. This converges to the
//! same final catalog regardless of file order within the pass.

pub mod coordinator;
pub mod orphans;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::db::{self, AlbumKey, TrackFields};
use crate::error::Result;
use crate::metadata::TagBundle;

/// What happened to a single file during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// New track row created
    Added,
    /// Existing track row updated (file changed)
    Updated,
    /// mtime matched the stored value; no field writes
    Unchanged,
}

/// Counters accumulated over one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub seen: u64,
    pub added: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Files skipped due to extraction failures (counted by the caller
    /// feeding the engine)
    pub skipped: u64,
    /// Tracks moved onto a compilation row by promotion
    pub reparented: u64,
}

/// Per-pass state for one (album title, year) group.
#[derive(Debug)]
struct GroupState {
    /// Normalized primary artist of the first file seen for this group
    first_artist_norm: String,
    compilation: bool,
    /// Resolved album row for the group's current mode
    album_id: Option<i64>,
}

/// Album-group key: normalized title plus year.
type GroupKey = (String, Option<i64>);

/// One pass worth of reconciliation state.
///
/// Create a fresh engine per pass; the group map and seen-set are
/// pass-local by design.
pub struct ReconcileEngine {
    pool: SqlitePool,
    groups: HashMap<GroupKey, GroupState>,
    seen: HashSet<String>,
    stats: PassStats,
}

impl ReconcileEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            groups: HashMap::new(),
            seen: HashSet::new(),
            stats: PassStats::default(),
        }
    }

    /// Paths successfully reconciled so far, consumed by the orphan
    /// collector after the walk completes.
    pub fn seen_paths(&self) -> &HashSet<String> {
        &self.seen
    }

    pub fn stats(&self) -> PassStats {
        self.stats
    }

    /// Record a file that was skipped upstream (extraction failure).
    pub fn note_skipped(&mut self) {
        self.stats.skipped += 1;
    }

    /// Reconcile one file against the catalog.
    ///
    /// Commits atomically; on error nothing from this file is applied and
    /// prior files' commits are untouched. A database error here is fatal
    /// to the pass (storage trouble), not a per-file skip.
    pub async fn apply(&mut self, bundle: &TagBundle) -> Result<FileOutcome> {
        let path_str = bundle.path.to_string_lossy().to_string();
        let mut tx = self.pool.begin().await?;

        // 1. Artist resolution (track artist, plus the album-grouping
        //    artist when tagged separately)
        let artist_id = db::get_or_create_artist(&mut tx, &bundle.artist).await?;
        let primary = bundle.primary_artist();
        let primary_norm = db::normalize(primary);
        let primary_id = if primary == bundle.artist {
            artist_id
        } else {
            db::get_or_create_artist(&mut tx, primary).await?
        };

        // 2. Compilation signal for the (title, year) group
        let group_key: GroupKey = (db::normalize(&bundle.album_title), bundle.year);
        let (mut is_compilation, first_artist_norm, mut group_album) =
            match self.groups.get(&group_key) {
                Some(state) => (
                    state.compilation,
                    state.first_artist_norm.clone(),
                    state.album_id,
                ),
                None => {
                    // A compilation row surviving from an earlier pass
                    // decides the group's mode up front, so rescanning a
                    // subset of its files can never re-split it.
                    let comp_key = AlbumKey {
                        title_norm: group_key.0.clone(),
                        year: group_key.1,
                        artist_id: None,
                    };
                    let existing_comp = db::find_album(&mut tx, &comp_key).await?;
                    self.groups.insert(
                        group_key.clone(),
                        GroupState {
                            first_artist_norm: primary_norm.clone(),
                            compilation: existing_comp.is_some(),
                            album_id: existing_comp,
                        },
                    );
                    (existing_comp.is_some(), primary_norm.clone(), existing_comp)
                }
            };

        let votes_compilation = bundle.compilation || primary_norm != first_artist_norm;
        if votes_compilation && !is_compilation {
            // Promotion: resolve the one compilation row and re-parent
            // everything attached to single-artist rows for the group,
            // including rows created by earlier passes. Emptied rows are
            // left for the orphan collector.
            let comp_key = AlbumKey {
                title_norm: group_key.0.clone(),
                year: group_key.1,
                artist_id: None,
            };
            let comp_id = db::get_or_create_album(&mut tx, &bundle.album_title, &comp_key).await?;
            let moved =
                db::reparent_group_tracks(&mut tx, &group_key.0, group_key.1, comp_id).await?;

            tracing::info!(
                target: "library",
                album = %bundle.album_title,
                year = ?group_key.1,
                moved,
                "Promoted album to compilation"
            );

            is_compilation = true;
            group_album = Some(comp_id);
            self.stats.reparented += moved;
        }

        // 3. Album resolution under the group's (possibly just corrected)
        //    mode
        let album_id = match group_album {
            Some(id) => id,
            None => {
                let key = AlbumKey {
                    title_norm: group_key.0.clone(),
                    year: group_key.1,
                    artist_id: if is_compilation { None } else { Some(primary_id) },
                };
                db::get_or_create_album(&mut tx, &bundle.album_title, &key).await?
            }
        };
        if let Some(state) = self.groups.get_mut(&group_key) {
            state.compilation = is_compilation;
            state.album_id = Some(album_id);
        }

        // 4. Genre resolution (numeric codes mapped or rejected upstream;
        //    anything unusable lands on the shared sentinel row)
        let genre_name = crate::metadata::resolve_genre_name(bundle.genre.as_deref())
            .unwrap_or_else(|| db::UNKNOWN_GENRE.to_string());
        let genre_id = db::get_or_create_genre(&mut tx, &genre_name).await?;
        db::set_album_genre(&mut tx, album_id, genre_id).await?;

        // 5. Artwork resolution
        if let Some(image) = &bundle.artwork {
            self.resolve_artwork(&mut tx, album_id, image, &bundle.path)
                .await?;
        }

        // 6. Track resolution with the unchanged-file fast path
        let outcome = match db::get_track_mtime(&mut tx, &path_str).await? {
            Some(Some(stored)) if bundle.mtime == Some(stored) => FileOutcome::Unchanged,
            existing => {
                db::upsert_track(
                    &mut tx,
                    &path_str,
                    &TrackFields {
                        title: &bundle.title,
                        track_number: bundle.track_number,
                        disc_number: bundle.disc_number,
                        duration: bundle.duration,
                        mtime: bundle.mtime,
                        album_id,
                        artist_id,
                    },
                )
                .await?;
                if existing.is_none() {
                    FileOutcome::Added
                } else {
                    FileOutcome::Updated
                }
            }
        };

        tx.commit().await?;

        // 7. Only a committed file counts as seen
        self.seen.insert(path_str);
        self.stats.seen += 1;
        match outcome {
            FileOutcome::Added => self.stats.added += 1,
            FileOutcome::Updated => self.stats.updated += 1,
            FileOutcome::Unchanged => self.stats.unchanged += 1,
        }

        Ok(outcome)
    }

    /// Attach or refresh album artwork from embedded image bytes.
    ///
    /// Skipped when the stored image has the same content hash. Undecodable
    /// images are logged and ignored; they never fail the file.
    async fn resolve_artwork(
        &mut self,
        tx: &mut sqlx::SqliteConnection,
        album_id: i64,
        image: &[u8],
        path: &Path,
    ) -> Result<()> {
        let hash = format!("{:x}", Sha256::digest(image));
        if db::get_artwork_hash(tx, album_id).await?.as_deref() == Some(hash.as_str()) {
            return Ok(());
        }

        match image::load_from_memory(image) {
            Ok(decoded) => {
                db::upsert_artwork(tx, album_id, image, &hash, decoded.width(), decoded.height())
                    .await?;
            }
            Err(e) => {
                tracing::warn!(
                    target: "library",
                    path = %path.display(),
                    error = %e,
                    "Ignoring undecodable embedded artwork"
                );
            }
        }
        Ok(())
    }
}
