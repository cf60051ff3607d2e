//! Scan pass coordination.
//!
//! At most one pass runs at a time. The coordinator owns a small atomic
//! state machine (Idle, Running, Cancelling); a second scan request while
//! one is running is rejected outright rather than queued, and cancellation
//! is honored at file boundaries so the catalog is never left mid-file.
//!
//! The pipeline splits work by side effects: metadata extraction is pure
//! and runs on a blocking-thread worker pool, while reconciliation stays
//! strictly serial on the engine. `buffered` preserves walk order, so the
//! catalog outcome is identical to a fully serial scan.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::config::{ScanConfig, SubtreeOrphanPolicy};
use crate::error::{Error, Result};
use crate::library::orphans::{self, OrphanStats};
use crate::library::{FileOutcome, PassStats, ReconcileEngine};
use crate::{metadata, scanner};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLING: u8 = 2;

/// Coordinator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Running,
    Cancelling,
}

/// Whether a pass covers the whole library or a subdirectory of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    Full,
    Subtree,
}

/// Progress and terminal events emitted by a running pass.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Started {
        root: PathBuf,
        kind: ScanKind,
    },
    FileProcessed {
        path: PathBuf,
        outcome: FileOutcome,
    },
    /// Extraction failed; the file was skipped and the pass continued
    FileSkipped {
        path: PathBuf,
        reason: String,
    },
    Completed(PassSummary),
    Cancelled(PassStats),
    /// The pass aborted on a fatal (storage) error
    Failed(String),
}

/// Terminal report of a successfully completed pass.
#[derive(Debug, Clone)]
pub struct PassSummary {
    pub root: PathBuf,
    pub kind: ScanKind,
    pub stats: PassStats,
    /// None when the pass was not allowed to collect (subtree pass with
    /// the policy off)
    pub orphans: Option<OrphanStats>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Serializes scan passes over one library.
///
/// Clone-cheap handles are not provided; share the coordinator behind an
/// `Arc` if multiple tasks need to request scans.
pub struct ScanCoordinator {
    pool: SqlitePool,
    music_dir: PathBuf,
    scan_config: ScanConfig,
    state: Arc<AtomicU8>,
}

impl ScanCoordinator {
    pub fn new(pool: SqlitePool, music_dir: PathBuf, scan_config: ScanConfig) -> Self {
        Self {
            pool,
            music_dir,
            scan_config,
            state: Arc::new(AtomicU8::new(IDLE)),
        }
    }

    pub fn state(&self) -> ScanState {
        match self.state.load(Ordering::SeqCst) {
            RUNNING => ScanState::Running,
            CANCELLING => ScanState::Cancelling,
            _ => ScanState::Idle,
        }
    }

    /// Request cancellation of the running pass.
    ///
    /// Returns false when no pass was running. The pass stops at the next
    /// file boundary; already committed files stay in the catalog.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, CANCELLING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Start a pass over the whole library, or over `root` when given.
    ///
    /// Returns the event stream for the accepted pass. Fails with
    /// [`Error::ScanInProgress`] when a pass is already running, and with
    /// [`Error::InvalidScanRoot`] when `root` is not a directory inside
    /// the library.
    pub fn start_scan(&self, root: Option<PathBuf>) -> Result<mpsc::Receiver<ScanEvent>> {
        let root = root.unwrap_or_else(|| self.music_dir.clone());
        if !root.starts_with(&self.music_dir) {
            return Err(Error::invalid_root(root, "outside the library root"));
        }
        if !root.is_dir() {
            return Err(Error::invalid_root(root, "not a directory"));
        }
        let kind = if root == self.music_dir {
            ScanKind::Full
        } else {
            ScanKind::Subtree
        };

        // Claim the single scan slot; losers are rejected, not queued
        if self
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::ScanInProgress);
        }

        let (tx, rx) = mpsc::channel(64);
        let pool = self.pool.clone();
        let state = self.state.clone();
        let config = self.scan_config.clone();
        tokio::spawn(async move {
            run_pass(pool, state.clone(), root, kind, config, tx).await;
            state.store(IDLE, Ordering::SeqCst);
        });
        Ok(rx)
    }
}

async fn run_pass(
    pool: SqlitePool,
    state: Arc<AtomicU8>,
    root: PathBuf,
    kind: ScanKind,
    config: ScanConfig,
    tx: mpsc::Sender<ScanEvent>,
) {
    tracing::info!(target: "library", root = %root.display(), ?kind, "Scan pass started");
    let started_at = Utc::now();
    let _ = tx
        .send(ScanEvent::Started {
            root: root.clone(),
            kind,
        })
        .await;

    let mut engine = ReconcileEngine::new(pool.clone());
    let bytes = match drive(&mut engine, &state, &root, config.workers.max(1), &tx).await {
        Ok(bytes) => bytes,
        Err(Error::Cancelled) => {
            tracing::info!(target: "library", "Scan pass cancelled");
            let _ = tx.send(ScanEvent::Cancelled(engine.stats())).await;
            return;
        }
        Err(e) => {
            tracing::error!(target: "library", error = %e, "Scan pass failed");
            let _ = tx.send(ScanEvent::Failed(e.to_string())).await;
            return;
        }
    };

    // Orphan collection needs a seen-set that covers its whole scope, so
    // it only ever follows an uncancelled pass
    let collected = match (kind, config.subtree_orphans) {
        (ScanKind::Full, _) => Some(orphans::collect(&pool, engine.seen_paths(), None).await),
        (ScanKind::Subtree, SubtreeOrphanPolicy::Scoped) => {
            Some(orphans::collect(&pool, engine.seen_paths(), Some(&root)).await)
        }
        (ScanKind::Subtree, SubtreeOrphanPolicy::Off) => None,
    };
    let orphans = match collected.transpose() {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(target: "library", error = %e, "Orphan collection failed");
            let _ = tx.send(ScanEvent::Failed(e.to_string())).await;
            return;
        }
    };

    let summary = PassSummary {
        root,
        kind,
        stats: engine.stats(),
        orphans,
        started_at,
        finished_at: Utc::now(),
    };
    tracing::info!(
        target: "library",
        root = %summary.root.display(),
        seen = summary.stats.seen,
        added = summary.stats.added,
        updated = summary.stats.updated,
        unchanged = summary.stats.unchanged,
        skipped = summary.stats.skipped,
        reparented = summary.stats.reparented,
        bytes,
        "Scan pass completed"
    );
    let _ = tx.send(ScanEvent::Completed(summary)).await;
}

/// Walk, extract in parallel, reconcile serially. Returns the number of
/// bytes of audio reconciled, or [`Error::Cancelled`] at the first file
/// boundary after a cancel request.
async fn drive(
    engine: &mut ReconcileEngine,
    state: &AtomicU8,
    root: &Path,
    workers: usize,
    tx: &mpsc::Sender<ScanEvent>,
) -> Result<u64> {
    let bundles = scanner::walk(root.to_path_buf())
        .map(|file| {
            tokio::task::spawn_blocking(move || {
                // Reconcile against the mtime observed at enumeration, so a
                // file rewritten mid-scan is picked up again on the next pass
                let result = metadata::read(&file.path).map(|mut bundle| {
                    bundle.mtime = file.mtime.or(bundle.mtime);
                    bundle
                });
                (file.path, file.size, result)
            })
        })
        .buffered(workers);
    tokio::pin!(bundles);

    let mut bytes: u64 = 0;
    while let Some(joined) = bundles.next().await {
        if state.load(Ordering::SeqCst) == CANCELLING {
            return Err(Error::Cancelled);
        }
        match joined {
            Ok((path, size, Ok(bundle))) => {
                let outcome = engine.apply(&bundle).await?;
                bytes += size;
                let _ = tx.send(ScanEvent::FileProcessed { path, outcome }).await;
            }
            Ok((path, _, Err(e))) => {
                tracing::warn!(
                    target: "library",
                    path = %path.display(),
                    error = %e,
                    "Skipping file with unreadable tags"
                );
                engine.note_skipped();
                let _ = tx
                    .send(ScanEvent::FileSkipped {
                        path,
                        reason: e.to_string(),
                    })
                    .await;
            }
            Err(join_err) => {
                tracing::warn!(target: "library", error = %join_err, "Extraction worker panicked");
                engine.note_skipped();
            }
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::test_utils::temp_db;
    use tempfile::tempdir;

    async fn drain(mut rx: mpsc::Receiver<ScanEvent>) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn test_scan_of_empty_tree_completes() {
        let (pool, _db_dir) = temp_db().await;
        let dir = tempdir().unwrap();
        let coord = ScanCoordinator::new(pool, dir.path().to_path_buf(), ScanConfig::default());

        let events = drain(coord.start_scan(None).unwrap()).await;
        assert!(matches!(events.first(), Some(ScanEvent::Started { kind: ScanKind::Full, .. })));
        match events.last() {
            Some(ScanEvent::Completed(summary)) => {
                assert_eq!(summary.stats.seen, 0);
                assert!(summary.orphans.is_some());
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(coord.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_unreadable_file_is_skipped_not_fatal() {
        let (pool, _db_dir) = temp_db().await;
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("garbage.mp3"), b"not really audio").unwrap();

        let coord =
            ScanCoordinator::new(pool.clone(), dir.path().to_path_buf(), ScanConfig::default());
        let events = drain(coord.start_scan(None).unwrap()).await;

        assert!(
            events
                .iter()
                .any(|e| matches!(e, ScanEvent::FileSkipped { .. }))
        );
        match events.last() {
            Some(ScanEvent::Completed(summary)) => {
                assert_eq!(summary.stats.skipped, 1);
                assert_eq!(summary.stats.seen, 0);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert!(db::get_all_tracks_with_metadata(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_scan_is_rejected() {
        let (pool, _db_dir) = temp_db().await;
        let dir = tempdir().unwrap();
        let coord = ScanCoordinator::new(pool, dir.path().to_path_buf(), ScanConfig::default());

        coord.state.store(RUNNING, Ordering::SeqCst);
        assert!(matches!(
            coord.start_scan(None),
            Err(Error::ScanInProgress)
        ));

        coord.state.store(IDLE, Ordering::SeqCst);
        assert!(coord.start_scan(None).is_ok());
    }

    #[tokio::test]
    async fn test_scan_root_outside_library_is_rejected() {
        let (pool, _db_dir) = temp_db().await;
        let dir = tempdir().unwrap();
        let elsewhere = tempdir().unwrap();
        let coord = ScanCoordinator::new(pool, dir.path().to_path_buf(), ScanConfig::default());

        let result = coord.start_scan(Some(elsewhere.path().to_path_buf()));
        assert!(matches!(result, Err(Error::InvalidScanRoot { .. })));
        // A rejected request must not consume the scan slot
        assert_eq!(coord.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_missing_subtree_is_rejected() {
        let (pool, _db_dir) = temp_db().await;
        let dir = tempdir().unwrap();
        let coord = ScanCoordinator::new(pool, dir.path().to_path_buf(), ScanConfig::default());

        let result = coord.start_scan(Some(dir.path().join("no-such-genre")));
        assert!(matches!(result, Err(Error::InvalidScanRoot { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_pass_never_collects_orphans() {
        let (pool, _db_dir) = temp_db().await;
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"junk").unwrap();

        // Seed a stale row that a completed pass would collect
        {
            let mut conn = pool.acquire().await.unwrap();
            let artist = db::get_or_create_artist(&mut conn, "A").await.unwrap();
            let album = db::get_or_create_album(
                &mut conn,
                "Old",
                &db::AlbumKey {
                    title_norm: db::normalize("Old"),
                    year: None,
                    artist_id: Some(artist),
                },
            )
            .await
            .unwrap();
            db::upsert_track(
                &mut conn,
                "/gone/file.mp3",
                &db::TrackFields {
                    title: "Gone",
                    track_number: None,
                    disc_number: None,
                    duration: None,
                    mtime: None,
                    album_id: album,
                    artist_id: artist,
                },
            )
            .await
            .unwrap();
        }

        let coord =
            ScanCoordinator::new(pool.clone(), dir.path().to_path_buf(), ScanConfig::default());
        let rx = coord.start_scan(None).unwrap();
        // On the current-thread test runtime the pass task has not run yet,
        // so this lands before the first file boundary
        assert!(coord.cancel());

        let events = drain(rx).await;
        assert!(matches!(events.last(), Some(ScanEvent::Cancelled(_))));

        let tracks = db::get_all_tracks_with_metadata(&pool).await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].path, "/gone/file.mp3");
        assert_eq!(coord.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_subtree_scan_collects_only_when_policy_allows() {
        let (pool, _db_dir) = temp_db().await;
        let dir = tempdir().unwrap();
        let sub = dir.path().join("jazz");
        std::fs::create_dir(&sub).unwrap();

        // Stale row inside the subtree
        {
            let mut conn = pool.acquire().await.unwrap();
            let artist = db::get_or_create_artist(&mut conn, "A").await.unwrap();
            let album = db::get_or_create_album(
                &mut conn,
                "Old",
                &db::AlbumKey {
                    title_norm: db::normalize("Old"),
                    year: None,
                    artist_id: Some(artist),
                },
            )
            .await
            .unwrap();
            db::upsert_track(
                &mut conn,
                sub.join("gone.mp3").to_string_lossy().as_ref(),
                &db::TrackFields {
                    title: "Gone",
                    track_number: None,
                    disc_number: None,
                    duration: None,
                    mtime: None,
                    album_id: album,
                    artist_id: artist,
                },
            )
            .await
            .unwrap();
        }

        // Default policy: subtree passes never delete
        let coord =
            ScanCoordinator::new(pool.clone(), dir.path().to_path_buf(), ScanConfig::default());
        let events = drain(coord.start_scan(Some(sub.clone())).unwrap()).await;
        match events.last() {
            Some(ScanEvent::Completed(summary)) => {
                assert_eq!(summary.kind, ScanKind::Subtree);
                assert!(summary.orphans.is_none());
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(db::get_all_tracks_with_metadata(&pool).await.unwrap().len(), 1);

        // Scoped policy: the stale row under the subtree goes
        let coord = ScanCoordinator::new(
            pool.clone(),
            dir.path().to_path_buf(),
            ScanConfig {
                subtree_orphans: SubtreeOrphanPolicy::Scoped,
                ..ScanConfig::default()
            },
        );
        let events = drain(coord.start_scan(Some(sub)).unwrap()).await;
        match events.last() {
            Some(ScanEvent::Completed(summary)) => {
                assert!(summary.orphans.is_some());
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert!(db::get_all_tracks_with_metadata(&pool).await.unwrap().is_empty());
    }
}
