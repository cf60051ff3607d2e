//! Filesystem enumeration for scan passes.
//!
//! Walks a scan root on a blocking task, filters to recognized audio
//! extensions, and yields [`WalkedFile`] entries over a bounded channel as a
//! Stream. Unreadable directory entries are logged and skipped; they never
//! abort the walk. The walk stays inside the given root, so a subtree pass
//! can never observe (or later delete) anything outside it.

use futures::stream::Stream;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::mpsc;
use walkdir::WalkDir;

/// One enumerated audio file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Modification time at enumeration, seconds since epoch
    pub mtime: Option<i64>,
}

/// Check if a path has a recognized audio file extension.
pub fn is_audio_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());
    matches!(ext.as_deref(), Some("mp3" | "flac" | "ogg" | "m4a" | "wav"))
}

/// Walk the given root recursively for audio files.
///
/// Supported extensions: mp3, flac, ogg, m4a, wav (case-insensitive).
/// Returns a finite Stream of [`WalkedFile`]; restart by calling again.
pub fn walk(root: PathBuf) -> impl Stream<Item = WalkedFile> {
    let (tx, rx) = mpsc::channel(100);

    // Synchronous filesystem traversal on a blocking task
    tokio::task::spawn_blocking(move || {
        for entry in WalkDir::new(&root) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(target: "scanner", error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_audio_file(entry.path()) {
                continue;
            }

            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(
                        target: "scanner",
                        path = %entry.path().display(),
                        error = %e,
                        "Skipping file without readable metadata"
                    );
                    continue;
                }
            };

            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64);

            let file = WalkedFile {
                path: entry.path().to_path_buf(),
                size: meta.len(),
                mtime,
            };

            // If the receiver is dropped the scan was abandoned; stop walking
            if tx.blocking_send(file).is_err() {
                break;
            }
        }
    });

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|file| (file, rx))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::fs::File;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_walk_finds_audio_files() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        File::create(root.join("song.mp3")).unwrap();
        File::create(root.join("music.flac")).unwrap();
        File::create(root.join("notes.txt")).unwrap(); // ignored
        File::create(root.join("UPPERCASE.OGG")).unwrap(); // found (case-insensitive)

        let subdir = root.join("subdir");
        std::fs::create_dir(&subdir).unwrap();
        File::create(subdir.join("track.wav")).unwrap();
        File::create(subdir.join("cover.jpg")).unwrap(); // ignored

        let files: Vec<WalkedFile> = walk(root.to_path_buf()).collect().await;
        assert_eq!(files.len(), 4);

        let names: Vec<String> = files
            .iter()
            .filter_map(|f| f.path.file_name().and_then(|n| n.to_str()).map(String::from))
            .collect();
        assert!(names.contains(&"song.mp3".to_string()));
        assert!(names.contains(&"music.flac".to_string()));
        assert!(names.contains(&"track.wav".to_string()));
        assert!(names.contains(&"UPPERCASE.OGG".to_string()));
        assert!(!names.contains(&"notes.txt".to_string()));
    }

    #[tokio::test]
    async fn test_walk_stays_inside_root() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        let inside = root.join("jazz");
        let outside = root.join("rock");
        std::fs::create_dir_all(&inside).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        File::create(inside.join("a.mp3")).unwrap();
        File::create(outside.join("b.mp3")).unwrap();

        let files: Vec<WalkedFile> = walk(inside.clone()).collect().await;
        assert_eq!(files.len(), 1);
        assert!(files[0].path.starts_with(&inside));
    }

    #[tokio::test]
    async fn test_walk_reports_size_and_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sized.mp3");
        std::fs::write(&path, b"0123456789").unwrap();

        let files: Vec<WalkedFile> = walk(dir.path().to_path_buf()).collect().await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 10);
        assert!(files[0].mtime.is_some());
    }

    #[test]
    fn test_is_audio_file() {
        assert!(is_audio_file(Path::new("/m/a.mp3")));
        assert!(is_audio_file(Path::new("/m/a.FLAC")));
        assert!(!is_audio_file(Path::new("/m/cover.jpg")));
        assert!(!is_audio_file(Path::new("/m/noext")));
    }
}
