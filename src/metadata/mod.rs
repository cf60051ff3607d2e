//! Audio file tag extraction.
//!
//! Uses the lofty crate for format-independent metadata access (MP3, FLAC,
//! OGG, M4A, WAV). Each file is parsed into a fixed-shape [`TagBundle`];
//! absent fields become explicit `None`/sentinel values so downstream code
//! never branches on attribute presence.
//!
//! Extraction is a pure read with no catalog side effects, which is what
//! allows the scan pipeline to run it on a parallel worker pool.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey};

use crate::error::{Error, Result};

/// Display names used when a file carries no usable tag value.
pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Everything the reconciliation engine needs to know about one file.
///
/// Uses owned Strings for SQLx compatibility; each bundle is read once per
/// file per pass, so the allocation overhead is minimal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagBundle {
    pub path: PathBuf,
    pub title: String,
    /// Track-level artist
    pub artist: String,
    /// Album-level artist, when tagged separately from the track artist
    pub album_artist: Option<String>,
    pub album_title: String,
    /// Raw genre tag value; numeric codes are resolved later by
    /// [`resolve_genre_name`]
    pub genre: Option<String>,
    pub year: Option<i64>,
    pub track_number: Option<i64>,
    pub disc_number: Option<i64>,
    /// Duration in seconds
    pub duration: Option<i64>,
    /// Explicit compilation flag from the tags (iTunes TCMP and friends)
    pub compilation: bool,
    /// Embedded front-cover bytes, if any
    pub artwork: Option<Vec<u8>>,
    /// File modification time, seconds since epoch
    pub mtime: Option<i64>,
}

impl TagBundle {
    /// The artist that determines album grouping: the album artist when
    /// tagged, otherwise the track artist.
    pub fn primary_artist(&self) -> &str {
        self.album_artist.as_deref().unwrap_or(&self.artist)
    }
}

/// Read one file into a [`TagBundle`].
///
/// Any probe or parse failure becomes [`Error::Extraction`]; callers skip
/// the file and keep scanning.
pub fn read(path: &Path) -> Result<TagBundle> {
    let tagged_file = Probe::open(path)
        .map_err(|e| Error::extraction(path, format!("failed to open: {e}")))?
        .read()
        .map_err(|e| Error::extraction(path, format!("failed to parse: {e}")))?;

    // Prefer the format's primary tag, fall back to whatever is present
    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());

    let title = tag
        .and_then(|t| t.title().map(|s| s.to_string()))
        .unwrap_or_else(|| title_from_filename(path));

    let artist = tag
        .and_then(|t| t.artist().map(|s| s.to_string()))
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());

    let album_artist = tag
        .and_then(|t| t.get_string(&ItemKey::AlbumArtist))
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty());

    let album_title = tag
        .and_then(|t| t.album().map(|s| s.to_string()))
        .unwrap_or_else(|| UNKNOWN_ALBUM.to_string());

    let genre = tag
        .and_then(|t| t.genre().map(|s| s.to_string()))
        .filter(|s| !s.trim().is_empty());

    let year = tag.and_then(|t| t.year()).map(i64::from);
    let track_number = tag.and_then(|t| t.track()).map(i64::from);
    let disc_number = tag.and_then(|t| t.disk()).map(i64::from);

    let compilation = tag
        .and_then(|t| t.get_string(&ItemKey::FlagCompilation))
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let artwork = tag
        .and_then(|t| t.pictures().first())
        .map(|p| p.data().to_vec());

    let duration = Some(tagged_file.properties().duration().as_secs() as i64);

    let mtime = file_mtime(path);

    Ok(TagBundle {
        path: path.to_path_buf(),
        title,
        artist,
        album_artist,
        album_title,
        genre,
        year,
        track_number,
        disc_number,
        duration,
        compilation,
        artwork,
        mtime,
    })
}

/// File modification time as seconds since the epoch, or None if the file
/// can't be statted.
pub fn file_mtime(path: &Path) -> Option<i64> {
    path.metadata()
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
}

fn title_from_filename(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string())
}

// ============================================================================
// Genre resolution
// ============================================================================

/// The standard ID3v1 genre table. Legacy ID3v2 TCON frames sometimes carry
/// a bare code ("13") or a parenthesized one ("(13)") instead of a name.
const ID3V1_GENRES: [&str; 80] = [
    "Blues", "Classic Rock", "Country", "Dance", "Disco", "Funk", "Grunge", "Hip-Hop", "Jazz",
    "Metal", "New Age", "Oldies", "Other", "Pop", "R&B", "Rap", "Reggae", "Rock", "Techno",
    "Industrial", "Alternative", "Ska", "Death Metal", "Pranks", "Soundtrack", "Euro-Techno",
    "Ambient", "Trip-Hop", "Vocal", "Jazz+Funk", "Fusion", "Trance", "Classical", "Instrumental",
    "Acid", "House", "Game", "Sound Clip", "Gospel", "Noise", "Alternative Rock", "Bass", "Soul",
    "Punk", "Space", "Meditative", "Instrumental Pop", "Instrumental Rock", "Ethnic", "Gothic",
    "Darkwave", "Techno-Industrial", "Electronic", "Pop-Folk", "Eurodance", "Dream",
    "Southern Rock", "Comedy", "Cult", "Gangsta", "Top 40", "Christian Rap", "Pop/Funk", "Jungle",
    "Native American", "Cabaret", "New Wave", "Psychedelic", "Rave", "Showtunes", "Trailer",
    "Lo-Fi", "Tribal", "Acid Punk", "Acid Jazz", "Polka", "Retro", "Musical", "Rock & Roll",
    "Hard Rock",
];

/// Turn a raw genre tag value into a display name, or None when the value
/// is unusable and the shared "Unknown" genre should apply.
///
/// Numeric-only values are treated as ID3v1 codes: known codes map to their
/// genre name, unknown codes are rejected rather than stored as a literal
/// numeric genre. Parenthesized codes ("(13)") are unwrapped first.
pub fn resolve_genre_name(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim();
    if value.is_empty() {
        return None;
    }

    // Unwrap "(nn)" framing from legacy ID3v2.3 TCON values
    let bare = value
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .unwrap_or(value);

    if !bare.is_empty() && bare.chars().all(|c| c.is_ascii_digit()) {
        let code: usize = bare.parse().ok()?;
        return ID3V1_GENRES.get(code).map(|name| name.to_string());
    }

    Some(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_non_audio_file_returns_error() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(file, "This is just some text, not music.").expect("write");

        let result = read(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_read_non_existent_file_returns_error() {
        let result = read(Path::new("non_existent_file.mp3"));
        assert!(result.is_err());
    }

    #[test]
    fn test_primary_artist_prefers_album_artist() {
        let bundle = crate::test_utils::mock_bundle("/m/a.mp3");
        let with_album_artist = TagBundle {
            album_artist: Some("Various Artists".to_string()),
            ..bundle.clone()
        };
        assert_eq!(with_album_artist.primary_artist(), "Various Artists");
        assert_eq!(bundle.primary_artist(), bundle.artist);
    }

    #[test]
    fn test_resolve_genre_plain_name() {
        assert_eq!(resolve_genre_name(Some("Rock")), Some("Rock".to_string()));
        // Display value keeps its own casing; normalization happens at lookup
        assert_eq!(
            resolve_genre_name(Some(" rock ")),
            Some("rock".to_string())
        );
    }

    #[test]
    fn test_resolve_genre_known_numeric_code() {
        assert_eq!(resolve_genre_name(Some("13")), Some("Pop".to_string()));
        assert_eq!(resolve_genre_name(Some("(17)")), Some("Rock".to_string()));
        assert_eq!(resolve_genre_name(Some("0")), Some("Blues".to_string()));
    }

    #[test]
    fn test_resolve_genre_unmapped_numeric_is_rejected() {
        assert_eq!(resolve_genre_name(Some("255")), None);
        assert_eq!(resolve_genre_name(Some("(199)")), None);
    }

    #[test]
    fn test_resolve_genre_missing_or_blank() {
        assert_eq!(resolve_genre_name(None), None);
        assert_eq!(resolve_genre_name(Some("   ")), None);
    }
}
