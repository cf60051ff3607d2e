//! Core data models for the music catalog.
//!
//! Defines the primary entities: [`Track`], [`Artist`], [`Album`],
//! [`Genre`] and [`Artwork`], derived from SQLx for database mapping.
//!
//! # Database Schema
//!
//! The models map to the following tables:
//! - `artists` - Artist records, unique by normalized name
//! - `genres` - Genre records, unique by normalized name
//! - `albums` - Albums keyed by (normalized title, year, artist-or-compilation)
//! - `artwork` - One image per album
//! - `tracks` - Individual audio files, unique by file path

use sqlx::FromRow;

/// An artist in the catalog.
#[derive(Debug, Clone, FromRow)]
pub struct Artist {
    /// Database ID (auto-generated)
    pub id: i64,
    /// Display name (first-seen casing)
    pub name: String,
    /// Normalized lookup key (trimmed, case-folded)
    pub name_norm: String,
}

/// A genre in the catalog.
#[derive(Debug, Clone, FromRow)]
pub struct Genre {
    /// Database ID (auto-generated)
    pub id: i64,
    /// Display name (first-seen casing)
    pub name: String,
    /// Normalized lookup key
    pub name_norm: String,
}

/// An album in the catalog.
///
/// A compilation album has `compilation = true` and no artist; a
/// single-artist album has `compilation = false` and an artist reference.
/// The engine may promote the former identity to the latter mid-scan.
#[derive(Debug, Clone, FromRow)]
pub struct Album {
    /// Database ID (auto-generated)
    pub id: i64,
    /// Album title (first-seen casing)
    pub title: String,
    /// Normalized title used in the identity key
    pub title_norm: String,
    /// Release year, if known
    pub year: Option<i64>,
    /// Album artist; None for compilations
    pub artist_id: Option<i64>,
    /// Whether this album holds tracks by multiple primary artists
    pub compilation: bool,
    /// Genre reference (shared "Unknown" row when tags carry none)
    pub genre_id: Option<i64>,
}

/// Embedded artwork for an album.
#[derive(Debug, Clone, FromRow)]
pub struct Artwork {
    /// Database ID (auto-generated)
    pub id: i64,
    /// Owning album; artwork never outlives it
    pub album_id: i64,
    /// Raw image bytes
    pub image: Vec<u8>,
    /// SHA-256 of the image bytes, for cheap change detection
    pub image_hash: String,
    /// Pixel width
    pub width: i64,
    /// Pixel height
    pub height: i64,
}

/// A track (audio file) in the catalog.
#[derive(Debug, Clone, FromRow)]
pub struct Track {
    /// Database ID (auto-generated)
    pub id: i64,
    /// Absolute file path (unique identifier)
    pub path: String,
    /// Track title (from tags, or a filename fallback)
    pub title: String,
    /// Track number within its disc
    pub track_number: Option<i64>,
    /// Disc number for multi-volume releases
    pub disc_number: Option<i64>,
    /// Duration in seconds
    pub duration: Option<i64>,
    /// File modification time at last reconcile (seconds since epoch)
    pub mtime: Option<i64>,
    /// Foreign key to albums
    pub album_id: Option<i64>,
    /// Foreign key to artists
    pub artist_id: Option<i64>,
}
