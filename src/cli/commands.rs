//! CLI command definitions and handlers.
//!
//! Each subcommand is implemented as a function that takes the parsed
//! arguments and returns an `anyhow::Result<()>`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::runtime::Runtime;

use crate::library::coordinator::{ScanCoordinator, ScanEvent};
use crate::{config, db};

/// Shellac CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to an alternate config file
    #[arg(long, global = true, env = "SHELLAC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Scan the library (or one of its subdirectories) into the catalog
    Scan {
        /// Subdirectory to scan; omit to scan the whole library
        path: Option<PathBuf>,
    },
    /// List all tracks in the catalog
    List,
    /// List all albums in the catalog
    Albums,
    /// List all artists in the catalog
    Artists,
    /// Print the file path of a track by its catalog ID
    Locate {
        /// Track ID as shown by `list`
        track_id: i64,
    },
    /// Export an album's artwork to a file
    Cover {
        /// Album ID as shown by `albums`
        album_id: i64,
        /// Destination file for the image bytes
        output: PathBuf,
    },
    /// Write a default config file if none exists
    InitConfig,
    /// Print the active configuration
    ShowConfig,
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;
    let config = match &cli.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    };

    match &cli.command {
        Commands::Scan { path } => cmd_scan(&rt, &config, path.clone()),
        Commands::List => cmd_list(&rt, &config),
        Commands::Albums => cmd_albums(&rt, &config),
        Commands::Artists => cmd_artists(&rt, &config),
        Commands::Locate { track_id } => cmd_locate(&rt, &config, *track_id),
        Commands::Cover { album_id, output } => cmd_cover(&rt, &config, *album_id, output),
        Commands::InitConfig => cmd_init_config(),
        Commands::ShowConfig => cmd_show_config(&config),
    }
}

async fn open_catalog(config: &config::Config) -> anyhow::Result<sqlx::SqlitePool> {
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pool = db::init_db(&db::db_url(Some(&db_path))).await?;
    Ok(pool)
}

// ============================================================================
// Individual command implementations
// ============================================================================

fn cmd_scan(rt: &Runtime, config: &config::Config, path: Option<PathBuf>) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_catalog(config).await?;
        let coordinator = ScanCoordinator::new(
            pool,
            config.library.music_dir.clone(),
            config.scan.clone(),
        );

        let mut events = coordinator.start_scan(path)?;
        let mut processed: u64 = 0;

        while let Some(event) = events.recv().await {
            match event {
                ScanEvent::Started { root, kind } => {
                    println!("Scanning {} ({:?})", root.display(), kind);
                }
                ScanEvent::FileProcessed { .. } => {
                    processed += 1;
                    if processed % 100 == 0 {
                        print!("\rScanned {} tracks...", processed);
                        use std::io::Write;
                        let _ = std::io::stdout().flush();
                    }
                }
                ScanEvent::FileSkipped { path, reason } => {
                    eprintln!("\nSkipped {}: {}", path.display(), reason);
                }
                ScanEvent::Completed(summary) => {
                    let elapsed = summary.finished_at - summary.started_at;
                    println!(
                        "\nScan complete in {}s: {} seen ({} added, {} updated, {} unchanged), {} skipped",
                        elapsed.num_seconds(),
                        summary.stats.seen,
                        summary.stats.added,
                        summary.stats.updated,
                        summary.stats.unchanged,
                        summary.stats.skipped,
                    );
                    if let Some(orphans) = summary.orphans {
                        if !orphans.is_empty() {
                            println!(
                                "Removed {} stale tracks, {} albums, {} artists, {} genres",
                                orphans.tracks_removed,
                                orphans.albums_removed,
                                orphans.artists_removed,
                                orphans.genres_removed,
                            );
                        }
                    }
                }
                ScanEvent::Cancelled(stats) => {
                    println!("\nScan cancelled after {} files", stats.seen);
                }
                ScanEvent::Failed(message) => {
                    anyhow::bail!("Scan failed: {message}");
                }
            }
        }
        Ok(())
    })
}

fn cmd_list(rt: &Runtime, config: &config::Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_catalog(config).await?;
        let tracks = db::get_all_tracks_with_metadata(&pool).await?;
        for track in tracks {
            println!(
                "[{}] {} - {} [{}]  {}",
                track.id, track.artist_name, track.title, track.album_title, track.path
            );
        }
        Ok(())
    })
}

fn cmd_albums(rt: &Runtime, config: &config::Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_catalog(config).await?;
        let albums = db::get_album_summaries(&pool).await?;
        for album in albums {
            let artist = if album.compilation {
                "Various Artists".to_string()
            } else {
                album.artist_name.unwrap_or_else(|| "Unknown Artist".to_string())
            };
            let year = album
                .year
                .map(|y| format!(" ({y})"))
                .unwrap_or_default();
            println!(
                "{} - {}{}  [{} tracks, genre: {}]",
                artist,
                album.title,
                year,
                album.track_count,
                album.genre_name.as_deref().unwrap_or("-"),
            );
        }
        Ok(())
    })
}

fn cmd_artists(rt: &Runtime, config: &config::Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_catalog(config).await?;
        for artist in db::get_all_artists(&pool).await? {
            println!("{}", artist.name);
        }
        Ok(())
    })
}

fn cmd_locate(rt: &Runtime, config: &config::Config, track_id: i64) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_catalog(config).await?;
        match db::get_track_path(&pool, track_id).await? {
            Some(path) => {
                println!("{path}");
                Ok(())
            }
            None => anyhow::bail!("No track with ID {track_id}"),
        }
    })
}

fn cmd_cover(
    rt: &Runtime,
    config: &config::Config,
    album_id: i64,
    output: &std::path::Path,
) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_catalog(config).await?;
        let Some(album) = db::get_album_by_id(&pool, album_id).await? else {
            anyhow::bail!("No album with ID {album_id}");
        };
        let Some(artwork) = db::get_artwork_for_album(&pool, album_id).await? else {
            anyhow::bail!("Album '{}' has no artwork", album.title);
        };
        std::fs::write(output, &artwork.image)?;
        println!(
            "Wrote {}x{} image for '{}' to {}",
            artwork.width,
            artwork.height,
            album.title,
            output.display()
        );
        Ok(())
    })
}

fn cmd_init_config() -> anyhow::Result<()> {
    if let Some(path) = config::config_path()
        && path.exists()
    {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    config::save(&config::Config::default())?;
    Ok(())
}

fn cmd_show_config(config: &config::Config) -> anyhow::Result<()> {
    if let Some(path) = config::config_path() {
        println!("# config file: {}", path.display());
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
