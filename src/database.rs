use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use std::str::FromStr;
use tracing::{info, warn};

use crate::fingerprint::{Fingerprint, TrackInfo};

/// Catalog store backed by SQLite.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// A stored catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration: Option<f64>,
    /// Content digest of the fingerprint.
    pub fingerprint: String,
    #[serde(skip)]
    pub hash_segments: Vec<String>,
    pub date_added: Option<NaiveDateTime>,
}

impl Song {
    pub fn track_info(&self) -> TrackInfo {
        TrackInfo {
            id: self.id,
            title: self.title.clone(),
            artist: self.artist.clone(),
        }
    }

    pub fn into_fingerprint(self) -> Fingerprint {
        let track = self.track_info();
        Fingerprint {
            track: Some(track),
            digest: self.fingerprint,
            hash_segments: self.hash_segments,
        }
    }
}

/// Metadata supplied when appending a song.
#[derive(Debug, Clone, Default)]
pub struct NewSong {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration: Option<f64>,
}

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS songs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        artist TEXT NOT NULL,
        album TEXT,
        duration REAL,
        fingerprint TEXT NOT NULL,
        hash_segments TEXT NOT NULL,
        date_added DATETIME DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_songs_artist ON songs(artist)",
    "CREATE INDEX IF NOT EXISTS idx_songs_title ON songs(title)",
    "CREATE INDEX IF NOT EXISTS idx_songs_fingerprint ON songs(fingerprint)",
];

const SONG_COLUMNS: &str =
    "id, title, artist, album, duration, fingerprint, hash_segments, date_added";

impl Database {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open catalog at {}", database_url))?;

        Ok(Database { pool })
    }

    pub async fn init(&self) -> Result<()> {
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            sqlx::query(migration)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Migration {} failed", i + 1))?;
        }
        info!("Catalog schema ready");
        Ok(())
    }

    /// Append a song and return its assigned id.
    pub async fn add_song(&self, song: &NewSong, fingerprint: &Fingerprint) -> Result<i64> {
        let hash_segments_json = serde_json::to_string(&fingerprint.hash_segments)?;

        let result = sqlx::query(
            r#"
            INSERT INTO songs (title, artist, album, duration, fingerprint, hash_segments)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&song.title)
        .bind(&song.artist)
        .bind(&song.album)
        .bind(song.duration)
        .bind(&fingerprint.digest)
        .bind(&hash_segments_json)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        info!(
            "Added song {}: {} - {} ({} segments)",
            id,
            song.artist,
            song.title,
            fingerprint.hash_segments.len()
        );
        Ok(id)
    }

    pub async fn list_songs(&self) -> Result<Vec<Song>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM songs ORDER BY artist, title",
            SONG_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(song_from_row).collect())
    }

    /// Snapshot of every cataloged fingerprint, in catalog order.
    pub async fn list_fingerprints(&self) -> Result<Vec<Fingerprint>> {
        Ok(self
            .list_songs()
            .await?
            .into_iter()
            .map(Song::into_fingerprint)
            .collect())
    }

    pub async fn search_songs(&self, term: &str) -> Result<Vec<Song>> {
        let pattern = format!("%{}%", term);
        let rows = sqlx::query(&format!(
            "SELECT {} FROM songs WHERE title LIKE ?1 OR artist LIKE ?1 ORDER BY artist, title",
            SONG_COLUMNS
        ))
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(song_from_row).collect())
    }

    /// Exact-duplicate lookup by content digest.
    pub async fn find_by_digest(&self, digest: &str) -> Result<Option<Song>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM songs WHERE fingerprint = ?1 LIMIT 1",
            SONG_COLUMNS
        ))
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(song_from_row))
    }

    pub async fn song_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM songs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    pub async fn delete_song(&self, song_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM songs WHERE id = ?1
            "#,
        )
        .bind(song_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn song_from_row(row: &SqliteRow) -> Option<Song> {
    let id: i64 = row.get("id");
    let hash_segments_json: String = row.get("hash_segments");

    let hash_segments = match serde_json::from_str::<Vec<String>>(&hash_segments_json) {
        Ok(segments) => segments,
        Err(e) => {
            warn!("Skipping song {} with unreadable hash segments: {}", id, e);
            return None;
        }
    };

    Some(Song {
        id,
        title: row.get("title"),
        artist: row.get("artist"),
        album: row.get("album"),
        duration: row.get("duration"),
        fingerprint: row.get("fingerprint"),
        hash_segments,
        date_added: row
            .try_get::<Option<NaiveDateTime>, _>("date_added")
            .ok()
            .flatten(),
    })
}
