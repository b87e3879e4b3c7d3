//! SQLite-backed song library
//!
//! One database holds the song catalog, the per-DJ playlists and the credit
//! renewal checkpoint. The schema is created on first run; opening an
//! existing database is idempotent.

use crate::config::CreditConfig;
use crate::credit::CreditStore;
use crate::error::Result;
use crate::sources::{NextSongError, PlaylistSource};
use async_trait::async_trait;
use backbeat_common::{ListenerId, Song, SongId};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the library database.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL keeps the player responsive while stats are written
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database for tests.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS songs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            url TEXT NOT NULL,
            duration INTEGER NOT NULL DEFAULT 0,
            credit_count INTEGER NOT NULL DEFAULT 0,
            play_count INTEGER NOT NULL DEFAULT 0,
            skip_count INTEGER NOT NULL DEFAULT 0,
            skip_vote_count INTEGER NOT NULL DEFAULT 0,
            is_blacklisted INTEGER NOT NULL DEFAULT 0,
            has_failed INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS playlist_entries (
            dj_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            song_id INTEGER NOT NULL REFERENCES songs(id),
            PRIMARY KEY (dj_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS credit_checkpoint (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_renewal TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Song library, playlist source and credit store in one handle.
#[derive(Clone)]
pub struct SqliteLibrary {
    pool: SqlitePool,
    credit_cap: i64,
}

impl SqliteLibrary {
    pub fn new(pool: SqlitePool, credit: &CreditConfig) -> Self {
        Self {
            pool,
            credit_cap: credit.cap,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a song with full starting credit; returns its id.
    pub async fn add_song(&self, title: &str, url: &str, duration_secs: u32) -> Result<SongId> {
        let row = sqlx::query(
            "INSERT INTO songs (title, url, duration, credit_count) VALUES (?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(title)
        .bind(url)
        .bind(i64::from(duration_secs))
        .bind(self.credit_cap)
        .fetch_one(&self.pool)
        .await?;
        Ok(SongId(row.try_get("id")?))
    }

    /// Append a song to the tail of a DJ's playlist.
    pub async fn enqueue(&self, dj: ListenerId, song: SongId) -> Result<()> {
        sqlx::query(
            "INSERT INTO playlist_entries (dj_id, position, song_id) \
             SELECT ?, COALESCE(MAX(position), 0) + 1, ? \
             FROM playlist_entries WHERE dj_id = ?",
        )
        .bind(dj.0 as i64)
        .bind(song.0)
        .bind(dj.0 as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a song unplayable after a download/decode failure.
    pub async fn flag_failed(&self, song: SongId) -> Result<()> {
        sqlx::query("UPDATE songs SET has_failed = 1 WHERE id = ?")
            .bind(song.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn song_by_id(&self, id: i64) -> sqlx::Result<Option<SongRow>> {
        let row = sqlx::query(
            "SELECT id, title, url, duration, is_blacklisted, has_failed \
             FROM songs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SongRow::from_row).transpose()
    }
}

struct SongRow {
    song: Song,
    flagged: bool,
}

impl SongRow {
    fn from_row(row: sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        let duration: i64 = row.try_get("duration")?;
        let blacklisted: i64 = row.try_get("is_blacklisted")?;
        let failed: i64 = row.try_get("has_failed")?;
        Ok(Self {
            song: Song {
                id: SongId(row.try_get("id")?),
                title: row.try_get("title")?,
                url: row.try_get("url")?,
                duration_secs: duration.max(0) as u32,
            },
            flagged: blacklisted != 0 || failed != 0,
        })
    }
}

#[async_trait]
impl PlaylistSource for SqliteLibrary {
    async fn next_song(&self, dj: ListenerId) -> std::result::Result<Song, NextSongError> {
        let head = sqlx::query(
            "DELETE FROM playlist_entries WHERE dj_id = ? AND position = \
             (SELECT MIN(position) FROM playlist_entries WHERE dj_id = ?) \
             RETURNING song_id",
        )
        .bind(dj.0 as i64)
        .bind(dj.0 as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| NextSongError::Failed(e.to_string()))?;

        let song_id: i64 = match head {
            Some(row) => row
                .try_get("song_id")
                .map_err(|e| NextSongError::Failed(e.to_string()))?,
            None => return Err(NextSongError::PlaylistEmpty),
        };

        let row = self
            .song_by_id(song_id)
            .await
            .map_err(|e| NextSongError::Failed(e.to_string()))?
            .ok_or_else(|| NextSongError::Failed(format!("song {} vanished", song_id)))?;

        if row.flagged {
            return Err(NextSongError::Unavailable {
                song_id: row.song.id,
                title: row.song.title,
            });
        }
        Ok(row.song)
    }

    async fn autoplaylist_song(&self) -> std::result::Result<Option<Song>, NextSongError> {
        let row = sqlx::query(
            "SELECT id, title, url, duration, is_blacklisted, has_failed FROM songs \
             WHERE credit_count > 0 AND is_blacklisted = 0 AND has_failed = 0 \
             ORDER BY RANDOM() LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| NextSongError::Failed(e.to_string()))?;

        match row {
            Some(row) => {
                let parsed =
                    SongRow::from_row(row).map_err(|e| NextSongError::Failed(e.to_string()))?;
                Ok(Some(parsed.song))
            }
            None => Ok(None),
        }
    }

    async fn update_stats(&self, song: SongId, skipped: bool, skip_votes: usize) -> Result<()> {
        sqlx::query(
            "UPDATE songs SET \
             play_count = play_count + 1, \
             credit_count = MAX(credit_count - 1, 0), \
             skip_count = skip_count + ?, \
             skip_vote_count = skip_vote_count + ? \
             WHERE id = ?",
        )
        .bind(i64::from(skipped))
        .bind(skip_votes as i64)
        .bind(song.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CreditStore for SqliteLibrary {
    async fn checkpoint(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT last_renewal FROM credit_checkpoint WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("last_renewal")?)),
            None => Ok(None),
        }
    }

    async fn init_checkpoint(&self, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO credit_checkpoint (id, last_renewal) VALUES (1, ?)")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn apply_renewal(&self, new_checkpoint: DateTime<Utc>, intervals: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE credit_checkpoint SET last_renewal = ? WHERE id = 1")
            .bind(new_checkpoint)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE songs SET credit_count = MIN(credit_count + ?, ?)")
            .bind(intervals)
            .bind(self.credit_cap)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CreditConfig;

    async fn test_library() -> SqliteLibrary {
        let pool = init_memory_database().await.unwrap();
        SqliteLibrary::new(pool, &CreditConfig::default())
    }

    #[tokio::test]
    async fn test_playlist_pops_in_order() {
        let lib = test_library().await;
        let a = lib.add_song("First", "http://x/1", 100).await.unwrap();
        let b = lib.add_song("Second", "http://x/2", 200).await.unwrap();
        let dj = ListenerId(7);
        lib.enqueue(dj, a).await.unwrap();
        lib.enqueue(dj, b).await.unwrap();

        assert_eq!(lib.next_song(dj).await.unwrap().id, a);
        assert_eq!(lib.next_song(dj).await.unwrap().id, b);
        assert_eq!(lib.next_song(dj).await.unwrap_err(), NextSongError::PlaylistEmpty);
    }

    #[tokio::test]
    async fn test_flagged_song_is_unavailable() {
        let lib = test_library().await;
        let a = lib.add_song("Broken", "http://x/1", 100).await.unwrap();
        let dj = ListenerId(7);
        lib.enqueue(dj, a).await.unwrap();
        lib.flag_failed(a).await.unwrap();

        match lib.next_song(dj).await.unwrap_err() {
            NextSongError::Unavailable { song_id, .. } => assert_eq!(song_id, a),
            other => panic!("expected Unavailable, got {:?}", other),
        }
        // the entry was consumed either way
        assert_eq!(lib.next_song(dj).await.unwrap_err(), NextSongError::PlaylistEmpty);
    }

    #[tokio::test]
    async fn test_autoplaylist_skips_flagged_and_spent() {
        let lib = test_library().await;
        let good = lib.add_song("Good", "http://x/1", 100).await.unwrap();
        let bad = lib.add_song("Bad", "http://x/2", 100).await.unwrap();
        lib.flag_failed(bad).await.unwrap();

        for _ in 0..10 {
            let pick = lib.autoplaylist_song().await.unwrap().unwrap();
            assert_eq!(pick.id, good);
        }

        // burn through the credit
        for _ in 0..CreditConfig::default().cap {
            lib.update_stats(good, false, 0).await.unwrap();
        }
        assert!(lib.autoplaylist_song().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_stats_floors_credit() {
        let lib = test_library().await;
        let a = lib.add_song("Song", "http://x/1", 100).await.unwrap();

        for _ in 0..5 {
            lib.update_stats(a, true, 2).await.unwrap();
        }
        let row = sqlx::query(
            "SELECT credit_count, play_count, skip_count, skip_vote_count FROM songs WHERE id = ?",
        )
        .bind(a.0)
        .fetch_one(lib.pool())
        .await
        .unwrap();
        assert_eq!(row.try_get::<i64, _>("credit_count").unwrap(), 0);
        assert_eq!(row.try_get::<i64, _>("play_count").unwrap(), 5);
        assert_eq!(row.try_get::<i64, _>("skip_count").unwrap(), 5);
        assert_eq!(row.try_get::<i64, _>("skip_vote_count").unwrap(), 10);
    }

    #[tokio::test]
    async fn test_renewal_caps_credit() {
        let lib = test_library().await;
        let a = lib.add_song("Song", "http://x/1", 100).await.unwrap();
        lib.update_stats(a, false, 0).await.unwrap(); // credit 2

        let now = Utc::now();
        lib.init_checkpoint(now).await.unwrap();
        lib.apply_renewal(now, 10).await.unwrap();

        let credit: i64 = sqlx::query("SELECT credit_count FROM songs WHERE id = ?")
            .bind(a.0)
            .fetch_one(lib.pool())
            .await
            .unwrap()
            .try_get("credit_count")
            .unwrap();
        assert_eq!(credit, CreditConfig::default().cap);

        assert_eq!(lib.checkpoint().await.unwrap(), Some(now));
    }
}
