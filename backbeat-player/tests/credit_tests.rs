//! Credit renewal against the real SQLite store.

use std::sync::Arc;

use backbeat_common::SongId;
use backbeat_player::config::CreditConfig;
use backbeat_player::credit::{CreditRenewer, CreditStore};
use backbeat_player::db::{init_database, init_memory_database, SqliteLibrary};
use backbeat_player::sources::PlaylistSource;
use chrono::{DateTime, Utc};

async fn library() -> Arc<SqliteLibrary> {
    let pool = init_memory_database().await.unwrap();
    Arc::new(SqliteLibrary::new(pool, &CreditConfig::default()))
}

async fn credit_of(lib: &SqliteLibrary, song: SongId) -> i64 {
    use sqlx::Row;
    sqlx::query("SELECT credit_count FROM songs WHERE id = ?")
        .bind(song.0)
        .fetch_one(lib.pool())
        .await
        .unwrap()
        .try_get("credit_count")
        .unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

#[tokio::test]
async fn test_step_initializes_then_renews() {
    let lib = library().await;
    let song = lib.add_song("Song", "http://x/1", 100).await.unwrap();
    lib.update_stats(song, false, 0).await.unwrap();
    lib.update_stats(song, false, 0).await.unwrap();
    assert_eq!(credit_of(&lib, song).await, 1);

    let renewer = CreditRenewer::new(lib.clone(), 24);

    renewer.step(at(0)).await.unwrap();
    assert_eq!(lib.checkpoint().await.unwrap(), Some(at(0)));
    assert_eq!(credit_of(&lib, song).await, 1, "initialization grants nothing");

    // a day and a half later: exactly one credit back
    renewer.step(at(36 * 3600)).await.unwrap();
    assert_eq!(credit_of(&lib, song).await, 2);
    assert_eq!(lib.checkpoint().await.unwrap(), Some(at(24 * 3600)));
}

#[tokio::test]
async fn test_step_is_idempotent_within_a_period() {
    let lib = library().await;
    let song = lib.add_song("Song", "http://x/1", 100).await.unwrap();
    lib.update_stats(song, false, 0).await.unwrap();

    let renewer = CreditRenewer::new(lib.clone(), 24);
    renewer.step(at(0)).await.unwrap();
    renewer.step(at(25 * 3600)).await.unwrap();
    let after_first = credit_of(&lib, song).await;

    // repeating the same instant must not grant again
    renewer.step(at(25 * 3600)).await.unwrap();
    renewer.step(at(25 * 3600 + 100)).await.unwrap();
    assert_eq!(credit_of(&lib, song).await, after_first);
}

#[tokio::test]
async fn test_downtime_grants_capped_backlog() {
    let lib = library().await;
    let song = lib.add_song("Song", "http://x/1", 100).await.unwrap();
    for _ in 0..CreditConfig::default().cap {
        lib.update_stats(song, false, 0).await.unwrap();
    }
    assert_eq!(credit_of(&lib, song).await, 0);

    let renewer = CreditRenewer::new(lib.clone(), 24);
    renewer.step(at(0)).await.unwrap();

    // ten days offline: credit returns, but only up to the cap
    renewer.step(at(10 * 24 * 3600)).await.unwrap();
    assert_eq!(credit_of(&lib, song).await, CreditConfig::default().cap);
    assert_eq!(
        lib.checkpoint().await.unwrap(),
        Some(at(10 * 24 * 3600)),
        "checkpoint advances by the full granted backlog"
    );

    // the renewed song is eligible for the autoplaylist again
    assert!(lib.autoplaylist_song().await.unwrap().is_some());
}

#[tokio::test]
async fn test_on_disk_database_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("library.db");

    let pool = init_database(&path).await.unwrap();
    let lib = Arc::new(SqliteLibrary::new(pool.clone(), &CreditConfig::default()));
    let song = lib.add_song("Kept", "http://x/1", 100).await.unwrap();
    let renewer = CreditRenewer::new(lib.clone(), 24);
    renewer.step(at(500)).await.unwrap();
    pool.close().await;

    let reopened = SqliteLibrary::new(
        init_database(&path).await.unwrap(),
        &CreditConfig::default(),
    );
    assert_eq!(reopened.checkpoint().await.unwrap(), Some(at(500)));
    assert_eq!(
        reopened.autoplaylist_song().await.unwrap().map(|s| s.id),
        Some(song),
        "the added song survives the reopen"
    );
}

#[tokio::test]
async fn test_checkpoint_survives_reopen_of_connection() {
    let lib = library().await;
    let renewer = CreditRenewer::new(lib.clone(), 24);
    renewer.step(at(1_000)).await.unwrap();

    // a second handle over the same pool sees the persisted checkpoint
    let other = SqliteLibrary::new(lib.pool().clone(), &CreditConfig::default());
    assert_eq!(other.checkpoint().await.unwrap(), Some(at(1_000)));
}
