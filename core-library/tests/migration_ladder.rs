//! Migration ladder behaviour against real SQLite stores
//!
//! Covers backfill of shadow indexes for rows written before the index
//! existed, and that stepping one version at a time lands in the same state
//! as a single multi-step migration.

use core_library::db::create_pool;
use core_library::schema::{
    current_version, indexable_row_count, shadow_row_count, Migrator, SourceTable,
};
use core_library::{LibraryError, StoreConfig, CURRENT_VERSION};
use sqlx::SqlitePool;

async fn pool_at(version: u32) -> SqlitePool {
    let pool = create_pool(&StoreConfig::in_memory()).await.unwrap();
    Migrator::new().migrate(&pool, version).await.unwrap();
    pool
}

/// Rows written straight into the version 2 tables, bypassing the store
async fn seed_v2(pool: &SqlitePool) {
    let statements = [
        "INSERT INTO albums (id, name, normalized_name, track_count) VALUES (1, 'Abbey Road', 'abbey road', 2)",
        "INSERT INTO artists (id, name, normalized_name, track_count) VALUES (1, 'The Beatles', 'the beatles', 2)",
        "INSERT INTO genres (id, name, normalized_name, track_count) VALUES (1, 'Rock', 'rock', 2)",
        "INSERT INTO media (id, title, normalized_title, album_id, album_name, artist_id, artist_name, genre_id, genre_name, track_number, date_added, modified_at, deleted) \
         VALUES (1, 'Come Together', 'come together', 1, 'Abbey Road', 1, 'The Beatles', 1, 'Rock', 1, 0, 0, 0)",
        "INSERT INTO media (id, title, normalized_title, album_id, album_name, artist_id, artist_name, genre_id, genre_name, track_number, date_added, modified_at, deleted) \
         VALUES (2, 'Something', 'something', 1, 'Abbey Road', 1, 'The Beatles', 1, 'Rock', 2, 0, 0, 0)",
        "INSERT INTO media (id, title, normalized_title, date_added, modified_at, deleted) \
         VALUES (3, 'Her Majesty', 'her majesty', 0, 0, 1)",
        "INSERT INTO videos (id, title, normalized_title, date_added, modified_at, deleted) VALUES (1, 'Let It Be', 'let it be', 0, 0, 0)",
        "INSERT INTO videos (id, title, normalized_title, date_added, modified_at, deleted) VALUES (2, 'Outtakes', 'outtakes', 0, 0, 1)",
    ];
    for statement in statements {
        sqlx::query(statement).execute(pool).await.unwrap();
    }
}

/// Schema objects plus every shadow row, in a stable order
async fn dump(pool: &SqlitePool) -> (u32, Vec<(String, String, Option<String>)>, Vec<String>) {
    let version = current_version(pool).await.unwrap();
    let objects = sqlx::query_as(
        "SELECT type, name, sql FROM sqlite_master WHERE name NOT LIKE 'sqlite_%' ORDER BY type, name",
    )
    .fetch_all(pool)
    .await
    .unwrap();

    let mut shadows = Vec::new();
    for table in SourceTable::ALL {
        let rows: Vec<(i64, String)> = sqlx::query_as(&format!(
            "SELECT rowid, searchable FROM {} ORDER BY rowid",
            table.shadow_name()
        ))
        .fetch_all(pool)
        .await
        .unwrap();
        shadows.extend(
            rows.into_iter()
                .map(|(id, text)| format!("{}:{}:{}", table.shadow_name(), id, text)),
        );
    }

    (version, objects, shadows)
}

#[tokio::test]
async fn test_backfill_indexes_rows_written_before_the_shadow_existed() {
    let pool = pool_at(2).await;
    seed_v2(&pool).await;

    let version = Migrator::new().migrate(&pool, CURRENT_VERSION).await.unwrap();
    assert_eq!(version, CURRENT_VERSION);

    for table in SourceTable::ALL {
        assert_eq!(
            shadow_row_count(&pool, table).await.unwrap(),
            indexable_row_count(&pool, table).await.unwrap(),
            "{:?}",
            table
        );
    }
    // Soft-deleted rows are not indexed
    assert_eq!(shadow_row_count(&pool, SourceTable::Media).await.unwrap(), 2);
    assert_eq!(shadow_row_count(&pool, SourceTable::Videos).await.unwrap(), 1);
}

#[tokio::test]
async fn test_single_steps_match_one_multi_step_migration() {
    let direct = pool_at(2).await;
    seed_v2(&direct).await;
    Migrator::new().migrate(&direct, 3).await.unwrap();
    Migrator::new().migrate(&direct, 5).await.unwrap();

    let stepped = pool_at(2).await;
    seed_v2(&stepped).await;
    for target in 3..=5 {
        Migrator::new().migrate(&stepped, target).await.unwrap();
    }

    assert_eq!(dump(&direct).await, dump(&stepped).await);
}

#[tokio::test]
async fn test_rerunning_the_ladder_leaves_state_untouched() {
    let pool = pool_at(2).await;
    seed_v2(&pool).await;
    Migrator::new().migrate(&pool, CURRENT_VERSION).await.unwrap();
    let before = dump(&pool).await;

    Migrator::new().migrate(&pool, CURRENT_VERSION).await.unwrap();

    assert_eq!(dump(&pool).await, before);
}

#[tokio::test]
async fn test_failed_step_keeps_the_previous_version_and_data() {
    use core_library::schema::MigrationStep;

    const BROKEN: &[MigrationStep] = &[
        MIGRATIONS_V1,
        MigrationStep {
            from: 1,
            description: "broken",
            statements: &[
                "CREATE TABLE half_done (id INTEGER PRIMARY KEY)",
                "INSERT INTO no_such_table VALUES (1)",
            ],
        },
    ];
    const MIGRATIONS_V1: MigrationStep = core_library::schema::MIGRATIONS[0];

    let pool = create_pool(&StoreConfig::in_memory()).await.unwrap();
    Migrator::with_steps(BROKEN).migrate(&pool, 1).await.unwrap();
    sqlx::query(
        "INSERT INTO media (title, normalized_title, date_added, modified_at) VALUES ('Keep', 'keep', 0, 0)",
    )
    .execute(&pool)
    .await
    .unwrap();

    let err = Migrator::with_steps(BROKEN)
        .migrate(&pool, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, LibraryError::Migration { version: 2, .. }));

    assert_eq!(current_version(&pool).await.unwrap(), 1);
    let leftovers: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE name = 'half_done'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(leftovers, 0);
    let kept: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(kept, 1);
}
