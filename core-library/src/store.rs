//! # Library Store
//!
//! The only write entry point into the library. Every mutation runs inside a
//! single transaction together with its write hooks (shadow-index sync,
//! aggregate counts), commits, and then emits one change notification.
//!
//! ## Delete policy
//!
//! Deletes are soft: the row is flagged, drops out of every default query,
//! and releases its shadow row and aggregate counts in the same transaction.
//! [`LibraryStore::purge_deleted`] is the only hard delete.

use crate::error::{LibraryError, Result};
use crate::models::{
    normalize, AggregateKind, AggregateRow, EntryRef, GroupAggregate, MediaRecord, NewMedia,
    NewVideo, Playlist, PlaylistEntry, PlaylistEntryRow, VideoRecord,
};
use crate::paging::ChangeNotifier;
use crate::query::sql::{bind_query_scalar, build_media_id_query};
use crate::query::CompiledQuery;
use crate::schema::hooks::{self, WriteEvent};
use crate::schema::{self, SourceTable};
use chrono::Utc;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

/// Transactional access to the library tables
#[derive(Clone, Debug)]
pub struct LibraryStore {
    pool: SqlitePool,
    notifier: ChangeNotifier,
    schema_version: u32,
    /// Held from `BEGIN` to commit by every write. A deferred transaction
    /// that reads before writing cannot take SQLite's write lock once
    /// another writer has committed, so writers queue here instead.
    write_gate: Arc<Mutex<()>>,
}

impl LibraryStore {
    /// Wrap a pool already migrated to `schema_version`.
    pub fn new(pool: SqlitePool, notifier: ChangeNotifier, schema_version: u32) -> Self {
        Self {
            pool,
            notifier,
            schema_version,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    async fn begin_write(&self) -> Result<(MutexGuard<'_, ()>, Transaction<'static, Sqlite>)> {
        let gate = self.write_gate.lock().await;
        let tx = self.pool.begin().await?;
        Ok((gate, tx))
    }

    // =========================================================================
    // Media
    // =========================================================================

    /// Insert a media record, creating any album/artist/genre it names.
    #[instrument(skip(self, media), fields(title = %media.title))]
    pub async fn insert_media(&self, media: NewMedia) -> Result<MediaRecord> {
        validate(media.validate(), "media")?;
        let now = Utc::now().timestamp();

        let (_writer, mut tx) = self.begin_write().await?;
        let refs = resolve_aggregates(&mut tx, &media).await?;

        let id = sqlx::query(
            r#"
            INSERT INTO media (
                title, normalized_title,
                album_id, album_name, artist_id, artist_name, genre_id, genre_name,
                track_number, disc_number, year, date_added, modified_at, deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(media.title.trim())
        .bind(normalize(&media.title))
        .bind(refs.album_id)
        .bind(trimmed(&media.album))
        .bind(refs.artist_id)
        .bind(trimmed(&media.artist))
        .bind(refs.genre_id)
        .bind(trimmed(&media.genre))
        .bind(media.track_number)
        .bind(media.disc_number)
        .bind(media.year)
        .bind(media.date_added.unwrap_or(now))
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        hooks::apply(&mut tx, WriteEvent::new(SourceTable::Media, id, None)).await?;
        let record = fetch_media(&mut tx, id).await?;
        tx.commit().await?;

        info!(id, "Inserted media record");
        self.notifier.notify();
        Ok(record)
    }

    /// Replace the caller-supplied fields of a live media record.
    ///
    /// `date_added` is kept unless the payload sets it.
    #[instrument(skip(self, media))]
    pub async fn update_media(&self, id: i64, media: NewMedia) -> Result<MediaRecord> {
        validate(media.validate(), "media")?;
        let now = Utc::now().timestamp();

        let (_writer, mut tx) = self.begin_write().await?;
        let before = match hooks::snapshot(&mut tx, id).await? {
            Some(membership) if !membership.deleted => membership,
            _ => return Err(LibraryError::not_found("MediaRecord", id)),
        };
        let refs = resolve_aggregates(&mut tx, &media).await?;

        sqlx::query(
            r#"
            UPDATE media SET
                title = ?, normalized_title = ?,
                album_id = ?, album_name = ?, artist_id = ?, artist_name = ?,
                genre_id = ?, genre_name = ?,
                track_number = ?, disc_number = ?, year = ?,
                date_added = COALESCE(?, date_added), modified_at = ?
            WHERE id = ?
            "#,
        )
        .bind(media.title.trim())
        .bind(normalize(&media.title))
        .bind(refs.album_id)
        .bind(trimmed(&media.album))
        .bind(refs.artist_id)
        .bind(trimmed(&media.artist))
        .bind(refs.genre_id)
        .bind(trimmed(&media.genre))
        .bind(media.track_number)
        .bind(media.disc_number)
        .bind(media.year)
        .bind(media.date_added)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        hooks::apply(&mut tx, WriteEvent::new(SourceTable::Media, id, Some(before))).await?;
        let record = fetch_media(&mut tx, id).await?;
        tx.commit().await?;

        info!(id, "Updated media record");
        self.notifier.notify();
        Ok(record)
    }

    /// Soft-delete media records by id. Unknown or already deleted ids are
    /// skipped. Returns the number of records deleted.
    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    pub async fn delete_media(&self, ids: &[i64]) -> Result<u64> {
        let (_writer, mut tx) = self.begin_write().await?;
        let deleted = soft_delete_media(&mut tx, ids).await?;
        tx.commit().await?;

        info!(deleted, "Soft-deleted media records");
        if deleted > 0 {
            self.notifier.notify();
        }
        Ok(deleted)
    }

    /// Soft-delete every live media record matching the query's filters.
    ///
    /// # Errors
    ///
    /// `SchemaMismatch` when the query was compiled against another schema
    /// version; `Configuration` when it is not a media query.
    #[instrument(skip(self, query))]
    pub async fn delete_matching(&self, query: &CompiledQuery) -> Result<u64> {
        self.check_schema(query)?;
        let (sql, binds) = build_media_id_query(query)?;

        let (_writer, mut tx) = self.begin_write().await?;
        let ids = bind_query_scalar(sqlx::query_scalar::<_, i64>(&sql), &binds)
            .fetch_all(&mut *tx)
            .await?;
        let deleted = soft_delete_media(&mut tx, &ids).await?;
        tx.commit().await?;

        info!(deleted, "Soft-deleted media records matching fragments");
        if deleted > 0 {
            self.notifier.notify();
        }
        Ok(deleted)
    }

    /// Hard-delete every soft-deleted media and video row, along with the
    /// playlist entries pointing at them. Returns the number of rows removed.
    #[instrument(skip(self))]
    pub async fn purge_deleted(&self) -> Result<u64> {
        let (_writer, mut tx) = self.begin_write().await?;

        let media_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM media WHERE deleted = 1")
            .fetch_all(&mut *tx)
            .await?;
        for id in &media_ids {
            let before = hooks::snapshot(&mut tx, *id).await?;
            sqlx::query("DELETE FROM media WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            hooks::apply(&mut tx, WriteEvent::new(SourceTable::Media, *id, before)).await?;
        }

        let video_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM videos WHERE deleted = 1")
            .fetch_all(&mut *tx)
            .await?;
        for id in &video_ids {
            sqlx::query("DELETE FROM videos WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            hooks::apply(&mut tx, WriteEvent::new(SourceTable::Videos, *id, None)).await?;
        }

        tx.commit().await?;

        let purged = (media_ids.len() + video_ids.len()) as u64;
        info!(
            media = media_ids.len(),
            videos = video_ids.len(),
            "Purged deleted records"
        );
        if purged > 0 {
            self.notifier.notify();
        }
        Ok(purged)
    }

    // =========================================================================
    // Videos
    // =========================================================================

    #[instrument(skip(self, video), fields(title = %video.title))]
    pub async fn insert_video(&self, video: NewVideo) -> Result<VideoRecord> {
        validate(video.validate(), "video")?;
        let now = Utc::now().timestamp();

        let (_writer, mut tx) = self.begin_write().await?;
        let id = sqlx::query(
            "INSERT INTO videos (title, normalized_title, duration_ms, date_added, modified_at, deleted) \
             VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(video.title.trim())
        .bind(normalize(&video.title))
        .bind(video.duration_ms)
        .bind(video.date_added.unwrap_or(now))
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        hooks::apply(&mut tx, WriteEvent::new(SourceTable::Videos, id, None)).await?;
        let record = fetch_video(&mut tx, id).await?;
        tx.commit().await?;

        info!(id, "Inserted video record");
        self.notifier.notify();
        Ok(record)
    }

    #[instrument(skip(self, title))]
    pub async fn update_video_title(&self, id: i64, title: &str) -> Result<VideoRecord> {
        if title.trim().is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "video".to_string(),
                message: "Video title cannot be empty".to_string(),
            });
        }

        let (_writer, mut tx) = self.begin_write().await?;
        let updated = sqlx::query(
            "UPDATE videos SET title = ?, normalized_title = ?, modified_at = ? \
             WHERE id = ? AND deleted = 0",
        )
        .bind(title.trim())
        .bind(normalize(title))
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(LibraryError::not_found("VideoRecord", id));
        }

        hooks::apply(&mut tx, WriteEvent::new(SourceTable::Videos, id, None)).await?;
        let record = fetch_video(&mut tx, id).await?;
        tx.commit().await?;

        info!(id, "Updated video title");
        self.notifier.notify();
        Ok(record)
    }

    /// Soft-delete videos by id. Returns the number of videos deleted.
    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    pub async fn delete_videos(&self, ids: &[i64]) -> Result<u64> {
        let now = Utc::now().timestamp();
        let (_writer, mut tx) = self.begin_write().await?;

        let mut deleted = 0;
        for id in ids {
            let affected = sqlx::query(
                "UPDATE videos SET deleted = 1, modified_at = ? WHERE id = ? AND deleted = 0",
            )
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if affected > 0 {
                hooks::apply(&mut tx, WriteEvent::new(SourceTable::Videos, *id, None)).await?;
                deleted += 1;
            }
        }
        tx.commit().await?;

        info!(deleted, "Soft-deleted video records");
        if deleted > 0 {
            self.notifier.notify();
        }
        Ok(deleted)
    }

    // =========================================================================
    // Playlists
    // =========================================================================

    pub async fn create_playlist(&self, name: &str) -> Result<Playlist> {
        if name.trim().is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "playlist".to_string(),
                message: "Playlist name cannot be empty".to_string(),
            });
        }

        let _writer = self.write_gate.lock().await;
        let playlist = sqlx::query_as::<_, Playlist>(
            "INSERT INTO playlists (name, created_at) VALUES (?, ?) RETURNING id, name, created_at",
        )
        .bind(name.trim())
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;

        info!(id = playlist.id, "Created playlist");
        self.notifier.notify();
        Ok(playlist)
    }

    /// Append a live media or video record to a playlist.
    ///
    /// `added_at` defaults to now.
    #[instrument(skip(self))]
    pub async fn add_to_playlist(
        &self,
        playlist_id: i64,
        target: EntryRef,
        added_at: Option<i64>,
    ) -> Result<PlaylistEntry> {
        let (_writer, mut tx) = self.begin_write().await?;

        let playlist: Option<i64> = sqlx::query_scalar("SELECT id FROM playlists WHERE id = ?")
            .bind(playlist_id)
            .fetch_optional(&mut *tx)
            .await?;
        if playlist.is_none() {
            return Err(LibraryError::not_found("Playlist", playlist_id));
        }

        let (table, entity, id) = match target {
            EntryRef::Media(id) => ("media", "MediaRecord", id),
            EntryRef::Video(id) => ("videos", "VideoRecord", id),
        };
        let live: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT id FROM {} WHERE id = ? AND deleted = 0",
            table
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        if live.is_none() {
            return Err(LibraryError::not_found(entity, id));
        }

        let (media_id, video_id) = target.columns();
        let row = sqlx::query_as::<_, PlaylistEntryRow>(
            "INSERT INTO playlist_entries (playlist_id, media_id, video_id, added_at) \
             VALUES (?, ?, ?, ?) \
             RETURNING id, playlist_id, media_id, video_id, added_at",
        )
        .bind(playlist_id)
        .bind(media_id)
        .bind(video_id)
        .bind(added_at.unwrap_or_else(|| Utc::now().timestamp()))
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(entry_id = row.id, playlist_id, "Added playlist entry");
        self.notifier.notify();
        PlaylistEntry::try_from(row)
    }

    pub async fn remove_from_playlist(&self, entry_id: i64) -> Result<()> {
        let _writer = self.write_gate.lock().await;
        let removed = sqlx::query("DELETE FROM playlist_entries WHERE id = ?")
            .bind(entry_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if removed == 0 {
            return Err(LibraryError::not_found("PlaylistEntry", entry_id));
        }

        debug!(entry_id, "Removed playlist entry");
        self.notifier.notify();
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch a media record by id, deleted or not.
    pub async fn media(&self, id: i64) -> Result<MediaRecord> {
        sqlx::query_as::<_, MediaRecord>("SELECT * FROM media WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LibraryError::not_found("MediaRecord", id))
    }

    /// Fetch a video record by id, deleted or not.
    pub async fn video(&self, id: i64) -> Result<VideoRecord> {
        sqlx::query_as::<_, VideoRecord>("SELECT * FROM videos WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LibraryError::not_found("VideoRecord", id))
    }

    /// Fetch an aggregate; `None` once it has been pruned.
    pub async fn aggregate(&self, kind: AggregateKind, id: i64) -> Result<Option<GroupAggregate>> {
        let row = sqlx::query_as::<_, AggregateRow>(&format!(
            "SELECT id, name, normalized_name, track_count FROM {} WHERE id = ?",
            kind.table()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| row.into_aggregate(kind)))
    }

    /// Look an aggregate up by display name (case and surrounding whitespace
    /// are ignored).
    pub async fn aggregate_by_name(
        &self,
        kind: AggregateKind,
        name: &str,
    ) -> Result<Option<GroupAggregate>> {
        let row = sqlx::query_as::<_, AggregateRow>(&format!(
            "SELECT id, name, normalized_name, track_count FROM {} WHERE normalized_name = ?",
            kind.table()
        ))
        .bind(normalize(name))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| row.into_aggregate(kind)))
    }

    /// Every aggregate of `kind`, ordered by name.
    pub async fn aggregates(&self, kind: AggregateKind) -> Result<Vec<GroupAggregate>> {
        let rows = sqlx::query_as::<_, AggregateRow>(&format!(
            "SELECT id, name, normalized_name, track_count FROM {} ORDER BY normalized_name, id",
            kind.table()
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.into_aggregate(kind)).collect())
    }

    /// Entries of a playlist in insertion-time order, including entries
    /// whose target has since been deleted.
    pub async fn playlist_entries(&self, playlist_id: i64) -> Result<Vec<PlaylistEntry>> {
        sqlx::query_as::<_, PlaylistEntryRow>(
            "SELECT id, playlist_id, media_id, video_id, added_at FROM playlist_entries \
             WHERE playlist_id = ? ORDER BY added_at, id",
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(PlaylistEntry::try_from)
        .collect()
    }

    pub async fn shadow_row_count(&self, table: SourceTable) -> Result<i64> {
        schema::shadow_row_count(&self.pool, table).await
    }

    pub async fn shadow_text(&self, table: SourceTable, id: i64) -> Result<Option<String>> {
        schema::shadow_text(&self.pool, table, id).await
    }

    /// Live source rows with searchable text; equals
    /// [`shadow_row_count`](Self::shadow_row_count) after every commit.
    pub async fn indexable_row_count(&self, table: SourceTable) -> Result<i64> {
        schema::indexable_row_count(&self.pool, table).await
    }

    fn check_schema(&self, query: &CompiledQuery) -> Result<()> {
        if query.schema_version != self.schema_version {
            return Err(LibraryError::SchemaMismatch {
                expected: self.schema_version,
                found: query.schema_version,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct AggregateRefs {
    album_id: Option<i64>,
    artist_id: Option<i64>,
    genre_id: Option<i64>,
}

fn validate(result: std::result::Result<(), String>, field: &str) -> Result<()> {
    result.map_err(|message| LibraryError::InvalidInput {
        field: field.to_string(),
        message,
    })
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim)
}

async fn resolve_aggregates(conn: &mut SqliteConnection, media: &NewMedia) -> Result<AggregateRefs> {
    Ok(AggregateRefs {
        album_id: find_or_create(conn, AggregateKind::Album, media.album.as_deref()).await?,
        artist_id: find_or_create(conn, AggregateKind::Artist, media.artist.as_deref()).await?,
        genre_id: find_or_create(conn, AggregateKind::Genre, media.genre.as_deref()).await?,
    })
}

/// Id of the aggregate named `name`, created with a zero count if missing.
async fn find_or_create(
    conn: &mut SqliteConnection,
    kind: AggregateKind,
    name: Option<&str>,
) -> Result<Option<i64>> {
    let Some(name) = name else {
        return Ok(None);
    };
    let normalized = normalize(name);

    let created = sqlx::query(&format!(
        "INSERT INTO {} (name, normalized_name, track_count) VALUES (?, ?, 0) \
         ON CONFLICT(normalized_name) DO NOTHING",
        kind.table()
    ))
    .bind(name.trim())
    .bind(&normalized)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        > 0;

    let id: i64 = sqlx::query_scalar(&format!(
        "SELECT id FROM {} WHERE normalized_name = ?",
        kind.table()
    ))
    .bind(&normalized)
    .fetch_one(&mut *conn)
    .await?;

    if created {
        debug!(aggregate = %kind, id, "Created aggregate");
        hooks::apply(conn, WriteEvent::new(SourceTable::from(kind), id, None)).await?;
    }

    Ok(Some(id))
}

async fn soft_delete_media(conn: &mut SqliteConnection, ids: &[i64]) -> Result<u64> {
    let now = Utc::now().timestamp();
    let mut deleted = 0;

    for id in ids {
        let before = match hooks::snapshot(conn, *id).await? {
            Some(membership) if !membership.deleted => membership,
            _ => continue,
        };

        sqlx::query("UPDATE media SET deleted = 1, modified_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        hooks::apply(conn, WriteEvent::new(SourceTable::Media, *id, Some(before))).await?;
        deleted += 1;
    }

    Ok(deleted)
}

async fn fetch_media(conn: &mut SqliteConnection, id: i64) -> Result<MediaRecord> {
    let record = sqlx::query_as::<_, MediaRecord>("SELECT * FROM media WHERE id = ?")
        .bind(id)
        .fetch_one(conn)
        .await?;
    Ok(record)
}

async fn fetch_video(conn: &mut SqliteConnection, id: i64) -> Result<VideoRecord> {
    let record = sqlx::query_as::<_, VideoRecord>("SELECT * FROM videos WHERE id = ?")
        .bind(id)
        .fetch_one(conn)
        .await?;
    Ok(record)
}
