//! Transactional write hooks.
//!
//! Every write to a source table reports a [`WriteEvent`] to [`apply`] on the
//! writer's own connection, before commit. The per-table hook registry keeps
//! shadow indexes and aggregate counts in lockstep with the source rows, so
//! a write and its side effects commit or roll back together.
//!
//! Nothing outside this module writes to a shadow table.

use crate::error::Result;
use crate::models::AggregateKind;
use crate::schema::SourceTable;
use sqlx::{FromRow, SqliteConnection};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Shadow full-text table mirroring one text column of a source table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ShadowIndex {
    pub source: &'static str,
    pub shadow: &'static str,
    pub text_column: &'static str,
    /// Rows failing this predicate have no shadow row
    pub live_filter: &'static str,
}

pub(crate) const MEDIA_SHADOW: ShadowIndex = ShadowIndex {
    source: "media",
    shadow: "media_fts",
    text_column: "title",
    live_filter: "deleted = 0",
};

pub(crate) const VIDEOS_SHADOW: ShadowIndex = ShadowIndex {
    source: "videos",
    shadow: "videos_fts",
    text_column: "title",
    live_filter: "deleted = 0",
};

pub(crate) const ALBUMS_SHADOW: ShadowIndex = ShadowIndex {
    source: "albums",
    shadow: "albums_fts",
    text_column: "name",
    live_filter: "1 = 1",
};

pub(crate) const ARTISTS_SHADOW: ShadowIndex = ShadowIndex {
    source: "artists",
    shadow: "artists_fts",
    text_column: "name",
    live_filter: "1 = 1",
};

pub(crate) const GENRES_SHADOW: ShadowIndex = ShadowIndex {
    source: "genres",
    shadow: "genres_fts",
    text_column: "name",
    live_filter: "1 = 1",
};

/// Side effect attached to a source table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteHook {
    ShadowSync(ShadowIndex),
    /// Move album/artist/genre `track_count` by the member's change in
    /// liveness or membership, pruning aggregates that reach zero
    AggregateCount,
}

const MEDIA_HOOKS: &[WriteHook] = &[
    WriteHook::ShadowSync(MEDIA_SHADOW),
    WriteHook::AggregateCount,
];
const VIDEO_HOOKS: &[WriteHook] = &[WriteHook::ShadowSync(VIDEOS_SHADOW)];
const ALBUM_HOOKS: &[WriteHook] = &[WriteHook::ShadowSync(ALBUMS_SHADOW)];
const ARTIST_HOOKS: &[WriteHook] = &[WriteHook::ShadowSync(ARTISTS_SHADOW)];
const GENRE_HOOKS: &[WriteHook] = &[WriteHook::ShadowSync(GENRES_SHADOW)];

pub(crate) fn hooks_for(table: SourceTable) -> &'static [WriteHook] {
    match table {
        SourceTable::Media => MEDIA_HOOKS,
        SourceTable::Videos => VIDEO_HOOKS,
        SourceTable::Albums => ALBUM_HOOKS,
        SourceTable::Artists => ARTIST_HOOKS,
        SourceTable::Genres => GENRE_HOOKS,
    }
}

pub(crate) fn shadow_for(table: SourceTable) -> &'static ShadowIndex {
    match table {
        SourceTable::Media => &MEDIA_SHADOW,
        SourceTable::Videos => &VIDEOS_SHADOW,
        SourceTable::Albums => &ALBUMS_SHADOW,
        SourceTable::Artists => &ARTISTS_SHADOW,
        SourceTable::Genres => &GENRES_SHADOW,
    }
}

/// What a media row contributes to aggregate counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub(crate) struct Membership {
    pub deleted: bool,
    pub album_id: Option<i64>,
    pub artist_id: Option<i64>,
    pub genre_id: Option<i64>,
}

impl Membership {
    fn references(&self) -> impl Iterator<Item = (AggregateKind, i64)> {
        [
            (AggregateKind::Album, self.album_id),
            (AggregateKind::Artist, self.artist_id),
            (AggregateKind::Genre, self.genre_id),
        ]
        .into_iter()
        .filter_map(|(kind, id)| id.map(|id| (kind, id)))
    }
}

/// A committed-to-be row change on a source table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WriteEvent {
    pub table: SourceTable,
    pub id: i64,
    /// Membership before the write; only tracked for media rows
    pub before: Option<Membership>,
}

impl WriteEvent {
    pub(crate) fn new(table: SourceTable, id: i64, before: Option<Membership>) -> Self {
        Self { table, id, before }
    }
}

/// Current membership of a media row, `None` when the row does not exist.
///
/// Writers call this before touching a media row and pass the result into
/// the row's [`WriteEvent`].
pub(crate) async fn snapshot(conn: &mut SqliteConnection, id: i64) -> Result<Option<Membership>> {
    let membership = sqlx::query_as::<_, Membership>(
        "SELECT deleted, album_id, artist_id, genre_id FROM media WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(membership)
}

/// Run every hook registered for the event's table, then for any rows the
/// hooks themselves removed.
pub(crate) async fn apply(conn: &mut SqliteConnection, event: WriteEvent) -> Result<()> {
    let mut queue = VecDeque::from([event]);

    while let Some(event) = queue.pop_front() {
        for hook in hooks_for(event.table) {
            match hook {
                WriteHook::ShadowSync(index) => sync_shadow(conn, index, event.id).await?,
                WriteHook::AggregateCount => {
                    let after = snapshot(conn, event.id).await?;
                    let pruned = adjust_counts(conn, event.before, after).await?;
                    queue.extend(pruned);
                }
            }
        }
    }

    Ok(())
}

/// Make the shadow row for `id` match the source row, or remove it.
async fn sync_shadow(conn: &mut SqliteConnection, index: &ShadowIndex, id: i64) -> Result<()> {
    sqlx::query(&format!("DELETE FROM {} WHERE rowid = ?", index.shadow))
        .bind(id)
        .execute(&mut *conn)
        .await?;

    let inserted = sqlx::query(&format!(
        "INSERT INTO {shadow}(rowid, searchable) \
         SELECT id, {column} FROM {source} \
         WHERE id = ? AND {live} AND {column} IS NOT NULL",
        shadow = index.shadow,
        column = index.text_column,
        source = index.source,
        live = index.live_filter,
    ))
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    debug!(shadow = index.shadow, id, indexed = inserted > 0, "Synced shadow row");
    Ok(())
}

/// Net count change per aggregate between two memberships.
fn count_deltas(
    before: Option<Membership>,
    after: Option<Membership>,
) -> BTreeMap<(AggregateKind, i64), i64> {
    let mut deltas: BTreeMap<(AggregateKind, i64), i64> = BTreeMap::new();

    for (state, step) in [(before, -1), (after, 1)] {
        if let Some(membership) = state.filter(|m| !m.deleted) {
            for reference in membership.references() {
                *deltas.entry(reference).or_default() += step;
            }
        }
    }

    deltas.retain(|_, delta| *delta != 0);
    deltas
}

async fn adjust_counts(
    conn: &mut SqliteConnection,
    before: Option<Membership>,
    after: Option<Membership>,
) -> Result<Vec<WriteEvent>> {
    let mut pruned = Vec::new();

    for ((kind, id), delta) in count_deltas(before, after) {
        let table = kind.table();
        sqlx::query(&format!(
            "UPDATE {} SET track_count = track_count + ? WHERE id = ?",
            table
        ))
        .bind(delta)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        let removed = sqlx::query(&format!(
            "DELETE FROM {} WHERE id = ? AND track_count <= 0",
            table
        ))
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        debug!(aggregate = %kind, id, delta, pruned = removed > 0, "Adjusted track count");

        if removed > 0 {
            pruned.push(WriteEvent::new(SourceTable::from(kind), id, None));
        }
    }

    Ok(pruned)
}
