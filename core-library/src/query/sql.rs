//! Fragment → SQL rendering.
//!
//! The only place column identifiers become SQL expressions. Every literal
//! travels as a bind parameter.

use crate::error::{LibraryError, Result};
use crate::paging::BaseSelector;
use crate::query::fragments::{
    Column, CompiledQuery, EntityKind, FilterFragment, FilterOp, SortDirection, SortFragment,
};
use sqlx::query::{QueryAs, QueryScalar};
use sqlx::sqlite::{Sqlite, SqliteArguments};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BindValue {
    Text(String),
    I64(i64),
}

/// Rendered page query: select, matching count, and their shared binds.
#[derive(Debug, Clone)]
pub(crate) struct QuerySpec {
    pub select_sql: String,
    pub count_sql: String,
    pub binds: Vec<BindValue>,
}

impl QuerySpec {
    /// Select SQL with the LIMIT/OFFSET placeholders appended.
    pub(crate) fn paginated_sql(&self) -> String {
        format!("{} LIMIT ? OFFSET ?", self.select_sql)
    }
}

const MEDIA_FROM: &str = "FROM media m \
    LEFT JOIN albums al ON al.id = m.album_id \
    LEFT JOIN artists ar ON ar.id = m.artist_id \
    LEFT JOIN genres g ON g.id = m.genre_id";

const VIDEO_FROM: &str = "FROM videos v";

const ENTRY_FROM: &str = "FROM playlist_entries pe \
    LEFT JOIN media m ON m.id = pe.media_id AND m.deleted = 0 \
    LEFT JOIN videos v ON v.id = pe.video_id AND v.deleted = 0";

fn select_list(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Media => "SELECT m.*",
        EntityKind::Video => "SELECT v.*",
        EntityKind::PlaylistEntry => {
            "SELECT pe.id, pe.playlist_id, pe.media_id, pe.video_id, pe.added_at"
        }
    }
}

fn from_clause(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Media => MEDIA_FROM,
        EntityKind::Video => VIDEO_FROM,
        EntityKind::PlaylistEntry => ENTRY_FROM,
    }
}

fn live_condition(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Media => "m.deleted = 0",
        EntityKind::Video => "v.deleted = 0",
        // Entries whose target has been deleted drop out with it
        EntityKind::PlaylistEntry => "(m.id IS NOT NULL OR v.id IS NOT NULL)",
    }
}

/// SQL expression for `column` in the universe of `kind`.
pub(crate) fn column_expr(kind: EntityKind, column: Column) -> Result<&'static str> {
    let expr = match (kind, column) {
        (EntityKind::Media, Column::Id) => "m.id",
        (EntityKind::Media, Column::Title) => "m.normalized_title",
        (EntityKind::Media, Column::AlbumId) => "m.album_id",
        (EntityKind::Media, Column::AlbumName) => "al.normalized_name",
        (EntityKind::Media, Column::ArtistId) => "m.artist_id",
        (EntityKind::Media, Column::ArtistName) => "ar.normalized_name",
        (EntityKind::Media, Column::GenreId) => "m.genre_id",
        (EntityKind::Media, Column::GenreName) => "g.normalized_name",
        (EntityKind::Media, Column::TrackNumber) => "m.track_number",
        (EntityKind::Media, Column::DiscNumber) => "m.disc_number",
        (EntityKind::Media, Column::Year) => "m.year",
        (EntityKind::Media, Column::DateAdded) => "m.date_added",
        (EntityKind::Media, Column::Modified) => "m.modified_at",
        (EntityKind::Video, Column::Id) => "v.id",
        (EntityKind::Video, Column::Title) => "v.normalized_title",
        (EntityKind::Video, Column::DateAdded) => "v.date_added",
        (EntityKind::Video, Column::Modified) => "v.modified_at",
        (EntityKind::PlaylistEntry, Column::Id) => "pe.id",
        (EntityKind::PlaylistEntry, Column::Title) => {
            "COALESCE(m.normalized_title, v.normalized_title)"
        }
        (EntityKind::PlaylistEntry, Column::AddedToPlaylist) => "pe.added_at",
        _ => {
            return Err(LibraryError::Configuration(format!(
                "column {:?} is not available for {:?} records",
                column, kind
            )))
        }
    };
    Ok(expr)
}

/// Escape GLOB metacharacters so `prefix` only matches itself.
pub(crate) fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        match ch {
            '*' | '?' | '[' => {
                escaped.push('[');
                escaped.push(ch);
                escaped.push(']');
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// FTS5 match expression requiring every whitespace-separated token as a
/// prefix. `None` when the text holds no tokens.
pub(crate) fn fts_match_expression(text: &str) -> Option<String> {
    let tokens: Vec<String> = text
        .split_whitespace()
        .map(|token| token.replace('"', ""))
        .filter(|token| !token.is_empty())
        .map(|token| format!("\"{}\"*", token))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

fn push_filter(
    kind: EntityKind,
    filter: &FilterFragment,
    conditions: &mut Vec<String>,
    binds: &mut Vec<BindValue>,
) -> Result<()> {
    let expr = column_expr(kind, filter.column)?;
    match &filter.op {
        FilterOp::Equals(value) => {
            conditions.push(format!("{} = ?", expr));
            binds.push(BindValue::I64(*value));
        }
        FilterOp::PrefixGlob(prefix) => {
            conditions.push(format!("{} GLOB ?", expr));
            binds.push(BindValue::Text(format!("{}*", escape_glob(prefix))));
        }
        FilterOp::Range { from, to } => {
            conditions.push(format!("{} BETWEEN ? AND ?", expr));
            binds.push(BindValue::I64(*from));
            binds.push(BindValue::I64(*to));
        }
    }
    Ok(())
}

fn order_by(kind: EntityKind, sorts: &[SortFragment]) -> Result<String> {
    let mut terms = Vec::with_capacity(sorts.len());
    for sort in sorts {
        let direction = match sort.direction {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        };
        terms.push(format!(
            "{} {} NULLS LAST",
            column_expr(kind, sort.column)?,
            direction
        ));
    }
    Ok(terms.join(", "))
}

fn base_condition(base: &BaseSelector) -> Option<(String, BindValue)> {
    match base {
        BaseSelector::AllMedia | BaseSelector::AllVideos => None,
        BaseSelector::Album(id) => Some(("m.album_id = ?".into(), BindValue::I64(*id))),
        BaseSelector::Artist(id) => Some(("m.artist_id = ?".into(), BindValue::I64(*id))),
        BaseSelector::Genre(id) => Some(("m.genre_id = ?".into(), BindValue::I64(*id))),
        BaseSelector::Playlist(id) => Some(("pe.playlist_id = ?".into(), BindValue::I64(*id))),
        BaseSelector::MediaSearch(text) => fts_match_expression(text).map(|expr| {
            (
                "m.id IN (SELECT rowid FROM media_fts WHERE media_fts MATCH ?)".into(),
                BindValue::Text(expr),
            )
        }),
        BaseSelector::VideoSearch(text) => fts_match_expression(text).map(|expr| {
            (
                "v.id IN (SELECT rowid FROM videos_fts WHERE videos_fts MATCH ?)".into(),
                BindValue::Text(expr),
            )
        }),
    }
}

/// Render the page query for `base` narrowed by `query`.
///
/// Returns `None` when the universe is empty without asking the store, i.e.
/// a search whose text holds no tokens.
pub(crate) fn build_query_spec(
    base: &BaseSelector,
    query: &CompiledQuery,
) -> Result<Option<QuerySpec>> {
    let kind = query.entity_kind;
    let mut conditions = vec![live_condition(kind).to_string()];
    let mut binds = Vec::new();

    if base.is_search() {
        match base_condition(base) {
            Some((condition, bind)) => {
                conditions.push(condition);
                binds.push(bind);
            }
            None => return Ok(None),
        }
    } else if let Some((condition, bind)) = base_condition(base) {
        conditions.push(condition);
        binds.push(bind);
    }

    for filter in &query.filters {
        push_filter(kind, filter, &mut conditions, &mut binds)?;
    }

    let where_clause = conditions.join(" AND ");
    let from = from_clause(kind);
    let select_sql = format!(
        "{} {} WHERE {} ORDER BY {}",
        select_list(kind),
        from,
        where_clause,
        order_by(kind, &query.sorts)?
    );
    let count_sql = format!("SELECT COUNT(*) {} WHERE {}", from, where_clause);

    Ok(Some(QuerySpec {
        select_sql,
        count_sql,
        binds,
    }))
}

/// Ids of live media rows matching the filters of a media query.
pub(crate) fn build_media_id_query(query: &CompiledQuery) -> Result<(String, Vec<BindValue>)> {
    if query.entity_kind != EntityKind::Media {
        return Err(LibraryError::Configuration(format!(
            "expected a media query, got {:?}",
            query.entity_kind
        )));
    }

    let mut conditions = vec![live_condition(EntityKind::Media).to_string()];
    let mut binds = Vec::new();
    for filter in &query.filters {
        push_filter(EntityKind::Media, filter, &mut conditions, &mut binds)?;
    }

    let sql = format!(
        "SELECT m.id {} WHERE {} ORDER BY m.id",
        MEDIA_FROM,
        conditions.join(" AND ")
    );
    Ok((sql, binds))
}

pub(crate) fn bind_query_as<'q, O>(
    mut query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    binds: &[BindValue],
) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
    for bind in binds {
        query = match bind {
            BindValue::Text(value) => query.bind(value.clone()),
            BindValue::I64(value) => query.bind(*value),
        };
    }
    query
}

pub(crate) fn bind_query_scalar<'q, O>(
    mut query: QueryScalar<'q, Sqlite, O, SqliteArguments<'q>>,
    binds: &[BindValue],
) -> QueryScalar<'q, Sqlite, O, SqliteArguments<'q>> {
    for bind in binds {
        query = match bind {
            BindValue::Text(value) => query.bind(value.clone()),
            BindValue::I64(value) => query.bind(*value),
        };
    }
    query
}
