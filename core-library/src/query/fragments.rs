//! Predicate and sort fragment builder.
//!
//! Translates the UI's abstract group-by keys and sort options into typed
//! [`FilterFragment`] / [`SortFragment`] lists. Pure: no store access, no
//! query syntax. The same input always yields the same fragment list, so the
//! output is safe to cache.

use crate::error::{LibraryError, Result};
use crate::schema::CURRENT_VERSION;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Universe a fragment list is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Media,
    Video,
    PlaylistEntry,
}

/// Sortable / filterable attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    Id,
    Title,
    AlbumId,
    AlbumName,
    ArtistId,
    ArtistName,
    GenreId,
    GenreName,
    TrackNumber,
    DiscNumber,
    Year,
    DateAdded,
    Modified,
    AddedToPlaylist,
}

impl EntityKind {
    /// Whether `column` exists for this entity kind.
    pub fn supports(self, column: Column) -> bool {
        match self {
            EntityKind::Media => column != Column::AddedToPlaylist,
            EntityKind::Video => matches!(
                column,
                Column::Id | Column::Title | Column::DateAdded | Column::Modified
            ),
            EntityKind::PlaylistEntry => matches!(
                column,
                Column::Id | Column::Title | Column::AddedToPlaylist
            ),
        }
    }

    /// Column holding the "date added" notion for this kind
    fn added_column(self) -> Column {
        match self {
            EntityKind::PlaylistEntry => Column::AddedToPlaylist,
            _ => Column::DateAdded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortFragment {
    pub column: Column,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    Equals(i64),
    /// Lowercase prefix matched against the normalized column
    PrefixGlob(String),
    /// Inclusive on both ends
    Range { from: i64, to: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterFragment {
    pub column: Column,
    pub op: FilterOp,
}

/// Abstract group-by selection coming from the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupKey {
    Album(i64),
    Artist(i64),
    Genre(i64),
    TitleInitial(char),
    Year(i32),
    YearRange { from: i32, to: i32 },
    /// Unix seconds, inclusive
    AddedBetween { from: i64, to: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortKey {
    Title,
    Album,
    Artist,
    Genre,
    TrackNumber,
    DiscNumber,
    Year,
    DateAdded,
    Modified,
}

/// Abstract sort selection coming from the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortOption {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl SortOption {
    pub fn asc(key: SortKey) -> Self {
        Self {
            key,
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(key: SortKey) -> Self {
        Self {
            key,
            direction: SortDirection::Descending,
        }
    }
}

/// Fragments ready for the paging provider, stamped with the schema version
/// they were compiled against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub entity_kind: EntityKind,
    pub schema_version: u32,
    pub filters: Vec<FilterFragment>,
    pub sorts: Vec<SortFragment>,
}

/// Compile abstract selections into fragment lists for `kind`.
///
/// The returned sort list always ends with the primary key ascending, so
/// repeated page requests never reorder rows that compare equal.
///
/// # Errors
///
/// `LibraryError::Configuration` when a key or option does not exist for
/// `kind`, or a range is inverted.
pub fn compile_fragments(
    group_keys: &[GroupKey],
    sort_options: &[SortOption],
    kind: EntityKind,
) -> Result<CompiledQuery> {
    let filters = group_keys
        .iter()
        .map(|key| filter_for(*key, kind))
        .collect::<Result<Vec<_>>>()
        .inspect_err(|e| error!(error = %e, ?kind, "Rejected group key"))?;

    let sorts = compile_sorts(sort_options, kind)
        .inspect_err(|e| error!(error = %e, ?kind, "Rejected sort option"))?;

    Ok(CompiledQuery {
        entity_kind: kind,
        schema_version: CURRENT_VERSION,
        filters,
        sorts,
    })
}

/// Columns a sort key expands to, in comparison order.
pub(crate) fn sort_columns(key: SortKey, kind: EntityKind) -> Result<Vec<Column>> {
    let columns = match key {
        SortKey::Title => vec![Column::Title],
        SortKey::Album => vec![Column::AlbumName, Column::AlbumId],
        SortKey::Artist => vec![Column::ArtistName, Column::ArtistId],
        SortKey::Genre => vec![Column::GenreName, Column::GenreId],
        SortKey::TrackNumber => vec![Column::TrackNumber],
        SortKey::DiscNumber => vec![Column::DiscNumber],
        SortKey::Year => vec![Column::Year],
        SortKey::DateAdded => vec![kind.added_column()],
        SortKey::Modified => vec![Column::Modified],
    };

    match columns.iter().find(|column| !kind.supports(**column)) {
        Some(column) => Err(LibraryError::Configuration(format!(
            "sort {:?} needs column {:?}, which {:?} records do not have",
            key, column, kind
        ))),
        None => Ok(columns),
    }
}

fn compile_sorts(options: &[SortOption], kind: EntityKind) -> Result<Vec<SortFragment>> {
    let defaults;
    let options = if options.is_empty() {
        defaults = [default_sort(kind)];
        &defaults[..]
    } else {
        options
    };

    let mut sorts: Vec<SortFragment> = Vec::new();
    for option in options {
        for column in sort_columns(option.key, kind)? {
            // A repeated column can no longer change the order
            if sorts.iter().any(|existing| existing.column == column) {
                continue;
            }
            sorts.push(SortFragment {
                column,
                direction: option.direction,
            });
        }
    }

    if !sorts.iter().any(|fragment| fragment.column == Column::Id) {
        sorts.push(SortFragment {
            column: Column::Id,
            direction: SortDirection::Ascending,
        });
    }

    Ok(sorts)
}

fn default_sort(kind: EntityKind) -> SortOption {
    match kind {
        EntityKind::PlaylistEntry => SortOption::asc(SortKey::DateAdded),
        EntityKind::Media | EntityKind::Video => SortOption::asc(SortKey::Title),
    }
}

fn filter_for(key: GroupKey, kind: EntityKind) -> Result<FilterFragment> {
    let fragment = match key {
        GroupKey::Album(id) => FilterFragment {
            column: Column::AlbumId,
            op: FilterOp::Equals(id),
        },
        GroupKey::Artist(id) => FilterFragment {
            column: Column::ArtistId,
            op: FilterOp::Equals(id),
        },
        GroupKey::Genre(id) => FilterFragment {
            column: Column::GenreId,
            op: FilterOp::Equals(id),
        },
        GroupKey::TitleInitial(initial) => {
            if initial.is_whitespace() || initial.is_control() {
                return Err(LibraryError::Configuration(format!(
                    "title initial {:?} is not a printable character",
                    initial
                )));
            }
            FilterFragment {
                column: Column::Title,
                op: FilterOp::PrefixGlob(initial.to_lowercase().collect()),
            }
        }
        GroupKey::Year(year) => FilterFragment {
            column: Column::Year,
            op: FilterOp::Equals(i64::from(year)),
        },
        GroupKey::YearRange { from, to } => FilterFragment {
            column: Column::Year,
            op: range(i64::from(from), i64::from(to))?,
        },
        GroupKey::AddedBetween { from, to } => FilterFragment {
            column: kind.added_column(),
            op: range(from, to)?,
        },
    };

    if !kind.supports(fragment.column) {
        return Err(LibraryError::Configuration(format!(
            "group key {:?} is not available for {:?} records",
            key, kind
        )));
    }

    Ok(fragment)
}

fn range(from: i64, to: i64) -> Result<FilterOp> {
    if from > to {
        return Err(LibraryError::Configuration(format!(
            "range start {} is after range end {}",
            from, to
        )));
    }
    Ok(FilterOp::Range { from, to })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sort_columns_of(query: &CompiledQuery) -> Vec<(Column, SortDirection)> {
        query
            .sorts
            .iter()
            .map(|fragment| (fragment.column, fragment.direction))
            .collect()
    }

    #[test]
    fn test_compile_is_deterministic_byte_for_byte() {
        let keys = [GroupKey::Album(4), GroupKey::TitleInitial('B')];
        let sorts = [
            SortOption::asc(SortKey::Album),
            SortOption::desc(SortKey::TrackNumber),
        ];

        let first = compile_fragments(&keys, &sorts, EntityKind::Media).unwrap();
        let second = compile_fragments(&keys, &sorts, EntityKind::Media).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn test_album_sort_expands_to_name_then_id_and_ends_with_primary_key() {
        let query = compile_fragments(
            &[],
            &[
                SortOption::asc(SortKey::Album),
                SortOption::asc(SortKey::TrackNumber),
            ],
            EntityKind::Media,
        )
        .unwrap();

        assert_eq!(
            sort_columns_of(&query),
            vec![
                (Column::AlbumName, SortDirection::Ascending),
                (Column::AlbumId, SortDirection::Ascending),
                (Column::TrackNumber, SortDirection::Ascending),
                (Column::Id, SortDirection::Ascending),
            ]
        );
        assert_eq!(query.schema_version, CURRENT_VERSION);
    }

    #[test]
    fn test_repeated_sort_columns_are_dropped() {
        let query = compile_fragments(
            &[],
            &[
                SortOption::desc(SortKey::Year),
                SortOption::asc(SortKey::Year),
            ],
            EntityKind::Media,
        )
        .unwrap();

        assert_eq!(
            sort_columns_of(&query),
            vec![
                (Column::Year, SortDirection::Descending),
                (Column::Id, SortDirection::Ascending),
            ]
        );
    }

    #[test]
    fn test_empty_sort_uses_kind_default() {
        let media = compile_fragments(&[], &[], EntityKind::Media).unwrap();
        assert_eq!(media.sorts[0].column, Column::Title);

        let entries = compile_fragments(&[], &[], EntityKind::PlaylistEntry).unwrap();
        assert_eq!(
            sort_columns_of(&entries),
            vec![
                (Column::AddedToPlaylist, SortDirection::Ascending),
                (Column::Id, SortDirection::Ascending),
            ]
        );
    }

    #[test]
    fn test_group_keys_map_to_typed_filters() {
        let query = compile_fragments(
            &[
                GroupKey::TitleInitial('Ä'),
                GroupKey::YearRange {
                    from: 1990,
                    to: 1999,
                },
                GroupKey::Genre(2),
            ],
            &[],
            EntityKind::Media,
        )
        .unwrap();

        assert_eq!(
            query.filters,
            vec![
                FilterFragment {
                    column: Column::Title,
                    op: FilterOp::PrefixGlob("ä".to_string()),
                },
                FilterFragment {
                    column: Column::Year,
                    op: FilterOp::Range {
                        from: 1990,
                        to: 1999
                    },
                },
                FilterFragment {
                    column: Column::GenreId,
                    op: FilterOp::Equals(2),
                },
            ]
        );
    }

    #[test]
    fn test_added_between_targets_playlist_added_at_for_entries() {
        let query = compile_fragments(
            &[GroupKey::AddedBetween { from: 10, to: 20 }],
            &[],
            EntityKind::PlaylistEntry,
        )
        .unwrap();
        assert_eq!(query.filters[0].column, Column::AddedToPlaylist);
    }

    #[test]
    fn test_video_cannot_be_filtered_or_sorted_by_album() {
        let err = compile_fragments(&[GroupKey::Album(1)], &[], EntityKind::Video).unwrap_err();
        assert!(matches!(err, LibraryError::Configuration(_)));

        let err = compile_fragments(&[], &[SortOption::asc(SortKey::Album)], EntityKind::Video)
            .unwrap_err();
        assert!(matches!(err, LibraryError::Configuration(_)));
    }

    #[test]
    fn test_inverted_ranges_are_rejected() {
        let err = compile_fragments(
            &[GroupKey::YearRange {
                from: 2001,
                to: 2000,
            }],
            &[],
            EntityKind::Media,
        )
        .unwrap_err();
        assert!(matches!(err, LibraryError::Configuration(_)));
    }

    #[test]
    fn test_blank_title_initial_is_rejected() {
        let err =
            compile_fragments(&[GroupKey::TitleInitial(' ')], &[], EntityKind::Media).unwrap_err();
        assert!(matches!(err, LibraryError::Configuration(_)));
    }
}
