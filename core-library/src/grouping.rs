//! # Grouped Traversal Engine
//!
//! Folds the loaded prefix of a paged sequence into a two-level
//! primary → secondary → items structure, and maps any position in that
//! structure back to the item's absolute index in the paged sequence.
//!
//! The fold is pure: no I/O, no suspension. The store's sort order already
//! keeps items with equal group keys contiguous, so a new group starts
//! exactly where the key changes. Every call refolds the whole prefix.

use crate::error::{LibraryError, Result};
use crate::models::{LibraryItem, MediaRecord, PlaylistContent};
use crate::query::fragments::sort_columns;
use crate::query::{EntityKind, SortKey, SortOption};
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Comparison key of one group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupValue {
    /// The item has no value for the grouping attribute
    None,
    /// Album, artist or genre id
    Aggregate(i64),
    /// Uppercased first letter of the title, `#` for anything else. Runs of
    /// `#` before and after the letters are separate groups.
    Initial(String),
    Number(i64),
    /// UTC calendar day of a timestamp
    Day(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryGroup {
    pub key: GroupValue,
    pub label: String,
    /// Absolute index of `items[0]`
    pub start: usize,
    pub items: Vec<LibraryItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryGroup {
    pub key: GroupValue,
    pub label: String,
    /// Absolute index of the first item in the group
    pub start: usize,
    pub groups: Vec<SecondaryGroup>,
}

impl PrimaryGroup {
    pub fn item_count(&self) -> usize {
        self.groups.iter().map(|group| group.items.len()).sum()
    }
}

/// Group `prefix`, a loaded run of `kind` records, by `primary`, then by
/// `secondary` within each primary group.
///
/// Sort directions are ignored; only the keys matter. Title initials follow
/// the store's order of `normalized_title`, so non-letters that sort after
/// the alphabet (`~`, `★`) open a second `#` group at the end, and accented
/// initials such as `É` follow `Z`.
///
/// # Errors
///
/// `LibraryError::Configuration` when either option does not exist for
/// `kind` (e.g. grouping videos by album), checked before any item is looked
/// at, or when the prefix holds a record of another kind.
pub fn fold(
    prefix: &[LibraryItem],
    kind: EntityKind,
    primary: SortOption,
    secondary: SortOption,
) -> Result<Vec<PrimaryGroup>> {
    for option in [primary, secondary] {
        sort_columns(option.key, kind).inspect_err(|e| {
            error!(error = %e, ?kind, key = ?option.key, "Rejected grouping option")
        })?;
    }

    let mut groups: Vec<PrimaryGroup> = Vec::new();

    for (index, item) in prefix.iter().enumerate() {
        let found = entity_kind(item);
        if found != kind {
            error!(expected = ?kind, ?found, index, "Prefix mixes record kinds");
            return Err(LibraryError::Configuration(format!(
                "cannot group {:?} record at {} in a {:?} prefix",
                found, index, kind
            )));
        }

        let (primary_key, primary_label) = group_value(item, primary.key);
        let (secondary_key, secondary_label) = group_value(item, secondary.key);

        let starts_primary = groups.last().map_or(true, |last| last.key != primary_key);
        if starts_primary {
            groups.push(PrimaryGroup {
                key: primary_key,
                label: primary_label,
                start: index,
                groups: Vec::new(),
            });
        }

        // Just pushed above when empty
        let Some(current) = groups.last_mut() else {
            continue;
        };
        let starts_secondary = current
            .groups
            .last()
            .map_or(true, |last| last.key != secondary_key);
        if starts_secondary {
            current.groups.push(SecondaryGroup {
                key: secondary_key,
                label: secondary_label,
                start: index,
                items: Vec::new(),
            });
        }
        if let Some(group) = current.groups.last_mut() {
            group.items.push(item.clone());
        }
    }

    Ok(groups)
}

/// Absolute index of item `item` in secondary group `secondary` of primary
/// group `primary`.
///
/// Out-of-range indexes clamp to the last valid group or item; an empty
/// group list maps to 0.
pub fn flatten_index(
    groups: &[PrimaryGroup],
    primary: usize,
    secondary: usize,
    item: usize,
) -> usize {
    let Some(primary_group) = groups.get(primary.min(groups.len().saturating_sub(1))) else {
        return 0;
    };

    let subgroups = &primary_group.groups;
    let Some(secondary_group) = subgroups.get(secondary.min(subgroups.len().saturating_sub(1)))
    else {
        return primary_group.start;
    };

    let last_item = secondary_group.items.len().saturating_sub(1);
    secondary_group.start + item.min(last_item)
}

fn entity_kind(item: &LibraryItem) -> EntityKind {
    match item {
        LibraryItem::Media(_) => EntityKind::Media,
        LibraryItem::Video(_) => EntityKind::Video,
        LibraryItem::PlaylistEntry(_) => EntityKind::PlaylistEntry,
    }
}

fn initial(title: &str) -> String {
    match title.trim().chars().next() {
        Some(ch) if ch.is_alphabetic() => ch.to_uppercase().collect(),
        _ => "#".to_string(),
    }
}

fn day(timestamp: i64) -> (GroupValue, String) {
    match DateTime::from_timestamp(timestamp, 0) {
        Some(moment) => {
            let date = moment.date_naive();
            (GroupValue::Day(date), date.format("%Y-%m-%d").to_string())
        }
        None => (GroupValue::None, "Unknown date".to_string()),
    }
}

fn number(value: Option<i32>, unknown: &str) -> (GroupValue, String) {
    match value {
        Some(value) => (GroupValue::Number(i64::from(value)), value.to_string()),
        None => (GroupValue::None, unknown.to_string()),
    }
}

fn aggregate(id: Option<i64>, name: &Option<String>, unknown: &str) -> (GroupValue, String) {
    match id {
        Some(id) => (
            GroupValue::Aggregate(id),
            name.clone().unwrap_or_else(|| unknown.to_string()),
        ),
        None => (GroupValue::None, unknown.to_string()),
    }
}

fn media_value(media: &MediaRecord, key: SortKey) -> (GroupValue, String) {
    match key {
        SortKey::Title => {
            let letter = initial(&media.title);
            (GroupValue::Initial(letter.clone()), letter)
        }
        SortKey::Album => aggregate(media.album_id, &media.album_name, "Unknown Album"),
        SortKey::Artist => aggregate(media.artist_id, &media.artist_name, "Unknown Artist"),
        SortKey::Genre => aggregate(media.genre_id, &media.genre_name, "Unknown Genre"),
        SortKey::TrackNumber => number(media.track_number, "No Track"),
        SortKey::DiscNumber => number(media.disc_number, "No Disc"),
        SortKey::Year => number(media.year, "Unknown Year"),
        SortKey::DateAdded => day(media.date_added),
        SortKey::Modified => day(media.modified_at),
    }
}

/// Key and display label of `item` under `key`. Callers have checked that
/// `key` exists for the item's kind.
fn group_value(item: &LibraryItem, key: SortKey) -> (GroupValue, String) {
    match item {
        LibraryItem::Media(media) => media_value(media, key),
        LibraryItem::Video(video) => match key {
            SortKey::DateAdded => day(video.date_added),
            SortKey::Modified => day(video.modified_at),
            _ => {
                let letter = initial(&video.title);
                (GroupValue::Initial(letter.clone()), letter)
            }
        },
        LibraryItem::PlaylistEntry(entry) => match key {
            SortKey::DateAdded => day(entry.entry.added_at),
            _ => {
                let title = match &entry.content {
                    PlaylistContent::Media(media) => &media.title,
                    PlaylistContent::Video(video) => &video.title,
                };
                let letter = initial(title);
                (GroupValue::Initial(letter.clone()), letter)
            }
        },
    }
}
