//! Domain models for the media library
//!
//! Row types map one-to-one onto the store's tables. Write payloads
//! (`NewMedia`, `NewVideo`) carry only caller-supplied fields; ids, aggregate
//! references and normalized keys are filled in by the store.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

// =============================================================================
// Rows
// =============================================================================

/// Audio record with denormalized aggregate names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MediaRecord {
    pub id: i64,
    pub title: String,
    /// Sort and grouping key for the title
    pub normalized_title: String,
    pub album_id: Option<i64>,
    pub album_name: Option<String>,
    pub artist_id: Option<i64>,
    pub artist_name: Option<String>,
    pub genre_id: Option<i64>,
    pub genre_name: Option<String>,
    pub track_number: Option<i32>,
    pub disc_number: Option<i32>,
    pub year: Option<i32>,
    /// Unix seconds
    pub date_added: i64,
    /// Unix seconds
    pub modified_at: i64,
    /// Soft-deleted rows are excluded from every default query
    pub deleted: bool,
}

/// Video record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct VideoRecord {
    pub id: i64,
    pub title: String,
    pub normalized_title: String,
    pub duration_ms: Option<i64>,
    pub date_added: i64,
    pub modified_at: i64,
    pub deleted: bool,
}

/// Kind of derived summary row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AggregateKind {
    Album,
    Artist,
    Genre,
}

impl AggregateKind {
    pub const ALL: [AggregateKind; 3] = [
        AggregateKind::Album,
        AggregateKind::Artist,
        AggregateKind::Genre,
    ];

    pub(crate) fn table(self) -> &'static str {
        match self {
            AggregateKind::Album => "albums",
            AggregateKind::Artist => "artists",
            AggregateKind::Genre => "genres",
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateKind::Album => write!(f, "Album"),
            AggregateKind::Artist => write!(f, "Artist"),
            AggregateKind::Genre => write!(f, "Genre"),
        }
    }
}

/// Album, artist or genre with its maintained member count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAggregate {
    pub id: i64,
    pub kind: AggregateKind,
    pub name: String,
    pub normalized_name: String,
    /// Live (non-deleted) media records referencing this aggregate
    pub track_count: i64,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct AggregateRow {
    pub id: i64,
    pub name: String,
    pub normalized_name: String,
    pub track_count: i64,
}

impl AggregateRow {
    pub(crate) fn into_aggregate(self, kind: AggregateKind) -> GroupAggregate {
        GroupAggregate {
            id: self.id,
            kind,
            name: self.name,
            normalized_name: self.normalized_name,
            track_count: self.track_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
}

/// What a playlist entry points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryRef {
    Media(i64),
    Video(i64),
}

impl EntryRef {
    pub(crate) fn columns(self) -> (Option<i64>, Option<i64>) {
        match self {
            EntryRef::Media(id) => (Some(id), None),
            EntryRef::Video(id) => (None, Some(id)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub id: i64,
    pub playlist_id: i64,
    pub target: EntryRef,
    pub added_at: i64,
}

/// Raw `playlist_entries` row; converted into [`PlaylistEntry`] at the edge.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct PlaylistEntryRow {
    pub id: i64,
    pub playlist_id: i64,
    pub media_id: Option<i64>,
    pub video_id: Option<i64>,
    pub added_at: i64,
}

impl TryFrom<PlaylistEntryRow> for PlaylistEntry {
    type Error = crate::error::LibraryError;

    fn try_from(row: PlaylistEntryRow) -> Result<Self, Self::Error> {
        let target = match (row.media_id, row.video_id) {
            (Some(id), None) => EntryRef::Media(id),
            (None, Some(id)) => EntryRef::Video(id),
            _ => {
                return Err(crate::error::LibraryError::InvalidInput {
                    field: "playlist_entries".to_string(),
                    message: format!("entry {} must reference exactly one item", row.id),
                })
            }
        };

        Ok(PlaylistEntry {
            id: row.id,
            playlist_id: row.playlist_id,
            target,
            added_at: row.added_at,
        })
    }
}

// =============================================================================
// Paged items
// =============================================================================

/// Content hydrated behind a playlist entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaylistContent {
    Media(MediaRecord),
    Video(VideoRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub entry: PlaylistEntry,
    pub content: PlaylistContent,
}

/// One element of a paged result, whatever its source table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LibraryItem {
    Media(MediaRecord),
    Video(VideoRecord),
    PlaylistEntry(PlaylistItem),
}

impl LibraryItem {
    /// Primary key of the row this item was read from
    pub fn id(&self) -> i64 {
        match self {
            LibraryItem::Media(media) => media.id,
            LibraryItem::Video(video) => video.id,
            LibraryItem::PlaylistEntry(item) => item.entry.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            LibraryItem::Media(media) => &media.title,
            LibraryItem::Video(video) => &video.title,
            LibraryItem::PlaylistEntry(item) => match &item.content {
                PlaylistContent::Media(media) => &media.title,
                PlaylistContent::Video(video) => &video.title,
            },
        }
    }

    pub fn as_media(&self) -> Option<&MediaRecord> {
        match self {
            LibraryItem::Media(media) => Some(media),
            _ => None,
        }
    }
}

// =============================================================================
// Write payloads
// =============================================================================

/// Caller-supplied fields for a new or replaced media record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewMedia {
    pub title: String,
    pub album: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub track_number: Option<i32>,
    pub disc_number: Option<i32>,
    pub year: Option<i32>,
    /// Defaults to now when absent
    pub date_added: Option<i64>,
}

impl NewMedia {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    pub fn track(mut self, track_number: i32) -> Self {
        self.track_number = Some(track_number);
        self
    }

    pub fn disc(mut self, disc_number: i32) -> Self {
        self.disc_number = Some(disc_number);
        self
    }

    pub fn year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn added_at(mut self, timestamp: i64) -> Self {
        self.date_added = Some(timestamp);
        self
    }

    /// Validate media data
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Media title cannot be empty".to_string());
        }

        if let Some(year) = self.year {
            if !(1000..=9999).contains(&year) {
                return Err(format!("Media year {} is out of valid range", year));
            }
        }

        if let Some(track_number) = self.track_number {
            if track_number <= 0 {
                return Err("Track number must be positive".to_string());
            }
        }

        if let Some(disc_number) = self.disc_number {
            if disc_number <= 0 {
                return Err("Disc number must be positive".to_string());
            }
        }

        for name in [&self.album, &self.artist, &self.genre].into_iter().flatten() {
            if name.trim().is_empty() {
                return Err("Aggregate names cannot be blank".to_string());
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewVideo {
    pub title: String,
    pub duration_ms: Option<i64>,
    pub date_added: Option<i64>,
}

impl NewVideo {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Video title cannot be empty".to_string());
        }
        if matches!(self.duration_ms, Some(ms) if ms < 0) {
            return Err("Video duration cannot be negative".to_string());
        }
        Ok(())
    }
}

/// Normalize a string for sorting and searching (trimmed, Unicode lowercase)
pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_handles_non_ascii() {
        assert_eq!(normalize("  Édith Piaf "), "édith piaf");
        assert_eq!(normalize("ÅNGSTRÖM"), "ångström");
    }

    #[test]
    fn test_media_validation_rejects_blank_title_and_bad_numbers() {
        assert!(NewMedia::new("  ").validate().is_err());
        assert!(NewMedia::new("Song").track(0).validate().is_err());
        assert!(NewMedia::new("Song").disc(-1).validate().is_err());
        assert!(NewMedia::new("Song").album(" ").validate().is_err());
        assert!(NewMedia::new("Song").album("A").track(3).year(1999).validate().is_ok());
    }

    #[test]
    fn test_entry_row_requires_exactly_one_target() {
        let row = PlaylistEntryRow {
            id: 1,
            playlist_id: 1,
            media_id: None,
            video_id: None,
            added_at: 0,
        };
        assert!(PlaylistEntry::try_from(row.clone()).is_err());

        let both = PlaylistEntryRow {
            media_id: Some(1),
            video_id: Some(2),
            ..row.clone()
        };
        assert!(PlaylistEntry::try_from(both).is_err());

        let video = PlaylistEntryRow {
            video_id: Some(7),
            ..row
        };
        assert_eq!(
            PlaylistEntry::try_from(video).unwrap().target,
            EntryRef::Video(7)
        );
    }

    #[test]
    fn test_entry_ref_columns_are_mutually_exclusive() {
        assert_eq!(EntryRef::Media(3).columns(), (Some(3), None));
        assert_eq!(EntryRef::Video(4).columns(), (None, Some(4)));
    }
}
