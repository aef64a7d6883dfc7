//! The migration ladder.
//!
//! Step `n` in [`MIGRATIONS`] moves the store from version `n` to `n + 1`.
//! Every statement is safe to replay: tables use `IF NOT EXISTS` and shadow
//! indexes are dropped, recreated and backfilled as a unit.

/// One rung of the ladder.
#[derive(Debug, Clone, Copy)]
pub struct MigrationStep {
    /// Version this step upgrades from; it leaves the store at `from + 1`.
    pub from: u32,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

impl MigrationStep {
    pub fn to(&self) -> u32 {
        self.from + 1
    }
}

const V1_AGGREGATES_AND_MEDIA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS albums (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        normalized_name TEXT NOT NULL UNIQUE,
        track_count INTEGER NOT NULL DEFAULT 0 CHECK (track_count >= 0)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS artists (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        normalized_name TEXT NOT NULL UNIQUE,
        track_count INTEGER NOT NULL DEFAULT 0 CHECK (track_count >= 0)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS genres (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        normalized_name TEXT NOT NULL UNIQUE,
        track_count INTEGER NOT NULL DEFAULT 0 CHECK (track_count >= 0)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS media (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        normalized_title TEXT NOT NULL,
        album_id INTEGER REFERENCES albums(id) ON DELETE SET NULL,
        album_name TEXT,
        artist_id INTEGER REFERENCES artists(id) ON DELETE SET NULL,
        artist_name TEXT,
        genre_id INTEGER REFERENCES genres(id) ON DELETE SET NULL,
        genre_name TEXT,
        track_number INTEGER,
        disc_number INTEGER,
        year INTEGER,
        date_added INTEGER NOT NULL,
        modified_at INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0 CHECK (deleted IN (0, 1))
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_media_album_id ON media(album_id)",
    "CREATE INDEX IF NOT EXISTS idx_media_artist_id ON media(artist_id)",
    "CREATE INDEX IF NOT EXISTS idx_media_genre_id ON media(genre_id)",
    "CREATE INDEX IF NOT EXISTS idx_media_normalized_title ON media(normalized_title)",
];

const V2_VIDEOS_AND_PLAYLISTS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS videos (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        normalized_title TEXT NOT NULL,
        duration_ms INTEGER CHECK (duration_ms IS NULL OR duration_ms >= 0),
        date_added INTEGER NOT NULL,
        modified_at INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0 CHECK (deleted IN (0, 1))
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_videos_normalized_title ON videos(normalized_title)",
    r#"CREATE TABLE IF NOT EXISTS playlists (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS playlist_entries (
        id INTEGER PRIMARY KEY,
        playlist_id INTEGER NOT NULL REFERENCES playlists(id) ON DELETE CASCADE,
        media_id INTEGER REFERENCES media(id) ON DELETE CASCADE,
        video_id INTEGER REFERENCES videos(id) ON DELETE CASCADE,
        added_at INTEGER NOT NULL,
        CHECK ((media_id IS NULL) <> (video_id IS NULL))
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_playlist_entries_playlist ON playlist_entries(playlist_id, added_at)",
    "CREATE INDEX IF NOT EXISTS idx_playlist_entries_media ON playlist_entries(media_id)",
    "CREATE INDEX IF NOT EXISTS idx_playlist_entries_video ON playlist_entries(video_id)",
];

const V3_MEDIA_SHADOW: &[&str] = &[
    "DROP TABLE IF EXISTS media_fts",
    "CREATE VIRTUAL TABLE media_fts USING fts5(searchable, tokenize = 'unicode61 remove_diacritics 2')",
    "INSERT INTO media_fts(rowid, searchable) SELECT id, title FROM media WHERE deleted = 0 AND title IS NOT NULL",
];

const V4_AGGREGATE_SHADOWS: &[&str] = &[
    "DROP TABLE IF EXISTS albums_fts",
    "CREATE VIRTUAL TABLE albums_fts USING fts5(searchable, tokenize = 'unicode61 remove_diacritics 2')",
    "INSERT INTO albums_fts(rowid, searchable) SELECT id, name FROM albums WHERE name IS NOT NULL",
    "DROP TABLE IF EXISTS artists_fts",
    "CREATE VIRTUAL TABLE artists_fts USING fts5(searchable, tokenize = 'unicode61 remove_diacritics 2')",
    "INSERT INTO artists_fts(rowid, searchable) SELECT id, name FROM artists WHERE name IS NOT NULL",
    "DROP TABLE IF EXISTS genres_fts",
    "CREATE VIRTUAL TABLE genres_fts USING fts5(searchable, tokenize = 'unicode61 remove_diacritics 2')",
    "INSERT INTO genres_fts(rowid, searchable) SELECT id, name FROM genres WHERE name IS NOT NULL",
];

const V5_VIDEO_SHADOW: &[&str] = &[
    "DROP TABLE IF EXISTS videos_fts",
    "CREATE VIRTUAL TABLE videos_fts USING fts5(searchable, tokenize = 'unicode61 remove_diacritics 2')",
    "INSERT INTO videos_fts(rowid, searchable) SELECT id, title FROM videos WHERE deleted = 0 AND title IS NOT NULL",
];

/// Every step, in application order.
pub const MIGRATIONS: &[MigrationStep] = &[
    MigrationStep {
        from: 0,
        description: "aggregates and media",
        statements: V1_AGGREGATES_AND_MEDIA,
    },
    MigrationStep {
        from: 1,
        description: "videos and playlists",
        statements: V2_VIDEOS_AND_PLAYLISTS,
    },
    MigrationStep {
        from: 2,
        description: "media shadow index",
        statements: V3_MEDIA_SHADOW,
    },
    MigrationStep {
        from: 3,
        description: "album, artist and genre shadow indexes",
        statements: V4_AGGREGATE_SHADOWS,
    },
    MigrationStep {
        from: 4,
        description: "video shadow index",
        statements: V5_VIDEO_SHADOW,
    },
];
