//! # Paging Provider
//!
//! Executes compiled fragments against a base entity set and hands out
//! fixed-size pages with opaque continuation tokens.
//!
//! ```rust,ignore
//! let query = compile_fragments(&[], &[SortOption::asc(SortKey::Album)], EntityKind::Media)?;
//! let first = provider.get_page(&BaseSelector::AllMedia, &query, &PageToken::start()).await?;
//! if let Some(next) = first.next {
//!     let second = provider.get_page(&BaseSelector::AllMedia, &query, &next).await?;
//! }
//! ```
//!
//! Count and rows for one page are read in a single transaction, so a page's
//! `total` always matches the snapshot its items came from.

mod changes;
mod window;

pub use changes::ChangeNotifier;
pub use window::{LoadState, LoadedPrefix, PageSource, QuerySource};

use crate::error::{LibraryError, Result};
use crate::models::{
    EntryRef, LibraryItem, MediaRecord, PlaylistContent, PlaylistEntry, PlaylistEntryRow,
    PlaylistItem, VideoRecord,
};
use crate::query::sql::{bind_query_as, bind_query_scalar, build_query_spec, QuerySpec};
use crate::query::{CompiledQuery, EntityKind};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Universe a page query runs over
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaseSelector {
    AllMedia,
    AllVideos,
    Album(i64),
    Artist(i64),
    Genre(i64),
    Playlist(i64),
    /// Media whose title matches every token as a prefix
    MediaSearch(String),
    /// Videos whose title matches every token as a prefix
    VideoSearch(String),
}

impl BaseSelector {
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            BaseSelector::AllMedia
            | BaseSelector::Album(_)
            | BaseSelector::Artist(_)
            | BaseSelector::Genre(_)
            | BaseSelector::MediaSearch(_) => EntityKind::Media,
            BaseSelector::AllVideos | BaseSelector::VideoSearch(_) => EntityKind::Video,
            BaseSelector::Playlist(_) => EntityKind::PlaylistEntry,
        }
    }

    /// Whether the universe comes from a shadow-index match
    pub fn is_search(&self) -> bool {
        matches!(
            self,
            BaseSelector::MediaSearch(_) | BaseSelector::VideoSearch(_)
        )
    }
}

/// Opaque continuation marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageToken {
    offset: u64,
    /// `None` means the provider's configured page size
    limit: Option<u32>,
}

impl PageToken {
    /// First page at the configured page size
    pub fn start() -> Self {
        Self {
            offset: 0,
            limit: None,
        }
    }

    /// First page at an explicit size, overriding the configured one
    pub fn start_with_size(size: u32) -> Self {
        Self {
            offset: 0,
            limit: Some(size),
        }
    }

    /// Absolute position of the first item this token fetches
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// A bounded slice of an ordered result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Absolute position of `items[0]` in the full sequence
    pub offset: u64,
    /// Matching rows in the snapshot this page was read from
    pub total: u64,
    /// Token for the following page; `None` on the last page
    pub next: Option<PageToken>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            offset: 0,
            total: 0,
            next: None,
        }
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    /// Map the items to a different type
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            offset: self.offset,
            total: self.total,
            next: self.next,
        }
    }
}

/// Read side of the library: pages, page streams and change signals.
#[derive(Clone, Debug)]
pub struct PagingProvider {
    pool: SqlitePool,
    notifier: ChangeNotifier,
    schema_version: u32,
    page_size: u32,
}

impl PagingProvider {
    pub fn new(
        pool: SqlitePool,
        notifier: ChangeNotifier,
        schema_version: u32,
        page_size: u32,
    ) -> Self {
        Self {
            pool,
            notifier,
            schema_version,
            page_size,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Fetch the page `token` points at.
    ///
    /// # Errors
    ///
    /// - `SchemaMismatch` when `query` was compiled for another schema version
    /// - `Configuration` when `query` targets another entity kind than `base`,
    ///   or the token asks for zero rows
    /// - `StoreIo` when the store fails; the provider does not retry
    pub async fn get_page(
        &self,
        base: &BaseSelector,
        query: &CompiledQuery,
        token: &PageToken,
    ) -> Result<Page<LibraryItem>> {
        self.check(base, query)?;

        let limit = token.limit.unwrap_or(self.page_size);
        if limit == 0 {
            return Err(LibraryError::Configuration(
                "page size must be greater than zero".to_string(),
            ));
        }

        let Some(spec) = build_query_spec(base, query)? else {
            debug!(?base, "Empty search text; returning empty page");
            return Ok(Page::empty());
        };

        self.read_page(query.entity_kind, &spec, token.offset, limit)
            .await
            .inspect_err(|e| warn!(error = %e, ?base, offset = token.offset, "Page fetch failed"))
    }

    /// Stream of change signals; see [`ChangeNotifier::subscribe`].
    pub fn changes(&self) -> BoxStream<'static, ()> {
        self.notifier.subscribe()
    }

    /// Every page from the first to the last, fetched one after another.
    ///
    /// Cancelling `cancel` ends the stream before the next fetch; a fetch
    /// already issued runs to completion and its page is still yielded.
    pub fn stream_pages(
        &self,
        base: BaseSelector,
        query: CompiledQuery,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<Page<LibraryItem>>> {
        let initial_state = PageStreamState {
            provider: self.clone(),
            base,
            query,
            next: Some(PageToken::start()),
            cancel,
        };

        stream::try_unfold(initial_state, |mut state| async move {
            if state.cancel.is_cancelled() {
                debug!("Page stream cancelled");
                return Ok(None);
            }
            let Some(token) = state.next.take() else {
                return Ok(None);
            };

            let page = state
                .provider
                .get_page(&state.base, &state.query, &token)
                .await?;
            state.next = page.next;
            Ok::<_, LibraryError>(Some((page, state)))
        })
        .boxed()
    }

    /// Bind a base and query into a [`PageSource`] for a [`LoadedPrefix`].
    pub fn source(&self, base: BaseSelector, query: CompiledQuery) -> QuerySource {
        QuerySource::new(self.clone(), base, query)
    }

    fn check(&self, base: &BaseSelector, query: &CompiledQuery) -> Result<()> {
        if query.schema_version != self.schema_version {
            return Err(LibraryError::SchemaMismatch {
                expected: self.schema_version,
                found: query.schema_version,
            });
        }
        if base.entity_kind() != query.entity_kind {
            return Err(LibraryError::Configuration(format!(
                "{:?} selects {:?} records but the fragments were compiled for {:?}",
                base,
                base.entity_kind(),
                query.entity_kind
            )));
        }
        Ok(())
    }

    async fn read_page(
        &self,
        kind: EntityKind,
        spec: &QuerySpec,
        offset: u64,
        limit: u32,
    ) -> Result<Page<LibraryItem>> {
        let mut tx = self.pool.begin().await?;

        let total: i64 = bind_query_scalar(sqlx::query_scalar(&spec.count_sql), &spec.binds)
            .fetch_one(&mut *tx)
            .await?;

        let sql = spec.paginated_sql();
        let sql_offset = i64::try_from(offset).map_err(|_| LibraryError::InvalidInput {
            field: "page_token".to_string(),
            message: format!("offset {} is out of range", offset),
        })?;

        let items = match kind {
            EntityKind::Media => bind_query_as(sqlx::query_as::<_, MediaRecord>(&sql), &spec.binds)
                .bind(i64::from(limit))
                .bind(sql_offset)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(LibraryItem::Media)
                .collect(),
            EntityKind::Video => bind_query_as(sqlx::query_as::<_, VideoRecord>(&sql), &spec.binds)
                .bind(i64::from(limit))
                .bind(sql_offset)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(LibraryItem::Video)
                .collect(),
            EntityKind::PlaylistEntry => {
                let rows =
                    bind_query_as(sqlx::query_as::<_, PlaylistEntryRow>(&sql), &spec.binds)
                        .bind(i64::from(limit))
                        .bind(sql_offset)
                        .fetch_all(&mut *tx)
                        .await?;
                hydrate_entries(&mut tx, rows).await?
            }
        };

        tx.commit().await?;

        let page = build_page(items, offset, total.max(0) as u64, limit);
        debug!(
            ?kind,
            offset,
            returned = page.items.len(),
            total = page.total,
            "Fetched page"
        );
        Ok(page)
    }
}

fn build_page(items: Vec<LibraryItem>, offset: u64, total: u64, limit: u32) -> Page<LibraryItem> {
    let end = offset + items.len() as u64;
    let next = (!items.is_empty() && end < total).then_some(PageToken {
        offset: end,
        limit: Some(limit),
    });

    Page {
        items,
        offset,
        total,
        next,
    }
}

#[derive(Clone)]
struct PageStreamState {
    provider: PagingProvider,
    base: BaseSelector,
    query: CompiledQuery,
    next: Option<PageToken>,
    cancel: CancellationToken,
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Load the media/video rows behind playlist entries, preserving entry order.
async fn hydrate_entries(
    conn: &mut SqliteConnection,
    rows: Vec<PlaylistEntryRow>,
) -> Result<Vec<LibraryItem>> {
    let entries = rows
        .into_iter()
        .map(PlaylistEntry::try_from)
        .collect::<Result<Vec<_>>>()?;

    let mut media_ids = Vec::new();
    let mut video_ids = Vec::new();
    for entry in &entries {
        match entry.target {
            EntryRef::Media(id) => media_ids.push(id),
            EntryRef::Video(id) => video_ids.push(id),
        }
    }

    let mut media: HashMap<i64, MediaRecord> = HashMap::new();
    if !media_ids.is_empty() {
        let sql = format!(
            "SELECT * FROM media WHERE id IN ({})",
            placeholders(media_ids.len())
        );
        let mut select = sqlx::query_as::<_, MediaRecord>(&sql);
        for id in &media_ids {
            select = select.bind(*id);
        }
        for record in select.fetch_all(&mut *conn).await? {
            media.insert(record.id, record);
        }
    }

    let mut videos: HashMap<i64, VideoRecord> = HashMap::new();
    if !video_ids.is_empty() {
        let sql = format!(
            "SELECT * FROM videos WHERE id IN ({})",
            placeholders(video_ids.len())
        );
        let mut select = sqlx::query_as::<_, VideoRecord>(&sql);
        for id in &video_ids {
            select = select.bind(*id);
        }
        for record in select.fetch_all(&mut *conn).await? {
            videos.insert(record.id, record);
        }
    }

    entries
        .into_iter()
        .map(|entry| {
            let content = match entry.target {
                EntryRef::Media(id) => media
                    .get(&id)
                    .cloned()
                    .map(PlaylistContent::Media)
                    .ok_or_else(|| LibraryError::not_found("MediaRecord", id))?,
                EntryRef::Video(id) => videos
                    .get(&id)
                    .cloned()
                    .map(PlaylistContent::Video)
                    .ok_or_else(|| LibraryError::not_found("VideoRecord", id))?,
            };
            Ok(LibraryItem::PlaylistEntry(PlaylistItem { entry, content }))
        })
        .collect()
}
