//! Loaded prefix of a paged sequence.
//!
//! A [`LoadedPrefix`] is what a renderer holds: the items fetched so far, in
//! provider order, plus the token for the next page. The renderer reports
//! how far it has drawn; the prefix hands out the next token once, when the
//! drawn position comes within a threshold of the loaded end.

use crate::error::{LibraryError, Result};
use crate::models::LibraryItem;
use crate::paging::{BaseSelector, Page, PageToken, PagingProvider};
use crate::query::CompiledQuery;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Anything that can produce the page a token points at.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, token: PageToken) -> Result<Page<LibraryItem>>;
}

/// A provider bound to one base selector and compiled query
#[derive(Debug, Clone)]
pub struct QuerySource {
    provider: PagingProvider,
    base: BaseSelector,
    query: CompiledQuery,
}

impl QuerySource {
    pub(crate) fn new(provider: PagingProvider, base: BaseSelector, query: CompiledQuery) -> Self {
        Self {
            provider,
            base,
            query,
        }
    }
}

#[async_trait]
impl PageSource for QuerySource {
    async fn fetch(&self, token: PageToken) -> Result<Page<LibraryItem>> {
        self.provider.get_page(&self.base, &self.query, &token).await
    }
}

/// Where the prefix stands with respect to the next page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    /// More pages exist and none is in flight
    Idle,
    /// A token has been handed out and its page has not arrived
    Loading,
    /// The last page is loaded
    Exhausted,
    /// The last fetch failed; distinct from an empty, exhausted prefix
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct LoadedPrefix {
    items: Vec<LibraryItem>,
    next: Option<PageToken>,
    total: Option<u64>,
    state: LoadState,
}

impl LoadedPrefix {
    /// Empty prefix whose first fetch uses `first`.
    pub fn new(first: PageToken) -> Self {
        Self {
            items: Vec::new(),
            next: Some(first),
            total: None,
            state: LoadState::Idle,
        }
    }

    pub fn items(&self) -> &[LibraryItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// Total reported by the most recent page, if any page has arrived
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Token for the next page when the renderer has drawn up to
    /// `rendered_index` and fewer than `threshold` loaded items remain
    /// beyond it.
    ///
    /// Returns `None` while a fetch is in flight, after a failure (see
    /// [`retry`](Self::retry)) and once the sequence is exhausted, so a token
    /// is never handed out twice.
    pub fn prefetch_token(&mut self, rendered_index: usize, threshold: usize) -> Option<PageToken> {
        if self.state != LoadState::Idle {
            return None;
        }
        if rendered_index.saturating_add(threshold) < self.items.len() {
            return None;
        }

        let token = self.next?;
        debug!(
            rendered_index,
            loaded = self.items.len(),
            offset = token.offset(),
            "Prefetching next page"
        );
        self.state = LoadState::Loading;
        Some(token)
    }

    /// Hand the pending token out again after a failed fetch.
    pub fn retry(&mut self) -> Option<PageToken> {
        match self.state {
            LoadState::Failed(_) => {
                self.state = LoadState::Loading;
                self.next
            }
            _ => None,
        }
    }

    /// Append the page fetched for the pending token.
    ///
    /// # Errors
    ///
    /// `PageOutOfSequence` when the page does not start where the prefix
    /// ends; no items are added, and a pending fetch is marked failed so
    /// [`retry`](Self::retry) can hand its token out again.
    pub fn append(&mut self, page: Page<LibraryItem>) -> Result<()> {
        let expected = self.items.len() as u64;
        if page.offset != expected {
            let err = LibraryError::PageOutOfSequence {
                expected,
                found: page.offset,
            };
            if self.state == LoadState::Loading {
                self.fail(&err);
            }
            return Err(err);
        }

        self.items.extend(page.items);
        self.total = Some(page.total);
        self.next = page.next;
        self.state = if self.next.is_some() {
            LoadState::Idle
        } else {
            LoadState::Exhausted
        };
        Ok(())
    }

    /// Record a failed fetch. The pending token is kept for [`retry`](Self::retry).
    pub fn fail(&mut self, error: &LibraryError) {
        warn!(error = %error, loaded = self.items.len(), "Page load failed");
        self.state = LoadState::Failed(error.to_string());
    }

    /// Fetch `token` from `source` and append the result, recording a failure
    /// in the load state. Returns the number of items added.
    pub async fn load<S>(&mut self, source: &S, token: PageToken) -> Result<usize>
    where
        S: PageSource + ?Sized,
    {
        match source.fetch(token).await {
            Ok(page) => {
                let added = page.items.len();
                self.append(page)?;
                Ok(added)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Drop everything loaded and start over from `first`, e.g. after a
    /// change signal.
    pub fn reset(&mut self, first: PageToken) {
        *self = Self::new(first);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaRecord;
    use mockall::mock;
    use mockall::predicate::eq;

    mock! {
        pub Source {}

        #[async_trait::async_trait]
        impl PageSource for Source {
            async fn fetch(&self, token: PageToken) -> Result<Page<LibraryItem>>;
        }
    }

    fn media(id: i64) -> LibraryItem {
        LibraryItem::Media(MediaRecord {
            id,
            title: format!("Track {}", id),
            normalized_title: format!("track {}", id),
            album_id: None,
            album_name: None,
            artist_id: None,
            artist_name: None,
            genre_id: None,
            genre_name: None,
            track_number: None,
            disc_number: None,
            year: None,
            date_added: 0,
            modified_at: 0,
            deleted: false,
        })
    }

    fn page(offset: u64, ids: &[i64], next: Option<PageToken>) -> Page<LibraryItem> {
        Page {
            items: ids.iter().copied().map(media).collect(),
            offset,
            total: 4,
            next,
        }
    }

    #[test]
    fn test_empty_prefix_hands_out_the_first_token_once() {
        let mut prefix = LoadedPrefix::new(PageToken::start());
        assert_eq!(prefix.prefetch_token(0, 5), Some(PageToken::start()));
        assert_eq!(prefix.state(), &LoadState::Loading);
        assert_eq!(prefix.prefetch_token(0, 5), None);
    }

    #[test]
    fn test_token_waits_until_render_nears_the_end() {
        let mut prefix = LoadedPrefix::new(PageToken::start());
        prefix.prefetch_token(0, 0);
        let second = PageToken::start_with_size(2);
        prefix.append(page(0, &[1, 2, 3, 4], Some(second))).unwrap();

        assert_eq!(prefix.prefetch_token(0, 1), None);
        assert_eq!(prefix.prefetch_token(3, 1), Some(second));
    }

    #[test]
    fn test_out_of_sequence_page_is_rejected_without_changes() {
        let mut prefix = LoadedPrefix::new(PageToken::start());
        let err = prefix.append(page(2, &[3, 4], None)).unwrap_err();
        assert!(matches!(
            err,
            LibraryError::PageOutOfSequence {
                expected: 0,
                found: 2
            }
        ));
        assert!(prefix.is_empty());
        assert_eq!(prefix.state(), &LoadState::Idle);
    }

    #[test]
    fn test_rejected_page_for_pending_token_can_be_retried() {
        let mut prefix = LoadedPrefix::new(PageToken::start());
        let token = prefix.prefetch_token(0, 0).unwrap();

        assert!(prefix.append(page(3, &[4], None)).is_err());
        assert!(matches!(prefix.state(), LoadState::Failed(_)));
        assert!(prefix.is_empty());
        assert_eq!(prefix.prefetch_token(0, 0), None);

        assert_eq!(prefix.retry(), Some(token));
        prefix.append(page(0, &[1, 2], None)).unwrap();
        assert_eq!(prefix.state(), &LoadState::Exhausted);
    }

    #[tokio::test]
    async fn test_load_of_misplaced_page_leaves_prefix_retryable() {
        let mut source = MockSource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(page(2, &[3, 4], None)));

        let mut prefix = LoadedPrefix::new(PageToken::start());
        let token = prefix.prefetch_token(0, 0).unwrap();

        let err = prefix.load(&source, token).await.unwrap_err();
        assert!(matches!(err, LibraryError::PageOutOfSequence { .. }));
        assert!(matches!(prefix.state(), LoadState::Failed(_)));
        assert_eq!(prefix.retry(), Some(token));
    }

    #[test]
    fn test_exhausted_prefix_stops_prefetching() {
        let mut prefix = LoadedPrefix::new(PageToken::start());
        prefix.append(page(0, &[1], None)).unwrap();
        assert_eq!(prefix.state(), &LoadState::Exhausted);
        assert_eq!(prefix.prefetch_token(0, 10), None);
    }

    #[tokio::test]
    async fn test_failed_load_is_recorded_and_retryable() {
        let mut source = MockSource::new();
        let mut sequence = mockall::Sequence::new();
        source
            .expect_fetch()
            .with(eq(PageToken::start()))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Err(LibraryError::StoreIo(sqlx::Error::PoolTimedOut)));
        source
            .expect_fetch()
            .with(eq(PageToken::start()))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok(page(0, &[1, 2], None)));

        let mut prefix = LoadedPrefix::new(PageToken::start());
        let token = prefix.prefetch_token(0, 0).unwrap();

        let err = prefix.load(&source, token).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(prefix.state(), LoadState::Failed(_)));
        assert!(prefix.is_empty());
        assert_eq!(prefix.prefetch_token(0, 0), None);

        let token = prefix.retry().unwrap();
        assert_eq!(prefix.load(&source, token).await.unwrap(), 2);
        assert_eq!(prefix.state(), &LoadState::Exhausted);
        assert_eq!(prefix.total(), Some(4));
    }

    #[test]
    fn test_reset_starts_over() {
        let mut prefix = LoadedPrefix::new(PageToken::start());
        prefix.append(page(0, &[1, 2], None)).unwrap();
        prefix.reset(PageToken::start());
        assert!(prefix.is_empty());
        assert_eq!(prefix.state(), &LoadState::Idle);
        assert_eq!(prefix.total(), None);
    }
}
