//! End-to-end properties of the query, paging and grouping pipeline
//!
//! Each test opens a fresh in-memory library through `MediaLibrary::open`.

use core_library::models::{AggregateKind, LibraryItem, NewMedia};
use core_library::paging::PageSource;
use core_library::query::{EntityKind, GroupKey, SortDirection, SortKey, SortOption};
use core_library::{
    compile_fragments, flatten_index, fold, BaseSelector, LibraryError, LoadState, LoadedPrefix,
    MediaLibrary, PageToken, SourceTable, StoreConfig, CURRENT_VERSION,
};
use futures::StreamExt;
use std::time::Duration;

async fn open() -> MediaLibrary {
    MediaLibrary::open(StoreConfig::in_memory())
        .await
        .expect("open in-memory library")
}

fn ids(items: &[LibraryItem]) -> Vec<i64> {
    items.iter().map(LibraryItem::id).collect()
}

async fn live_album_members(library: &MediaLibrary, album_id: i64) -> u64 {
    let query = compile_fragments(&[], &[], EntityKind::Media).unwrap();
    library
        .pages()
        .get_page(&BaseSelector::Album(album_id), &query, &PageToken::start())
        .await
        .unwrap()
        .total
}

#[test]
fn test_fragment_compilation_is_byte_identical_for_every_valid_pair() {
    let keys = [
        SortKey::Title,
        SortKey::Album,
        SortKey::Artist,
        SortKey::Genre,
        SortKey::TrackNumber,
        SortKey::DiscNumber,
        SortKey::Year,
        SortKey::DateAdded,
        SortKey::Modified,
    ];
    let kinds = [
        EntityKind::Media,
        EntityKind::Video,
        EntityKind::PlaylistEntry,
    ];

    for kind in kinds {
        for key in keys {
            for direction in [SortDirection::Ascending, SortDirection::Descending] {
                let options = [SortOption { key, direction }];
                let Ok(first) = compile_fragments(&[], &options, kind) else {
                    continue;
                };
                let second = compile_fragments(&[], &options, kind).unwrap();
                assert_eq!(
                    serde_json::to_vec(&first).unwrap(),
                    serde_json::to_vec(&second).unwrap(),
                    "{:?} {:?} {:?}",
                    kind,
                    key,
                    direction
                );
            }
        }
    }
}

#[tokio::test]
async fn test_sort_by_album_then_track_orders_scenario() {
    let library = open().await;
    let store = library.store();

    let first = store
        .insert_media(NewMedia::new("x").album("A").track(2))
        .await
        .unwrap();
    let second = store
        .insert_media(NewMedia::new("y").album("A").track(1))
        .await
        .unwrap();
    let third = store
        .insert_media(NewMedia::new("z").album("B").track(1))
        .await
        .unwrap();

    let query = compile_fragments(
        &[],
        &[
            SortOption::asc(SortKey::Album),
            SortOption::asc(SortKey::TrackNumber),
        ],
        EntityKind::Media,
    )
    .unwrap();
    let page = library
        .pages()
        .get_page(&BaseSelector::AllMedia, &query, &PageToken::start())
        .await
        .unwrap();

    assert_eq!(ids(&page.items), vec![second.id, first.id, third.id]);
}

#[tokio::test]
async fn test_track_count_matches_live_members_after_every_write() {
    let library = open().await;
    let store = library.store();

    let mut members = Vec::new();
    for (title, track) in [("one", 1), ("two", 2), ("three", 3)] {
        members.push(
            store
                .insert_media(NewMedia::new(title).album("Kind of Blue").track(track))
                .await
                .unwrap(),
        );
    }
    let album_id = members[0].album_id.unwrap();

    let album = store
        .aggregate(AggregateKind::Album, album_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(album.track_count, 3);
    assert_eq!(
        album.track_count as u64,
        live_album_members(&library, album_id).await
    );

    store.delete_media(&[members[1].id]).await.unwrap();

    let album = store
        .aggregate(AggregateKind::Album, album_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(album.track_count, 2);
    assert_eq!(
        album.track_count as u64,
        live_album_members(&library, album_id).await
    );
}

#[tokio::test]
async fn test_deleting_last_member_prunes_aggregate_and_its_shadow_row() {
    let library = open().await;
    let store = library.store();

    let only = store
        .insert_media(NewMedia::new("Solo").artist("Nobody Else").genre("Ambient"))
        .await
        .unwrap();
    let artist_id = only.artist_id.unwrap();
    assert!(store
        .shadow_text(SourceTable::Artists, artist_id)
        .await
        .unwrap()
        .is_some());

    store.delete_media(&[only.id]).await.unwrap();

    assert!(store
        .aggregate(AggregateKind::Artist, artist_id)
        .await
        .unwrap()
        .is_none());
    assert!(store
        .aggregate_by_name(AggregateKind::Genre, "ambient")
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        store
            .shadow_text(SourceTable::Artists, artist_id)
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_shadow_rows_track_source_rows_through_mixed_writes() {
    let library = open().await;
    let store = library.store();

    let a = store
        .insert_media(NewMedia::new("Alpha").album("First"))
        .await
        .unwrap();
    let b = store
        .insert_media(NewMedia::new("Bravo").album("First"))
        .await
        .unwrap();
    let c = store
        .insert_media(NewMedia::new("Charlie").album("Second"))
        .await
        .unwrap();
    store
        .update_media(b.id, NewMedia::new("Bravo (Live)").album("Second"))
        .await
        .unwrap();
    store.delete_media(&[a.id]).await.unwrap();
    let query = compile_fragments(
        &[GroupKey::Album(c.album_id.unwrap())],
        &[],
        EntityKind::Media,
    )
    .unwrap();
    store.delete_matching(&query).await.unwrap();
    store.purge_deleted().await.unwrap();

    for table in SourceTable::ALL {
        assert_eq!(
            store.shadow_row_count(table).await.unwrap(),
            store.indexable_row_count(table).await.unwrap(),
            "shadow rows out of sync for {:?}",
            table
        );
    }
    assert_eq!(store.shadow_row_count(SourceTable::Media).await.unwrap(), 0);
    assert_eq!(store.shadow_row_count(SourceTable::Albums).await.unwrap(), 0);
}

#[tokio::test]
async fn test_prefix_search_sees_updated_titles() {
    let library = open().await;
    let store = library.store();

    let alpha = store
        .insert_media(NewMedia::new("Alpha One"))
        .await
        .unwrap();
    let beta = store.insert_media(NewMedia::new("Beta")).await.unwrap();
    store.insert_media(NewMedia::new("Gamma")).await.unwrap();

    store
        .update_media(beta.id, NewMedia::new("Alpine Air"))
        .await
        .unwrap();

    let query = compile_fragments(&[], &[SortOption::asc(SortKey::Title)], EntityKind::Media)
        .unwrap();
    let page = library
        .pages()
        .get_page(
            &BaseSelector::MediaSearch("alp".into()),
            &query,
            &PageToken::start(),
        )
        .await
        .unwrap();

    assert_eq!(ids(&page.items), vec![alpha.id, beta.id]);

    let stale = library
        .pages()
        .get_page(
            &BaseSelector::MediaSearch("beta".into()),
            &query,
            &PageToken::start(),
        )
        .await
        .unwrap();
    assert!(stale.items.is_empty());
}

#[tokio::test]
async fn test_search_intersects_with_filter_fragments() {
    let library = open().await;
    let store = library.store();

    store
        .insert_media(NewMedia::new("Love Me Do").year(1962))
        .await
        .unwrap();
    let later = store
        .insert_media(NewMedia::new("Lovely Rita").year(1967))
        .await
        .unwrap();

    let query = compile_fragments(
        &[GroupKey::YearRange {
            from: 1965,
            to: 1970,
        }],
        &[],
        EntityKind::Media,
    )
    .unwrap();
    let page = library
        .pages()
        .get_page(
            &BaseSelector::MediaSearch("lov".into()),
            &query,
            &PageToken::start(),
        )
        .await
        .unwrap();

    assert_eq!(ids(&page.items), vec![later.id]);
}

#[tokio::test]
async fn test_stale_fragments_are_rejected_everywhere() {
    let library = open().await;
    let mut query = compile_fragments(&[], &[], EntityKind::Media).unwrap();
    query.schema_version = CURRENT_VERSION - 2;

    let err = library
        .pages()
        .get_page(&BaseSelector::AllMedia, &query, &PageToken::start())
        .await
        .unwrap_err();
    assert!(matches!(err, LibraryError::SchemaMismatch { .. }));

    let err = library.store().delete_matching(&query).await.unwrap_err();
    assert!(matches!(err, LibraryError::SchemaMismatch { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_grouped_view_over_loaded_pages_maps_back_to_page_positions() {
    let library = MediaLibrary::open(StoreConfig::in_memory().page_size(2))
        .await
        .unwrap();
    let store = library.store();

    for (title, album, track) in [
        ("a1", "A", 1),
        ("a2", "A", 2),
        ("b1", "B", 1),
        ("b2", "B", 1),
        ("c1", "C", 1),
    ] {
        store
            .insert_media(NewMedia::new(title).album(album).track(track))
            .await
            .unwrap();
    }

    let primary = SortOption::asc(SortKey::Album);
    let secondary = SortOption::asc(SortKey::TrackNumber);
    let query = compile_fragments(&[], &[primary, secondary], EntityKind::Media).unwrap();
    let source = library.pages().source(BaseSelector::AllMedia, query);

    let mut prefix = LoadedPrefix::new(PageToken::start());
    let mut rendered = 0;
    while let Some(token) = prefix.prefetch_token(rendered, 1) {
        prefix.load(&source, token).await.unwrap();
        let groups = fold(prefix.items(), EntityKind::Media, primary, secondary).unwrap();

        // Render up to the last loaded item
        let p = groups.len() - 1;
        let s = groups[p].groups.len() - 1;
        let i = groups[p].groups[s].items.len() - 1;
        rendered = flatten_index(&groups, p, s, i);
        assert_eq!(rendered, prefix.len() - 1);
    }

    assert_eq!(prefix.state(), &LoadState::Exhausted);
    assert_eq!(prefix.len(), 5);

    let groups = fold(prefix.items(), EntityKind::Media, primary, secondary).unwrap();
    let labels: Vec<_> = groups.iter().map(|group| group.label.as_str()).collect();
    assert_eq!(labels, vec!["A", "B", "C"]);
    // B's two track-1 items share one secondary group
    assert_eq!(groups[1].groups.len(), 1);
    assert_eq!(flatten_index(&groups, 1, 0, 1), 3);
    assert_eq!(flatten_index(&groups, 2, 0, 0), 4);
}

#[tokio::test]
async fn test_query_source_reports_store_errors_as_failed_state() {
    let library = open().await;
    let query = compile_fragments(&[], &[], EntityKind::Media).unwrap();
    let source = library.pages().source(BaseSelector::AllMedia, query);

    library.close().await;

    let mut prefix = LoadedPrefix::new(PageToken::start());
    let token = prefix.prefetch_token(0, 0).unwrap();
    assert!(source.fetch(token).await.is_err());

    let err = prefix.load(&source, token).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(prefix.state(), LoadState::Failed(_)));
}

#[tokio::test]
async fn test_every_committed_write_signals_change_subscribers() {
    let library = open().await;
    let mut changes = library.pages().changes();

    library
        .store()
        .insert_media(NewMedia::new("Signal"))
        .await
        .unwrap();

    let signal = tokio::time::timeout(Duration::from_secs(1), changes.next())
        .await
        .expect("change signal within timeout");
    assert_eq!(signal, Some(()));

    // Failed writes do not signal
    assert!(library
        .store()
        .insert_media(NewMedia::new(""))
        .await
        .is_err());
    assert!(
        tokio::time::timeout(Duration::from_millis(50), changes.next())
            .await
            .is_err()
    );
}
