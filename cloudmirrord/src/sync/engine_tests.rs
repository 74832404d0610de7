use cloudmirror_core::ListingClassification;
use sqlx::SqlitePool;

use super::*;
use crate::store::{EventKind, ItemStatus, RecordKind};

const ROOT: &str = "/files/alice";

async fn make_engine() -> MirrorEngine {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let store = MetadataStore::from_pool(pool);
    store.init().await.unwrap();
    MirrorEngine::new(Arc::new(store))
}

fn entry(id: &str, server_path: &str, name: &str, directory: bool, etag: &str) -> RemoteListingEntry {
    RemoteListingEntry {
        id: Some(id.into()),
        file_id: format!("{id}-fid"),
        server_path: server_path.into(),
        name: Some(name.into()),
        directory,
        etag: etag.into(),
        date: Some("2024-01-01T00:00:00Z".into()),
        ..RemoteListingEntry::default()
    }
}

fn root_listing(root_etag: &str, docs_etag: &str) -> Vec<RemoteListingEntry> {
    vec![
        entry("ROOT", "/files", "alice", true, root_etag),
        entry("F1", ROOT, "a.txt", false, "f1"),
        entry("D1", ROOT, "Docs", true, docs_etag),
    ]
}

#[tokio::test]
async fn applies_items_and_directories_of_a_listing() {
    let engine = make_engine().await;

    let outcome = engine
        .apply_listing("alice", ROOT, &root_listing("r1", "d1"))
        .await
        .unwrap();

    assert_eq!(outcome.own_id, "ROOT");
    assert_eq!(outcome.adapted, 3);
    assert_eq!(outcome.items.unmatched, 2);
    assert_eq!(outcome.directories.unmatched, 1);

    let store = engine.store();
    let names: Vec<_> = store
        .query("alice", ROOT, None)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(names, vec!["Docs", "a.txt"]);
    assert!(store.get("alice", "ROOT").await.unwrap().is_some());

    let root = store.get_directory("alice", "ROOT").await.unwrap().unwrap();
    assert_eq!(root.path, ROOT);
    assert_eq!(root.parent_path, "/files");
    assert_eq!(root.etag, "r1");

    let docs = store
        .get_directory_by_path("alice", "/files/alice/Docs")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(docs.id, "D1");
    assert_eq!(docs.etag, "", "child etag waits for its own listing");
}

#[tokio::test]
async fn child_directory_etag_advances_only_with_its_own_listing() {
    let engine = make_engine().await;
    engine
        .apply_listing("alice", ROOT, &root_listing("r1", "d1"))
        .await
        .unwrap();
    engine
        .apply_listing(
            "alice",
            "/files/alice/Docs",
            &[
                entry("D1", ROOT, "Docs", true, "d1"),
                entry("F2", "/files/alice/Docs", "b.txt", false, "f2"),
            ],
        )
        .await
        .unwrap();
    let store = engine.store();
    assert_eq!(store.get_directory("alice", "D1").await.unwrap().unwrap().etag, "d1");

    let mut relisted = root_listing("r2", "d2");
    relisted[2].favorite = true;
    engine.apply_listing("alice", ROOT, &relisted).await.unwrap();

    let docs = store.get_directory("alice", "D1").await.unwrap().unwrap();
    assert!(docs.favorite);
    assert_eq!(docs.etag, "d1");
    assert_eq!(store.get("alice", "D1").await.unwrap().unwrap().etag, "d2");
}

#[tokio::test]
async fn second_identical_pass_emits_nothing() {
    let engine = make_engine().await;
    let listing = root_listing("r1", "d1");
    engine.apply_listing("alice", ROOT, &listing).await.unwrap();

    let mut rx = engine.store().subscribe();
    let outcome = engine.apply_listing("alice", ROOT, &listing).await.unwrap();

    assert!(outcome.items.is_noop());
    assert!(outcome.directories.is_noop());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn removed_children_disappear_with_their_directories() {
    let engine = make_engine().await;
    engine
        .apply_listing("alice", ROOT, &root_listing("r1", "d1"))
        .await
        .unwrap();
    let mut rx = engine.store().subscribe();

    let outcome = engine
        .apply_listing("alice", ROOT, &[entry("ROOT", "/files", "alice", true, "r2")])
        .await
        .unwrap();

    assert_eq!(outcome.items.removed, 2);
    assert_eq!(outcome.directories.removed, 1);
    let store = engine.store();
    assert!(store.query("alice", ROOT, None).await.unwrap().is_empty());
    assert!(store.get_directory("alice", "D1").await.unwrap().is_none());

    let mut deleted = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.kind == EventKind::Deleted {
            deleted.push((event.record, event.id));
        }
    }
    deleted.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(
        deleted,
        vec![
            (RecordKind::Item, "D1".to_string()),
            (RecordKind::Directory, "D1".to_string()),
            (RecordKind::Item, "F1".to_string()),
        ]
    );
}

#[tokio::test]
async fn transferring_children_are_protected() {
    let engine = make_engine().await;
    engine
        .apply_listing("alice", ROOT, &root_listing("r1", "d1"))
        .await
        .unwrap();
    let store = engine.store();
    store
        .set_status("alice", "F1", ItemStatus::Uploading)
        .await
        .unwrap();

    let mut changed = root_listing("r2", "d1");
    changed[1].etag = "f1-remote".into();
    engine.apply_listing("alice", ROOT, &changed).await.unwrap();
    let f1 = store.get("alice", "F1").await.unwrap().unwrap();
    assert_eq!(f1.etag, "f1");
    assert_eq!(f1.status, ItemStatus::Uploading);

    changed.remove(1);
    engine.apply_listing("alice", ROOT, &changed).await.unwrap();
    assert!(store.get("alice", "F1").await.unwrap().is_some());
}

#[tokio::test]
async fn malformed_and_misplaced_entries_are_skipped() {
    let engine = make_engine().await;
    let mut listing = root_listing("r1", "d1");
    listing.push(RemoteListingEntry {
        id: None,
        ..entry("x", ROOT, "ghost", false, "g")
    });
    listing.push(entry("F9", "/files/elsewhere", "stray.txt", false, "s"));
    let mut markdown = entry("MD", ROOT, "readme.md", false, "m");
    markdown.content_type = "text/markdown".into();
    listing.push(markdown);

    let outcome = engine.apply_listing("alice", ROOT, &listing).await.unwrap();

    assert_eq!(outcome.skipped, 2);
    assert_eq!(outcome.adapted, 4);
    let store = engine.store();
    assert!(store.get("alice", "F9").await.unwrap().is_none());
    assert_eq!(
        store.get("alice", "MD").await.unwrap().unwrap().classification,
        ListingClassification::Document
    );
}

#[tokio::test]
async fn empty_listing_is_rejected() {
    let engine = make_engine().await;
    let err = engine.apply_listing("alice", ROOT, &[]).await.unwrap_err();
    assert!(matches!(err, EngineError::EmptyListing { .. }));
}

#[tokio::test]
async fn rejected_directory_entry_leaves_the_scope_alone() {
    let engine = make_engine().await;
    engine
        .apply_listing("alice", ROOT, &root_listing("r1", "d1"))
        .await
        .unwrap();
    let mut listing = root_listing("r2", "d1");
    listing[0].id = None;
    listing.truncate(1);
    let mut rx = engine.store().subscribe();

    let err = engine.apply_listing("alice", ROOT, &listing).await.unwrap_err();

    assert!(matches!(err, EngineError::RejectedDirectoryEntry { .. }));
    assert!(rx.try_recv().is_err());
    assert!(engine.store().get("alice", "F1").await.unwrap().is_some());
    assert_eq!(
        engine.store().get_directory("alice", "ROOT").await.unwrap().unwrap().etag,
        "r1"
    );
}

#[tokio::test]
async fn rejected_children_keep_their_stored_records() {
    let engine = make_engine().await;
    let mut listing = root_listing("r1", "d1");
    listing.push(entry("F3", ROOT, "gone.txt", false, "f3"));
    engine.apply_listing("alice", ROOT, &listing).await.unwrap();

    let mut relisted = root_listing("r2", "d1");
    relisted[1].date = Some("not-a-date".into());
    relisted[2].lock = Some(cloudmirror_core::RemoteLock {
        time: Some("later".into()),
        ..cloudmirror_core::RemoteLock::default()
    });
    let outcome = engine.apply_listing("alice", ROOT, &relisted).await.unwrap();

    assert_eq!(outcome.skipped, 2);
    assert_eq!(outcome.items.retained, 2);
    assert_eq!(outcome.items.removed, 1);
    assert_eq!(outcome.directories.retained, 1);
    let store = engine.store();
    assert_eq!(store.get("alice", "F1").await.unwrap().unwrap().etag, "f1");
    assert!(store.get("alice", "D1").await.unwrap().is_some());
    assert!(store.get_directory("alice", "D1").await.unwrap().is_some());
    assert!(store.get("alice", "F3").await.unwrap().is_none());
}

#[tokio::test]
async fn trailing_slash_names_the_same_scope() {
    let engine = make_engine().await;
    let scope = "/files/alice/";
    let mut listing = root_listing("r1", "d1");
    listing[1].server_path = scope.into();
    engine.apply_listing("alice", scope, &listing).await.unwrap();
    let store = engine.store();
    assert_eq!(store.query("alice", ROOT, None).await.unwrap().len(), 2);

    let mut rx = store.subscribe();
    let outcome = engine.apply_listing("alice", scope, &listing).await.unwrap();
    assert!(outcome.items.is_noop());
    assert!(outcome.directories.is_noop());
    assert!(rx.try_recv().is_err());

    let outcome = engine
        .apply_listing("alice", ROOT, &listing[..1])
        .await
        .unwrap();
    assert_eq!(outcome.items.removed, 2);
    assert_eq!(outcome.directories.removed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn parallel_scopes_reconcile_independently() {
    let dir = tempfile::tempdir().unwrap();
    let store = MetadataStore::open(&dir.path().join("metadata.db"))
        .await
        .unwrap();
    let engine = Arc::new(MirrorEngine::new(Arc::new(store)));
    engine
        .apply_listing("alice", ROOT, &root_listing("r1", "d1"))
        .await
        .unwrap();

    let docs = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .apply_listing(
                    "alice",
                    "/files/alice/Docs",
                    &[
                        entry("D1", ROOT, "Docs", true, "d1"),
                        entry("F2", "/files/alice/Docs", "b.txt", false, "f2"),
                    ],
                )
                .await
        })
    };
    let bob = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .apply_listing(
                    "bob",
                    "/files/bob",
                    &[
                        entry("BROOT", "/files", "bob", true, "b1"),
                        entry("BF", "/files/bob", "c.txt", false, "c"),
                    ],
                )
                .await
        })
    };
    docs.await.unwrap().unwrap();
    bob.await.unwrap().unwrap();

    let store = engine.store();
    assert!(store.get("alice", "F2").await.unwrap().is_some());
    assert!(store.get("bob", "BF").await.unwrap().is_some());
    assert!(store.get("alice", "F1").await.unwrap().is_some());
}
