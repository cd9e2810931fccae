mod common;

use common::{Reply, ScriptedFeed, article, date, harvest_config};
use pubsift_pubmed::Synchronizer;
use pubsift_store::objects::paths;
use pubsift_store::{Inventory, MemoryBlobStore, RawNotice, Tombstones, get_objects, put_objects};

fn stored(store: &MemoryBlobStore, partition: chrono::NaiveDate) -> Vec<RawNotice> {
    get_objects(store, "pubmed", &paths::notices(partition)).unwrap()
}

fn pmids(notices: &[RawNotice]) -> Vec<&str> {
    notices.iter().map(|n| n.pmid.as_str()).collect()
}

#[test]
fn first_sync_fetches_every_match_across_pages() {
    let partition = date(2021, 4, 26);
    let feed = ScriptedFeed::new();
    for pmid in ["1", "2", "3"] {
        feed.record(pmid, date(2021, 4, 27), Reply::Notice(article(pmid, "Paris")));
    }
    let store = MemoryBlobStore::new();
    let sync = Synchronizer::new(&feed, &store, harvest_config()).with_today(date(2021, 5, 1));

    let report = sync.sync_partition(partition, false).unwrap();
    assert_eq!(report.matched, 3);
    assert_eq!(report.fetched, 3);
    assert!(report.written);
    assert_eq!(pmids(&stored(&store, partition)), vec!["1", "2", "3"]);

    let inventory = Inventory::load(&store, "pubmed", partition).unwrap();
    assert_eq!(inventory.len(), 3);
    assert_eq!(inventory.window_anchor(), Some(date(2021, 5, 1)));
}

#[test]
fn second_sync_of_unchanged_partition_writes_nothing() {
    let partition = date(2021, 4, 26);
    let feed = ScriptedFeed::new();
    feed.record("1", date(2021, 4, 27), Reply::Notice(article("1", "Paris")));
    let store = MemoryBlobStore::new();
    let sync = Synchronizer::new(&feed, &store, harvest_config()).with_today(date(2021, 5, 1));

    sync.sync_partition(partition, false).unwrap();
    let puts = store.put_count();

    let report = sync.sync_partition(partition, false).unwrap();
    assert!(!report.written);
    assert_eq!(report.candidates, 0);
    assert_eq!(store.put_count(), puts);
    assert_eq!(feed.fetches(), vec!["1"]);

    let last_window = *feed.windows.lock().unwrap().last().unwrap();
    assert_eq!(last_window.modified_since, Some(date(2021, 5, 1)));
}

#[test]
fn duplicate_entries_keep_the_newest() {
    let partition = date(2021, 4, 26);
    let store = MemoryBlobStore::new();
    put_objects(
        &store,
        "pubmed",
        &paths::notices(partition),
        &[RawNotice::new("123", "A"), RawNotice::new("123", "B")],
    )
    .unwrap();
    let feed = ScriptedFeed::new();
    let sync = Synchronizer::new(&feed, &store, harvest_config());

    let report = sync.sync_partition(partition, false).unwrap();
    assert_eq!(report.duplicates, 1);
    assert_eq!(stored(&store, partition), vec![RawNotice::new("123", "B")]);
}

#[test]
fn removed_identifiers_never_reach_the_live_set() {
    let partition = date(2021, 4, 26);
    let store = MemoryBlobStore::new();
    put_objects(
        &store,
        "pubmed",
        &paths::notices(partition),
        &[RawNotice::new("5", "old"), RawNotice::new("6", "old")],
    )
    .unwrap();
    let feed = ScriptedFeed::new();
    feed.record("5", date(2021, 4, 27), Reply::Notice(article("5", "Paris")));
    feed.record("7", date(2021, 4, 27), Reply::Deleted);
    let removed: Tombstones = ["5".to_string()].into_iter().collect();
    let sync = Synchronizer::new(&feed, &store, harvest_config()).with_removed(removed);

    let report = sync.sync_partition(partition, false).unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(feed.fetches(), vec!["7"]);
    assert_eq!(pmids(&stored(&store, partition)), vec!["6"]);

    let inventory = Inventory::load(&store, "pubmed", partition).unwrap();
    assert!(inventory.is_tombstoned("7"));

    // A deleted identifier is not fetched again
    sync.sync_partition(partition, true).unwrap();
    assert_eq!(feed.fetches(), vec!["7"]);
}

#[test]
fn deletion_upstream_drops_the_stored_copy() {
    let partition = date(2021, 4, 26);
    let store = MemoryBlobStore::new();
    put_objects(
        &store,
        "pubmed",
        &paths::notices(partition),
        &[RawNotice::new("5", article("5", "Paris")), RawNotice::new("6", "kept")],
    )
    .unwrap();
    let feed = ScriptedFeed::new();
    feed.record("5", date(2021, 4, 27), Reply::Deleted);
    let sync = Synchronizer::new(&feed, &store, harvest_config());

    let report = sync.sync_partition(partition, false).unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.fetched, 0);
    assert_eq!(stored(&store, partition), vec![RawNotice::new("6", "kept")]);
    let inventory = Inventory::load(&store, "pubmed", partition).unwrap();
    assert!(inventory.is_tombstoned("5"));

    // The tombstone outlives later searches that still match the identifier
    sync.sync_partition(partition, true).unwrap();
    assert_eq!(feed.fetches(), vec!["5"]);
    assert_eq!(pmids(&stored(&store, partition)), vec!["6"]);
}

#[test]
fn failed_fetch_leaves_a_placeholder_that_is_retried() {
    let partition = date(2021, 4, 26);
    let feed = ScriptedFeed::new();
    feed.record("8", date(2021, 4, 27), Reply::Fail);
    let store = MemoryBlobStore::new();
    let sync = Synchronizer::new(&feed, &store, harvest_config()).with_today(date(2021, 5, 1));

    let report = sync.sync_partition(partition, false).unwrap();
    assert_eq!(report.failed, 1);
    // Fast attempt, then the slow one
    assert_eq!(feed.fetches(), vec!["8", "8"]);
    assert_eq!(stored(&store, partition), vec![RawNotice::placeholder("8")]);

    feed.reply("8", Reply::Notice(article("8", "Paris")));
    let report = sync.sync_partition(partition, false).unwrap();
    assert_eq!(report.fetched, 1);
    let notices = stored(&store, partition);
    assert_eq!(notices.len(), 1);
    assert!(!notices[0].is_empty());
}

#[test]
fn failed_refetch_keeps_the_previous_payload() {
    let partition = date(2021, 4, 26);
    let store = MemoryBlobStore::new();
    put_objects(&store, "pubmed", &paths::notices(partition), &[RawNotice::new("9", "good")]).unwrap();
    let feed = ScriptedFeed::new();
    feed.record("9", date(2021, 4, 27), Reply::Fail);
    let sync = Synchronizer::new(&feed, &store, harvest_config());

    let report = sync.sync_partition(partition, false).unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(stored(&store, partition), vec![RawNotice::new("9", "good")]);
}
