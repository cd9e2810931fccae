mod common;

use common::{CityMatcher, FakeBulk, article};
use pubsift_core::Publication;
use pubsift_geo::{Enricher, MemoryCache, Resolver, ResolverConfig};
use pubsift_pubmed::{BulkConfig, BulkDump, ChunkProcessor, Eligibility, ProcessedRecord, RegionConfig, Scheduler};
use pubsift_store::objects::paths;
use pubsift_store::{MemoryBlobStore, RawNotice, Tombstones, get_objects, put_objects};

fn dump(pmids: impl IntoIterator<Item = usize>, deleted: &[&str]) -> BulkDump {
    BulkDump {
        notices: pmids
            .into_iter()
            .map(|n| RawNotice::new(n.to_string(), format!("<PubmedArticle>{n}</PubmedArticle>")))
            .collect(),
        deleted: deleted.iter().map(|s| s.to_string()).collect(),
    }
}

fn mark_processed(store: &MemoryBlobStore, file_key: &str, index: usize, count: usize) {
    let records: Vec<ProcessedRecord> = (0..count)
        .map(|n| ProcessedRecord::Skipped {
            pmid: n.to_string(),
            skipped: true,
        })
        .collect();
    put_objects(store, "medline", &paths::processed(file_key, index, None), &records).unwrap();
}

#[test]
fn missing_file_is_split_into_chunks() {
    let bulk = FakeBulk::new(vec![("pubmed24n0002", dump(1..=2400, &["77"]))]);
    let store = MemoryBlobStore::new();
    let scheduler = Scheduler::new(&bulk, &store, BulkConfig::default());

    let plans = scheduler.plan_all(None).unwrap();
    assert_eq!(plans.len(), 1);
    let plan = &plans[0];
    assert!(plan.materialized);
    let sizes: Vec<usize> = plan.chunks.iter().map(|c| c.raw_count).collect();
    assert_eq!(sizes, vec![1000, 1000, 400]);
    assert_eq!(plan.pending().count(), 3);
    assert!(store.contains("medline", "removed/pubmed24n0002"));
    assert!(store.contains("medline", "notices/pubmed24n0002_2"));
    assert!(!store.contains("medline", "notices/pubmed24n0002_3"));

    // Stored chunks are probed, not downloaded again
    let plans = scheduler.plan_all(None).unwrap();
    assert!(!plans[0].materialized);
    assert_eq!(plans[0].chunks.len(), 3);
    assert_eq!(bulk.downloads(), vec!["pubmed24n0002"]);
}

#[test]
fn failed_download_does_not_stop_other_files() {
    let bulk = FakeBulk::new(vec![
        ("pubmed24n0004", dump([1, 2], &[])),
        ("pubmed24n0003", dump([3], &[])),
    ])
    .unreachable("pubmed24n0002");
    let store = MemoryBlobStore::new();
    let scheduler = Scheduler::new(&bulk, &store, BulkConfig::default());

    let plans = scheduler.plan_all(None).unwrap();
    assert_eq!(plans.len(), 3);
    assert!(plans[..2].iter().all(|p| p.failed.is_none() && p.pending().count() == 1));
    let broken = &plans[2];
    assert_eq!(broken.file.key, "pubmed24n0002");
    assert!(broken.failed.as_deref().is_some_and(|e| e.contains("no dump")));
    assert!(!broken.materialized);
    assert!(broken.chunks.is_empty());
    assert!(!store.contains("medline", "notices/pubmed24n0002_0"));

    // Only the broken file is downloaded again
    let plans = scheduler.plan_all(None).unwrap();
    assert!(plans[2].failed.is_some());
    assert_eq!(
        bulk.downloads(),
        vec!["pubmed24n0004", "pubmed24n0003", "pubmed24n0002", "pubmed24n0002"]
    );
}

#[test]
fn incomplete_last_chunk_marks_every_chunk() {
    let bulk = FakeBulk::new(vec![("pubmed24n0001", dump(1..=3000, &[]))]);
    let store = MemoryBlobStore::new();
    let scheduler = Scheduler::new(&bulk, &store, BulkConfig::default());
    scheduler.plan_all(None).unwrap();

    mark_processed(&store, "pubmed24n0001", 0, 1000);
    mark_processed(&store, "pubmed24n0001", 1, 1000);
    mark_processed(&store, "pubmed24n0001", 2, 400);
    let plans = scheduler.plan_all(None).unwrap();
    let chunks = &plans[0].chunks;
    assert_eq!((chunks[2].raw_count, chunks[2].processed_count), (1000, 400));
    assert!(chunks.iter().all(|c| c.needs_processing));
    assert_eq!(chunks[0].eligible.len(), 1000);

    mark_processed(&store, "pubmed24n0001", 2, 1000);
    let plans = scheduler.plan_all(None).unwrap();
    assert_eq!(plans[0].pending().count(), 0);
}

#[test]
fn newer_files_and_deletions_shadow_older_chunks() {
    let bulk = FakeBulk::new(vec![
        ("pubmed24n0003", dump([1, 2], &["3"])),
        ("pubmed24n0002", dump([2, 3, 4], &[])),
    ]);
    let store = MemoryBlobStore::new();
    let scheduler = Scheduler::new(&bulk, &store, BulkConfig::default());

    let plans = scheduler.plan_all(None).unwrap();
    assert_eq!(plans[0].chunks[0].eligible, vec!["1", "2"]);
    assert_eq!(plans[1].chunks[0].eligible, vec!["4"]);
    assert_eq!(scheduler.eligible_ids("pubmed24n0002", 0).unwrap(), vec!["4"]);
    assert!(scheduler.eligible_ids("pubmed24n0009", 0).is_err());
    assert!(scheduler.eligible_ids("pubmed24n0002", 5).is_err());
}

#[test]
fn limit_plans_newest_files_only() {
    let bulk = FakeBulk::new(vec![
        ("pubmed24n0003", dump([1], &[])),
        ("pubmed24n0002", dump([2], &[])),
    ]);
    let store = MemoryBlobStore::new();
    let scheduler = Scheduler::new(&bulk, &store, BulkConfig::default());
    let plans = scheduler.plan_all(Some(1)).unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(bulk.downloads(), vec!["pubmed24n0003"]);
}

#[test]
fn processed_chunk_converges_to_its_raw_count() {
    let notices = vec![
        RawNotice::new("10", article("10", "Hopital Necker, Paris")),
        RawNotice::new("11", article("11", "Harvard, Boston")),
        RawNotice::new("12", "<PubmedArticleSet></PubmedArticleSet>"),
        RawNotice::new("13", article("13", "Paris")),
    ];
    let bulk = FakeBulk::new(vec![("pubmed24n0005", BulkDump {
        notices,
        deleted: vec!["13".into()],
    })]);
    let store = MemoryBlobStore::new();
    let scheduler = Scheduler::new(&bulk, &store, BulkConfig::default());
    let region = RegionConfig {
        name: "fr".into(),
        countries: vec!["fr".into()],
    };
    let matcher = CityMatcher;
    let cache = MemoryCache::new();
    let enricher = Enricher::Local(Resolver::new(&matcher, &cache, ResolverConfig::default()));
    let processor = ChunkProcessor::new(&store, "medline", &enricher, &region);

    let plans = scheduler.plan_all(None).unwrap();
    let chunk = plans[0].pending().next().unwrap();
    assert_eq!(chunk.raw_count, 3);

    let report = processor.process_chunk(&chunk.file_key, chunk.index, &chunk.eligible).unwrap();
    assert_eq!((report.parsed, report.skipped, report.kept), (2, 1, 1));

    let subset: Vec<Publication> = get_objects(&store, "medline", &paths::processed("pubmed24n0005", 0, Some("fr"))).unwrap();
    assert_eq!(subset.len(), 1);
    assert_eq!(subset[0].pmid, "10");

    let plans = scheduler.plan_all(None).unwrap();
    assert_eq!(plans[0].chunks[0].processed_count, 3);
    assert_eq!(plans[0].pending().count(), 0);

    // Reprocessing overwrites with the same output
    let again = processor.process_chunk("pubmed24n0005", 0, &["10".into(), "11".into(), "12".into()]).unwrap();
    assert_eq!(again, report);
}

#[test]
fn eligibility_starts_from_stored_deletions() {
    let store = MemoryBlobStore::new();
    put_objects(
        &store,
        "medline",
        &paths::removed("pubmed24n0009"),
        &[pubsift_store::objects::RemovedId { pmid: "1".into() }],
    )
    .unwrap();
    let tombstones = Tombstones::load(&store, "medline").unwrap();
    let mut eligibility = Eligibility::new(tombstones);
    assert_eq!(eligibility.admit(&[RawNotice::new("1", "x"), RawNotice::new("2", "y")]), vec!["2"]);
}
