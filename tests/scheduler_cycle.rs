// tests/scheduler_cycle.rs
mod common;

use chrono::NaiveDate;
use common::{batch, record, FakeCatalog, FakeFeed};
use std::sync::Arc;
use std::time::Duration;

use nowplaying_sync::catalog::{CatalogError, Playlist};
use nowplaying_sync::dedup::{CycleSeen, DedupStore};
use nowplaying_sync::scheduler::{RecordOutcome, SchedulerConfig, SyncScheduler};

fn target() -> Playlist {
    Playlist {
        id: "p-oct".into(),
        name: "KMHD-2025-10".into(),
        ..Default::default()
    }
}

fn catalog() -> FakeCatalog {
    FakeCatalog::new()
        .with_artist("a-evans", "Bill Evans", &[("e1", "Peace Piece", "Everybody Digs Bill Evans")])
        .with_artist("a-jamal", "Ahmad Jamal", &[("j1", "Poinciana", "At the Pershing")])
        .with_artist("a-monk", "Thelonious Monk", &[("m1", "Blue Monk", "Thelonious Monk Trio")])
        .with_artist("a-simone", "Nina Simone", &[("n1", "Sinnerman", "Pastel Blues")])
}

fn feed_records() -> Vec<nowplaying_sync::FeedRecord> {
    vec![
        record("Bill Evans", "Peace Piece", "Everybody Digs Bill Evans"),
        record("Ahmad Jamal", "Poinciana", ""),
        record("Thelonious Monk", "Blue Monk", ""),
        record("Nina Simone", "Sinnerman", "Pastel Blues"),
    ]
}

fn scheduler(feed: Arc<FakeFeed>, cat: Arc<FakeCatalog>) -> SyncScheduler {
    let cfg = SchedulerConfig {
        min_confidence: 0.5,
        base_interval: Duration::from_millis(10),
        jitter_max: Duration::from_millis(20),
    };
    SyncScheduler::new(feed, cat, target(), cfg)
}

#[tokio::test]
async fn second_identical_cycle_finds_nothing_new() {
    let feed = Arc::new(FakeFeed::repeating(batch(feed_records())));
    let cat = Arc::new(catalog());
    let mut s = scheduler(feed.clone(), cat.clone());

    let mut first = CycleSeen::new();
    let sum = s.run_cycle(&mut first).await;
    assert_eq!(sum.fetched, 4);
    assert_eq!(sum.new_records, 4);
    assert_eq!(sum.synced, 4);
    assert_eq!(first.len(), 4);
    assert!(first.contains("Bill Evans - Peace Piece"));

    let mut second = CycleSeen::new();
    let sum = s.run_cycle(&mut second).await;
    assert_eq!(sum.fetched, 4);
    assert_eq!(sum.new_records, 0);
    assert!(sum.outcomes.is_empty());
    assert!(second.is_empty());
    assert_eq!(s.dedup_store().len(), 4);
    assert_eq!(feed.fetch_count(), 2);
    assert_eq!(cat.playlist_tracks("p-oct"), vec!["e1", "j1", "m1", "n1"]);
}

#[tokio::test]
async fn repeat_play_within_batch_is_processed_once() {
    let mut recs = feed_records();
    recs.push(record("Bill Evans", "Peace Piece", ""));
    let feed = Arc::new(FakeFeed::repeating(batch(recs)));
    let cat = Arc::new(catalog());
    let mut s = scheduler(feed, cat.clone());

    let sum = s.run_once().await;
    assert_eq!(sum.fetched, 5);
    assert_eq!(sum.new_records, 4);
    assert_eq!(cat.count_calls("add:"), 4);
}

#[tokio::test]
async fn one_bad_record_does_not_stop_the_rest() {
    let feed = Arc::new(FakeFeed::repeating(batch(feed_records())));
    let cat = Arc::new(catalog());
    cat.fail_add_of(
        "m1",
        CatalogError::Status {
            status: 500,
            message: "boom".into(),
        },
    );
    let mut s = scheduler(feed, cat.clone());

    let sum = s.run_once().await;
    assert_eq!(sum.synced, 3);
    assert_eq!(sum.failed, 1);
    assert_eq!(sum.outcomes.len(), 4);
    assert!(matches!(
        &sum.outcomes[2],
        (key, RecordOutcome::WriteFailed { rate_limited: false, .. }) if key == "Thelonious Monk - Blue Monk"
    ));
    assert!(matches!(sum.outcomes[3].1, RecordOutcome::Synced { .. }));
    assert_eq!(cat.playlist_tracks("p-oct"), vec!["e1", "j1", "n1"]);
}

#[tokio::test]
async fn rate_limited_write_is_flagged() {
    let feed = Arc::new(FakeFeed::repeating(batch(vec![record("Nina Simone", "Sinnerman", "")])));
    let cat = Arc::new(catalog());
    cat.fail_add_of("n1", CatalogError::RateLimited { retry_after_secs: None });
    let mut s = scheduler(feed, cat);

    let sum = s.run_once().await;
    assert!(matches!(
        sum.outcomes[0].1,
        RecordOutcome::WriteFailed { rate_limited: true, .. }
    ));
}

#[tokio::test]
async fn unmatched_and_weak_matches_are_skipped() {
    let recs = vec![
        record("Unknown Quartet", "Anything", ""),
        // right artist, unrelated song and album: roughly 0.55 overall
        record("Nina Simone", "Zzyzx Road", "Completely Different"),
        record("Bill Evans", "Peace Piece", ""),
    ];
    let feed = Arc::new(FakeFeed::repeating(batch(recs)));
    let cat = Arc::new(catalog());
    let cfg = SchedulerConfig {
        min_confidence: 0.7,
        ..SchedulerConfig::default()
    };
    let mut s = SyncScheduler::new(feed, cat.clone(), target(), cfg);

    let sum = s.run_once().await;
    assert!(matches!(sum.outcomes[0].1, RecordOutcome::NoMatch { .. }));
    assert!(matches!(
        sum.outcomes[1].1,
        RecordOutcome::LowConfidence { confidence } if confidence < 0.7
    ));
    assert!(matches!(sum.outcomes[2].1, RecordOutcome::Synced { .. }));
    assert_eq!((sum.synced, sum.skipped, sum.failed), (1, 2, 0));
    assert_eq!(cat.playlist_tracks("p-oct"), vec!["e1"]);
}

#[tokio::test]
async fn tracks_already_in_playlist_are_skipped() {
    let feed = Arc::new(FakeFeed::repeating(batch(feed_records())));
    let cat = Arc::new(catalog().with_contents("p-oct", &["j1"]));
    let mut s = scheduler(feed, cat.clone());

    let sum = s.run_once().await;
    assert!(matches!(sum.outcomes[1].1, RecordOutcome::Duplicate { .. }));
    assert_eq!(sum.synced, 3);
    assert_eq!(cat.count_calls("add:"), 3);
}

#[tokio::test]
async fn failed_membership_check_still_writes() {
    let feed = Arc::new(FakeFeed::repeating(batch(feed_records())));
    let cat = Arc::new(catalog());
    cat.fail_checks(CatalogError::Transport("reset".into()));
    let mut s = scheduler(feed, cat.clone());

    let sum = s.run_once().await;
    assert_eq!(sum.synced, 4);
}

#[tokio::test]
async fn failed_fetch_ends_cycle_but_not_scheduler() {
    let feed = Arc::new(FakeFeed::scripted(vec![
        Err(500),
        Ok(batch(feed_records())),
    ]));
    let cat = Arc::new(catalog());
    let mut s = scheduler(feed.clone(), cat.clone());

    let sum = s.run_once().await;
    assert!(sum.fetch_error.is_some());
    assert_eq!(sum.fetched, 0);
    assert!(sum.outcomes.is_empty());
    assert!(cat.calls().is_empty());

    let sum = s.run_once().await;
    assert!(sum.fetch_error.is_none());
    assert_eq!(sum.synced, 4);
}

#[tokio::test]
async fn continuous_mode_keeps_cycling() {
    let feed = Arc::new(FakeFeed::repeating(batch(feed_records())));
    let cat = Arc::new(catalog());
    let mut s = scheduler(feed.clone(), cat);

    // base 10ms + up to 20ms jitter; give it room for several cycles
    let _ = tokio::time::timeout(Duration::from_millis(300), s.run_continuous()).await;
    assert!(feed.fetch_count() >= 3, "only {} fetches", feed.fetch_count());
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn rotating(feed: Arc<FakeFeed>, cat: Arc<FakeCatalog>) -> SyncScheduler {
    scheduler(feed, cat).with_period("KMHD", chrono_tz::America::Los_Angeles)
}

#[tokio::test]
async fn new_month_rotates_destination() {
    let feed = Arc::new(FakeFeed::scripted(vec![
        Ok(batch(vec![record("Bill Evans", "Peace Piece", "")])),
        Ok(batch(vec![record("Ahmad Jamal", "Poinciana", "")])),
    ]));
    let cat = Arc::new(catalog().with_playlist("p-oct", "KMHD-2025-10"));
    let mut s = rotating(feed, cat.clone());

    let sum = s.run_cycle_on(ymd(2025, 10, 31), &mut CycleSeen::new()).await;
    assert_eq!(sum.synced, 1);
    assert_eq!(s.collection().id, "p-oct");
    assert_eq!(cat.count_calls("create:"), 0);

    let sum = s.run_cycle_on(ymd(2025, 11, 1), &mut CycleSeen::new()).await;
    assert_eq!(sum.synced, 1);
    assert_eq!(s.collection().name, "KMHD-2025-11");
    assert_eq!(cat.count_calls("create:KMHD-2025-11:"), 1);
    assert_eq!(cat.playlist_tracks("p-oct"), vec!["e1"]);
    assert_eq!(cat.playlist_tracks(&s.collection().id), vec!["j1"]);
}

#[tokio::test]
async fn same_month_does_not_relist_playlists() {
    let feed = Arc::new(FakeFeed::repeating(batch(feed_records())));
    let cat = Arc::new(catalog());
    let mut s = rotating(feed, cat.clone());

    s.run_cycle_on(ymd(2025, 10, 12), &mut CycleSeen::new()).await;
    assert_eq!(cat.count_calls("user_playlists:"), 0);
    assert_eq!(cat.playlist_tracks("p-oct").len(), 4);
}

#[tokio::test]
async fn failed_rotation_keeps_previous_playlist() {
    let feed = Arc::new(FakeFeed::repeating(batch(vec![record("Nina Simone", "Sinnerman", "")])));
    let cat = Arc::new(catalog());
    cat.fail_playlist_listing(CatalogError::Transport("reset".into()));
    let mut s = rotating(feed, cat.clone());

    let sum = s.run_cycle_on(ymd(2025, 11, 2), &mut CycleSeen::new()).await;
    assert_eq!(sum.synced, 1);
    assert_eq!(s.collection().id, "p-oct");
    assert_eq!(cat.playlist_tracks("p-oct"), vec!["n1"]);
}

#[tokio::test]
async fn continuous_loop_runs_as_spawned_task() {
    let feed = Arc::new(FakeFeed::repeating(batch(feed_records())));
    let mut s = scheduler(feed.clone(), Arc::new(catalog()));

    let handle = tokio::spawn(async move { s.run_continuous().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
    assert!(feed.fetch_count() >= 1);
}

#[test]
fn delay_stays_within_jitter_window() {
    let s = scheduler(
        Arc::new(FakeFeed::repeating(batch(vec![]))),
        Arc::new(FakeCatalog::new()),
    );
    for _ in 0..200 {
        let d = s.next_delay();
        assert!(d >= Duration::from_millis(10));
        assert!(d <= Duration::from_millis(30));
    }
}
