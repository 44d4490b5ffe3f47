//! SQLite adapter contract tests.

use chrono::{Duration, Utc};
use ripple_store::{EventQuery, EventStore, SqliteEventStore};
use ripple_types::{
    ChangeEventPatch, ChangeSource, ChangeStatus, ChangeType, ErrorKind, Initiator, NewChangeEvent,
};

fn deploy(service: &str, summary: &str) -> NewChangeEvent {
    NewChangeEvent::new(service, ChangeType::Deployment, summary)
}

#[tokio::test]
async fn insert_fills_defaults_and_round_trips() {
    let store = SqliteEventStore::open_in_memory().await.unwrap();
    let inserted = store
        .insert(
            deploy("api", "deploy api v2")
                .also_affects("worker")
                .with_tag("release")
                .with_metadata("pipeline_id", "p-1"),
        )
        .await
        .unwrap();

    assert_eq!(inserted.source, ChangeSource::Manual);
    assert_eq!(inserted.initiator, Initiator::Unknown);
    assert_eq!(inserted.status, ChangeStatus::Completed);
    assert_eq!(inserted.environment, "production");

    let fetched = store.get(&inserted.id.to_string()).await.unwrap();
    assert_eq!(fetched, inserted, "JSON columns must round-trip losslessly");
}

#[tokio::test]
async fn file_backed_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");

    let store = SqliteEventStore::open(&path).await.unwrap();
    let inserted = store.insert(deploy("api", "persisted")).await.unwrap();
    store.close().await.unwrap();

    let reopened = SqliteEventStore::open(&path).await.unwrap();
    let fetched = reopened.get(&inserted.id.to_string()).await.unwrap();
    assert_eq!(fetched.summary, "persisted");
}

#[tokio::test]
async fn duplicate_idempotency_key_is_a_conflict() {
    let store = SqliteEventStore::open_in_memory().await.unwrap();
    store
        .insert(deploy("api", "first").with_idempotency_key("k-1"))
        .await
        .unwrap();
    let err = store
        .insert(deploy("api", "second").with_idempotency_key("k-1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.hint().is_some());

    let stored = store.get_by_idempotency_key("k-1").await.unwrap().unwrap();
    assert_eq!(stored.summary, "first");
    assert!(store.get_by_idempotency_key("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn query_matches_additional_services() {
    let store = SqliteEventStore::open_in_memory().await.unwrap();
    store
        .insert(deploy("api", "touches worker too").also_affects("worker"))
        .await
        .unwrap();
    store.insert(deploy("db", "db only")).await.unwrap();

    let results = store
        .query(EventQuery::builder().service("worker").build())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].service, "api");
}

#[tokio::test]
async fn query_filters_and_orders_newest_first() {
    let store = SqliteEventStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    store
        .insert(deploy("api", "older").at(now - Duration::minutes(30)))
        .await
        .unwrap();
    store
        .insert(
            NewChangeEvent::new("api", ChangeType::ConfigChange, "newer")
                .at(now - Duration::minutes(5))
                .in_environment("staging"),
        )
        .await
        .unwrap();

    let all = store.query(EventQuery::default()).await.unwrap();
    assert_eq!(all[0].summary, "newer");
    assert_eq!(all[1].summary, "older");

    let staging = store
        .query(EventQuery::builder().environment("staging").build())
        .await
        .unwrap();
    assert_eq!(staging.len(), 1);

    let deploys = store
        .query(EventQuery::builder().change_type(ChangeType::Deployment).build())
        .await
        .unwrap();
    assert_eq!(deploys.len(), 1);
    assert_eq!(deploys[0].summary, "older");

    let windowed = store
        .query(
            EventQuery::builder()
                .since(now - Duration::minutes(10))
                .until(now)
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(windowed.len(), 1);
    assert_eq!(windowed[0].summary, "newer");
}

#[tokio::test]
async fn search_is_prefix_based_and_synchronous_with_writes() {
    let store = SqliteEventStore::open_in_memory().await.unwrap();
    assert!(store.search("anything", 10).await.unwrap().is_empty());

    let event = store
        .insert(deploy("payments", "rolled out canary build"))
        .await
        .unwrap();

    // Visible immediately after the insert commits.
    let hits = store.search("canar", 10).await.unwrap();
    assert_eq!(hits.len(), 1);

    // Service names are indexed too.
    let hits = store.search("paym", 10).await.unwrap();
    assert_eq!(hits.len(), 1);

    // Tokens shorter than two characters are dropped.
    assert!(store.search("c", 10).await.unwrap().is_empty());

    // Updates re-index the summary.
    store
        .update(
            &event.id.to_string(),
            ChangeEventPatch::default().set_summary("emergency hotfix"),
        )
        .await
        .unwrap();
    assert!(store.search("canar", 10).await.unwrap().is_empty());
    assert_eq!(store.search("hotfix", 10).await.unwrap().len(), 1);

    // Deletes drop the index row.
    store.delete(&event.id.to_string()).await.unwrap();
    assert!(store.search("hotfix", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn update_touches_only_provided_fields() {
    let store = SqliteEventStore::open_in_memory().await.unwrap();
    let inserted = store
        .insert(deploy("api", "deploy").with_tag("keep-me"))
        .await
        .unwrap();

    let updated = store
        .update(
            &inserted.id.to_string(),
            ChangeEventPatch::default().set_status(ChangeStatus::Failed),
        )
        .await
        .unwrap();
    assert_eq!(updated.status, ChangeStatus::Failed);
    assert_eq!(updated.summary, "deploy");
    assert_eq!(updated.tags, vec!["keep-me"]);
    assert!(updated.updated_at >= inserted.updated_at);

    // Empty patch: no-op returning the current event.
    let unchanged = store
        .update(&inserted.id.to_string(), ChangeEventPatch::default())
        .await
        .unwrap();
    assert_eq!(unchanged.updated_at, updated.updated_at);
}

#[tokio::test]
async fn velocity_counts_per_type_and_measures_gaps() {
    let store = SqliteEventStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    store
        .insert(deploy("api", "d1").at(now - Duration::minutes(50)))
        .await
        .unwrap();
    store
        .insert(deploy("api", "d2").at(now - Duration::minutes(20)))
        .await
        .unwrap();
    store
        .insert(
            NewChangeEvent::new("api", ChangeType::ConfigChange, "c1")
                .at(now - Duration::minutes(10)),
        )
        .await
        .unwrap();

    let metric = store.velocity("api", 60).await.unwrap();
    assert_eq!(metric.change_count, 3);
    assert_eq!(metric.change_types[&ChangeType::Deployment], 2);
    assert_eq!(metric.change_types[&ChangeType::ConfigChange], 1);
    // Gaps are 30 and 10 minutes; dividing the window by the count would
    // report 20 only by coincidence here, so pin the gap-based value.
    assert!((metric.average_interval_minutes - 20.0).abs() < 0.5);
}

#[tokio::test]
async fn velocity_trend_returns_oldest_first_windows() {
    let store = SqliteEventStore::open_in_memory().await.unwrap();
    store.insert(deploy("api", "just now")).await.unwrap();

    let trend = store.velocity_trend("api", 60, 3).await.unwrap();
    assert_eq!(trend.len(), 3);
    assert_eq!(trend[0].change_count, 0);
    assert_eq!(trend[1].change_count, 0);
    assert_eq!(trend[2].change_count, 1);
    assert!(trend[0].window_end <= trend[1].window_start + Duration::seconds(1));
}

#[tokio::test]
async fn prune_reports_exact_deletions_and_clears_the_index() {
    let store = SqliteEventStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    store
        .insert(deploy("api", "ancient deploy").at(now - Duration::days(100)))
        .await
        .unwrap();
    store.insert(deploy("api", "recent deploy")).await.unwrap();

    assert_eq!(store.prune_older_than(30).await.unwrap(), 1);
    assert_eq!(store.stats().await.unwrap().total, 1);
    let hits = store.search("ancient", 10).await.unwrap();
    assert!(hits.is_empty(), "pruned rows must leave the search index");
}

#[tokio::test]
async fn stats_aggregate_by_type_source_environment() {
    let store = SqliteEventStore::open_in_memory().await.unwrap();
    store.insert(deploy("api", "a")).await.unwrap();
    store
        .insert(
            NewChangeEvent::new("api", ChangeType::ConfigChange, "b")
                .from_source(ChangeSource::Github)
                .in_environment("staging"),
        )
        .await
        .unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_type[&ChangeType::Deployment], 1);
    assert_eq!(stats.by_type[&ChangeType::ConfigChange], 1);
    assert_eq!(stats.by_source[&ChangeSource::Manual], 1);
    assert_eq!(stats.by_source[&ChangeSource::Github], 1);
    assert_eq!(stats.by_environment["production"], 1);
    assert_eq!(stats.by_environment["staging"], 1);
}

#[tokio::test]
async fn batch_insert_is_all_or_nothing() {
    let store = SqliteEventStore::open_in_memory().await.unwrap();
    let err = store
        .insert_batch(vec![
            deploy("api", "good"),
            NewChangeEvent::default(), // fails validation
            deploy("db", "never lands"),
        ])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    assert_eq!(store.stats().await.unwrap().total, 0);

    let events = store
        .insert_batch(vec![deploy("api", "one"), deploy("db", "two")])
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(store.stats().await.unwrap().total, 2);
}

#[tokio::test]
async fn closed_store_fails_unavailable() {
    let store = SqliteEventStore::open_in_memory().await.unwrap();
    store.close().await.unwrap();
    let err = store.insert(deploy("api", "x")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    let err = store.stats().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}
