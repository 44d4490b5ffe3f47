//! End-to-end facade tests: ingest pipeline, idempotency, triage, health.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use ripple_graph::ServiceGraph;
use ripple_service::{
    BlastRadiusRequest, ChangeIntelligence, CorrelateRequest, ServiceConfig, TriageRequest,
};
use ripple_store::{EventStore, MemoryEventStore};
use ripple_types::{
    ChangeType, DependencySpec, ErrorKind, NewChangeEvent, RiskLevel,
};

fn service_with_graph() -> ChangeIntelligence {
    let mut graph = ServiceGraph::new();
    graph.add_dependency(DependencySpec::new("web", "api"));
    graph.add_dependency(DependencySpec::new("api", "db"));
    ChangeIntelligence::new(Arc::new(MemoryEventStore::new())).with_graph(graph)
}

fn deploy(service: &str, summary: &str) -> NewChangeEvent {
    NewChangeEvent::new(service, ChangeType::Deployment, summary)
}

#[tokio::test]
async fn ingest_attaches_blast_radius_when_graph_present() {
    let service = service_with_graph();
    let outcome = service
        .create_event(deploy("db", "migrate schema"), None)
        .await
        .unwrap();
    assert!(outcome.created);

    let prediction = outcome.event.blast_radius.expect("prediction attached");
    assert_eq!(prediction.direct_services, vec!["api"]);
    assert_eq!(prediction.downstream_services, vec!["web"]);
    assert_eq!(prediction.risk_level, RiskLevel::Critical);

    // The stored row carries the prediction too.
    let stored = service
        .get_event(&outcome.event.id.to_string())
        .await
        .unwrap();
    assert!(stored.blast_radius.is_some());
}

#[tokio::test]
async fn ingest_without_graph_skips_blast_radius() {
    let service = ChangeIntelligence::new(Arc::new(MemoryEventStore::new()));
    let outcome = service
        .create_event(deploy("api", "deploy"), None)
        .await
        .unwrap();
    assert!(outcome.event.blast_radius.is_none());
}

#[tokio::test]
async fn idempotent_replay_returns_stored_event_unchanged() {
    let service = service_with_graph();
    let first = service
        .create_event(deploy("api", "original summary"), Some("key-1".into()))
        .await
        .unwrap();
    assert!(first.created);

    // Retry with a different payload: same id, no mutation.
    let replay = service
        .create_event(deploy("api", "retry with new words"), Some("key-1".into()))
        .await
        .unwrap();
    assert!(!replay.created);
    assert_eq!(replay.event.id, first.event.id);
    assert_eq!(replay.event.summary, "original summary");
    assert_eq!(replay.event.updated_at, first.event.updated_at);
}

#[tokio::test]
async fn observers_fire_after_commit_with_prediction_attached() {
    let service = service_with_graph();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let had_prediction = Arc::new(AtomicUsize::new(0));

    let seen_clone = seen.clone();
    let flag = had_prediction.clone();
    service.subscribe(Arc::new(move |event: &ripple_types::ChangeEvent| {
        seen_clone.lock().push(event.summary.clone());
        if event.blast_radius.is_some() {
            flag.fetch_add(1, Ordering::SeqCst);
        }
    }));

    service
        .create_event(deploy("db", "observed deploy"), None)
        .await
        .unwrap();
    assert_eq!(seen.lock().as_slice(), ["observed deploy"]);
    assert_eq!(had_prediction.load(Ordering::SeqCst), 1);

    // Duplicate replay does not re-notify.
    service
        .create_event(deploy("db", "x").with_idempotency_key("dup"), None)
        .await
        .unwrap();
    service
        .create_event(deploy("db", "y").with_idempotency_key("dup"), None)
        .await
        .unwrap();
    assert_eq!(seen.lock().len(), 2);
}

#[tokio::test]
async fn batch_ingest_enriches_and_notifies_per_event() {
    let service = service_with_graph();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    service.subscribe(Arc::new(move |_: &ripple_types::ChangeEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let events = service
        .batch_create(vec![deploy("api", "one"), deploy("db", "two")])
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.blast_radius.is_some()));
    assert_eq!(count.load(Ordering::SeqCst), 2);

    let err = service
        .batch_create(vec![deploy("api", "ok"), NewChangeEvent::default()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(count.load(Ordering::SeqCst), 2, "aborted batch never notifies");
}

#[tokio::test]
async fn correlate_includes_change_sets_on_request() {
    let service = service_with_graph();
    let now = Utc::now();
    service
        .create_event(
            deploy("api", "suspect deploy")
                .at(now - Duration::minutes(5))
                .with_metadata("pipeline_id", "p-7"),
            None,
        )
        .await
        .unwrap();

    let report = service
        .correlate(CorrelateRequest {
            affected_services: vec!["web".into()],
            incident_time: Some(now),
            include_change_sets: true,
            ..CorrelateRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(report.correlations.len(), 1);
    let sets = report.change_sets.unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].change_set.key, "run:manual:p-7");
    assert!(sets[0].suggested_blast_radius.is_some());

    let err = service
        .correlate(CorrelateRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn blast_radius_without_graph_degrades_to_isolated() {
    let service = ChangeIntelligence::new(Arc::new(MemoryEventStore::new()));
    let prediction = service
        .blast_radius(BlastRadiusRequest {
            services: vec!["api".into()],
            ..BlastRadiusRequest::default()
        })
        .unwrap();
    assert_eq!(prediction.risk_level, RiskLevel::Low);
    assert!(prediction.rationale.iter().any(|r| r.contains("isolated")));
}

#[tokio::test]
async fn velocity_validates_and_reports_trend() {
    let service = service_with_graph();
    service.create_event(deploy("api", "now"), None).await.unwrap();

    let report = service.velocity("api", 60, 3).await.unwrap();
    assert_eq!(report.current.change_count, 1);
    assert_eq!(report.trend.len(), 3);
    assert_eq!(report.trend[2].change_count, 1);

    let err = service.velocity("", 60, 3).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = service.velocity("api", 0, 3).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn triage_derives_suspects_from_recent_activity() {
    let service = service_with_graph();
    let now = Utc::now();
    // api is the noisiest service in the window.
    for i in 0..3 {
        service
            .create_event(
                deploy("api", &format!("api deploy {i}")).at(now - Duration::minutes(10 + i)),
                None,
            )
            .await
            .unwrap();
    }
    service
        .create_event(
            deploy("db", "db migration").at(now - Duration::minutes(12)),
            None,
        )
        .await
        .unwrap();

    let report = service
        .triage(TriageRequest {
            incident_time: Some(now),
            ..TriageRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(report.suspected_services[0], "api", "busiest service first");
    assert!(report.suspected_services.contains(&"db".to_string()));
    assert!(!report.correlations.is_empty());
    assert!(report.change_sets.len() <= 3);
}

#[tokio::test]
async fn triage_symptom_tags_annotate_matches() {
    let service = service_with_graph();
    let now = Utc::now();
    service
        .create_event(
            deploy("api", "latency fix")
                .at(now - Duration::minutes(5))
                .with_tag("latency"),
            None,
        )
        .await
        .unwrap();

    let report = service
        .triage(TriageRequest {
            incident_time: Some(now),
            suspected_services: vec!["api".into()],
            symptom_tags: vec!["latency".into()],
            ..TriageRequest::default()
        })
        .await
        .unwrap();
    let correlation = &report.correlations[0];
    assert!(correlation
        .why_relevant
        .iter()
        .any(|r| r.contains("Matches symptom tag 'latency'")));
    // Scores stay pure five-factor.
    assert!(!correlation
        .correlation_reasons
        .iter()
        .any(|r| r.contains("symptom")));
}

#[tokio::test]
async fn triage_with_no_activity_is_empty_not_an_error() {
    let service = ChangeIntelligence::new(Arc::new(MemoryEventStore::new()));
    let report = service.triage(TriageRequest::default()).await.unwrap();
    assert!(report.suspected_services.is_empty());
    assert!(report.correlations.is_empty());
    assert!(report.change_sets.is_empty());
}

#[tokio::test]
async fn import_graph_accepts_both_shapes_and_merges_non_destructively() {
    let service = ChangeIntelligence::new(Arc::new(MemoryEventStore::new()));

    let stats = service
        .import_graph(
            r#"{"services": [{"id": "api", "name": "API"}],
                "dependencies": [{"source": "api", "target": "db"}]}"#,
        )
        .unwrap();
    assert_eq!(stats.services, 2);
    assert_eq!(stats.dependencies, 1);

    // Export-shaped payload; existing nodes keep their names.
    let stats = service
        .import_graph(
            r#"{"nodes": [{"id": "api", "name": "renamed", "type": "service"},
                           {"id": "cache", "name": "cache", "type": "cache"}],
                "edges": []}"#,
        )
        .unwrap();
    assert_eq!(stats.services, 3);
    let api = service
        .list_services()
        .into_iter()
        .find(|n| n.id == "api")
        .unwrap();
    assert_eq!(api.name, "API", "base facts win over re-imports");

    let view = service.dependencies("api").unwrap();
    assert_eq!(view.dependencies.len(), 1);
    assert_eq!(view.dependencies[0].target, "db");

    let err = service.dependencies("ghost").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = service.import_graph("{broken").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn health_reports_store_and_graph() {
    let service = service_with_graph();
    service.create_event(deploy("api", "x"), None).await.unwrap();

    let health = service.health().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.store.total, 1);
    assert_eq!(health.graph.unwrap().services, 3);
}

#[tokio::test]
async fn from_config_builds_a_working_service() {
    let dir = tempfile::tempdir().unwrap();
    let graph_path = dir.path().join("graph.yaml");
    std::fs::write(
        &graph_path,
        "services:\n  - id: api\n    name: api\ndependencies:\n  - source: web\n    target: api\n",
    )
    .unwrap();

    let config = ServiceConfig {
        database_path: Some(dir.path().join("events.db")),
        graph_path: Some(graph_path),
        ..ServiceConfig::default()
    };
    let service = ChangeIntelligence::from_config(config).await.unwrap();

    let outcome = service.create_event(deploy("api", "deploy"), None).await.unwrap();
    assert!(outcome.event.blast_radius.is_some(), "graph was loaded");
    assert_eq!(service.list_services().len(), 2);
    service.close().await.unwrap();

    let store = ripple_store::SqliteEventStore::open(dir.path().join("events.db"))
        .await
        .unwrap();
    assert_eq!(store.stats().await.unwrap().total, 1, "events were durable");
}

#[tokio::test]
async fn closed_service_is_unavailable() {
    let service = ChangeIntelligence::new(Arc::new(MemoryEventStore::new()));
    service.close().await.unwrap();
    let err = service.create_event(deploy("api", "x"), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}
