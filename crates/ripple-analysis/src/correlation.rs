//! Incident correlation.
//!
//! Ranks recent change events against an incident using five weighted
//! factors: time proximity, service adjacency through the graph, attached
//! blast-radius risk, change type, and environment match.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use ripple_graph::ServiceGraph;
use ripple_store::{EventQuery, EventStore};
use ripple_types::evidence::dedup_and_cap;
use ripple_types::{
    ChangeCorrelation, ChangeEvent, ChangeType, ConfidenceFactors, CoreResult,
    CorrelationConfidence, EvidenceLink, EvidenceType, RiskLevel,
};
use tracing::debug;

use crate::{provenance, round3};

const WEIGHT_TIME: f64 = 0.35;
const WEIGHT_ADJACENCY: f64 = 0.30;
const WEIGHT_RISK: f64 = 0.15;
const WEIGHT_TYPE: f64 = 0.10;
const WEIGHT_ENVIRONMENT: f64 = 0.10;

/// Time decay constant: the proximity factor halves roughly every 21
/// minutes (`exp(-delta / 30)`).
const TIME_DECAY_MINUTES: f64 = 30.0;

const EVIDENCE_CAP: usize = 20;

/// An incident to correlate against.
#[derive(Debug, Clone)]
pub struct IncidentQuery {
    pub affected_services: Vec<String>,
    pub incident_time: DateTime<Utc>,
    pub window_minutes: i64,
    pub incident_environment: Option<String>,
    pub max_results: Option<usize>,
    pub min_score: Option<f64>,
}

impl IncidentQuery {
    pub const DEFAULT_WINDOW_MINUTES: i64 = 60;
    pub const DEFAULT_MAX_RESULTS: usize = 20;
    pub const DEFAULT_MIN_SCORE: f64 = 0.1;

    pub fn new(affected_services: Vec<String>, incident_time: DateTime<Utc>) -> Self {
        Self {
            affected_services,
            incident_time,
            window_minutes: Self::DEFAULT_WINDOW_MINUTES,
            incident_environment: None,
            max_results: None,
            min_score: None,
        }
    }

    pub fn with_window_minutes(mut self, window_minutes: i64) -> Self {
        self.window_minutes = window_minutes;
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.incident_environment = Some(environment.into());
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }
}

/// Scores stored events against an incident.
#[derive(Debug, Clone, Default)]
pub struct ChangeCorrelator;

impl ChangeCorrelator {
    pub fn new() -> Self {
        Self
    }

    /// Correlate recent events against the incident, best first.
    pub async fn correlate(
        &self,
        store: &dyn EventStore,
        graph: Option<&ServiceGraph>,
        incident: &IncidentQuery,
    ) -> CoreResult<Vec<ChangeCorrelation>> {
        let expanded = expand_services(graph, &incident.affected_services);

        let candidates = match graph {
            Some(_) if !expanded.is_empty() => {
                let services: Vec<String> = expanded.keys().cloned().collect();
                store
                    .recent_for_services(&services, incident.window_minutes)
                    .await?
            }
            // No graph to expand through: fall back to a plain time window.
            _ => {
                store
                    .query(
                        EventQuery::builder()
                            .since(incident.incident_time - Duration::minutes(incident.window_minutes))
                            .limit(100)
                            .build(),
                    )
                    .await?
            }
        };
        debug!(
            candidates = candidates.len(),
            expanded = expanded.len(),
            "correlating events against incident"
        );

        let min_score = incident.min_score.unwrap_or(IncidentQuery::DEFAULT_MIN_SCORE);
        let max_results = incident
            .max_results
            .unwrap_or(IncidentQuery::DEFAULT_MAX_RESULTS);

        let mut correlations: Vec<ChangeCorrelation> = candidates
            .into_iter()
            .map(|event| self.score_event(event, incident, &expanded))
            .filter(|c| c.correlation_score >= min_score)
            .collect();

        correlations.sort_by(|a, b| {
            b.correlation_score
                .partial_cmp(&a.correlation_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.change_event.timestamp.cmp(&a.change_event.timestamp))
                .then(a.change_event.id.cmp(&b.change_event.id))
        });
        correlations.truncate(max_results);
        Ok(correlations)
    }

    fn score_event(
        &self,
        event: ChangeEvent,
        incident: &IncidentQuery,
        expanded: &BTreeMap<String, u8>,
    ) -> ChangeCorrelation {
        let delta_minutes = (incident.incident_time - event.timestamp)
            .num_milliseconds()
            .abs() as f64
            / 60_000.0;
        let time_proximity = (-delta_minutes / TIME_DECAY_MINUTES).exp();

        // Best hop across the event's full service set; 0 when the event
        // touches nothing near the incident. First match wins on ties.
        let mut best_hop: Option<(u8, String)> = None;
        for service in event.all_services() {
            if let Some(&hop) = expanded.get(&service) {
                let better = best_hop.as_ref().map_or(true, |(best, _)| hop < *best);
                if better {
                    best_hop = Some((hop, service));
                }
            }
        }
        let service_adjacency = match best_hop.as_ref().map(|(hop, _)| *hop) {
            Some(0) => 1.0,
            Some(1) => 0.7,
            Some(2) => 0.4,
            _ => 0.0,
        };

        let change_risk = match event.blast_radius.as_ref().map(|b| b.risk_level) {
            Some(RiskLevel::Critical) => 1.0,
            Some(RiskLevel::High) => 0.8,
            Some(RiskLevel::Medium) => 0.5,
            Some(RiskLevel::Low) | None => 0.2,
        };

        let change_type_factor = change_type_weight(event.change_type);

        let environment_match = match &incident.incident_environment {
            None => 0.5,
            Some(env) if *env == event.environment => 1.0,
            Some(_) => 0.2,
        };

        let score = WEIGHT_TIME * time_proximity
            + WEIGHT_ADJACENCY * service_adjacency
            + WEIGHT_RISK * change_risk
            + WEIGHT_TYPE * change_type_factor
            + WEIGHT_ENVIRONMENT * environment_match;

        let mut reasons = Vec::new();
        if delta_minutes < 15.0 {
            reasons.push("Very recent (<15m)".to_string());
        } else if delta_minutes < 60.0 {
            reasons.push("Recent (<60m)".to_string());
        }

        let mut service_overlap: Vec<String> = event
            .all_services()
            .into_iter()
            .filter(|s| expanded.contains_key(s))
            .collect();
        service_overlap.sort();
        service_overlap.dedup();
        for service in &service_overlap {
            match expanded.get(service) {
                Some(0) => reasons.push(format!("Direct change to affected service {service}")),
                Some(1) => reasons.push(format!("1-hop graph neighbor ({service})")),
                Some(2) => reasons.push(format!("2-hop graph neighbor ({service})")),
                _ => {}
            }
        }

        if change_type_factor >= 0.8 {
            reasons.push(format!("High-impact change type: {}", event.change_type));
        }
        if change_risk >= 0.8 {
            let risk = event
                .blast_radius
                .as_ref()
                .map(|b| b.risk_level)
                .unwrap_or(RiskLevel::Low);
            reasons.push(format!("Blast radius risk is {risk}"));
        }
        match &incident.incident_environment {
            Some(env) if *env == event.environment => {
                reasons.push(format!("Same environment ({env})"));
            }
            Some(env) => {
                reasons.push(format!(
                    "Environment mismatch ({} vs {env})",
                    event.environment
                ));
            }
            None => {}
        }

        let mut evidence = provenance::extract_event_evidence(&event);
        if let Some((hop, service)) = &best_hop {
            if *hop > 0 {
                evidence.push(
                    EvidenceLink::new(
                        EvidenceType::GraphPath,
                        format!("Graph adjacency: {service} is {hop}-hop from the incident"),
                    ),
                );
            }
        }
        dedup_and_cap(&mut evidence, EVIDENCE_CAP);

        ChangeCorrelation {
            correlation_score: round3(score),
            correlation_reasons: reasons.clone(),
            why_relevant: reasons,
            service_overlap,
            time_delta_minutes: delta_minutes.round() as i64,
            confidence: CorrelationConfidence {
                overall: round3(score),
                factors: ConfidenceFactors {
                    time_proximity: round3(time_proximity),
                    service_adjacency: round3(service_adjacency),
                    change_risk: round3(change_risk),
                    change_type: round3(change_type_factor),
                    environment_match: round3(environment_match),
                },
            },
            evidence,
            change_event: event,
        }
    }
}

/// Expand the incident's services through the graph: direct services at hop
/// 0, then 1-hop and 2-hop neighbors in both directions. First writer wins
/// at each ring, and a direct service is never demoted to a neighbor hop.
fn expand_services(
    graph: Option<&ServiceGraph>,
    affected_services: &[String],
) -> BTreeMap<String, u8> {
    let mut expanded: BTreeMap<String, u8> = BTreeMap::new();
    let Some(graph) = graph else {
        return expanded;
    };

    for service in affected_services {
        expanded.insert(service.clone(), 0);
    }

    let mut ring: Vec<String> = affected_services.to_vec();
    for hop in 1..=2u8 {
        let mut next_ring = Vec::new();
        for service in &ring {
            let neighbors = graph
                .get_dependencies(service)
                .into_iter()
                .chain(graph.get_dependents(service));
            for neighbor in neighbors {
                if !expanded.contains_key(&neighbor.id) {
                    expanded.insert(neighbor.id.clone(), hop);
                    next_ring.push(neighbor.id.clone());
                }
            }
        }
        ring = next_ring;
    }
    expanded
}

fn change_type_weight(change_type: ChangeType) -> f64 {
    match change_type {
        ChangeType::Deployment => 1.0,
        ChangeType::ConfigChange => 0.9,
        ChangeType::DbMigration => 0.85,
        ChangeType::FeatureFlag => 0.8,
        ChangeType::InfraModification => 0.7,
        ChangeType::CodeChange => 0.65,
        ChangeType::Rollback => 0.6,
        ChangeType::Scaling => 0.5,
        ChangeType::SecurityPatch => 0.4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::event_from;
    use ripple_store::MemoryEventStore;
    use ripple_types::{DependencySpec, NewChangeEvent};

    fn simple_graph() -> ServiceGraph {
        let mut g = ServiceGraph::new();
        g.add_service(ripple_types::ServiceNode::service("api"));
        g
    }

    fn chain_graph() -> ServiceGraph {
        // A -> B -> C
        let mut g = ServiceGraph::new();
        g.add_dependency(DependencySpec::new("A", "B"));
        g.add_dependency(DependencySpec::new("B", "C"));
        g
    }

    async fn store_with(events: Vec<NewChangeEvent>) -> MemoryEventStore {
        let store = MemoryEventStore::new();
        for event in events {
            store.insert(event).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_proximity_orders_results() {
        let incident_time = Utc::now();
        let store = store_with(vec![
            NewChangeEvent::new("api", ChangeType::Deployment, "close")
                .at(incident_time - Duration::minutes(5)),
            NewChangeEvent::new("api", ChangeType::Deployment, "far")
                .at(incident_time - Duration::minutes(90)),
        ])
        .await;
        let graph = simple_graph();

        let results = ChangeCorrelator::new()
            .correlate(
                &store,
                Some(&graph),
                &IncidentQuery::new(vec!["api".into()], incident_time).with_window_minutes(120),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].change_event.summary, "close");
        assert!(results[0].correlation_score > results[1].correlation_score);
        assert!(results[0].why_relevant.iter().any(|r| r.contains("Very recent")));
    }

    #[tokio::test]
    async fn test_two_hop_expansion_reaches_distant_events() {
        let incident_time = Utc::now();
        let store = store_with(vec![NewChangeEvent::new(
            "C",
            ChangeType::Deployment,
            "deep dependency deploy",
        )
        .at(incident_time - Duration::minutes(10))])
        .await;
        let graph = chain_graph();

        let results = ChangeCorrelator::new()
            .correlate(
                &store,
                Some(&graph),
                &IncidentQuery::new(vec!["A".into()], incident_time),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].service_overlap, vec!["C"]);
        assert!(results[0]
            .why_relevant
            .iter()
            .any(|r| r.contains("2-hop graph neighbor")));
        assert_eq!(results[0].confidence.factors.service_adjacency, 0.4);
    }

    #[tokio::test]
    async fn test_adjacency_monotonicity() {
        let incident_time = Utc::now();
        let ts = incident_time - Duration::minutes(10);
        let store = store_with(vec![
            NewChangeEvent::new("A", ChangeType::Deployment, "direct hit").at(ts),
            NewChangeEvent::new("B", ChangeType::Deployment, "one hop").at(ts),
            NewChangeEvent::new("C", ChangeType::Deployment, "two hops").at(ts),
        ])
        .await;
        let graph = chain_graph();

        let results = ChangeCorrelator::new()
            .correlate(
                &store,
                Some(&graph),
                &IncidentQuery::new(vec!["A".into()], incident_time),
            )
            .await
            .unwrap();

        let score_of = |summary: &str| {
            results
                .iter()
                .find(|c| c.change_event.summary == summary)
                .unwrap()
                .correlation_score
        };
        assert!(score_of("direct hit") >= score_of("one hop"));
        assert!(score_of("one hop") >= score_of("two hops"));
        assert!(score_of("direct hit") > score_of("two hops"));
    }

    #[tokio::test]
    async fn test_blast_radius_risk_raises_score() {
        let incident_time = Utc::now();
        let ts = incident_time - Duration::minutes(10);
        let store = MemoryEventStore::new();
        let critical = store
            .insert(NewChangeEvent::new("api", ChangeType::Deployment, "critical one").at(ts))
            .await
            .unwrap();
        let mut prediction = crate::blast_radius::BlastRadiusAnalyzer::default()
            .predict(&simple_graph(), &["api".to_string()], None, &ripple_types::Deadline::none())
            .unwrap();
        prediction.risk_level = RiskLevel::Critical;
        store
            .update(
                &critical.id.to_string(),
                ripple_types::ChangeEventPatch::default().set_blast_radius(prediction),
            )
            .await
            .unwrap();
        store
            .insert(NewChangeEvent::new("api", ChangeType::Deployment, "low one").at(ts))
            .await
            .unwrap();

        let graph = simple_graph();
        let results = ChangeCorrelator::new()
            .correlate(
                &store,
                Some(&graph),
                &IncidentQuery::new(vec!["api".into()], incident_time),
            )
            .await
            .unwrap();
        assert_eq!(results[0].change_event.summary, "critical one");
        assert!(results[0].correlation_score > results[1].correlation_score);
        assert!(results[0]
            .why_relevant
            .iter()
            .any(|r| r.contains("Blast radius risk is critical")));
    }

    #[tokio::test]
    async fn test_environment_factor() {
        let incident_time = Utc::now();
        let ts = incident_time - Duration::minutes(5);
        let store = store_with(vec![
        NewChangeEvent::new("api", ChangeType::Deployment, "prod deploy").at(ts),
            NewChangeEvent::new("api", ChangeType::Deployment, "staging deploy")
                .at(ts)
                .in_environment("staging"),
        ])
        .await;
        let graph = simple_graph();

        let results = ChangeCorrelator::new()
            .correlate(
                &store,
                Some(&graph),
                &IncidentQuery::new(vec!["api".into()], incident_time)
                    .with_environment("production"),
            )
            .await
            .unwrap();
        let prod = results
            .iter()
            .find(|c| c.change_event.summary == "prod deploy")
            .unwrap();
        let staging = results
            .iter()
            .find(|c| c.change_event.summary == "staging deploy")
            .unwrap();
        assert_eq!(prod.confidence.factors.environment_match, 1.0);
        assert_eq!(staging.confidence.factors.environment_match, 0.2);
        assert!(prod.correlation_score > staging.correlation_score);
        assert!(staging
            .why_relevant
            .iter()
            .any(|r| r.contains("Environment mismatch")));

        // Unspecified environment scores the neutral 0.5.
        let neutral = ChangeCorrelator::new()
            .correlate(
                &store,
                Some(&graph),
                &IncidentQuery::new(vec!["api".into()], incident_time),
            )
            .await
            .unwrap();
        assert!(neutral
            .iter()
            .all(|c| c.confidence.factors.environment_match == 0.5));
    }

    #[tokio::test]
    async fn test_min_score_filters_and_max_results_truncates() {
        let incident_time = Utc::now();
        let store = store_with(vec![
            NewChangeEvent::new("api", ChangeType::Deployment, "recent")
                .at(incident_time - Duration::minutes(2)),
            NewChangeEvent::new("api", ChangeType::SecurityPatch, "old patch")
                .at(incident_time - Duration::minutes(59)),
        ])
        .await;
        let graph = simple_graph();

        let strict = ChangeCorrelator::new()
            .correlate(
                &store,
                Some(&graph),
                &IncidentQuery::new(vec!["api".into()], incident_time).with_min_score(0.6),
            )
            .await
            .unwrap();
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].change_event.summary, "recent");

        let capped = ChangeCorrelator::new()
            .correlate(
                &store,
                Some(&graph),
                &IncidentQuery::new(vec!["api".into()], incident_time).with_max_results(1),
            )
            .await
            .unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn test_no_graph_falls_back_to_time_window() {
        let incident_time = Utc::now();
        let store = store_with(vec![NewChangeEvent::new(
            "unrelated",
            ChangeType::Deployment,
            "somewhere else",
        )
        .at(incident_time - Duration::minutes(5))])
        .await;

        let results = ChangeCorrelator::new()
            .correlate(
                &store,
                None,
                &IncidentQuery::new(vec!["api".into()], incident_time),
            )
            .await
            .unwrap();
        // Candidate sourced by time alone; adjacency contributes nothing.
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].confidence.factors.service_adjacency, 0.0);
    }

    #[test]
    fn test_expansion_never_demotes_direct_services() {
        // B is both affected directly and a 1-hop neighbor of A.
        let graph = chain_graph();
        let expanded = expand_services(
            Some(&graph),
            &["A".to_string(), "B".to_string()],
        );
        assert_eq!(expanded["A"], 0);
        assert_eq!(expanded["B"], 0, "direct hit never demoted");
        assert_eq!(expanded["C"], 1, "C is 1-hop from affected B");
    }

    #[test]
    fn test_scores_round_to_three_decimals() {
        let incident = IncidentQuery::new(vec!["api".into()], Utc::now());
        let event = event_from(
            NewChangeEvent::new("api", ChangeType::Deployment, "x")
                .at(incident.incident_time - Duration::minutes(7)),
        );
        let mut expanded = BTreeMap::new();
        expanded.insert("api".to_string(), 0u8);
        let correlation = ChangeCorrelator::new().score_event(event, &incident, &expanded);
        let scaled = correlation.correlation_score * 1000.0;
        assert!((scaled - scaled.round()).abs() < 1e-9);
        let scaled = correlation.confidence.factors.time_proximity * 1000.0;
        assert!((scaled - scaled.round()).abs() < 1e-9);
    }
}
