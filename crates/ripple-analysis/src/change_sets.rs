//! Change-set grouping and triage ranking.
//!
//! Events that belong to one logical deployment, release, or agent session
//! are clustered under a derived key. Higher-priority keys (explicit id,
//! pipeline run, PR, commit) carry higher grouping confidence than the
//! fallback time bucket.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;
use ripple_graph::ServiceGraph;
use ripple_types::evidence::dedup_and_cap;
use ripple_types::{
    ChangeCorrelation, ChangeEvent, ChangeSet, ChangeType, ConfidenceFactors, CoreResult,
    CorrelationConfidence, Deadline, RankedChangeSet, ReadinessDelta, ReadinessState,
};
use tracing::debug;
use uuid::Uuid;

use crate::blast_radius::BlastRadiusAnalyzer;
use crate::round3;

/// Fallback time-bucket width.
pub const DEFAULT_BUCKET_MINUTES: i64 = 15;

/// Triage returns this many ranked change sets by default.
pub const DEFAULT_TRIAGE_RESULTS: usize = 3;

/// Correlate-with-change-sets returns this many by default.
pub const DEFAULT_CORRELATE_RESULTS: usize = 5;

/// Metadata keys that tie events to one pipeline/run/session, checked in
/// order.
pub const RUN_METADATA_KEYS: [&str; 7] = [
    "pipeline_id",
    "pipeline_run_id",
    "workflow_run_id",
    "run_id",
    "deployment_id",
    "session_id",
    "parent_event_id",
];

const EVIDENCE_CAP: usize = 25;
const WHY_RELEVANT_CAP: usize = 10;

static RUNBOOK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)runbook|playbook|docs/runbooks?|oncall").unwrap());
static MONITORING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)alert|monitor|grafana|dashboard|prometheus|sli|slo").unwrap());

/// Groups events into change sets.
#[derive(Debug, Clone)]
pub struct ChangeSetGrouper {
    pub bucket_minutes: i64,
}

impl Default for ChangeSetGrouper {
    fn default() -> Self {
        Self {
            bucket_minutes: DEFAULT_BUCKET_MINUTES,
        }
    }
}

impl ChangeSetGrouper {
    pub fn new(bucket_minutes: i64) -> Self {
        Self { bucket_minutes }
    }

    /// Derive the grouping key and its confidence for one event. First
    /// matching rung wins.
    pub fn derive_key(&self, event: &ChangeEvent) -> (String, f64) {
        if let Some(id) = &event.change_set_id {
            return (format!("explicit:{id}"), 1.0);
        }
        for key in RUN_METADATA_KEYS {
            if let Some(value) = event.metadata.get(key).and_then(scalar_string) {
                return (format!("run:{}:{value}", event.source), 0.92);
            }
        }
        if let (Some(repository), Some(pr)) = (&event.repository, event.pr_number) {
            return (format!("pr:{repository}:{pr}"), 0.90);
        }
        if let (Some(repository), Some(sha)) = (&event.repository, &event.commit_sha) {
            return (format!("commit:{repository}:{sha}"), 0.86);
        }
        let scope = event.repository.as_deref().unwrap_or(&event.service);
        let bucket = event.timestamp.timestamp() / 60 / self.bucket_minutes;
        (
            format!("bucket:{}:{scope}:{bucket}", event.environment),
            0.62,
        )
    }

    /// Cluster events into change sets.
    pub fn group(
        &self,
        events: Vec<ChangeEvent>,
        graph: Option<&ServiceGraph>,
    ) -> Vec<ChangeSet> {
        let mut groups: BTreeMap<String, (f64, Vec<ChangeEvent>)> = BTreeMap::new();
        for event in events {
            let (key, confidence) = self.derive_key(&event);
            let entry = groups.entry(key).or_insert_with(|| (confidence, Vec::new()));
            entry.1.push(event);
        }
        debug!(groups = groups.len(), "grouped events into change sets");

        let mut sets: Vec<ChangeSet> = groups
            .into_iter()
            .map(|(key, (confidence, members))| self.build_set(key, confidence, members, graph))
            .collect();
        sets.sort_by(|a, b| b.window_end.cmp(&a.window_end).then(a.key.cmp(&b.key)));
        sets
    }

    fn build_set(
        &self,
        key: String,
        confidence: f64,
        mut events: Vec<ChangeEvent>,
        graph: Option<&ServiceGraph>,
    ) -> ChangeSet {
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));

        let mut services: Vec<String> = events.iter().flat_map(|e| e.all_services()).collect();
        services.sort();
        services.dedup();

        let mut repositories: Vec<String> =
            events.iter().filter_map(|e| e.repository.clone()).collect();
        repositories.sort();
        repositories.dedup();

        let mut change_types: Vec<ChangeType> = events.iter().map(|e| e.change_type).collect();
        change_types.sort();
        change_types.dedup();

        let mut initiators: Vec<_> = events.iter().map(|e| e.initiator).collect();
        initiators.sort();
        initiators.dedup();

        let mut author_types: Vec<_> = events.iter().filter_map(|e| e.author_type).collect();
        author_types.sort();
        author_types.dedup();

        let mut environments: Vec<&str> =
            events.iter().map(|e| e.environment.as_str()).collect();
        environments.sort();
        environments.dedup();
        let environment = match environments.as_slice() {
            [single] => single.to_string(),
            _ => "mixed".to_string(),
        };

        let mut evidence = Vec::new();
        for event in &events {
            evidence.extend(crate::provenance::extract_event_evidence(event));
        }
        dedup_and_cap(&mut evidence, EVIDENCE_CAP);

        let readiness_delta = self.readiness(&events, graph);
        let window_start = events.first().map(|e| e.timestamp).unwrap_or_default();
        let window_end = events.last().map(|e| e.timestamp).unwrap_or_default();

        ChangeSet {
            id: Uuid::new_v4().to_string(),
            title: title_for(&events, &services),
            key,
            event_count: events.len(),
            event_ids: events.iter().map(|e| e.id.to_string()).collect(),
            services,
            repositories,
            environment,
            window_start,
            window_end,
            change_types,
            initiators,
            author_types,
            evidence,
            readiness_delta,
            confidence,
            events,
        }
    }

    /// Assess whether the operational artifacts kept pace with the change.
    pub fn readiness(
        &self,
        events: &[ChangeEvent],
        graph: Option<&ServiceGraph>,
    ) -> ReadinessDelta {
        let files: Vec<&str> = events
            .iter()
            .flat_map(|e| e.files_changed.iter().map(String::as_str))
            .collect();

        let classify = |re: &Regex| {
            if files.is_empty() {
                ReadinessState::Unknown
            } else if files.iter().any(|f| re.is_match(f)) {
                ReadinessState::Updated
            } else {
                ReadinessState::Missing
            }
        };
        let runbook_updated = classify(&RUNBOOK_RE);
        let monitoring_updated = classify(&MONITORING_RE);

        let mut services: Vec<String> = events.iter().flat_map(|e| e.all_services()).collect();
        services.sort();
        services.dedup();

        let mut unowned: Vec<String> = Vec::new();
        let ownership_known = if services.is_empty() {
            ReadinessState::Unknown
        } else {
            for service in &services {
                let owned = graph
                    .and_then(|g| g.get_service(service))
                    .map(|node| node.team.is_some() || node.owner.is_some())
                    .unwrap_or(false);
                if !owned {
                    unowned.push(service.clone());
                }
            }
            if unowned.is_empty() {
                ReadinessState::Updated
            } else {
                ReadinessState::Missing
            }
        };

        let mut notes = Vec::new();
        if runbook_updated == ReadinessState::Missing {
            notes.push("No runbook or playbook updates in this change set".to_string());
        }
        if monitoring_updated == ReadinessState::Missing {
            notes.push("No monitoring or alerting updates in this change set".to_string());
        }
        if ownership_known == ReadinessState::Missing {
            notes.push(format!("Ownership unknown for: {}", unowned.join(", ")));
        }

        ReadinessDelta {
            runbook_updated,
            monitoring_updated,
            ownership_known,
            notes,
        }
    }

    /// Group correlated events and rank the groups against the incident.
    pub fn rank_for_incident(
        &self,
        correlations: &[ChangeCorrelation],
        graph: Option<&ServiceGraph>,
        analyzer: &BlastRadiusAnalyzer,
        max_results: usize,
        deadline: &Deadline,
    ) -> CoreResult<Vec<RankedChangeSet>> {
        let events: Vec<ChangeEvent> = correlations
            .iter()
            .map(|c| c.change_event.clone())
            .collect();
        let by_id: HashMap<String, &ChangeCorrelation> = correlations
            .iter()
            .map(|c| (c.change_event.id.to_string(), c))
            .collect();

        let mut ranked = Vec::new();
        for set in self.group(events, graph) {
            let children: Vec<&ChangeCorrelation> = set
                .event_ids
                .iter()
                .filter_map(|id| by_id.get(id).copied())
                .collect();
            if children.is_empty() {
                continue;
            }

            let max = children
                .iter()
                .map(|c| c.correlation_score)
                .fold(0.0_f64, f64::max);
            let avg = children.iter().map(|c| c.correlation_score).sum::<f64>()
                / children.len() as f64;
            let score = round3(0.65 * max + 0.35 * avg);

            let mut why_relevant: Vec<String> = Vec::new();
            for child in &children {
                for reason in &child.why_relevant {
                    if !why_relevant.contains(reason) {
                        why_relevant.push(reason.clone());
                    }
                }
            }
            for note in &set.readiness_delta.notes {
                if !why_relevant.contains(note) {
                    why_relevant.push(note.clone());
                }
            }
            why_relevant.truncate(WHY_RELEVANT_CAP);

            let n = children.len() as f64;
            let mean = |f: fn(&ConfidenceFactors) -> f64| {
                round3(children.iter().map(|c| f(&c.confidence.factors)).sum::<f64>() / n)
            };
            let confidence = CorrelationConfidence {
                overall: score,
                factors: ConfidenceFactors {
                    time_proximity: mean(|f| f.time_proximity),
                    service_adjacency: mean(|f| f.service_adjacency),
                    change_risk: mean(|f| f.change_risk),
                    change_type: mean(|f| f.change_type),
                    environment_match: mean(|f| f.environment_match),
                },
            };

            let dominant = dominant_change_type(&set.events);
            let suggested_blast_radius = match graph {
                Some(graph) => Some(BlastRadiusAnalyzer::new(analyzer.max_depth).predict(
                    graph,
                    &set.services,
                    dominant,
                    deadline,
                )?),
                None => None,
            };

            ranked.push(RankedChangeSet {
                change_set: set,
                score,
                why_relevant,
                confidence,
                suggested_blast_radius,
            });
        }

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.change_set.window_end.cmp(&a.change_set.window_end))
                .then(a.change_set.key.cmp(&b.change_set.key))
        });
        ranked.truncate(max_results);
        Ok(ranked)
    }
}

/// The most frequent change type in the set; ties break toward the
/// higher-impact (lower-ordinal) type.
fn dominant_change_type(events: &[ChangeEvent]) -> Option<ChangeType> {
    let mut counts: BTreeMap<ChangeType, usize> = BTreeMap::new();
    for event in events {
        *counts.entry(event.change_type).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(change_type, _)| change_type)
}

fn title_for(events: &[ChangeEvent], services: &[String]) -> String {
    match events {
        [single] => single.summary.clone(),
        _ => {
            let preview: Vec<&str> = services.iter().take(3).map(String::as_str).collect();
            if services.len() > preview.len() {
                format!(
                    "{} related changes across {} and {} more",
                    events.len(),
                    preview.join(", "),
                    services.len() - preview.len()
                )
            } else {
                format!("{} related changes across {}", events.len(), preview.join(", "))
            }
        }
    }
}

/// Metadata values may arrive as strings or numbers; both key a run group.
fn scalar_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
