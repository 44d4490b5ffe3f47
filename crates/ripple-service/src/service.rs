//! The `ChangeIntelligence` facade.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use ripple_analysis::{
    change_sets::{DEFAULT_CORRELATE_RESULTS, DEFAULT_TRIAGE_RESULTS},
    BlastRadiusAnalyzer, ChangeCorrelator, ChangeSetGrouper, IncidentQuery,
};
use ripple_graph::{GraphConfig, ServiceGraph};
use ripple_store::{validate_new_event, EventQuery, EventStore, SqliteEventStore};
use ripple_types::{
    BlastRadiusPrediction, ChangeCorrelation, ChangeEvent, ChangeEventPatch, ChangeType,
    CoreError, CoreResult, Deadline, DependencyEdge, GraphStats, NewChangeEvent, RankedChangeSet,
    ServiceNode, StoreStats, VelocityMetric,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::observer::ChangeObserver;

/// Result of one ingest call. `created` distinguishes a fresh insert from an
/// idempotent replay, so transports can answer 201 vs 200.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub event: ChangeEvent,
    pub created: bool,
}

/// Correlation request as received from a transport.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CorrelateRequest {
    pub affected_services: Vec<String>,
    pub incident_time: Option<DateTime<Utc>>,
    pub window_minutes: Option<i64>,
    pub max_results: Option<usize>,
    pub min_score: Option<f64>,
    pub incident_environment: Option<String>,
    pub include_change_sets: bool,
}

/// Correlation response.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationReport {
    pub correlations: Vec<ChangeCorrelation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_sets: Option<Vec<RankedChangeSet>>,
}

/// Blast-radius request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BlastRadiusRequest {
    pub services: Vec<String>,
    pub change_type: Option<ChangeType>,
    pub max_depth: Option<usize>,
}

/// Velocity response: the current window plus the oldest-first trend.
#[derive(Debug, Clone, Serialize)]
pub struct VelocityReport {
    pub current: VelocityMetric,
    pub trend: Vec<VelocityMetric>,
}

/// Triage request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TriageRequest {
    pub incident_time: Option<DateTime<Utc>>,
    pub incident_environment: Option<String>,
    pub window_minutes: Option<i64>,
    pub suspected_services: Vec<String>,
    pub symptom_tags: Vec<String>,
    pub max_change_sets: Option<usize>,
}

/// Triage response.
#[derive(Debug, Clone, Serialize)]
pub struct TriageReport {
    pub incident_time: DateTime<Utc>,
    pub suspected_services: Vec<String>,
    pub symptom_tags: Vec<String>,
    pub correlations: Vec<ChangeCorrelation>,
    pub change_sets: Vec<RankedChangeSet>,
}

/// One service's edges in both directions.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyView {
    pub service: ServiceNode,
    pub dependencies: Vec<DependencyEdge>,
    pub dependents: Vec<DependencyEdge>,
}

/// Health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: String,
    pub store: StoreStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphStats>,
}

/// The change-intelligence core: one instance per embedding host.
pub struct ChangeIntelligence {
    store: Arc<dyn EventStore>,
    graph: RwLock<Option<ServiceGraph>>,
    analyzer: BlastRadiusAnalyzer,
    correlator: ChangeCorrelator,
    grouper: ChangeSetGrouper,
    observers: RwLock<Vec<Arc<dyn ChangeObserver>>>,
    op_timeout: Option<Duration>,
}

impl ChangeIntelligence {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            graph: RwLock::new(None),
            analyzer: BlastRadiusAnalyzer::default(),
            correlator: ChangeCorrelator::new(),
            grouper: ChangeSetGrouper::default(),
            observers: RwLock::new(Vec::new()),
            op_timeout: None,
        }
    }

    pub fn with_graph(self, graph: ServiceGraph) -> Self {
        *self.graph.write() = Some(graph);
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = Some(timeout);
        self
    }

    pub fn with_blast_radius_depth(mut self, max_depth: usize) -> Self {
        self.analyzer = BlastRadiusAnalyzer::new(max_depth);
        self
    }

    /// Build the service from host configuration: open (or create) the
    /// database and load the optional YAML graph.
    pub async fn from_config(config: ServiceConfig) -> CoreResult<Self> {
        let store: Arc<dyn EventStore> = match &config.database_path {
            Some(path) => Arc::new(SqliteEventStore::open(path).await?),
            None => Arc::new(SqliteEventStore::open_in_memory().await?),
        };

        let mut service = Self::new(store);
        if let Some(timeout_ms) = config.op_timeout_ms {
            service.op_timeout = Some(Duration::from_millis(timeout_ms));
        }
        if let Some(depth) = config.blast_radius_depth {
            service.analyzer = BlastRadiusAnalyzer::new(depth);
        }

        if let Some(graph_path) = &config.graph_path {
            let raw = tokio::fs::read_to_string(graph_path).await.map_err(|e| {
                CoreError::unavailable(format!(
                    "failed to read graph file {}: {e}",
                    graph_path.display()
                ))
            })?;
            let graph = ServiceGraph::from_config(GraphConfig::from_yaml(&raw)?);
            *service.graph.write() = Some(graph);
        }

        info!(
            graph = config.graph_path.is_some(),
            durable = config.database_path.is_some(),
            "change intelligence service ready"
        );
        Ok(service)
    }

    /// Register a post-commit observer.
    pub fn subscribe(&self, observer: Arc<dyn ChangeObserver>) {
        self.observers.write().push(observer);
    }

    // ── Ingestion ───────────────────────────────────────────────────────

    /// Ingest one event: persist, attach blast radius when a graph is
    /// present, notify observers. A previously-seen idempotency key returns
    /// the stored event untouched with `created: false`.
    pub async fn create_event(
        &self,
        mut new: NewChangeEvent,
        idempotency_key: Option<String>,
    ) -> CoreResult<IngestOutcome> {
        if idempotency_key.is_some() {
            new.idempotency_key = idempotency_key;
        }
        validate_new_event(&new)?;
        if let Some(key) = new.idempotency_key.clone() {
            if let Some(existing) = self
                .timed(self.store.get_by_idempotency_key(&key))
                .await?
            {
                debug!(key = %key, event = %existing.id, "idempotent replay");
                return Ok(IngestOutcome {
                    event: existing,
                    created: false,
                });
            }
        }

        let event = self.timed(self.store.insert(new)).await?;
        let event = self.attach_blast_radius(event).await?;
        self.notify(&event);
        Ok(IngestOutcome {
            event,
            created: true,
        })
    }

    /// Ingest a batch in one transaction; blast-radius attachment and
    /// observer notification run per event after the transaction commits.
    pub async fn batch_create(&self, batch: Vec<NewChangeEvent>) -> CoreResult<Vec<ChangeEvent>> {
        for new in &batch {
            validate_new_event(new)?;
        }
        let events = self.timed(self.store.insert_batch(batch)).await?;
        let mut enriched = Vec::with_capacity(events.len());
        for event in events {
            let event = self.attach_blast_radius(event).await?;
            self.notify(&event);
            enriched.push(event);
        }
        Ok(enriched)
    }

    async fn attach_blast_radius(&self, event: ChangeEvent) -> CoreResult<ChangeEvent> {
        let Some(graph) = self.graph_snapshot() else {
            return Ok(event);
        };
        let prediction = self.analyzer.predict(
            &graph,
            &event.all_services(),
            Some(event.change_type),
            &self.deadline(),
        )?;
        self.timed(self.store.update(
            &event.id.to_string(),
            ChangeEventPatch::default().set_blast_radius(prediction),
        ))
        .await
    }

    fn notify(&self, event: &ChangeEvent) {
        let observers = self.observers.read();
        for observer in observers.iter() {
            observer.on_event(event);
        }
    }

    // ── Event CRUD and query ────────────────────────────────────────────

    pub async fn get_event(&self, id: &str) -> CoreResult<ChangeEvent> {
        self.timed(self.store.get(id)).await
    }

    pub async fn update_event(
        &self,
        id: &str,
        patch: ChangeEventPatch,
    ) -> CoreResult<ChangeEvent> {
        self.timed(self.store.update(id, patch)).await
    }

    pub async fn delete_event(&self, id: &str) -> CoreResult<()> {
        self.timed(self.store.delete(id)).await
    }

    pub async fn query_events(&self, query: EventQuery) -> CoreResult<Vec<ChangeEvent>> {
        self.timed(self.store.query(query)).await
    }

    pub async fn search_events(&self, q: &str, limit: usize) -> CoreResult<Vec<ChangeEvent>> {
        self.timed(self.store.search(q, limit)).await
    }

    pub async fn prune_older_than(&self, days: i64) -> CoreResult<u64> {
        self.timed(self.store.prune_older_than(days)).await
    }

    // ── Analytics ───────────────────────────────────────────────────────

    /// Rank recent changes against an incident.
    pub async fn correlate(&self, request: CorrelateRequest) -> CoreResult<CorrelationReport> {
        if request.affected_services.is_empty() {
            return Err(CoreError::validation_with_hint(
                "correlate requires at least one affected service",
                "pass the services implicated by the incident",
            ));
        }
        let mut incident = IncidentQuery::new(
            request.affected_services.clone(),
            request.incident_time.unwrap_or_else(Utc::now),
        );
        if let Some(window) = request.window_minutes {
            incident = incident.with_window_minutes(window);
        }
        if let Some(max) = request.max_results {
            incident = incident.with_max_results(max);
        }
        if let Some(min) = request.min_score {
            incident = incident.with_min_score(min);
        }
        if let Some(environment) = request.incident_environment.clone() {
            incident = incident.with_environment(environment);
        }

        let snapshot = self.graph_snapshot();
        let correlations = self
            .correlator
            .correlate(self.store.as_ref(), snapshot.as_ref(), &incident)
            .await?;

        let change_sets = if request.include_change_sets {
            Some(self.grouper.rank_for_incident(
                &correlations,
                snapshot.as_ref(),
                &self.analyzer,
                DEFAULT_CORRELATE_RESULTS,
                &self.deadline(),
            )?)
        } else {
            None
        };

        Ok(CorrelationReport {
            correlations,
            change_sets,
        })
    }

    /// Predict downstream impact of changing the given services.
    pub fn blast_radius(&self, request: BlastRadiusRequest) -> CoreResult<BlastRadiusPrediction> {
        if request.services.is_empty() {
            return Err(CoreError::validation(
                "blast radius requires at least one target service",
            ));
        }
        // Without a graph the prediction degrades to the isolated case.
        let graph = self.graph_snapshot().unwrap_or_default();
        let analyzer = match request.max_depth {
            Some(depth) => BlastRadiusAnalyzer::new(depth),
            None => self.analyzer.clone(),
        };
        analyzer.predict(
            &graph,
            &request.services,
            request.change_type,
            &self.deadline(),
        )
    }

    /// Change velocity for one service: current window plus trend.
    pub async fn velocity(
        &self,
        service: &str,
        window_minutes: i64,
        periods: usize,
    ) -> CoreResult<VelocityReport> {
        if service.trim().is_empty() {
            return Err(CoreError::validation("velocity requires a service id"));
        }
        if window_minutes <= 0 || periods == 0 {
            return Err(CoreError::validation(
                "velocity requires a positive window and at least one period",
            ));
        }
        let current = self.timed(self.store.velocity(service, window_minutes)).await?;
        let trend = self
            .timed(self.store.velocity_trend(service, window_minutes, periods))
            .await?;
        Ok(VelocityReport { current, trend })
    }

    /// Incident triage: derive suspects when none are given, correlate, and
    /// rank change sets.
    pub async fn triage(&self, request: TriageRequest) -> CoreResult<TriageReport> {
        let incident_time = request.incident_time.unwrap_or_else(Utc::now);
        let window_minutes = request
            .window_minutes
            .unwrap_or(IncidentQuery::DEFAULT_WINDOW_MINUTES);

        let suspected_services = if request.suspected_services.is_empty() {
            self.top_services_in_window(incident_time, window_minutes, 5)
                .await?
        } else {
            request.suspected_services.clone()
        };
        if suspected_services.is_empty() {
            warn!("triage found no recent activity to derive suspects from");
            return Ok(TriageReport {
                incident_time,
                suspected_services,
                symptom_tags: request.symptom_tags,
                correlations: Vec::new(),
                change_sets: Vec::new(),
            });
        }

        let mut incident = IncidentQuery::new(suspected_services.clone(), incident_time)
            .with_window_minutes(window_minutes);
        if let Some(environment) = request.incident_environment.clone() {
            incident = incident.with_environment(environment);
        }

        let snapshot = self.graph_snapshot();
        let mut correlations = self
            .correlator
            .correlate(self.store.as_ref(), snapshot.as_ref(), &incident)
            .await?;

        // Symptom tags annotate matching events; they never change scores.
        if !request.symptom_tags.is_empty() {
            for correlation in &mut correlations {
                for tag in &request.symptom_tags {
                    if correlation.change_event.tags.contains(tag) {
                        correlation
                            .why_relevant
                            .push(format!("Matches symptom tag '{tag}'"));
                    }
                }
            }
        }

        let change_sets = self.grouper.rank_for_incident(
            &correlations,
            snapshot.as_ref(),
            &self.analyzer,
            request.max_change_sets.unwrap_or(DEFAULT_TRIAGE_RESULTS),
            &self.deadline(),
        )?;

        Ok(TriageReport {
            incident_time,
            suspected_services,
            symptom_tags: request.symptom_tags,
            correlations,
            change_sets,
        })
    }

    /// The busiest services in the window, by event count.
    async fn top_services_in_window(
        &self,
        incident_time: DateTime<Utc>,
        window_minutes: i64,
        top: usize,
    ) -> CoreResult<Vec<String>> {
        let events = self
            .timed(self.store.query(
                EventQuery::builder()
                    .since(incident_time - chrono::Duration::minutes(window_minutes))
                    .until(incident_time)
                    .limit(200)
                    .build(),
            ))
            .await?;
        let mut counts: std::collections::BTreeMap<String, usize> = Default::default();
        for event in &events {
            *counts.entry(event.service.clone()).or_insert(0) += 1;
        }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(ranked.into_iter().take(top).map(|(s, _)| s).collect())
    }

    // ── Graph surface ───────────────────────────────────────────────────

    /// Import a graph layer: either an export (`{nodes, edges}`) or a
    /// config shape (`{services, dependencies}`). Merging is
    /// non-destructive; existing facts win.
    pub fn import_graph(&self, raw: &str) -> CoreResult<GraphStats> {
        let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
            CoreError::validation_with_hint(
                format!("invalid graph import payload: {e}"),
                "send either {nodes, edges} or {services, dependencies}",
            )
        })?;
        let incoming = if value.get("nodes").is_some() {
            ServiceGraph::from_json(raw)?
        } else {
            let config: GraphConfig = serde_json::from_value(value).map_err(|e| {
                CoreError::validation_with_hint(
                    format!("invalid graph config payload: {e}"),
                    "send either {nodes, edges} or {services, dependencies}",
                )
            })?;
            ServiceGraph::from_config(config)
        };

        let mut guard = self.graph.write();
        let graph = guard.get_or_insert_with(ServiceGraph::new);
        graph.merge(&incoming, "import");
        info!(
            services = graph.service_count(),
            dependencies = graph.dependency_count(),
            "imported graph layer"
        );
        Ok(graph.stats())
    }

    /// All known services, sorted by id. Empty when no graph is loaded.
    pub fn list_services(&self) -> Vec<ServiceNode> {
        self.graph
            .read()
            .as_ref()
            .map(|g| g.services().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// One service's edges in both directions.
    pub fn dependencies(&self, service_id: &str) -> CoreResult<DependencyView> {
        let guard = self.graph.read();
        let graph = guard.as_ref().ok_or_else(|| {
            CoreError::not_found("service graph not loaded")
        })?;
        let service = graph.get_service(service_id).cloned().ok_or_else(|| {
            CoreError::not_found(format!("service {service_id} not in graph"))
        })?;
        Ok(DependencyView {
            dependencies: graph.outgoing_edges(service_id).into_iter().cloned().collect(),
            dependents: graph.incoming_edges(service_id).into_iter().cloned().collect(),
            service,
        })
    }

    pub fn graph_stats(&self) -> Option<GraphStats> {
        self.graph.read().as_ref().map(|g| g.stats())
    }

    /// Stable snapshot for analytics: either the pre- or the post-mutation
    /// graph, never a partial one.
    fn graph_snapshot(&self) -> Option<ServiceGraph> {
        self.graph.read().clone()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    pub async fn health(&self) -> CoreResult<Health> {
        let store = self.timed(self.store.stats()).await?;
        Ok(Health {
            status: "ok".to_string(),
            store,
            graph: self.graph_stats(),
        })
    }

    pub async fn close(&self) -> CoreResult<()> {
        self.store.close().await
    }

    fn deadline(&self) -> Deadline {
        match self.op_timeout {
            Some(timeout) => Deadline::after(timeout),
            None => Deadline::none(),
        }
    }

    async fn timed<T>(
        &self,
        operation: impl Future<Output = CoreResult<T>>,
    ) -> CoreResult<T> {
        match self.op_timeout {
            Some(timeout) => tokio::time::timeout(timeout, operation)
                .await
                .map_err(|_| CoreError::timeout("storage operation exceeded deadline"))?,
            None => operation.await,
        }
    }
}
