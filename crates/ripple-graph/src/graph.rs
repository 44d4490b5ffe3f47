//! The graph structure: nodes, edges, adjacency, merge, stats, round-trip.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use ripple_types::{
    CoreError, CoreResult, DependencyEdge, DependencySpec, EdgeSource, GraphStats, ServiceNode,
    ServiceTier,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Serialized graph shape: `{ nodes, edges }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<ServiceNode>,
    pub edges: Vec<DependencyEdge>,
}

/// Typed directed multigraph of services and dependencies.
///
/// Edge identity is `"{source}->{target}"`, so one edge exists per ordered
/// endpoint pair and reinsertion overwrites. The adjacency indexes stay
/// consistent with the edge set under every add and remove.
#[derive(Debug, Clone, Default)]
pub struct ServiceGraph {
    pub(crate) nodes: HashMap<String, ServiceNode>,
    pub(crate) edges: HashMap<String, DependencyEdge>,
    /// node id -> ids of edges leaving it
    pub(crate) outgoing: HashMap<String, BTreeSet<String>>,
    /// node id -> ids of edges entering it
    pub(crate) incoming: HashMap<String, BTreeSet<String>>,
}

impl ServiceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite a node. Idempotent by id.
    pub fn add_service(&mut self, node: ServiceNode) {
        self.outgoing.entry(node.id.clone()).or_default();
        self.incoming.entry(node.id.clone()).or_default();
        self.nodes.insert(node.id.clone(), node);
    }

    /// Add or overwrite the dependency described by `spec`.
    ///
    /// Normalizes confidence into [0, 1] (default 1.0), infers the edge
    /// source from `metadata.source` when not explicit, and stamps
    /// `last_seen`. Unknown endpoints are materialized as bare service
    /// nodes so adjacency never dangles.
    pub fn add_dependency(&mut self, spec: DependencySpec) -> DependencyEdge {
        let edge_source = spec.edge_source.unwrap_or_else(|| {
            spec.metadata
                .get("source")
                .and_then(|v| v.as_str())
                .and_then(EdgeSource::parse)
                .unwrap_or_default()
        });
        let edge = DependencyEdge {
            id: DependencyEdge::canonical_id(&spec.source, &spec.target),
            source: spec.source,
            target: spec.target,
            dependency_type: spec.dependency_type,
            protocol: spec.protocol,
            criticality: spec.criticality,
            edge_source,
            confidence: spec.confidence.unwrap_or(1.0).clamp(0.0, 1.0),
            last_seen: spec.last_seen.unwrap_or_else(Utc::now),
            description: spec.description,
            metadata: spec.metadata,
        };
        self.index_edge(edge.clone());
        edge
    }

    /// Insert a fully-formed edge, deriving the canonical id and creating
    /// missing endpoints.
    pub(crate) fn index_edge(&mut self, mut edge: DependencyEdge) {
        edge.id = DependencyEdge::canonical_id(&edge.source, &edge.target);
        if !self.nodes.contains_key(&edge.source) {
            self.add_service(ServiceNode::service(edge.source.clone()));
        }
        if !self.nodes.contains_key(&edge.target) {
            self.add_service(ServiceNode::service(edge.target.clone()));
        }
        self.outgoing
            .entry(edge.source.clone())
            .or_default()
            .insert(edge.id.clone());
        self.incoming
            .entry(edge.target.clone())
            .or_default()
            .insert(edge.id.clone());
        self.edges.insert(edge.id.clone(), edge);
    }

    /// Remove a node and every incident edge. Returns false when absent.
    pub fn remove_service(&mut self, id: &str) -> bool {
        if self.nodes.remove(id).is_none() {
            return false;
        }
        let mut incident: BTreeSet<String> = BTreeSet::new();
        incident.extend(self.outgoing.remove(id).unwrap_or_default());
        incident.extend(self.incoming.remove(id).unwrap_or_default());
        for edge_id in incident {
            if let Some(edge) = self.edges.remove(&edge_id) {
                if let Some(set) = self.outgoing.get_mut(&edge.source) {
                    set.remove(&edge_id);
                }
                if let Some(set) = self.incoming.get_mut(&edge.target) {
                    set.remove(&edge_id);
                }
            }
        }
        true
    }

    /// Remove one dependency. Returns false when absent.
    pub fn remove_dependency(&mut self, source: &str, target: &str) -> bool {
        let edge_id = DependencyEdge::canonical_id(source, target);
        match self.edges.remove(&edge_id) {
            Some(edge) => {
                if let Some(set) = self.outgoing.get_mut(&edge.source) {
                    set.remove(&edge_id);
                }
                if let Some(set) = self.incoming.get_mut(&edge.target) {
                    set.remove(&edge_id);
                }
                true
            }
            None => false,
        }
    }

    pub fn get_service(&self, id: &str) -> Option<&ServiceNode> {
        self.nodes.get(id)
    }

    pub fn contains_service(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// All nodes, sorted by id.
    pub fn services(&self) -> Vec<&ServiceNode> {
        let mut nodes: Vec<&ServiceNode> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn service_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn dependency_count(&self) -> usize {
        self.edges.len()
    }

    pub fn get_edge(&self, source: &str, target: &str) -> Option<&DependencyEdge> {
        self.edges.get(&DependencyEdge::canonical_id(source, target))
    }

    /// Outgoing neighbors: the services `id` depends on.
    pub fn get_dependencies(&self, id: &str) -> Vec<&ServiceNode> {
        self.neighbor_nodes(id, true)
    }

    /// Incoming neighbors: the services depending on `id`.
    pub fn get_dependents(&self, id: &str) -> Vec<&ServiceNode> {
        self.neighbor_nodes(id, false)
    }

    pub fn outgoing_edges(&self, id: &str) -> Vec<&DependencyEdge> {
        self.adjacent_edges(&self.outgoing, id)
    }

    pub fn incoming_edges(&self, id: &str) -> Vec<&DependencyEdge> {
        self.adjacent_edges(&self.incoming, id)
    }

    fn adjacent_edges<'a>(
        &'a self,
        index: &'a HashMap<String, BTreeSet<String>>,
        id: &str,
    ) -> Vec<&'a DependencyEdge> {
        index
            .get(id)
            .map(|edge_ids| {
                edge_ids
                    .iter()
                    .filter_map(|eid| self.edges.get(eid))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn neighbor_nodes(&self, id: &str, outgoing: bool) -> Vec<&ServiceNode> {
        let index = if outgoing { &self.outgoing } else { &self.incoming };
        let mut neighbors: Vec<&ServiceNode> = index
            .get(id)
            .map(|edge_ids| {
                edge_ids
                    .iter()
                    .filter_map(|eid| self.edges.get(eid))
                    .map(|edge| if outgoing { &edge.target } else { &edge.source })
                    .filter_map(|nid| self.nodes.get(nid))
                    .collect()
            })
            .unwrap_or_default();
        neighbors.sort_by(|a, b| a.id.cmp(&b.id));
        neighbors.dedup_by(|a, b| a.id == b.id);
        neighbors
    }

    /// Non-destructive merge: base precedence.
    ///
    /// Nodes only in `incoming` are added, stamped with
    /// `metadata.source = provenance_tag`. Edges whose ordered pair is not
    /// in `self` are added verbatim. Existing nodes and edges are never
    /// overwritten, so re-importing a layer cannot clobber earlier facts.
    pub fn merge(&mut self, incoming: &ServiceGraph, provenance_tag: &str) {
        let mut added_nodes = 0usize;
        let mut node_ids: Vec<&String> = incoming.nodes.keys().collect();
        node_ids.sort();
        for id in node_ids {
            if !self.nodes.contains_key(id) {
                let mut node = incoming.nodes[id].clone();
                node.metadata.insert(
                    "source".to_string(),
                    serde_json::Value::String(provenance_tag.to_string()),
                );
                self.add_service(node);
                added_nodes += 1;
            }
        }

        let mut added_edges = 0usize;
        let mut edge_ids: Vec<&String> = incoming.edges.keys().collect();
        edge_ids.sort();
        for id in edge_ids {
            if !self.edges.contains_key(id) {
                self.index_edge(incoming.edges[id].clone());
                added_edges += 1;
            }
        }
        debug!(
            provenance = provenance_tag,
            added_nodes, added_edges, "merged graph layer"
        );
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            services: self.nodes.len() as u64,
            dependencies: self.edges.len() as u64,
            ..GraphStats::default()
        };
        for node in self.nodes.values() {
            *stats.by_type.entry(node.service_type).or_insert(0) += 1;
            if let Some(team) = &node.team {
                *stats.by_team.entry(team.clone()).or_insert(0) += 1;
            }
            if node.tier == Some(ServiceTier::Critical) {
                stats.critical_services += 1;
            }
        }
        if !self.nodes.is_empty() {
            stats.average_out_degree = self.edges.len() as f64 / self.nodes.len() as f64;
        }
        stats
    }

    /// Serialize as `{ nodes, edges }`, both sorted by id for determinism.
    pub fn to_json(&self) -> CoreResult<String> {
        let mut export = GraphExport {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
        };
        export.nodes.sort_by(|a, b| a.id.cmp(&b.id));
        export.edges.sort_by(|a, b| a.id.cmp(&b.id));
        serde_json::to_string_pretty(&export)
            .map_err(|e| CoreError::invariant(format!("graph serialization failed: {e}")))
    }

    /// Reconstruct a fresh graph from [`Self::to_json`] output, preserving
    /// edge metadata.
    pub fn from_json(raw: &str) -> CoreResult<Self> {
        let export: GraphExport = serde_json::from_str(raw).map_err(|e| {
            CoreError::validation_with_hint(
                format!("invalid graph JSON: {e}"),
                "expected an object with `nodes` and `edges` arrays",
            )
        })?;
        Ok(Self::from_export(export))
    }

    pub fn from_export(export: GraphExport) -> Self {
        let mut graph = Self::new();
        for node in export.nodes {
            graph.add_service(node);
        }
        for edge in export.edges {
            graph.index_edge(edge);
        }
        graph
    }
}
