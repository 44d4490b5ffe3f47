//! Service dependency graph vocabulary.
//!
//! Nodes are services, datastores, queues, and external systems; a directed
//! edge `source -> target` records that `source` depends on `target` at
//! runtime. Edge identity is derived from the ordered endpoint pair, so
//! re-adding the same dependency collapses onto one edge.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of participant a node is.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    #[default]
    Service,
    Database,
    Cache,
    Queue,
    External,
    Infrastructure,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Database => "database",
            Self::Cache => "cache",
            Self::Queue => "queue",
            Self::External => "external",
            Self::Infrastructure => "infrastructure",
        }
    }
}

/// Operational importance of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTier {
    Critical,
    High,
    Medium,
    Low,
}

/// Participant in the dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub service_type: ServiceType,
    #[serde(default)]
    pub tier: Option<ServiceTier>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form metadata; `source` carries node provenance.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ServiceNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, service_type: ServiceType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            service_type,
            tier: None,
            team: None,
            owner: None,
            repository: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Shorthand for a plain service node whose name equals its id.
    pub fn service(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id, ServiceType::Service)
    }

    pub fn with_tier(mut self, tier: ServiceTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Node provenance, read from `metadata.source`.
    pub fn provenance(&self) -> Option<&str> {
        self.metadata.get("source").and_then(|v| v.as_str())
    }
}

/// Mechanism of a dependency.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    #[default]
    Sync,
    Async,
    Database,
    Cache,
    Queue,
    External,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
            Self::Database => "database",
            Self::Cache => "cache",
            Self::Queue => "queue",
            Self::External => "external",
        }
    }
}

/// How badly the consumer degrades when the dependency fails.
///
/// Ordering for aggregation purposes is `critical < degraded < optional`:
/// a path is only as strong as its weakest edge.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    #[default]
    Critical,
    Degraded,
    Optional,
}

impl Criticality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Degraded => "degraded",
            Self::Optional => "optional",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::Degraded => 1,
            Self::Optional => 2,
        }
    }

    /// Weakest-link aggregation: the result moves toward the weaker of the
    /// two. A critical chain through one optional edge is optional overall.
    pub fn weakest(a: Criticality, b: Criticality) -> Criticality {
        if a.rank() >= b.rank() {
            a
        } else {
            b
        }
    }
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance layer an edge was learned from.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeSource {
    Config,
    #[default]
    Manual,
    Backstage,
    Otel,
    KubeLabels,
    Inferred,
    Discovered,
    Import,
    McpImport,
}

impl EdgeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Manual => "manual",
            Self::Backstage => "backstage",
            Self::Otel => "otel",
            Self::KubeLabels => "kube-labels",
            Self::Inferred => "inferred",
            Self::Discovered => "discovered",
            Self::Import => "import",
            Self::McpImport => "mcp-import",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "config" => Some(Self::Config),
            "manual" => Some(Self::Manual),
            "backstage" => Some(Self::Backstage),
            "otel" => Some(Self::Otel),
            "kube-labels" => Some(Self::KubeLabels),
            "inferred" => Some(Self::Inferred),
            "discovered" => Some(Self::Discovered),
            "import" => Some(Self::Import),
            "mcp-import" => Some(Self::McpImport),
            _ => None,
        }
    }
}

impl std::fmt::Display for EdgeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed dependency `source -> target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Canonical id `"{source}->{target}"`. Stable across reinsertion.
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type", default)]
    pub dependency_type: DependencyType,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub criticality: Criticality,
    #[serde(default)]
    pub edge_source: EdgeSource,
    /// In [0, 1]; 1.0 means authoritatively known.
    pub confidence: f64,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl DependencyEdge {
    /// Canonical edge id for an ordered endpoint pair.
    pub fn canonical_id(source: &str, target: &str) -> String {
        format!("{source}->{target}")
    }
}

/// Add-time dependency payload. The graph derives the edge id, clamps
/// confidence, infers provenance, and stamps `last_seen`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySpec {
    pub source: String,
    pub target: String,
    #[serde(rename = "type", default)]
    pub dependency_type: DependencyType,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub criticality: Criticality,
    #[serde(default)]
    pub edge_source: Option<EdgeSource>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl DependencySpec {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            dependency_type: DependencyType::Sync,
            protocol: None,
            criticality: Criticality::Critical,
            edge_source: None,
            confidence: None,
            last_seen: None,
            description: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_type(mut self, dependency_type: DependencyType) -> Self {
        self.dependency_type = dependency_type;
        self
    }

    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_edge_source(mut self, edge_source: EdgeSource) -> Self {
        self.edge_source = Some(edge_source);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.metadata.insert(key.into(), v);
        }
        self
    }
}

/// One traversal result: a walk from `source` to `affected`.
///
/// `path` includes both endpoints, so `hops == path.len()` and a single-edge
/// traversal has `hops == 2`. Consumers partitioning direct vs downstream
/// dependents rely on `hops <= 2` as the direct predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactPath {
    pub source: String,
    pub affected: String,
    pub path: Vec<String>,
    pub hops: usize,
    /// Weakest-link aggregate over the traversed edges.
    pub criticality: Criticality,
    /// Minimum edge confidence along the path.
    pub confidence: f64,
    /// Distinct provenance tags visited, sorted.
    pub edge_sources: Vec<EdgeSource>,
}

/// Graph-wide aggregate counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub services: u64,
    pub dependencies: u64,
    pub by_type: BTreeMap<ServiceType, u64>,
    pub by_team: BTreeMap<String, u64>,
    pub average_out_degree: f64,
    pub critical_services: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weakest_link() {
        use Criticality::*;
        assert_eq!(Criticality::weakest(Critical, Optional), Optional);
        assert_eq!(Criticality::weakest(Optional, Critical), Optional);
        assert_eq!(Criticality::weakest(Critical, Degraded), Degraded);
        assert_eq!(Criticality::weakest(Degraded, Degraded), Degraded);
        assert_eq!(Criticality::weakest(Critical, Critical), Critical);
    }

    #[test]
    fn test_edge_source_wire_forms() {
        assert_eq!(
            serde_json::to_string(&EdgeSource::KubeLabels).unwrap(),
            "\"kube-labels\""
        );
        assert_eq!(
            serde_json::to_string(&EdgeSource::McpImport).unwrap(),
            "\"mcp-import\""
        );
        assert_eq!(EdgeSource::parse("kube-labels"), Some(EdgeSource::KubeLabels));
        assert_eq!(EdgeSource::parse("mcp-import"), Some(EdgeSource::McpImport));
    }

    #[test]
    fn test_canonical_edge_id() {
        assert_eq!(DependencyEdge::canonical_id("api", "db"), "api->db");
    }

    #[test]
    fn test_node_provenance_reads_metadata_source() {
        let mut node = ServiceNode::service("api");
        assert_eq!(node.provenance(), None);
        node.metadata
            .insert("source".to_string(), serde_json::json!("backstage"));
        assert_eq!(node.provenance(), Some("backstage"));
    }
}
