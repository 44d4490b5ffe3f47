//! Graph config file import.
//!
//! Hosts may describe their topology in a YAML file:
//!
//! ```yaml
//! services:
//!   - id: api
//!     name: API Gateway
//!     tier: critical
//! dependencies:
//!   - source: api
//!     target: db
//!     type: database
//! ```

use ripple_types::{CoreError, CoreResult, DependencySpec, EdgeSource, ServiceNode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::graph::ServiceGraph;

/// Config-file graph shape: `{ services, dependencies }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub services: Vec<ServiceNode>,
    pub dependencies: Vec<DependencySpec>,
}

impl GraphConfig {
    pub fn from_yaml(raw: &str) -> CoreResult<Self> {
        serde_yaml::from_str(raw).map_err(|e| {
            CoreError::validation_with_hint(
                format!("invalid graph config: {e}"),
                "expected `services` and `dependencies` lists",
            )
        })
    }
}

impl ServiceGraph {
    /// Build a graph from a config file. Config-authored edges default to
    /// the `config` provenance layer unless the file says otherwise.
    pub fn from_config(config: GraphConfig) -> Self {
        let mut graph = Self::new();
        for mut node in config.services {
            node.metadata
                .entry("source".to_string())
                .or_insert_with(|| serde_json::Value::String("config".to_string()));
            graph.add_service(node);
        }
        for mut spec in config.dependencies {
            if spec.edge_source.is_none() && !spec.metadata.contains_key("source") {
                spec.edge_source = Some(EdgeSource::Config);
            }
            graph.add_dependency(spec);
        }
        info!(
            services = graph.service_count(),
            dependencies = graph.dependency_count(),
            "loaded service graph from config"
        );
        graph
    }
}
