//! Blast radius prediction.
//!
//! Walks the dependency graph upstream from the target services and
//! classifies every affected node: direct vs downstream, high-confidence vs
//! possible, plus a risk level derived from the shape of the result.

use std::collections::BTreeSet;

use ripple_graph::ServiceGraph;
use ripple_types::evidence::dedup_and_cap;
use ripple_types::{
    BlastRadiusPrediction, ChangeType, CoreResult, Criticality, Deadline, EdgeSource,
    EvidenceLink, EvidenceType, ImpactPath, RiskLevel,
};
use serde_json::json;
use tracing::debug;

/// Default traversal depth: three edges from each target.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Evidence entries are capped to keep predictions bounded on dense graphs.
const EVIDENCE_CAP: usize = 40;

/// High-confidence threshold on aggregated path confidence.
const HIGH_CONFIDENCE_FLOOR: f64 = 0.75;

/// Inferred edges below this confidence downgrade their dependents to the
/// possible bucket.
const INFERRED_TRUST_FLOOR: f64 = 0.9;

/// Predicts which services are affected upstream when targets change.
#[derive(Debug, Clone)]
pub struct BlastRadiusAnalyzer {
    pub max_depth: usize,
}

impl Default for BlastRadiusAnalyzer {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl BlastRadiusAnalyzer {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Predict the blast radius of changing `targets`.
    pub fn predict(
        &self,
        graph: &ServiceGraph,
        targets: &[String],
        change_type: Option<ChangeType>,
        deadline: &Deadline,
    ) -> CoreResult<BlastRadiusPrediction> {
        let mut direct: BTreeSet<String> = BTreeSet::new();
        let mut downstream: BTreeSet<String> = BTreeSet::new();
        let mut high_confidence: BTreeSet<String> = BTreeSet::new();
        let mut possible: BTreeSet<String> = BTreeSet::new();
        let mut critical_path_affected = false;
        let mut impact_paths: Vec<ImpactPath> = Vec::new();

        for target in targets {
            let paths = graph.upstream_impact(target, self.max_depth, deadline)?;
            for path in paths {
                if path.hops <= 2 {
                    direct.insert(path.affected.clone());
                } else {
                    downstream.insert(path.affected.clone());
                }
                if path_is_trustworthy(graph, &path) {
                    high_confidence.insert(path.affected.clone());
                } else {
                    possible.insert(path.affected.clone());
                }
                if path.criticality == Criticality::Critical {
                    critical_path_affected = true;
                }
                impact_paths.push(path);
            }
        }

        // Targets are never their own dependents, and a direct dependent is
        // not double-counted downstream.
        for target in targets {
            direct.remove(target);
            downstream.remove(target);
            high_confidence.remove(target);
            possible.remove(target);
        }
        for d in &direct {
            downstream.remove(d);
        }
        for h in &high_confidence {
            possible.remove(h);
        }

        impact_paths.sort_by(|a, b| a.hops.cmp(&b.hops).then(a.affected.cmp(&b.affected)));

        let mut evidence: Vec<EvidenceLink> = impact_paths
            .iter()
            .map(|path| {
                EvidenceLink::new(
                    EvidenceType::GraphPath,
                    format!("Impact path {}", path.path.join(" -> ")),
                )
                .with_details(json!({
                    "from": path.source,
                    "to": path.affected,
                    "hops": path.path.len() - 1,
                    "criticality": path.criticality,
                    "confidence": path.confidence,
                    "edgeSources": path.edge_sources,
                }))
            })
            .collect();
        dedup_and_cap(&mut evidence, EVIDENCE_CAP);

        let direct_count = direct.len();
        let downstream_count = downstream.len();
        let db_migration_rule =
            change_type == Some(ChangeType::DbMigration) && direct_count > 0;
        let risk_level = if critical_path_affected {
            RiskLevel::Critical
        } else if downstream_count > 10 || direct_count > 3 {
            RiskLevel::High
        } else if downstream_count > 3 || direct_count > 1 || db_migration_rule {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let affected_total = direct_count + downstream_count;
        let mut rationale = vec![
            format!("Analyzed blast radius for: {}", targets.join(", ")),
            format!("{direct_count} direct dependent(s)"),
            format!("{downstream_count} downstream service(s) affected"),
            format!("{} high-confidence dependent(s)", high_confidence.len()),
        ];
        if critical_path_affected {
            rationale.push("A critical dependency path is affected".to_string());
        }
        if let Some(ct) = change_type {
            rationale.push(format!("Change type: {ct}"));
            if db_migration_rule {
                rationale.push(
                    "Database migration with direct dependents raises the floor to medium"
                        .to_string(),
                );
            }
        }
        if affected_total == 0 {
            rationale.push("No dependents found; the target appears isolated".to_string());
        }
        rationale.push(format!("Risk level: {risk_level}"));

        let confidence_summary = format!(
            "{} of {} affected service(s) are high confidence",
            high_confidence.len(),
            affected_total
        );

        debug!(
            targets = ?targets,
            direct = direct_count,
            downstream = downstream_count,
            risk = %risk_level,
            "computed blast radius"
        );

        Ok(BlastRadiusPrediction {
            direct_services: direct.into_iter().collect(),
            downstream_services: downstream.into_iter().collect(),
            high_confidence_dependents: high_confidence.into_iter().collect(),
            possible_dependents: possible.into_iter().collect(),
            critical_path_affected,
            risk_level,
            impact_paths,
            confidence_summary,
            evidence,
            rationale,
        })
    }
}

/// High confidence means the aggregated confidence clears the floor and no
/// inferred edge along the walk is itself below the trust floor.
fn path_is_trustworthy(graph: &ServiceGraph, path: &ImpactPath) -> bool {
    if path.confidence < HIGH_CONFIDENCE_FLOOR {
        return false;
    }
    for pair in path.path.windows(2) {
        // Upstream paths walk incoming edges, so the edge runs from the
        // later node in the path to the earlier one.
        if let Some(edge) = graph.get_edge(&pair[1], &pair[0]) {
            if edge.edge_source == EdgeSource::Inferred && edge.confidence < INFERRED_TRUST_FLOOR {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_types::DependencySpec;

    fn chain_graph() -> ServiceGraph {
        // A -> B -> C, all critical: breaking C hurts B directly and A
        // transitively.
        let mut g = ServiceGraph::new();
        g.add_dependency(DependencySpec::new("A", "B"));
        g.add_dependency(DependencySpec::new("B", "C"));
        g
    }

    fn targets(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_critical_chain_is_critical_risk() {
        let analyzer = BlastRadiusAnalyzer::default();
        let prediction = analyzer
            .predict(&chain_graph(), &targets(&["C"]), None, &Deadline::none())
            .unwrap();
        assert_eq!(prediction.direct_services, vec!["B"]);
        assert_eq!(prediction.downstream_services, vec!["A"]);
        assert!(prediction.critical_path_affected);
        assert_eq!(prediction.risk_level, RiskLevel::Critical);
        assert!(prediction
            .rationale
            .iter()
            .any(|r| r.contains("Risk level: critical")));
    }

    #[test]
    fn test_many_direct_dependents_is_high_risk() {
        let mut g = ServiceGraph::new();
        for i in 0..5 {
            g.add_dependency(
                DependencySpec::new(format!("svc-{i}"), "core")
                    .with_criticality(Criticality::Degraded),
            );
        }
        let prediction = BlastRadiusAnalyzer::default()
            .predict(&g, &targets(&["core"]), None, &Deadline::none())
            .unwrap();
        assert_eq!(prediction.direct_services.len(), 5);
        assert!(!prediction.critical_path_affected);
        assert_eq!(prediction.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_db_migration_with_direct_dependents_is_at_least_medium() {
        let mut g = ServiceGraph::new();
        g.add_dependency(
            DependencySpec::new("reader", "db").with_criticality(Criticality::Degraded),
        );
        let low = BlastRadiusAnalyzer::default()
            .predict(&g, &targets(&["db"]), Some(ChangeType::Deployment), &Deadline::none())
            .unwrap();
        assert_eq!(low.risk_level, RiskLevel::Low);

        let migration = BlastRadiusAnalyzer::default()
            .predict(&g, &targets(&["db"]), Some(ChangeType::DbMigration), &Deadline::none())
            .unwrap();
        assert_eq!(migration.risk_level, RiskLevel::Medium);
        assert!(migration
            .rationale
            .iter()
            .any(|r| r.contains("Database migration")));
    }

    #[test]
    fn test_isolated_target_is_low_risk_with_isolation_note() {
        let mut g = ServiceGraph::new();
        g.add_service(ripple_types::ServiceNode::service("loner"));
        let prediction = BlastRadiusAnalyzer::default()
            .predict(&g, &targets(&["loner"]), None, &Deadline::none())
            .unwrap();
        assert_eq!(prediction.risk_level, RiskLevel::Low);
        assert!(!prediction.critical_path_affected);
        assert!(prediction.rationale.iter().any(|r| r.contains("isolated")));
    }

    #[test]
    fn test_weak_inferred_edge_downgrades_to_possible() {
        let mut g = ServiceGraph::new();
        g.add_dependency(
            DependencySpec::new("guess", "core")
                .with_edge_source(EdgeSource::Inferred)
                .with_confidence(0.8),
        );
        g.add_dependency(DependencySpec::new("known", "core"));
        let prediction = BlastRadiusAnalyzer::default()
            .predict(&g, &targets(&["core"]), None, &Deadline::none())
            .unwrap();
        assert_eq!(prediction.high_confidence_dependents, vec!["known"]);
        assert_eq!(prediction.possible_dependents, vec!["guess"]);
    }

    #[test]
    fn test_low_confidence_path_is_possible() {
        let mut g = ServiceGraph::new();
        g.add_dependency(DependencySpec::new("maybe", "core").with_confidence(0.5));
        let prediction = BlastRadiusAnalyzer::default()
            .predict(&g, &targets(&["core"]), None, &Deadline::none())
            .unwrap();
        assert!(prediction.high_confidence_dependents.is_empty());
        assert_eq!(prediction.possible_dependents, vec!["maybe"]);
    }

    #[test]
    fn test_direct_bucket_wins_across_targets() {
        // A -> B, B -> C, B -> D: B consumes both targets directly, A only
        // through B. B must not appear in the downstream bucket.
        let mut g = chain_graph();
        g.add_dependency(DependencySpec::new("B", "D"));
        let prediction = BlastRadiusAnalyzer::default()
            .predict(&g, &targets(&["C", "D"]), None, &Deadline::none())
            .unwrap();
        assert!(prediction.direct_services.contains(&"B".to_string()));
        assert!(!prediction.downstream_services.contains(&"B".to_string()));
        assert_eq!(prediction.downstream_services, vec!["A"]);
    }

    #[test]
    fn test_evidence_entries_describe_paths() {
        let prediction = BlastRadiusAnalyzer::default()
            .predict(&chain_graph(), &targets(&["C"]), None, &Deadline::none())
            .unwrap();
        assert_eq!(prediction.evidence.len(), 2);
        let first = &prediction.evidence[0];
        assert_eq!(first.link_type, EvidenceType::GraphPath);
        assert!(first.label.starts_with("Impact path C -> B"));
        let details = first.details.as_ref().unwrap();
        assert_eq!(details["hops"], 1, "evidence hops counts edges");
        assert_eq!(details["from"], "C");
    }

    #[test]
    fn test_evidence_cap() {
        let mut g = ServiceGraph::new();
        for i in 0..60 {
            g.add_dependency(DependencySpec::new(format!("svc-{i}"), "core"));
        }
        let prediction = BlastRadiusAnalyzer::default()
            .predict(&g, &targets(&["core"]), None, &Deadline::none())
            .unwrap();
        assert_eq!(prediction.evidence.len(), 40);
        assert_eq!(prediction.impact_paths.len(), 60);
    }
}
