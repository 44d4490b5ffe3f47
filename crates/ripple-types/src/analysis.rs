//! Analytical result types: blast radius, correlations, change sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{AuthorType, ChangeEvent, ChangeType, Initiator};
use crate::evidence::EvidenceLink;
use crate::graph::ImpactPath;

/// Predicted risk of a change, derived from graph shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What breaks if the target services change or fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastRadiusPrediction {
    /// Immediate consumers (`hops <= 2` paths).
    pub direct_services: Vec<String>,
    /// Transitively affected consumers further upstream.
    pub downstream_services: Vec<String>,
    pub high_confidence_dependents: Vec<String>,
    pub possible_dependents: Vec<String>,
    pub critical_path_affected: bool,
    pub risk_level: RiskLevel,
    pub impact_paths: Vec<ImpactPath>,
    pub confidence_summary: String,
    pub evidence: Vec<EvidenceLink>,
    /// Human-readable explanation of each classification step.
    pub rationale: Vec<String>,
}

/// Per-factor contribution to a correlation score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    pub time_proximity: f64,
    pub service_adjacency: f64,
    pub change_risk: f64,
    pub change_type: f64,
    pub environment_match: f64,
}

/// Overall correlation confidence plus its factor breakdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationConfidence {
    pub overall: f64,
    pub factors: ConfidenceFactors,
}

/// One stored event ranked against an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeCorrelation {
    pub change_event: ChangeEvent,
    /// Weighted score in [0, 1], rounded to three decimals.
    pub correlation_score: f64,
    pub correlation_reasons: Vec<String>,
    pub why_relevant: Vec<String>,
    /// Distinct affected/adjacent services matched by this event.
    pub service_overlap: Vec<String>,
    pub time_delta_minutes: i64,
    pub confidence: CorrelationConfidence,
    pub evidence: Vec<EvidenceLink>,
}

/// Whether an operational artifact kept pace with a change set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Updated,
    Missing,
    #[default]
    Unknown,
}

impl ReadinessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::Missing => "missing",
            Self::Unknown => "unknown",
        }
    }
}

/// Operational readiness assessment for one change set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadinessDelta {
    pub runbook_updated: ReadinessState,
    pub monitoring_updated: ReadinessState,
    pub ownership_known: ReadinessState,
    pub notes: Vec<String>,
}

/// A cluster of related events representing one logical deployment,
/// release, or agent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: String,
    /// Grouping key; its shape records which derivation rung matched.
    pub key: String,
    pub title: String,
    pub event_count: usize,
    pub event_ids: Vec<String>,
    pub events: Vec<ChangeEvent>,
    pub services: Vec<String>,
    pub repositories: Vec<String>,
    /// Single environment when uniform, `"mixed"` otherwise.
    pub environment: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub change_types: Vec<ChangeType>,
    pub initiators: Vec<Initiator>,
    pub author_types: Vec<AuthorType>,
    pub evidence: Vec<EvidenceLink>,
    pub readiness_delta: ReadinessDelta,
    /// How confident the grouper is that these events belong together.
    pub confidence: f64,
}

/// A change set scored against an incident for triage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedChangeSet {
    pub change_set: ChangeSet,
    pub score: f64,
    pub why_relevant: Vec<String>,
    pub confidence: CorrelationConfidence,
    pub suggested_blast_radius: Option<BlastRadiusPrediction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn test_readiness_default_is_unknown() {
        let delta = ReadinessDelta::default();
        assert_eq!(delta.runbook_updated, ReadinessState::Unknown);
        assert_eq!(delta.monitoring_updated, ReadinessState::Unknown);
        assert_eq!(delta.ownership_known, ReadinessState::Unknown);
        assert!(delta.notes.is_empty());
    }

    #[test]
    fn test_confidence_factor_wire_form() {
        let confidence = CorrelationConfidence {
            overall: 0.5,
            factors: ConfidenceFactors {
                environment_match: 1.0,
                ..ConfidenceFactors::default()
            },
        };
        let json = serde_json::to_value(&confidence).unwrap();
        assert_eq!(json["factors"]["environment_match"], 1.0);
    }
}
