//! Typed evidence links.
//!
//! Evidence justifies analytical output: every correlation, blast-radius
//! prediction, and triage candidate carries links back to the artifacts it
//! was derived from.

use serde::{Deserialize, Serialize};

/// What an evidence link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Event,
    PullRequest,
    Commit,
    PipelineRun,
    DeploymentRun,
    TerraformRun,
    K8sRollout,
    GraphPath,
    Other,
}

impl EvidenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::PullRequest => "pull_request",
            Self::Commit => "commit",
            Self::PipelineRun => "pipeline_run",
            Self::DeploymentRun => "deployment_run",
            Self::TerraformRun => "terraform_run",
            Self::K8sRollout => "k8s_rollout",
            Self::GraphPath => "graph_path",
            Self::Other => "other",
        }
    }
}

/// A typed link used to justify analytical output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceLink {
    #[serde(rename = "type")]
    pub link_type: EvidenceType,
    pub label: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Structured payload for non-URL evidence such as graph paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl EvidenceLink {
    pub fn new(link_type: EvidenceType, label: impl Into<String>) -> Self {
        Self {
            link_type,
            label: label.into(),
            url: None,
            details: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Identity used for deduplication.
    pub fn dedup_key(&self) -> (EvidenceType, String, String) {
        (
            self.link_type,
            self.label.clone(),
            self.url.clone().unwrap_or_default(),
        )
    }
}

/// Deduplicate in place, preserving first-seen order, then cap the list.
pub fn dedup_and_cap(links: &mut Vec<EvidenceLink>, cap: usize) {
    let mut seen = std::collections::HashSet::new();
    links.retain(|link| seen.insert(link.dedup_key()));
    links.truncate(cap);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_preserves_first_seen_order() {
        let mut links = vec![
            EvidenceLink::new(EvidenceType::Commit, "Commit abc1234").with_url("https://x/commit/abc"),
            EvidenceLink::new(EvidenceType::PullRequest, "PR #7").with_url("https://x/pull/7"),
            EvidenceLink::new(EvidenceType::Commit, "Commit abc1234").with_url("https://x/commit/abc"),
        ];
        dedup_and_cap(&mut links, 40);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].link_type, EvidenceType::Commit);
        assert_eq!(links[1].link_type, EvidenceType::PullRequest);
    }

    #[test]
    fn test_cap_applies_after_dedup() {
        let mut links: Vec<EvidenceLink> = (0..10)
            .map(|i| EvidenceLink::new(EvidenceType::Other, format!("link-{i}")))
            .collect();
        dedup_and_cap(&mut links, 3);
        assert_eq!(links.len(), 3);
        assert_eq!(links[0].label, "link-0");
    }
}
