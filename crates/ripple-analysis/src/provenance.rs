//! Canonical evidence links derived from event attributes.

use ripple_types::evidence::dedup_and_cap;
use ripple_types::{ChangeEvent, ChangeSource, EvidenceLink, EvidenceType};

/// Metadata keys scanned for URLs, in fixed priority order.
const METADATA_URL_KEYS: [&str; 7] = [
    "run_url",
    "pipeline_url",
    "deployment_url",
    "workflow_url",
    "mr_url",
    "pr_url",
    "compare_url",
];

/// Derive the ordered, deduplicated evidence links for one event.
pub fn extract_event_evidence(event: &ChangeEvent) -> Vec<EvidenceLink> {
    let mut links = Vec::new();

    links.push(
        EvidenceLink::new(EvidenceType::Event, "Change event")
            .with_url(format!("/events/{}", event.id)),
    );

    if let Some(pr_url) = &event.pr_url {
        let label = match event.pr_number {
            Some(n) => format!("PR #{n}"),
            None => "Pull request".to_string(),
        };
        links.push(EvidenceLink::new(EvidenceType::PullRequest, label).with_url(pr_url.clone()));
    }

    if let Some(sha) = &event.commit_sha {
        let short = &sha[..sha.len().min(7)];
        let mut link = EvidenceLink::new(EvidenceType::Commit, format!("Commit {short}"));
        if let Some(repository) = &event.repository {
            link = link.with_url(commit_url(repository, sha, event.source));
        }
        links.push(link);
    }

    if let Some(canonical) = &event.canonical_url {
        links.push(
            EvidenceLink::new(EvidenceType::Other, "Canonical URL").with_url(canonical.clone()),
        );
    }

    for key in METADATA_URL_KEYS {
        let Some(url) = event.metadata_str(key) else {
            continue;
        };
        let (link_type, label) = match key {
            "run_url" if event.source == ChangeSource::Terraform => {
                (EvidenceType::TerraformRun, "Terraform run")
            }
            "run_url" => (EvidenceType::DeploymentRun, "Deployment run"),
            "pipeline_url" => (EvidenceType::PipelineRun, "Pipeline run"),
            "deployment_url" => (EvidenceType::DeploymentRun, "Deployment run"),
            "workflow_url" => (EvidenceType::DeploymentRun, "Workflow run"),
            "mr_url" => (EvidenceType::PullRequest, "Merge request"),
            "pr_url" => (EvidenceType::PullRequest, "Pull request"),
            _ => (EvidenceType::Other, "Compare view"),
        };
        links.push(EvidenceLink::new(link_type, label).with_url(url.to_string()));
    }

    dedup_and_cap(&mut links, usize::MAX);
    links
}

/// First available canonical URL for an event: the precomputed one, the PR,
/// a synthesized commit URL, then the metadata URLs in fixed key order.
pub fn infer_event_canonical_url(event: &ChangeEvent) -> Option<String> {
    if let Some(url) = &event.canonical_url {
        return Some(url.clone());
    }
    if let Some(url) = &event.pr_url {
        return Some(url.clone());
    }
    if let (Some(sha), Some(repository)) = (&event.commit_sha, &event.repository) {
        return Some(commit_url(repository, sha, event.source));
    }
    METADATA_URL_KEYS
        .iter()
        .find_map(|key| event.metadata_str(key).map(str::to_string))
}

/// Synthesize a commit URL. `repository` may be a full URL or `org/repo`;
/// GitLab uses the `/-/commit/` path form.
fn commit_url(repository: &str, sha: &str, source: ChangeSource) -> String {
    let base = if repository.starts_with("http://") || repository.starts_with("https://") {
        repository.trim_end_matches('/').to_string()
    } else if source == ChangeSource::Gitlab {
        format!("https://gitlab.com/{repository}")
    } else {
        format!("https://github.com/{repository}")
    };
    if source == ChangeSource::Gitlab {
        format!("{base}/-/commit/{sha}")
    } else {
        format!("{base}/commit/{sha}")
    }
}
