//! Test fixtures shared by this crate's unit tests.

use chrono::Utc;
use ripple_types::{ChangeEvent, ChangeSource, ChangeStatus, ChangeType, Initiator, NewChangeEvent};

/// Materialize an ingest payload the way the store would, with defaults
/// filled, so analysis tests stay self-contained.
pub(crate) fn event_from(new: NewChangeEvent) -> ChangeEvent {
    let now = Utc::now();
    ChangeEvent {
        id: uuid::Uuid::new_v4(),
        timestamp: new.timestamp.unwrap_or(now),
        service: new.service,
        additional_services: new.additional_services,
        change_type: new.change_type.unwrap_or(ChangeType::Deployment),
        source: new.source.unwrap_or(ChangeSource::Manual),
        initiator: new.initiator.unwrap_or(Initiator::Unknown),
        initiator_identity: new.initiator_identity,
        author_type: new.author_type,
        status: new.status.unwrap_or(ChangeStatus::Completed),
        environment: new.environment.unwrap_or_else(|| "production".into()),
        summary: new.summary,
        commit_sha: new.commit_sha,
        pr_number: new.pr_number,
        pr_url: new.pr_url,
        repository: new.repository,
        branch: new.branch,
        diff: new.diff,
        files_changed: new.files_changed,
        config_keys: new.config_keys,
        previous_version: new.previous_version,
        new_version: new.new_version,
        blast_radius: None,
        idempotency_key: new.idempotency_key,
        change_set_id: new.change_set_id,
        canonical_url: new.canonical_url,
        tags: new.tags,
        metadata: new.metadata,
        created_at: now,
        updated_at: now,
    }
}
