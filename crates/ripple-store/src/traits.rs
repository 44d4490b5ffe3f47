//! The storage contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ripple_types::{
    ChangeEvent, ChangeEventPatch, ChangeSource, ChangeStatus, CoreError, CoreResult, Initiator,
    NewChangeEvent, StoreStats, VelocityMetric,
};
use uuid::Uuid;

use crate::query::EventQuery;

/// Durable change-event storage.
///
/// All operations are serializable; concurrent readers see a consistent
/// snapshot. Implementations surface backing-store failures as
/// `ErrorKind::Unavailable`, duplicate idempotency keys as
/// `ErrorKind::Conflict`, and corrupt stored data as
/// `ErrorKind::InvariantViolation`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Validate, fill server defaults, persist, and return the canonical
    /// event.
    async fn insert(&self, event: NewChangeEvent) -> CoreResult<ChangeEvent>;

    /// Insert a batch inside a single transaction. The first validation
    /// failure aborts the whole batch before commit.
    async fn insert_batch(&self, events: Vec<NewChangeEvent>) -> CoreResult<Vec<ChangeEvent>>;

    /// Get one event by id.
    async fn get(&self, id: &str) -> CoreResult<ChangeEvent>;

    /// Look up the event stored under an idempotency key, if any.
    async fn get_by_idempotency_key(&self, key: &str) -> CoreResult<Option<ChangeEvent>>;

    /// Apply a partial update. Only provided fields are touched; an empty
    /// patch is a no-op that returns the current event.
    async fn update(&self, id: &str, patch: ChangeEventPatch) -> CoreResult<ChangeEvent>;

    /// Delete one event by id.
    async fn delete(&self, id: &str) -> CoreResult<()>;

    /// Filtered query, ordered by `timestamp DESC` then insertion order.
    async fn query(&self, query: EventQuery) -> CoreResult<Vec<ChangeEvent>>;

    /// Full-text search over summary and service, ranked by relevance.
    async fn search(&self, q: &str, limit: usize) -> CoreResult<Vec<ChangeEvent>>;

    /// Events touching any of `services` within the trailing window.
    async fn recent_for_services(
        &self,
        services: &[String],
        window_minutes: i64,
    ) -> CoreResult<Vec<ChangeEvent>>;

    /// Change velocity for one service over the trailing window.
    async fn velocity(&self, service: &str, window_minutes: i64) -> CoreResult<VelocityMetric>;

    /// `periods` sequential velocity windows ending at now, oldest-first.
    async fn velocity_trend(
        &self,
        service: &str,
        window_minutes: i64,
        periods: usize,
    ) -> CoreResult<Vec<VelocityMetric>>;

    /// Delete events older than `days` days; returns the deletion count.
    async fn prune_older_than(&self, days: i64) -> CoreResult<u64>;

    /// Store-wide aggregate counts.
    async fn stats(&self) -> CoreResult<StoreStats>;

    /// Release the backing resources. Subsequent operations fail with
    /// `ErrorKind::Unavailable`.
    async fn close(&self) -> CoreResult<()>;
}

/// Check the caller-fixable requirements on an ingest payload.
///
/// Facades call this before handing the payload to a store, so transports
/// see `ErrorKind::Validation`. A payload that reaches `insert` unvalidated
/// and still violates these rules is a programmer error and surfaces as
/// `ErrorKind::InvariantViolation` instead.
pub fn validate_new_event(new: &NewChangeEvent) -> CoreResult<()> {
    if new.service.trim().is_empty() {
        return Err(CoreError::validation_with_hint(
            "change event requires a non-empty service",
            "set the primary affected service id",
        ));
    }
    if new.summary.trim().is_empty() {
        return Err(CoreError::validation_with_hint(
            "change event requires a non-empty summary",
            "describe the change in one sentence",
        ));
    }
    if new.change_type.is_none() {
        return Err(CoreError::validation_with_hint(
            "change event requires a change type",
            "one of: deployment, config_change, infra_modification, feature_flag, db_migration, code_change, rollback, scaling, security_patch",
        ));
    }
    Ok(())
}

/// Validate an ingest payload and fill server defaults, producing the
/// canonical event both adapters persist.
pub(crate) fn materialize(new: NewChangeEvent, now: DateTime<Utc>) -> CoreResult<ChangeEvent> {
    validate_new_event(&new)
        .map_err(|err| CoreError::invariant(format!("unvalidated ingest payload: {err}")))?;
    let change_type = new.change_type.ok_or_else(|| {
        CoreError::invariant("unvalidated ingest payload: change type missing")
    })?;

    let mut additional_services = Vec::new();
    for s in new.additional_services {
        if !s.trim().is_empty() && s != new.service && !additional_services.contains(&s) {
            additional_services.push(s);
        }
    }

    Ok(ChangeEvent {
        id: Uuid::new_v4(),
        timestamp: new.timestamp.unwrap_or(now),
        service: new.service,
        additional_services,
        change_type,
        source: new.source.unwrap_or(ChangeSource::Manual),
        initiator: new.initiator.unwrap_or(Initiator::Unknown),
        initiator_identity: new.initiator_identity,
        author_type: new.author_type,
        status: new.status.unwrap_or(ChangeStatus::Completed),
        environment: new
            .environment
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| "production".to_string()),
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
    })
}

/// Mean gap between consecutive timestamps, in minutes. 0 when fewer than
/// two. The window length never enters this computation.
pub(crate) fn average_interval_minutes(timestamps: &[DateTime<Utc>]) -> f64 {
    if timestamps.len() < 2 {
        return 0.0;
    }
    let mut sorted = timestamps.to_vec();
    sorted.sort();
    let gaps: f64 = sorted
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_milliseconds() as f64 / 60_000.0)
        .sum();
    gaps / (sorted.len() - 1) as f64
}
