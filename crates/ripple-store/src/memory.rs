//! In-memory reference adapter.
//!
//! Deterministic and test-friendly. Embedding hosts that need durability use
//! [`crate::SqliteEventStore`]; this adapter mirrors its observable
//! behavior, including conflict and not-found semantics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ripple_types::{
    ChangeEvent, ChangeEventPatch, CoreError, CoreResult, NewChangeEvent, StoreStats,
    VelocityMetric,
};

use crate::query::EventQuery;
use crate::traits::{average_interval_minutes, materialize, EventStore};

/// In-memory event store.
#[derive(Default)]
pub struct MemoryEventStore {
    /// Insertion-ordered; ties on timestamp resolve by position here.
    events: RwLock<Vec<ChangeEvent>>,
    closed: AtomicBool,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::unavailable("event store is closed"));
        }
        Ok(())
    }

    fn read(&self) -> CoreResult<std::sync::RwLockReadGuard<'_, Vec<ChangeEvent>>> {
        self.events
            .read()
            .map_err(|_| CoreError::unavailable("event store lock poisoned"))
    }

    fn write(&self) -> CoreResult<std::sync::RwLockWriteGuard<'_, Vec<ChangeEvent>>> {
        self.events
            .write()
            .map_err(|_| CoreError::unavailable("event store lock poisoned"))
    }

    fn touches(event: &ChangeEvent, service: &str) -> bool {
        event.service == service || event.additional_services.iter().any(|s| s == service)
    }

    fn velocity_window(
        events: &[ChangeEvent],
        service: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        inclusive_end: bool,
    ) -> VelocityMetric {
        let in_window: Vec<&ChangeEvent> = events
            .iter()
            .filter(|e| Self::touches(e, service))
            .filter(|e| {
                e.timestamp >= start
                    && if inclusive_end {
                        e.timestamp <= end
                    } else {
                        e.timestamp < end
                    }
            })
            .collect();

        let mut change_types = BTreeMap::new();
        for e in &in_window {
            *change_types.entry(e.change_type).or_insert(0) += 1;
        }
        let timestamps: Vec<DateTime<Utc>> = in_window.iter().map(|e| e.timestamp).collect();

        VelocityMetric {
            service: service.to_string(),
            window_start: start,
            window_end: end,
            change_count: in_window.len() as u64,
            change_types,
            average_interval_minutes: average_interval_minutes(&timestamps),
        }
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert(&self, new: NewChangeEvent) -> CoreResult<ChangeEvent> {
        self.guard_open()?;
        let event = materialize(new, Utc::now())?;
        let mut events = self.write()?;
        if let Some(key) = &event.idempotency_key {
            if events.iter().any(|e| e.idempotency_key.as_ref() == Some(key)) {
                return Err(CoreError::conflict_with_hint(
                    format!("idempotency key {key:?} already exists"),
                    "fetch the stored event by idempotency key instead",
                ));
            }
        }
        events.push(event.clone());
        Ok(event)
    }

    async fn insert_batch(&self, batch: Vec<NewChangeEvent>) -> CoreResult<Vec<ChangeEvent>> {
        self.guard_open()?;
        let now = Utc::now();
        // Validate the whole batch before any mutation lands.
        let mut prepared = Vec::with_capacity(batch.len());
        for new in batch {
            prepared.push(materialize(new, now)?);
        }
        let mut events = self.write()?;
        for event in &prepared {
            if let Some(key) = &event.idempotency_key {
                let dup = events.iter().chain(prepared.iter()).filter(|e| {
                    e.idempotency_key.as_ref() == Some(key)
                });
                if dup.count() > 1 {
                    return Err(CoreError::conflict_with_hint(
                        format!("idempotency key {key:?} already exists"),
                        "fetch the stored event by idempotency key instead",
                    ));
                }
            }
        }
        events.extend(prepared.iter().cloned());
        Ok(prepared)
    }

    async fn get(&self, id: &str) -> CoreResult<ChangeEvent> {
        self.guard_open()?;
        let events = self.read()?;
        events
            .iter()
            .find(|e| e.id.to_string() == id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("change event {id} not found")))
    }

    async fn get_by_idempotency_key(&self, key: &str) -> CoreResult<Option<ChangeEvent>> {
        self.guard_open()?;
        let events = self.read()?;
        Ok(events
            .iter()
            .find(|e| e.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn update(&self, id: &str, patch: ChangeEventPatch) -> CoreResult<ChangeEvent> {
        self.guard_open()?;
        let mut events = self.write()?;
        let event = events
            .iter_mut()
            .find(|e| e.id.to_string() == id)
            .ok_or_else(|| CoreError::not_found(format!("change event {id} not found")))?;

        if patch.is_empty() {
            return Ok(event.clone());
        }
        if let Some(status) = patch.status {
            event.status = status;
        }
        if let Some(summary) = patch.summary {
            event.summary = summary;
        }
        if let Some(tags) = patch.tags {
            event.tags = tags;
        }
        if let Some(metadata) = patch.metadata {
            event.metadata = metadata;
        }
        if let Some(blast_radius) = patch.blast_radius {
            event.blast_radius = Some(blast_radius);
        }
        event.updated_at = Utc::now();
        Ok(event.clone())
    }

    async fn delete(&self, id: &str) -> CoreResult<()> {
        self.guard_open()?;
        let mut events = self.write()?;
        let before = events.len();
        events.retain(|e| e.id.to_string() != id);
        if events.len() == before {
            return Err(CoreError::not_found(format!("change event {id} not found")));
        }
        Ok(())
    }

    async fn query(&self, query: EventQuery) -> CoreResult<Vec<ChangeEvent>> {
        self.guard_open()?;
        let events = self.read()?;
        let mut hits: Vec<(usize, &ChangeEvent)> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| query.matches(e))
            .collect();
        // timestamp DESC, insertion order ASC for ties
        hits.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then(ia.cmp(ib)));
        Ok(hits
            .into_iter()
            .take(query.effective_limit())
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn search(&self, q: &str, limit: usize) -> CoreResult<Vec<ChangeEvent>> {
        self.guard_open()?;
        let tokens: Vec<String> = q
            .split_whitespace()
            .filter(|t| t.len() >= 2)
            .map(|t| t.to_lowercase())
            .collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let events = self.read()?;
        let mut scored: Vec<(usize, &ChangeEvent)> = events
            .iter()
            .filter_map(|e| {
                let haystack = format!("{} {}", e.summary.to_lowercase(), e.service.to_lowercase());
                let words: Vec<&str> = haystack.split_whitespace().collect();
                let matched = tokens
                    .iter()
                    .filter(|t| words.iter().any(|w| w.starts_with(t.as_str())))
                    .count();
                (matched > 0).then_some((matched, e))
            })
            .collect();
        scored.sort_by(|(ma, a), (mb, b)| mb.cmp(ma).then(b.timestamp.cmp(&a.timestamp)).then(a.id.cmp(&b.id)));
        Ok(scored.into_iter().take(limit).map(|(_, e)| e.clone()).collect())
    }

    async fn recent_for_services(
        &self,
        services: &[String],
        window_minutes: i64,
    ) -> CoreResult<Vec<ChangeEvent>> {
        let since = Utc::now() - Duration::minutes(window_minutes);
        self.query(
            EventQuery::builder()
                .services(services.iter().cloned())
                .since(since)
                .limit(100)
                .build(),
        )
        .await
    }

    async fn velocity(&self, service: &str, window_minutes: i64) -> CoreResult<VelocityMetric> {
        self.guard_open()?;
        let now = Utc::now();
        let events = self.read()?;
        Ok(Self::velocity_window(
            &events,
            service,
            now - Duration::minutes(window_minutes),
            now,
            true,
        ))
    }

    async fn velocity_trend(
        &self,
        service: &str,
        window_minutes: i64,
        periods: usize,
    ) -> CoreResult<Vec<VelocityMetric>> {
        self.guard_open()?;
        let now = Utc::now();
        let events = self.read()?;
        let mut windows = Vec::with_capacity(periods);
        for i in 0..periods {
            let offset = (periods - 1 - i) as i64;
            let end = now - Duration::minutes(offset * window_minutes);
            let start = end - Duration::minutes(window_minutes);
            // Boundary events count once, in the more recent window; only
            // the newest window includes its upper bound.
            let inclusive_end = i == periods - 1;
            windows.push(Self::velocity_window(
                &events,
                service,
                start,
                end,
                inclusive_end,
            ));
        }
        Ok(windows)
    }

    async fn prune_older_than(&self, days: i64) -> CoreResult<u64> {
        self.guard_open()?;
        let cutoff = Utc::now() - Duration::days(days);
        let mut events = self.write()?;
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        Ok((before - events.len()) as u64)
    }

    async fn stats(&self) -> CoreResult<StoreStats> {
        self.guard_open()?;
        let events = self.read()?;
        let mut stats = StoreStats {
            total: events.len() as u64,
            ..StoreStats::default()
        };
        for e in events.iter() {
            *stats.by_type.entry(e.change_type).or_insert(0) += 1;
            *stats.by_source.entry(e.source).or_insert(0) += 1;
            *stats.by_environment.entry(e.environment.clone()).or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn close(&self) -> CoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
