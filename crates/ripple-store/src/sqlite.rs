//! SQLite adapter.
//!
//! A single local database file that starts instantly. The full-text index
//! is an FTS5 table maintained inside the same transaction as every row
//! mutation, so a write is searchable the moment its transaction commits.
//!
//! Timestamps are stored as RFC 3339 text with fixed microsecond precision;
//! lexicographic order equals chronological order, which lets every range
//! filter and ORDER BY run on the plain text column.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use ripple_types::{
    AuthorType, ChangeEvent, ChangeEventPatch, ChangeSource, ChangeStatus, ChangeType, CoreError,
    CoreResult, Initiator, NewChangeEvent, StoreStats, VelocityMetric,
};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::query::EventQuery;
use crate::traits::{average_interval_minutes, materialize, EventStore};

const DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS change_events (
        id TEXT PRIMARY KEY,
        timestamp TEXT NOT NULL,
        service TEXT NOT NULL,
        additional_services TEXT NOT NULL,
        change_type TEXT NOT NULL,
        source TEXT NOT NULL,
        initiator TEXT NOT NULL,
        initiator_identity TEXT,
        author_type TEXT,
        status TEXT NOT NULL,
        environment TEXT NOT NULL,
        summary TEXT NOT NULL,
        commit_sha TEXT,
        pr_number INTEGER,
        pr_url TEXT,
        repository TEXT,
        branch TEXT,
        diff TEXT,
        files_changed TEXT NOT NULL,
        config_keys TEXT NOT NULL,
        previous_version TEXT,
        new_version TEXT,
        blast_radius TEXT,
        idempotency_key TEXT,
        change_set_id TEXT,
        canonical_url TEXT,
        tags TEXT NOT NULL,
        metadata TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE VIRTUAL TABLE IF NOT EXISTS change_events_fts
        USING fts5(summary, service, event_id UNINDEXED)",
    "CREATE INDEX IF NOT EXISTS idx_change_events_timestamp ON change_events(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_change_events_service ON change_events(service)",
    "CREATE INDEX IF NOT EXISTS idx_change_events_change_type ON change_events(change_type)",
    "CREATE INDEX IF NOT EXISTS idx_change_events_environment ON change_events(environment)",
    "CREATE INDEX IF NOT EXISTS idx_change_events_status ON change_events(status)",
    "CREATE INDEX IF NOT EXISTS idx_change_events_commit_sha ON change_events(commit_sha)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_change_events_idempotency_key
        ON change_events(idempotency_key) WHERE idempotency_key IS NOT NULL",
];

const INSERT_EVENT_SQL: &str = "INSERT INTO change_events (
        id, timestamp, service, additional_services, change_type, source,
        initiator, initiator_identity, author_type, status, environment,
        summary, commit_sha, pr_number, pr_url, repository, branch, diff,
        files_changed, config_keys, previous_version, new_version,
        blast_radius, idempotency_key, change_set_id, canonical_url, tags,
        metadata, created_at, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

/// SQLite-backed event store.
pub struct SqliteEventStore {
    pool: SqlitePool,
    closed: AtomicBool,
}

impl SqliteEventStore {
    /// Open (creating if missing) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(map_sqlx)?;
        let store = Self {
            pool,
            closed: AtomicBool::new(false),
        };
        store.init_schema().await?;
        info!(path = %path.as_ref().display(), "opened change event store");
        Ok(store)
    }

    /// Open an in-memory database. Pinned to a single connection so every
    /// operation sees the same database.
    pub async fn open_in_memory() -> CoreResult<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(map_sqlx)?;
        let store = Self {
            pool,
            closed: AtomicBool::new(false),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> CoreResult<()> {
        for statement in DDL {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
        }
        Ok(())
    }

    fn guard_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) || self.pool.is_closed() {
            return Err(CoreError::unavailable("event store is closed"));
        }
        Ok(())
    }

    async fn fetch_by_id(&self, id: &str) -> CoreResult<ChangeEvent> {
        let row = sqlx::query("SELECT * FROM change_events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        match row {
            Some(row) => decode_row(&row),
            None => Err(CoreError::not_found(format!(
                "change event {id} not found"
            ))),
        }
    }

    async fn velocity_window(
        &self,
        service: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        inclusive_end: bool,
    ) -> CoreResult<VelocityMetric> {
        let end_op = if inclusive_end { "<=" } else { "<" };
        let touches = "(service = ? OR EXISTS (
            SELECT 1 FROM json_each(change_events.additional_services)
            WHERE json_each.value = ?))";

        // Pass one: grouped count per change type.
        let counts_sql = format!(
            "SELECT change_type, COUNT(*) AS n FROM change_events
             WHERE {touches} AND timestamp >= ? AND timestamp {end_op} ?
             GROUP BY change_type"
        );
        let count_rows = sqlx::query(&counts_sql)
            .bind(service)
            .bind(service)
            .bind(encode_ts(start))
            .bind(encode_ts(end))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let mut change_types = BTreeMap::new();
        let mut change_count = 0u64;
        for row in &count_rows {
            let raw: String = row.try_get("change_type").map_err(map_sqlx)?;
            let n: i64 = row.try_get("n").map_err(map_sqlx)?;
            let change_type = ChangeType::parse(&raw)
                .ok_or_else(|| CoreError::invariant(format!("corrupt change_type {raw:?}")))?;
            change_types.insert(change_type, n as u64);
            change_count += n as u64;
        }

        // Pass two: the timestamp list drives the interval computation.
        let ts_sql = format!(
            "SELECT timestamp FROM change_events
             WHERE {touches} AND timestamp >= ? AND timestamp {end_op} ?
             ORDER BY timestamp ASC"
        );
        let ts_rows = sqlx::query(&ts_sql)
            .bind(service)
            .bind(service)
            .bind(encode_ts(start))
            .bind(encode_ts(end))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let mut timestamps = Vec::with_capacity(ts_rows.len());
        for row in &ts_rows {
            let raw: String = row.try_get("timestamp").map_err(map_sqlx)?;
            timestamps.push(decode_ts(&raw)?);
        }

        Ok(VelocityMetric {
            service: service.to_string(),
            window_start: start,
            window_end: end,
            change_count,
            change_types,
            average_interval_minutes: average_interval_minutes(&timestamps),
        })
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn insert(&self, new: NewChangeEvent) -> CoreResult<ChangeEvent> {
        self.guard_open()?;
        let event = materialize(new, Utc::now())?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        insert_row(&mut tx, &event).await?;
        tx.commit().await.map_err(map_sqlx)?;
        debug!(event = %event.id, service = %event.service, "stored change event");
        Ok(event)
    }

    async fn insert_batch(&self, batch: Vec<NewChangeEvent>) -> CoreResult<Vec<ChangeEvent>> {
        self.guard_open()?;
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut events = Vec::with_capacity(batch.len());
        for new in batch {
            // A validation failure aborts the whole transaction.
            let event = match materialize(new, now) {
                Ok(event) => event,
                Err(err) => {
                    tx.rollback().await.ok();
                    return Err(err);
                }
            };
            if let Err(err) = insert_row(&mut tx, &event).await {
                tx.rollback().await.ok();
                return Err(err);
            }
            events.push(event);
        }
        tx.commit().await.map_err(map_sqlx)?;
        debug!(count = events.len(), "stored change event batch");
        Ok(events)
    }

    async fn get(&self, id: &str) -> CoreResult<ChangeEvent> {
        self.guard_open()?;
        self.fetch_by_id(id).await
    }

    async fn get_by_idempotency_key(&self, key: &str) -> CoreResult<Option<ChangeEvent>> {
        self.guard_open()?;
        let row = sqlx::query("SELECT * FROM change_events WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn update(&self, id: &str, patch: ChangeEventPatch) -> CoreResult<ChangeEvent> {
        self.guard_open()?;
        let mut current = self.fetch_by_id(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }

        if let Some(status) = patch.status {
            current.status = status;
        }
        if let Some(summary) = patch.summary {
            current.summary = summary;
        }
        if let Some(tags) = patch.tags {
            current.tags = tags;
        }
        if let Some(metadata) = patch.metadata {
            current.metadata = metadata;
        }
        if let Some(blast_radius) = patch.blast_radius {
            current.blast_radius = Some(blast_radius);
        }
        current.updated_at = Utc::now();

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query(
            "UPDATE change_events SET
                status = ?, summary = ?, tags = ?, metadata = ?,
                blast_radius = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(current.status.as_str())
        .bind(&current.summary)
        .bind(encode_json(&current.tags)?)
        .bind(encode_json(&current.metadata)?)
        .bind(encode_optional_json(&current.blast_radius)?)
        .bind(encode_ts(current.updated_at))
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        sqlx::query("UPDATE change_events_fts SET summary = ? WHERE event_id = ?")
            .bind(&current.summary)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(current)
    }

    async fn delete(&self, id: &str) -> CoreResult<()> {
        self.guard_open()?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let result = sqlx::query("DELETE FROM change_events WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(CoreError::not_found(format!("change event {id} not found")));
        }
        sqlx::query("DELETE FROM change_events_fts WHERE event_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn query(&self, query: EventQuery) -> CoreResult<Vec<ChangeEvent>> {
        self.guard_open()?;
        let mut sql = String::from("SELECT * FROM change_events WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();

        if !query.services.is_empty() {
            let marks = placeholders(query.services.len());
            sql.push_str(&format!(
                " AND (service IN ({marks}) OR EXISTS (
                    SELECT 1 FROM json_each(change_events.additional_services)
                    WHERE json_each.value IN ({marks})))"
            ));
            binds.extend(query.services.iter().cloned());
            binds.extend(query.services.iter().cloned());
        }
        if !query.change_types.is_empty() {
            let marks = placeholders(query.change_types.len());
            sql.push_str(&format!(" AND change_type IN ({marks})"));
            binds.extend(query.change_types.iter().map(|t| t.as_str().to_string()));
        }
        if !query.sources.is_empty() {
            let marks = placeholders(query.sources.len());
            sql.push_str(&format!(" AND source IN ({marks})"));
            binds.extend(query.sources.iter().map(|s| s.as_str().to_string()));
        }
        if let Some(ref environment) = query.environment {
            sql.push_str(" AND environment = ?");
            binds.push(environment.clone());
        }
        if let Some(since) = query.since {
            sql.push_str(" AND timestamp >= ?");
            binds.push(encode_ts(since));
        }
        if let Some(until) = query.until {
            sql.push_str(" AND timestamp <= ?");
            binds.push(encode_ts(until));
        }
        if let Some(initiator) = query.initiator {
            sql.push_str(" AND initiator = ?");
            binds.push(initiator.as_str().to_string());
        }
        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            binds.push(status.as_str().to_string());
        }
        sql.push_str(" ORDER BY timestamp DESC, rowid ASC LIMIT ?");

        let mut q = sqlx::query(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        q = q.bind(query.effective_limit() as i64);

        let rows = q.fetch_all(&self.pool).await.map_err(map_sqlx)?;
        rows.iter().map(decode_row).collect()
    }

    async fn search(&self, q: &str, limit: usize) -> CoreResult<Vec<ChangeEvent>> {
        self.guard_open()?;
        let tokens: Vec<String> = q
            .split_whitespace()
            .map(|t| {
                t.chars()
                    .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
                    .collect::<String>()
            })
            .filter(|t| t.len() >= 2)
            .collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let match_expr = tokens
            .iter()
            .map(|t| format!("\"{t}\"*"))
            .collect::<Vec<_>>()
            .join(" OR ");

        let rows = sqlx::query(
            "SELECT change_events.* FROM change_events_fts
             JOIN change_events ON change_events.id = change_events_fts.event_id
             WHERE change_events_fts MATCH ?
             ORDER BY bm25(change_events_fts), change_events.timestamp DESC
             LIMIT ?",
        )
        .bind(&match_expr)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(decode_row).collect()
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
        self.velocity_window(service, now - Duration::minutes(window_minutes), now, true)
            .await
    }

    async fn velocity_trend(
        &self,
        service: &str,
        window_minutes: i64,
        periods: usize,
    ) -> CoreResult<Vec<VelocityMetric>> {
        self.guard_open()?;
        let now = Utc::now();
        let mut windows = Vec::with_capacity(periods);
        for i in 0..periods {
            let offset = (periods - 1 - i) as i64;
            let end = now - Duration::minutes(offset * window_minutes);
            let start = end - Duration::minutes(window_minutes);
            // Boundary events count once, in the more recent window; only
            // the newest window includes its upper bound.
            let inclusive_end = i == periods - 1;
            windows.push(
                self.velocity_window(service, start, end, inclusive_end)
                    .await?,
            );
        }
        Ok(windows)
    }

    async fn prune_older_than(&self, days: i64) -> CoreResult<u64> {
        self.guard_open()?;
        let cutoff = encode_ts(Utc::now() - Duration::days(days));
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query(
            "DELETE FROM change_events_fts WHERE event_id IN (
                SELECT id FROM change_events WHERE timestamp < ?)",
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let result = sqlx::query("DELETE FROM change_events WHERE timestamp < ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        tx.commit().await.map_err(map_sqlx)?;
        let pruned = result.rows_affected();
        if pruned > 0 {
            info!(pruned, "pruned aged change events");
        }
        Ok(pruned)
    }

    async fn stats(&self) -> CoreResult<StoreStats> {
        self.guard_open()?;
        let total: i64 = sqlx::query("SELECT COUNT(*) AS n FROM change_events")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?
            .try_get("n")
            .map_err(map_sqlx)?;

        let mut stats = StoreStats {
            total: total as u64,
            ..StoreStats::default()
        };

        let rows = sqlx::query(
            "SELECT change_type, COUNT(*) AS n FROM change_events GROUP BY change_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        for row in &rows {
            let raw: String = row.try_get("change_type").map_err(map_sqlx)?;
            let n: i64 = row.try_get("n").map_err(map_sqlx)?;
            let change_type = ChangeType::parse(&raw)
                .ok_or_else(|| CoreError::invariant(format!("corrupt change_type {raw:?}")))?;
            stats.by_type.insert(change_type, n as u64);
        }

        let rows = sqlx::query("SELECT source, COUNT(*) AS n FROM change_events GROUP BY source")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        for row in &rows {
            let raw: String = row.try_get("source").map_err(map_sqlx)?;
            let n: i64 = row.try_get("n").map_err(map_sqlx)?;
            let source = ChangeSource::parse(&raw)
                .ok_or_else(|| CoreError::invariant(format!("corrupt source {raw:?}")))?;
            stats.by_source.insert(source, n as u64);
        }

        let rows = sqlx::query(
            "SELECT environment, COUNT(*) AS n FROM change_events GROUP BY environment",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        for row in &rows {
            let environment: String = row.try_get("environment").map_err(map_sqlx)?;
            let n: i64 = row.try_get("n").map_err(map_sqlx)?;
            stats.by_environment.insert(environment, n as u64);
        }

        Ok(stats)
    }

    async fn close(&self) -> CoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.pool.close().await;
        info!("closed change event store");
        Ok(())
    }
}

async fn insert_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    event: &ChangeEvent,
) -> CoreResult<()> {
    sqlx::query(INSERT_EVENT_SQL)
        .bind(event.id.to_string())
        .bind(encode_ts(event.timestamp))
        .bind(&event.service)
        .bind(encode_json(&event.additional_services)?)
        .bind(event.change_type.as_str())
        .bind(event.source.as_str())
        .bind(event.initiator.as_str())
        .bind(&event.initiator_identity)
        .bind(event.author_type.map(|a| a.as_str()))
        .bind(event.status.as_str())
        .bind(&event.environment)
        .bind(&event.summary)
        .bind(&event.commit_sha)
        .bind(event.pr_number)
        .bind(&event.pr_url)
        .bind(&event.repository)
        .bind(&event.branch)
        .bind(&event.diff)
        .bind(encode_json(&event.files_changed)?)
        .bind(encode_json(&event.config_keys)?)
        .bind(&event.previous_version)
        .bind(&event.new_version)
        .bind(encode_optional_json(&event.blast_radius)?)
        .bind(&event.idempotency_key)
        .bind(&event.change_set_id)
        .bind(&event.canonical_url)
        .bind(encode_json(&event.tags)?)
        .bind(encode_json(&event.metadata)?)
        .bind(encode_ts(event.created_at))
        .bind(encode_ts(event.updated_at))
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx)?;

    sqlx::query("INSERT INTO change_events_fts (summary, service, event_id) VALUES (?, ?, ?)")
        .bind(&event.summary)
        .bind(&event.service)
        .bind(event.id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx)?;
    Ok(())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(raw: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::invariant(format!("corrupt timestamp {raw:?}: {e}")))
}

fn encode_json<T: serde::Serialize>(value: &T) -> CoreResult<String> {
    serde_json::to_string(value)
        .map_err(|e| CoreError::invariant(format!("failed to encode column: {e}")))
}

fn encode_optional_json<T: serde::Serialize>(value: &Option<T>) -> CoreResult<Option<String>> {
    value.as_ref().map(|v| encode_json(v)).transpose()
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: &str, column: &str) -> CoreResult<T> {
    serde_json::from_str(raw)
        .map_err(|e| CoreError::invariant(format!("corrupt {column} column: {e}")))
}

fn decode_row(row: &SqliteRow) -> CoreResult<ChangeEvent> {
    let id_raw: String = row.try_get("id").map_err(map_sqlx)?;
    let id = uuid::Uuid::parse_str(&id_raw)
        .map_err(|e| CoreError::invariant(format!("corrupt event id {id_raw:?}: {e}")))?;

    let change_type_raw: String = row.try_get("change_type").map_err(map_sqlx)?;
    let change_type = ChangeType::parse(&change_type_raw)
        .ok_or_else(|| CoreError::invariant(format!("corrupt change_type {change_type_raw:?}")))?;
    let source_raw: String = row.try_get("source").map_err(map_sqlx)?;
    let source = ChangeSource::parse(&source_raw)
        .ok_or_else(|| CoreError::invariant(format!("corrupt source {source_raw:?}")))?;
    let initiator_raw: String = row.try_get("initiator").map_err(map_sqlx)?;
    let initiator = Initiator::parse(&initiator_raw)
        .ok_or_else(|| CoreError::invariant(format!("corrupt initiator {initiator_raw:?}")))?;
    let status_raw: String = row.try_get("status").map_err(map_sqlx)?;
    let status = ChangeStatus::parse(&status_raw)
        .ok_or_else(|| CoreError::invariant(format!("corrupt status {status_raw:?}")))?;
    let author_type = row
        .try_get::<Option<String>, _>("author_type")
        .map_err(map_sqlx)?
        .map(|raw| {
            AuthorType::parse(&raw)
                .ok_or_else(|| CoreError::invariant(format!("corrupt author_type {raw:?}")))
        })
        .transpose()?;

    let timestamp_raw: String = row.try_get("timestamp").map_err(map_sqlx)?;
    let created_raw: String = row.try_get("created_at").map_err(map_sqlx)?;
    let updated_raw: String = row.try_get("updated_at").map_err(map_sqlx)?;

    let additional_raw: String = row.try_get("additional_services").map_err(map_sqlx)?;
    let files_raw: String = row.try_get("files_changed").map_err(map_sqlx)?;
    let config_raw: String = row.try_get("config_keys").map_err(map_sqlx)?;
    let tags_raw: String = row.try_get("tags").map_err(map_sqlx)?;
    let metadata_raw: String = row.try_get("metadata").map_err(map_sqlx)?;
    let blast_raw: Option<String> = row.try_get("blast_radius").map_err(map_sqlx)?;

    Ok(ChangeEvent {
        id,
        timestamp: decode_ts(&timestamp_raw)?,
        service: row.try_get("service").map_err(map_sqlx)?,
        additional_services: decode_json(&additional_raw, "additional_services")?,
        change_type,
        source,
        initiator,
        initiator_identity: row.try_get("initiator_identity").map_err(map_sqlx)?,
        author_type,
        status,
        environment: row.try_get("environment").map_err(map_sqlx)?,
        summary: row.try_get("summary").map_err(map_sqlx)?,
        commit_sha: row.try_get("commit_sha").map_err(map_sqlx)?,
        pr_number: row.try_get("pr_number").map_err(map_sqlx)?,
        pr_url: row.try_get("pr_url").map_err(map_sqlx)?,
        repository: row.try_get("repository").map_err(map_sqlx)?,
        branch: row.try_get("branch").map_err(map_sqlx)?,
        diff: row.try_get("diff").map_err(map_sqlx)?,
        files_changed: decode_json(&files_raw, "files_changed")?,
        config_keys: decode_json(&config_raw, "config_keys")?,
        previous_version: row.try_get("previous_version").map_err(map_sqlx)?,
        new_version: row.try_get("new_version").map_err(map_sqlx)?,
        blast_radius: blast_raw
            .as_deref()
            .map(|raw| decode_json(raw, "blast_radius"))
            .transpose()?,
        idempotency_key: row.try_get("idempotency_key").map_err(map_sqlx)?,
        change_set_id: row.try_get("change_set_id").map_err(map_sqlx)?,
        canonical_url: row.try_get("canonical_url").map_err(map_sqlx)?,
        tags: decode_json(&tags_raw, "tags")?,
        metadata: decode_json(&metadata_raw, "metadata")?,
        created_at: decode_ts(&created_raw)?,
        updated_at: decode_ts(&updated_raw)?,
    })
}

fn map_sqlx(err: sqlx::Error) -> CoreError {
    match &err {
        sqlx::Error::Database(db) => {
            let message = db.message();
            if message.contains("UNIQUE constraint failed")
                && message.contains("idempotency_key")
            {
                CoreError::conflict_with_hint(
                    "an event with this idempotency key already exists",
                    "fetch the stored event by idempotency key instead",
                )
            } else if message.contains("NOT NULL constraint failed") {
                CoreError::invariant(format!("storage constraint violated: {message}"))
            } else {
                CoreError::unavailable(format!("database error: {message}"))
            }
        }
        sqlx::Error::RowNotFound => CoreError::not_found("row not found"),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            CoreError::invariant(format!("failed to decode stored row: {err}"))
        }
        sqlx::Error::PoolClosed => CoreError::unavailable("event store is closed"),
        other => CoreError::unavailable(format!("storage error: {other}")),
    }
}
