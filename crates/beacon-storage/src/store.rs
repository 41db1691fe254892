//! SQLite implementation of the telemetry store
//!
//! This module provides the direct (async) query surface over the four
//! telemetry tables. It handles all domain type serialization and SQL
//! query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type                | SQL Type | Strategy                                   |
//! |----------------------------|----------|--------------------------------------------|
//! | SessionId, TraceId, SpanId | TEXT     | String via `.as_str()` / validating constructor |
//! | ProcessId, LogId           | TEXT     | UUID string via `.to_string()` / `FromStr` |
//! | DateTime<Utc>              | TEXT     | RFC 3339, nanoseconds, `Z` suffix          |
//! | AppState, SpanKind         | TEXT     | `.as_str()` / `FromStr`                    |
//! | ResourceType, ResourceKey  | TEXT     | `.as_str()` / `FromStr` / `ResourceKey::parse` |
//! | LogSeverity                | INTEGER  | OpenTelemetry severity number              |
//! | Attributes, events, links  | TEXT     | serde_json                                 |
//! | SpanStatus                 | TEXT     | serde_json                                 |

use std::str::FromStr;

use beacon_core::domain::{
    AppState, Attributes, LogId, LogRecord, LogSeverity, ProcessId, ResourceKey, ResourceRecord,
    ResourceType, SessionId, SessionRecord, SpanEvent, SpanId, SpanKind, SpanLink, SpanRecord,
    SpanStatus, TraceId,
};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteQueryResult, SqliteRow};
use sqlx::{Row, Sqlite};

use crate::filter::{LogFilter, SessionFilter, SpanFilter};
use crate::pool::StoragePool;
use crate::{Result, StorageError};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Direct async access to the telemetry database
///
/// Writes go through the single-connection writer pool, reads through the
/// reader pool. Cloning is cheap and shares the pools.
#[derive(Debug, Clone)]
pub struct TelemetryStore {
    pool: StoragePool,
}

impl TelemetryStore {
    /// Creates a new store over the given pools
    pub fn new(pool: StoragePool) -> Self {
        Self { pool }
    }

    /// Creates a store backed by a fresh in-memory database
    pub async fn in_memory() -> Result<Self> {
        Ok(Self::new(StoragePool::in_memory().await?))
    }

    /// Returns the underlying pools
    pub fn pool(&self) -> &StoragePool {
        &self.pool
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Format a timestamp with fixed width so TEXT ordering is chronological
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a DateTime<Utc> from an RFC 3339 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Rows written by hand or by older tooling may lack the offset
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                .map(|ndt| ndt.and_utc())
        })
        .map_err(|e| StorageError::Serialization(format!("Failed to parse datetime '{}': {}", s, e)))
}

/// Parse an optional DateTime<Utc> from an optional string
fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

/// Map a stored severity number back to its level
fn severity_from_number(n: i64) -> Result<LogSeverity> {
    match n {
        9 => Ok(LogSeverity::Info),
        13 => Ok(LogSeverity::Warn),
        17 => Ok(LogSeverity::Error),
        24 => Ok(LogSeverity::Fatal),
        other => Err(StorageError::Serialization(format!(
            "Unknown log severity number: {}",
            other
        ))),
    }
}

fn parse_optional_session_id(s: Option<String>) -> Result<Option<SessionId>> {
    s.map(SessionId::parse).transpose().map_err(StorageError::from)
}

/// Fails with `RecordNotFound` when an update matched no row
fn ensure_updated(result: SqliteQueryResult, what: &str, id: &str) -> Result<()> {
    if result.rows_affected() == 0 {
        return Err(StorageError::RecordNotFound(format!("{} {}", what, id)));
    }
    Ok(())
}

/// Appends a `LIMIT` clause; the value is an integer so it is inlined
fn push_limit(sql: &mut String, limit: Option<u32>) {
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn session_from_row(row: &SqliteRow) -> Result<SessionRecord> {
    let id: String = row.try_get("id")?;
    let process_id: String = row.try_get("process_id")?;
    let state: String = row.try_get("state")?;
    let start_time: String = row.try_get("start_time")?;
    let end_time: Option<String> = row.try_get("end_time")?;
    let last_heartbeat_time: String = row.try_get("last_heartbeat_time")?;
    let crash_report_id: Option<String> = row.try_get("crash_report_id")?;
    let cold_start: bool = row.try_get("cold_start")?;
    let sent_at: Option<String> = row.try_get("sent_at")?;

    Ok(SessionRecord {
        id: SessionId::parse(id)?,
        process_id: ProcessId::from_str(&process_id)?,
        state: AppState::from_str(&state)?,
        start_time: parse_datetime(&start_time)?,
        end_time: parse_optional_datetime(end_time)?,
        last_heartbeat_time: parse_datetime(&last_heartbeat_time)?,
        crash_report_id,
        cold_start,
        sent_at: parse_optional_datetime(sent_at)?,
    })
}

fn span_from_row(row: &SqliteRow) -> Result<SpanRecord> {
    let trace_id: String = row.try_get("trace_id")?;
    let span_id: String = row.try_get("span_id")?;
    let parent_span_id: Option<String> = row.try_get("parent_span_id")?;
    let name: String = row.try_get("name")?;
    let kind: String = row.try_get("kind")?;
    let start_time: String = row.try_get("start_time")?;
    let end_time: Option<String> = row.try_get("end_time")?;
    let attributes: String = row.try_get("attributes")?;
    let events: String = row.try_get("events")?;
    let links: String = row.try_get("links")?;
    let status: String = row.try_get("status")?;
    let process_id: String = row.try_get("process_id")?;
    let session_id: Option<String> = row.try_get("session_id")?;

    Ok(SpanRecord {
        trace_id: TraceId::new(trace_id)?,
        span_id: SpanId::new(span_id)?,
        parent_span_id: parent_span_id.map(SpanId::new).transpose()?,
        name,
        kind: SpanKind::from_str(&kind)?,
        start_time: parse_datetime(&start_time)?,
        end_time: parse_optional_datetime(end_time)?,
        attributes: serde_json::from_str::<Attributes>(&attributes)?,
        events: serde_json::from_str::<Vec<SpanEvent>>(&events)?,
        links: serde_json::from_str::<Vec<SpanLink>>(&links)?,
        status: serde_json::from_str::<SpanStatus>(&status)?,
        process_id: ProcessId::from_str(&process_id)?,
        session_id: parse_optional_session_id(session_id)?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<LogRecord> {
    let id: String = row.try_get("id")?;
    let process_id: String = row.try_get("process_id")?;
    let session_id: Option<String> = row.try_get("session_id")?;
    let severity: i64 = row.try_get("severity")?;
    let body: String = row.try_get("body")?;
    let attributes: String = row.try_get("attributes")?;
    let timestamp: String = row.try_get("timestamp")?;

    Ok(LogRecord {
        id: LogId::from_str(&id)?,
        process_id: ProcessId::from_str(&process_id)?,
        session_id: parse_optional_session_id(session_id)?,
        severity: severity_from_number(severity)?,
        body,
        attributes: serde_json::from_str::<Attributes>(&attributes)?,
        timestamp: parse_datetime(&timestamp)?,
    })
}

fn resource_from_row(row: &SqliteRow) -> Result<ResourceRecord> {
    let key: String = row.try_get("key")?;
    let value: String = row.try_get("value")?;
    let resource_type: String = row.try_get("resource_type")?;
    let resource_type_id: String = row.try_get("resource_type_id")?;
    let collected_at: String = row.try_get("collected_at")?;

    Ok(ResourceRecord {
        key: ResourceKey::parse(&key),
        value,
        resource_type: ResourceType::from_str(&resource_type)?,
        resource_type_id,
        collected_at: parse_datetime(&collected_at)?,
    })
}

fn rows_to<T>(rows: &[SqliteRow], map: fn(&SqliteRow) -> Result<T>) -> Result<Vec<T>> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(map(row)?);
    }
    Ok(records)
}

// ============================================================================
// Bind helpers
// ============================================================================

const INSERT_SESSION: &str = "INSERT INTO sessions \
     (id, process_id, state, start_time, end_time, last_heartbeat_time, \
      crash_report_id, cold_start, sent_at) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

const UPSERT_SESSION: &str = "INSERT INTO sessions \
     (id, process_id, state, start_time, end_time, last_heartbeat_time, \
      crash_report_id, cold_start, sent_at) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
     ON CONFLICT (id) DO UPDATE SET \
      process_id = excluded.process_id, \
      state = excluded.state, \
      start_time = excluded.start_time, \
      end_time = excluded.end_time, \
      last_heartbeat_time = excluded.last_heartbeat_time, \
      crash_report_id = excluded.crash_report_id, \
      cold_start = excluded.cold_start, \
      sent_at = excluded.sent_at";

fn bind_session<'q>(sql: &'q str, session: &SessionRecord) -> SqliteQuery<'q> {
    sqlx::query(sql)
        .bind(session.id.as_str().to_string())
        .bind(session.process_id.to_string())
        .bind(session.state.as_str())
        .bind(format_datetime(&session.start_time))
        .bind(session.end_time.as_ref().map(format_datetime))
        .bind(format_datetime(&session.last_heartbeat_time))
        .bind(session.crash_report_id.clone())
        .bind(session.cold_start)
        .bind(session.sent_at.as_ref().map(format_datetime))
}

const INSERT_SPAN: &str = "INSERT INTO spans \
     (trace_id, span_id, parent_span_id, name, kind, start_time, end_time, \
      attributes, events, links, status, process_id, session_id) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const UPSERT_SPAN: &str = "INSERT INTO spans \
     (trace_id, span_id, parent_span_id, name, kind, start_time, end_time, \
      attributes, events, links, status, process_id, session_id) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
     ON CONFLICT (trace_id, span_id) DO UPDATE SET \
      parent_span_id = excluded.parent_span_id, \
      name = excluded.name, \
      kind = excluded.kind, \
      start_time = excluded.start_time, \
      end_time = excluded.end_time, \
      attributes = excluded.attributes, \
      events = excluded.events, \
      links = excluded.links, \
      status = excluded.status, \
      process_id = excluded.process_id, \
      session_id = excluded.session_id";

fn bind_span<'q>(sql: &'q str, span: &SpanRecord) -> Result<SqliteQuery<'q>> {
    Ok(sqlx::query(sql)
        .bind(span.trace_id.as_str().to_string())
        .bind(span.span_id.as_str().to_string())
        .bind(span.parent_span_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(span.name.clone())
        .bind(span.kind.as_str())
        .bind(format_datetime(&span.start_time))
        .bind(span.end_time.as_ref().map(format_datetime))
        .bind(serde_json::to_string(&span.attributes)?)
        .bind(serde_json::to_string(&span.events)?)
        .bind(serde_json::to_string(&span.links)?)
        .bind(serde_json::to_string(&span.status)?)
        .bind(span.process_id.to_string())
        .bind(span.session_id.as_ref().map(|id| id.as_str().to_string())))
}

const INSERT_LOG: &str = "INSERT INTO logs \
     (id, process_id, session_id, severity, body, attributes, timestamp) \
     VALUES (?, ?, ?, ?, ?, ?, ?)";

fn bind_log<'q>(log: &LogRecord) -> Result<SqliteQuery<'q>> {
    Ok(sqlx::query(INSERT_LOG)
        .bind(log.id.to_string())
        .bind(log.process_id.to_string())
        .bind(log.session_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(i64::from(log.severity.number()))
        .bind(log.body.clone())
        .bind(serde_json::to_string(&log.attributes)?)
        .bind(format_datetime(&log.timestamp)))
}

const INSERT_RESOURCE: &str = "INSERT INTO resources \
     (key, value, resource_type, resource_type_id, collected_at) \
     VALUES (?, ?, ?, ?, ?)";

const UPSERT_RESOURCE: &str = "INSERT INTO resources \
     (key, value, resource_type, resource_type_id, collected_at) \
     VALUES (?, ?, ?, ?, ?) \
     ON CONFLICT (key, resource_type, resource_type_id) DO UPDATE SET \
      value = excluded.value, \
      collected_at = excluded.collected_at";

fn bind_resource<'q>(sql: &'q str, resource: &ResourceRecord) -> SqliteQuery<'q> {
    sqlx::query(sql)
        .bind(resource.key.as_str().to_string())
        .bind(resource.value.clone())
        .bind(resource.resource_type.as_str())
        .bind(resource.resource_type_id.clone())
        .bind(format_datetime(&resource.collected_at))
}

// ============================================================================
// Session operations
// ============================================================================

impl TelemetryStore {
    /// Inserts a new session
    ///
    /// # Errors
    /// `ConstraintViolation` if a session with the same id exists
    pub async fn add_session(&self, session: &SessionRecord) -> Result<()> {
        bind_session(INSERT_SESSION, session)
            .execute(self.pool.writer())
            .await?;

        tracing::trace!(session_id = %session.id, "Added session");
        Ok(())
    }

    /// Inserts or fully replaces a session
    pub async fn upsert_session(&self, session: &SessionRecord) -> Result<()> {
        bind_session(UPSERT_SESSION, session)
            .execute(self.pool.writer())
            .await?;

        tracing::trace!(session_id = %session.id, "Upserted session");
        Ok(())
    }

    pub async fn fetch_session(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(self.pool.reader())
            .await?;

        match row {
            Some(ref r) => Ok(Some(session_from_row(r)?)),
            None => Ok(None),
        }
    }

    pub async fn session_exists(&self, id: &SessionId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sessions WHERE id = ?)")
            .bind(id.as_str())
            .fetch_one(self.pool.reader())
            .await?;
        Ok(exists)
    }

    /// Sessions without an end time, oldest first
    pub async fn fetch_open_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.fetch_sessions(&SessionFilter::new().with_finished(false))
            .await
    }

    /// Sets the end time of a session
    ///
    /// # Errors
    /// `RecordNotFound` if no session has this id
    pub async fn update_session_end_time(
        &self,
        id: &SessionId,
        end_time: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET end_time = ? WHERE id = ?")
            .bind(format_datetime(&end_time))
            .bind(id.as_str())
            .execute(self.pool.writer())
            .await?;
        ensure_updated(result, "session", id.as_str())?;

        tracing::trace!(session_id = %id, "Updated session end time");
        Ok(())
    }

    /// Advances the heartbeat of a session; never moves it backwards
    ///
    /// # Errors
    /// `RecordNotFound` if no session has this id
    pub async fn update_session_heartbeat(
        &self,
        id: &SessionId,
        heartbeat: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sessions SET last_heartbeat_time = max(last_heartbeat_time, ?) WHERE id = ?",
        )
        .bind(format_datetime(&heartbeat))
        .bind(id.as_str())
        .execute(self.pool.writer())
        .await?;
        ensure_updated(result, "session", id.as_str())?;

        tracing::trace!(session_id = %id, "Updated session heartbeat");
        Ok(())
    }

    /// # Errors
    /// `RecordNotFound` if no session has this id
    pub async fn update_session_state(&self, id: &SessionId, state: AppState) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(id.as_str())
            .execute(self.pool.writer())
            .await?;
        ensure_updated(result, "session", id.as_str())?;

        tracing::trace!(session_id = %id, state = %state, "Updated session state");
        Ok(())
    }

    /// Records the crash report that terminated a session
    ///
    /// # Errors
    /// `RecordNotFound` if no session has this id
    pub async fn set_session_crash_report(&self, id: &SessionId, crash_report_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET crash_report_id = ? WHERE id = ?")
            .bind(crash_report_id)
            .bind(id.as_str())
            .execute(self.pool.writer())
            .await?;
        ensure_updated(result, "session", id.as_str())?;

        tracing::trace!(session_id = %id, crash_report_id, "Paired session with crash report");
        Ok(())
    }

    /// Marks a session as accepted by the upload collaborator
    ///
    /// # Errors
    /// `RecordNotFound` if no session has this id
    pub async fn mark_session_sent(&self, id: &SessionId, sent_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET sent_at = ? WHERE id = ?")
            .bind(format_datetime(&sent_at))
            .bind(id.as_str())
            .execute(self.pool.writer())
            .await?;
        ensure_updated(result, "session", id.as_str())?;

        tracing::trace!(session_id = %id, "Marked session as sent");
        Ok(())
    }

    /// Number of sessions with an end time
    pub async fn finished_sessions_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE end_time IS NOT NULL")
            .fetch_one(self.pool.reader())
            .await?;
        Ok(count as u64)
    }

    /// Sessions with an end time, oldest first
    pub async fn fetch_finished_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.fetch_sessions(&SessionFilter::new().with_finished(true))
            .await
    }

    /// Finished sessions not yet accepted for upload, oldest first
    pub async fn fetch_unsent_finished_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.fetch_sessions(&SessionFilter::new().with_finished(true).with_sent(false))
            .await
    }

    /// The session with the greatest start time
    pub async fn fetch_latest_session(&self) -> Result<Option<SessionRecord>> {
        let row = sqlx::query("SELECT * FROM sessions ORDER BY start_time DESC LIMIT 1")
            .fetch_optional(self.pool.reader())
            .await?;

        match row {
            Some(ref r) => Ok(Some(session_from_row(r)?)),
            None => Ok(None),
        }
    }

    /// Sessions matching `filter`, oldest first
    pub async fn fetch_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>> {
        let mut sql = String::from("SELECT * FROM sessions WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(ref process_id) = filter.process_id {
            sql.push_str(" AND process_id = ?");
            binds.push(process_id.to_string());
        }

        if let Some(ref process_id) = filter.excluding_process_id {
            sql.push_str(" AND process_id != ?");
            binds.push(process_id.to_string());
        }

        match filter.finished {
            Some(true) => sql.push_str(" AND end_time IS NOT NULL"),
            Some(false) => sql.push_str(" AND end_time IS NULL"),
            None => {}
        }

        match filter.sent {
            Some(true) => sql.push_str(" AND sent_at IS NOT NULL"),
            Some(false) => sql.push_str(" AND sent_at IS NULL"),
            None => {}
        }

        sql.push_str(" ORDER BY start_time ASC");
        push_limit(&mut sql, filter.limit);

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }

        let rows = query.fetch_all(self.pool.reader()).await?;
        rows_to(&rows, session_from_row)
    }

    pub async fn delete_session(&self, id: &SessionId) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id.as_str())
            .execute(self.pool.writer())
            .await?;

        tracing::trace!(session_id = %id, "Deleted session");
        Ok(())
    }
}

// ============================================================================
// Resource operations
// ============================================================================

impl TelemetryStore {
    /// Inserts a new resource
    ///
    /// # Errors
    /// `ConstraintViolation` if the key already exists in the same scope
    pub async fn add_resource(&self, resource: &ResourceRecord) -> Result<()> {
        bind_resource(INSERT_RESOURCE, resource)
            .execute(self.pool.writer())
            .await?;

        tracing::trace!(key = %resource.key, scope = resource.resource_type.as_str(), "Added resource");
        Ok(())
    }

    /// Inserts a resource or replaces the value of the same key in the same scope
    pub async fn upsert_resource(&self, resource: &ResourceRecord) -> Result<()> {
        bind_resource(UPSERT_RESOURCE, resource)
            .execute(self.pool.writer())
            .await?;

        tracing::trace!(key = %resource.key, scope = resource.resource_type.as_str(), "Upserted resource");
        Ok(())
    }

    /// Looks a key up in the permanent scope first, then in any scope
    pub async fn fetch_resource(&self, key: &ResourceKey) -> Result<Option<ResourceRecord>> {
        let row = sqlx::query(
            "SELECT * FROM resources WHERE key = ? \
             ORDER BY CASE resource_type WHEN 'permanent' THEN 0 ELSE 1 END, collected_at DESC \
             LIMIT 1",
        )
        .bind(key.as_str())
        .fetch_optional(self.pool.reader())
        .await?;

        match row {
            Some(ref r) => Ok(Some(resource_from_row(r)?)),
            None => Ok(None),
        }
    }

    pub async fn fetch_resource_in_scope(
        &self,
        key: &ResourceKey,
        resource_type: ResourceType,
        resource_type_id: &str,
    ) -> Result<Option<ResourceRecord>> {
        let row = sqlx::query(
            "SELECT * FROM resources WHERE key = ? AND resource_type = ? AND resource_type_id = ?",
        )
        .bind(key.as_str())
        .bind(resource_type.as_str())
        .bind(resource_type_id)
        .fetch_optional(self.pool.reader())
        .await?;

        match row {
            Some(ref r) => Ok(Some(resource_from_row(r)?)),
            None => Ok(None),
        }
    }

    /// Resources visible to a session: its own, its process's, and permanent ones
    pub async fn fetch_all_resources_for_session(&self, id: &SessionId) -> Result<Vec<ResourceRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM resources \
             WHERE (resource_type = 'session' AND resource_type_id = ?) \
                OR (resource_type = 'process' AND resource_type_id IN \
                    (SELECT process_id FROM sessions WHERE id = ?)) \
                OR resource_type = 'permanent' \
             ORDER BY key ASC, resource_type ASC",
        )
        .bind(id.as_str())
        .bind(id.as_str())
        .fetch_all(self.pool.reader())
        .await?;

        rows_to(&rows, resource_from_row)
    }

    /// Resources visible to a process: its own and permanent ones
    pub async fn fetch_all_resources_for_process(&self, id: &ProcessId) -> Result<Vec<ResourceRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM resources \
             WHERE (resource_type = 'process' AND resource_type_id = ?) \
                OR resource_type = 'permanent' \
             ORDER BY key ASC, resource_type ASC",
        )
        .bind(id.to_string())
        .fetch_all(self.pool.reader())
        .await?;

        rows_to(&rows, resource_from_row)
    }

    /// Increments an integer counter kept as a permanent resource
    ///
    /// A missing or non-numeric value starts the counter at 1. Returns the
    /// new value.
    pub async fn increment_permanent_counter(&self, key: &ResourceKey) -> Result<i64> {
        let mut tx = self.pool.writer().begin().await?;

        let current: Option<String> = sqlx::query_scalar(
            "SELECT value FROM resources \
             WHERE key = ? AND resource_type = 'permanent' AND resource_type_id = ''",
        )
        .bind(key.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let next = current
            .and_then(|value| value.parse::<i64>().ok())
            .map_or(1, |value| value + 1);

        let resource = ResourceRecord::permanent(key.clone(), next.to_string());
        bind_resource(UPSERT_RESOURCE, &resource)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::trace!(key = %key, value = next, "Incremented permanent counter");
        Ok(next)
    }

    pub async fn delete_resource(
        &self,
        key: &ResourceKey,
        resource_type: ResourceType,
        resource_type_id: &str,
    ) -> Result<()> {
        sqlx::query("DELETE FROM resources WHERE key = ? AND resource_type = ? AND resource_type_id = ?")
            .bind(key.as_str())
            .bind(resource_type.as_str())
            .bind(resource_type_id)
            .execute(self.pool.writer())
            .await?;

        tracing::trace!(key = %key, scope = resource_type.as_str(), "Deleted resource");
        Ok(())
    }
}

// ============================================================================
// Log operations
// ============================================================================

impl TelemetryStore {
    /// # Errors
    /// `ConstraintViolation` if a log with the same id exists
    pub async fn add_log_record(&self, log: &LogRecord) -> Result<()> {
        bind_log(log)?.execute(self.pool.writer()).await?;

        tracing::trace!(log_id = %log.id, "Added log record");
        Ok(())
    }

    /// Inserts every log in one transaction; nothing is stored on failure
    pub async fn add_log_records(&self, logs: &[LogRecord]) -> Result<()> {
        if logs.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.writer().begin().await?;
        for log in logs {
            bind_log(log)?.execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::trace!(count = logs.len(), "Added log records");
        Ok(())
    }

    pub async fn fetch_log_record(&self, id: &LogId) -> Result<Option<LogRecord>> {
        let row = sqlx::query("SELECT * FROM logs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool.reader())
            .await?;

        match row {
            Some(ref r) => Ok(Some(log_from_row(r)?)),
            None => Ok(None),
        }
    }

    /// Logs matching `filter`, oldest first
    pub async fn fetch_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>> {
        let mut sql = String::from("SELECT * FROM logs WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(ref session_id) = filter.session_id {
            sql.push_str(" AND session_id = ?");
            binds.push(session_id.as_str().to_string());
        }

        if let Some(ref process_id) = filter.process_id {
            sql.push_str(" AND process_id = ?");
            binds.push(process_id.to_string());
        }

        if let Some(severity) = filter.min_severity {
            sql.push_str(&format!(" AND severity >= {}", severity.number()));
        }

        if let Some(ref since) = filter.since {
            sql.push_str(" AND timestamp >= ?");
            binds.push(format_datetime(since));
        }

        sql.push_str(" ORDER BY timestamp ASC");
        push_limit(&mut sql, filter.limit);

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }

        let rows = query.fetch_all(self.pool.reader()).await?;
        rows_to(&rows, log_from_row)
    }

    pub async fn delete_log_record(&self, id: &LogId) -> Result<()> {
        sqlx::query("DELETE FROM logs WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool.writer())
            .await?;

        tracing::trace!(log_id = %id, "Deleted log record");
        Ok(())
    }

    /// Deletes every log of a session and returns how many were removed
    pub async fn delete_logs_for_session(&self, id: &SessionId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM logs WHERE session_id = ?")
            .bind(id.as_str())
            .execute(self.pool.writer())
            .await?;

        tracing::trace!(session_id = %id, count = result.rows_affected(), "Deleted session logs");
        Ok(result.rows_affected())
    }
}

/// Upserts `span` unless its stored row already ended; returns whether it
/// was written
async fn upsert_span_in(conn: &mut SqliteConnection, span: &SpanRecord) -> Result<bool> {
    let stored_end: Option<Option<String>> =
        sqlx::query_scalar("SELECT end_time FROM spans WHERE trace_id = ? AND span_id = ?")
            .bind(span.trace_id.as_str())
            .bind(span.span_id.as_str())
            .fetch_optional(&mut *conn)
            .await?;

    if let Some(Some(_)) = stored_end {
        return Ok(false);
    }

    bind_span(UPSERT_SPAN, span)?.execute(&mut *conn).await?;
    Ok(true)
}

// ============================================================================
// Span operations
// ============================================================================

impl TelemetryStore {
    /// # Errors
    /// `ConstraintViolation` if a span with the same trace and span id exists
    pub async fn add_span_record(&self, span: &SpanRecord) -> Result<()> {
        bind_span(INSERT_SPAN, span)?
            .execute(self.pool.writer())
            .await?;

        tracing::trace!(trace_id = %span.trace_id, span_id = %span.span_id, "Added span");
        Ok(())
    }

    /// Inserts every span in one transaction; nothing is stored on failure
    pub async fn add_span_records(&self, spans: &[SpanRecord]) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.writer().begin().await?;
        for span in spans {
            bind_span(INSERT_SPAN, span)?.execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::trace!(count = spans.len(), "Added spans");
        Ok(())
    }

    /// Inserts a span or replaces the stored in-flight row
    ///
    /// # Errors
    /// `ConstraintViolation` if the stored row already has an end time
    pub async fn upsert_span_record(&self, span: &SpanRecord) -> Result<()> {
        let mut tx = self.pool.writer().begin().await?;

        if !upsert_span_in(&mut *tx, span).await? {
            return Err(StorageError::ConstraintViolation(format!(
                "span {}/{} already ended",
                span.trace_id, span.span_id
            )));
        }
        tx.commit().await?;

        tracing::trace!(trace_id = %span.trace_id, span_id = %span.span_id, "Upserted span");
        Ok(())
    }

    /// Upserts every span in one transaction
    ///
    /// A span whose stored row already has an end time is skipped and the
    /// rest of the batch is still written. Returns how many spans were
    /// written.
    pub async fn upsert_span_records(&self, spans: &[SpanRecord]) -> Result<usize> {
        if spans.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.writer().begin().await?;
        let mut written = 0;
        for span in spans {
            if upsert_span_in(&mut *tx, span).await? {
                written += 1;
            } else {
                tracing::debug!(
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    "Span already ended, skipped"
                );
            }
        }
        tx.commit().await?;

        tracing::trace!(count = written, skipped = spans.len() - written, "Upserted spans");
        Ok(written)
    }

    pub async fn fetch_span(&self, trace_id: &TraceId, span_id: &SpanId) -> Result<Option<SpanRecord>> {
        let row = sqlx::query("SELECT * FROM spans WHERE trace_id = ? AND span_id = ?")
            .bind(trace_id.as_str())
            .bind(span_id.as_str())
            .fetch_optional(self.pool.reader())
            .await?;

        match row {
            Some(ref r) => Ok(Some(span_from_row(r)?)),
            None => Ok(None),
        }
    }

    /// Spans matching `filter`, oldest start first
    pub async fn fetch_spans(&self, filter: &SpanFilter) -> Result<Vec<SpanRecord>> {
        let mut sql = String::from("SELECT * FROM spans WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(ref session_id) = filter.session_id {
            sql.push_str(" AND session_id = ?");
            binds.push(session_id.as_str().to_string());
        }

        if let Some(ref process_id) = filter.process_id {
            sql.push_str(" AND process_id = ?");
            binds.push(process_id.to_string());
        }

        match filter.finished {
            Some(true) => sql.push_str(" AND end_time IS NOT NULL"),
            Some(false) => sql.push_str(" AND end_time IS NULL"),
            None => {}
        }

        if let Some(ref name) = filter.name {
            sql.push_str(" AND name = ?");
            binds.push(name.clone());
        }

        sql.push_str(" ORDER BY start_time ASC");
        push_limit(&mut sql, filter.limit);

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }

        let rows = query.fetch_all(self.pool.reader()).await?;
        rows_to(&rows, span_from_row)
    }

    pub async fn delete_span(&self, trace_id: &TraceId, span_id: &SpanId) -> Result<()> {
        sqlx::query("DELETE FROM spans WHERE trace_id = ? AND span_id = ?")
            .bind(trace_id.as_str())
            .bind(span_id.as_str())
            .execute(self.pool.writer())
            .await?;

        tracing::trace!(trace_id = %trace_id, span_id = %span_id, "Deleted span");
        Ok(())
    }
}
