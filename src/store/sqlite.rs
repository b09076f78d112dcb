//! SQLite-backed store using sqlx.
//!
//! Timestamps are stored as Unix microseconds so window comparisons are
//! plain integer comparisons.

use super::{
    invalid_transition, AbuseReport, CountQuery, EventLog, NewReport, ReportStatus, ReportStore,
    UsageEvent,
};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Persistent event log and report store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a database file and initialise the schema.
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "Connected to SQLite");

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database. A single connection is kept open for the
    /// lifetime of the pool, since the database dies with its connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and indexes if they do not exist.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                attempt_id TEXT NOT NULL,
                identifier_kind TEXT NOT NULL,
                identifier_value TEXT NOT NULL,
                outcome TEXT NOT NULL,
                occurred_at INTEGER NOT NULL,
                UNIQUE (attempt_id, identifier_kind)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_usage_events_lookup \
             ON usage_events (identifier_kind, identifier_value, outcome, occurred_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS abuse_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_ip TEXT NOT NULL,
                asn TEXT NOT NULL DEFAULT '',
                isp_name TEXT NOT NULL DEFAULT '',
                report_method TEXT NOT NULL DEFAULT 'PENDING',
                evidence_blob TEXT NOT NULL DEFAULT '',
                status INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_abuse_reports_source \
             ON abuse_reports (source_ip, status)",
        )
        .execute(&self.pool)
        .await?;

        debug!("SQLite schema initialized");
        Ok(())
    }
}

fn from_micros(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_default()
}

fn report_from_row(row: &SqliteRow) -> Result<AbuseReport, StoreError> {
    let id: i64 = row.try_get("id")?;
    let code: i64 = row.try_get("status")?;
    let status = ReportStatus::from_code(code).ok_or_else(|| {
        StoreError::Unavailable(format!("report {} has unknown status {}", id, code))
    })?;

    Ok(AbuseReport {
        id,
        source_ip: row.try_get("source_ip")?,
        asn: row.try_get("asn")?,
        isp: row.try_get("isp_name")?,
        evidence: row.try_get("evidence_blob")?,
        report_method: row.try_get("report_method")?,
        status,
        created_at: from_micros(row.try_get("created_at")?),
    })
}

const REPORT_COLUMNS: &str =
    "id, source_ip, asn, isp_name, report_method, evidence_blob, status, created_at";

#[async_trait]
impl EventLog for SqliteStore {
    async fn record(&self, event: &UsageEvent) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO usage_events \
             (attempt_id, identifier_kind, identifier_value, outcome, occurred_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&event.attempt_id)
        .bind(event.kind.as_str())
        .bind(&event.value)
        .bind(event.outcome.as_str())
        .bind(event.occurred_at.timestamp_micros())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn count(&self, query: &CountQuery) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM usage_events \
             WHERE identifier_kind = ? AND identifier_value = ? AND outcome = ? \
             AND occurred_at > ? AND occurred_at <= ?",
        )
        .bind(query.kind.as_str())
        .bind(&query.value)
        .bind(query.outcome.as_str())
        .bind(query.since.timestamp_micros())
        .bind(query.until.timestamp_micros())
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl ReportStore for SqliteStore {
    async fn has_pending(&self, source_ip: &str) -> Result<bool, StoreError> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM abuse_reports WHERE source_ip = ? AND status = ?)",
        )
        .bind(source_ip)
        .bind(ReportStatus::Pending.code())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists != 0)
    }

    async fn insert_if_no_pending(&self, report: NewReport) -> Result<Option<i64>, StoreError> {
        // Single statement, so the existence check and the insert are atomic
        let result = sqlx::query(
            "INSERT INTO abuse_reports \
             (source_ip, asn, isp_name, evidence_blob, status, created_at) \
             SELECT ?, ?, ?, ?, ?, ? \
             WHERE NOT EXISTS (SELECT 1 FROM abuse_reports WHERE source_ip = ? AND status = ?)",
        )
        .bind(&report.source_ip)
        .bind(&report.asn)
        .bind(&report.isp)
        .bind(&report.evidence)
        .bind(ReportStatus::Pending.code())
        .bind(Utc::now().timestamp_micros())
        .bind(&report.source_ip)
        .bind(ReportStatus::Pending.code())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(Some(result.last_insert_rowid()))
        } else {
            Ok(None)
        }
    }

    async fn get(&self, id: i64) -> Result<Option<AbuseReport>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM abuse_reports WHERE id = ?",
            REPORT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(report_from_row).transpose()
    }

    async fn update_status(&self, id: i64, to: ReportStatus) -> Result<AbuseReport, StoreError> {
        let current = self.get(id).await?.ok_or(StoreError::NotFound(id))?;
        if !current.status.can_transition_to(to) {
            return Err(invalid_transition(id, current.status, to));
        }

        // Guarded on the observed status; reopening also requires that no
        // other report from the same source is pending, in the same statement
        let result = sqlx::query(
            "UPDATE abuse_reports SET status = ? WHERE id = ? AND status = ? \
             AND (? <> ? OR NOT EXISTS (\
                 SELECT 1 FROM abuse_reports other \
                 WHERE other.source_ip = abuse_reports.source_ip \
                 AND other.id <> abuse_reports.id AND other.status = ?))",
        )
        .bind(to.code())
        .bind(id)
        .bind(current.status.code())
        .bind(to.code())
        .bind(ReportStatus::Pending.code())
        .bind(ReportStatus::Pending.code())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let now = self.get(id).await?.ok_or(StoreError::NotFound(id))?;
            return Err(invalid_transition(id, now.status, to));
        }

        Ok(AbuseReport {
            status: to,
            ..current
        })
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AbuseReport>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM abuse_reports ORDER BY id DESC LIMIT ?",
            REPORT_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(report_from_row).collect()
    }
}
