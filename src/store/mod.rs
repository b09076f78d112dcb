//! Event log and abuse report storage.
//!
//! Two backends implement the same traits: [`memory::MemoryStore`] for tests
//! and single-process use, [`sqlite::SqliteStore`] for persistence.

pub mod memory;
pub mod sqlite;

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of correlation key an event is recorded under.
///
/// The ordering is the evaluation priority: IP before secondary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    /// Client IP address.
    Ip,
    /// Secondary identifier such as a phone number.
    Secondary,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Ip => "ip",
            IdentifierKind::Secondary => "secondary",
        }
    }

    /// Human-readable name used in denial messages.
    pub fn label(&self) -> &'static str {
        match self {
            IdentifierKind::Ip => "IP address",
            IdentifierKind::Secondary => "Identifier",
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed action attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Blocked,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Blocked => "blocked",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed action attempt, under one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageEvent {
    /// Caller-supplied id of the attempt. `(attempt_id, kind)` is unique.
    pub attempt_id: String,
    pub kind: IdentifierKind,
    pub value: String,
    pub outcome: Outcome,
    pub occurred_at: DateTime<Utc>,
}

impl UsageEvent {
    /// Event occurring now.
    pub fn new(attempt_id: &str, kind: IdentifierKind, value: &str, outcome: Outcome) -> Self {
        Self::at(attempt_id, kind, value, outcome, Utc::now())
    }

    /// Event at an explicit instant.
    pub fn at(
        attempt_id: &str,
        kind: IdentifierKind,
        value: &str,
        outcome: Outcome,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            attempt_id: attempt_id.to_string(),
            kind,
            value: value.to_string(),
            outcome,
            occurred_at,
        }
    }
}

/// Count filter over the event log.
///
/// The window is `(since, until]`: an event exactly at `since` is excluded,
/// one exactly at `until` included.
#[derive(Debug, Clone)]
pub struct CountQuery {
    pub kind: IdentifierKind,
    pub value: String,
    pub outcome: Outcome,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl CountQuery {
    /// Whether an event matches this query.
    pub fn matches(&self, event: &UsageEvent) -> bool {
        event.kind == self.kind
            && event.value == self.value
            && event.outcome == self.outcome
            && event.occurred_at > self.since
            && event.occurred_at <= self.until
    }
}

/// Append-only log of usage events.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Record an event. Returns false if the attempt was already recorded
    /// under the same identifier kind.
    async fn record(&self, event: &UsageEvent) -> Result<bool, StoreError>;

    /// Count events matching the query.
    async fn count(&self, query: &CountQuery) -> Result<u64, StoreError>;
}

/// Lifecycle of an abuse report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Sent,
    Failed,
}

impl ReportStatus {
    pub fn code(&self) -> i64 {
        match self {
            ReportStatus::Pending => 0,
            ReportStatus::Sent => 1,
            ReportStatus::Failed => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ReportStatus::Pending),
            1 => Some(ReportStatus::Sent),
            2 => Some(ReportStatus::Failed),
            _ => None,
        }
    }

    /// States a report may move to `self` from.
    pub fn allowed_sources(&self) -> &'static [ReportStatus] {
        match self {
            ReportStatus::Pending => &[ReportStatus::Failed],
            ReportStatus::Sent | ReportStatus::Failed => &[ReportStatus::Pending],
        }
    }

    pub fn can_transition_to(&self, to: ReportStatus) -> bool {
        to.allowed_sources().contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Sent => "sent",
            ReportStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report to be inserted.
#[derive(Debug, Clone, Default)]
pub struct NewReport {
    pub source_ip: String,
    pub asn: String,
    pub isp: String,
    pub evidence: String,
}

/// Stored abuse report.
#[derive(Debug, Clone, Serialize)]
pub struct AbuseReport {
    pub id: i64,
    pub source_ip: String,
    pub asn: String,
    pub isp: String,
    pub evidence: String,
    pub report_method: String,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}

/// Default `report_method` for new reports.
pub const REPORT_METHOD_PENDING: &str = "PENDING";

/// Storage for abuse reports.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Whether a pending report exists for `source_ip`.
    async fn has_pending(&self, source_ip: &str) -> Result<bool, StoreError>;

    /// Insert a pending report unless one already exists for the same
    /// source, atomically. Returns the new id, or None on duplicate.
    async fn insert_if_no_pending(&self, report: NewReport) -> Result<Option<i64>, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<AbuseReport>, StoreError>;

    /// Move a report to `to`, validating the transition.
    async fn update_status(&self, id: i64, to: ReportStatus) -> Result<AbuseReport, StoreError>;

    /// Latest reports, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<AbuseReport>, StoreError>;
}

pub(crate) fn invalid_transition(id: i64, from: ReportStatus, to: ReportStatus) -> StoreError {
    StoreError::InvalidTransition {
        id,
        from: from.to_string(),
        to: to.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_identifier_kind_order() {
        assert!(IdentifierKind::Ip < IdentifierKind::Secondary);
        assert_eq!(IdentifierKind::Secondary.to_string(), "secondary");
    }

    #[test]
    fn test_count_query_window_bounds() {
        let now = Utc::now();
        let query = CountQuery {
            kind: IdentifierKind::Ip,
            value: "1.2.3.4".to_string(),
            outcome: Outcome::Success,
            since: now - Duration::hours(24),
            until: now,
        };

        let at = |t| UsageEvent::at("a", IdentifierKind::Ip, "1.2.3.4", Outcome::Success, t);
        assert!(!query.matches(&at(now - Duration::hours(24))));
        assert!(query.matches(&at(now - Duration::hours(24) + Duration::milliseconds(1))));
        assert!(query.matches(&at(now)));
        assert!(!query.matches(&at(now + Duration::milliseconds(1))));
    }

    #[test]
    fn test_count_query_filters_outcome_and_value() {
        let now = Utc::now();
        let query = CountQuery {
            kind: IdentifierKind::Ip,
            value: "1.2.3.4".to_string(),
            outcome: Outcome::Success,
            since: now - Duration::hours(1),
            until: now,
        };

        let failed = UsageEvent::at("a", IdentifierKind::Ip, "1.2.3.4", Outcome::Failure, now);
        let other = UsageEvent::at("b", IdentifierKind::Ip, "5.6.7.8", Outcome::Success, now);
        let secondary =
            UsageEvent::at("c", IdentifierKind::Secondary, "1.2.3.4", Outcome::Success, now);
        assert!(!query.matches(&failed));
        assert!(!query.matches(&other));
        assert!(!query.matches(&secondary));
    }

    #[test]
    fn test_report_status_transitions() {
        assert!(ReportStatus::Pending.can_transition_to(ReportStatus::Sent));
        assert!(ReportStatus::Pending.can_transition_to(ReportStatus::Failed));
        assert!(ReportStatus::Failed.can_transition_to(ReportStatus::Pending));
        assert!(!ReportStatus::Sent.can_transition_to(ReportStatus::Failed));
        assert!(!ReportStatus::Sent.can_transition_to(ReportStatus::Pending));
        assert!(!ReportStatus::Failed.can_transition_to(ReportStatus::Sent));
    }

    #[test]
    fn test_report_status_codes() {
        for status in [ReportStatus::Pending, ReportStatus::Sent, ReportStatus::Failed] {
            assert_eq!(ReportStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(ReportStatus::from_code(9), None);
    }
}
