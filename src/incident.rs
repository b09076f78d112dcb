//! Abuse incident recording.
//!
//! Hostile events become PENDING abuse reports, at most one pending report
//! per source. Reports are enriched with ISP/ASN data when a reputation
//! lookup succeeds; a failed lookup never prevents recording.

use crate::config::AllowlistEntry;
use crate::error::StoreError;
use crate::reputation::ReputationCache;
use crate::store::{AbuseReport, NewReport, ReportStatus, ReportStore};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of [`IncidentRecorder::record_incident`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new pending report was stored.
    Recorded(i64),
    /// A pending report already exists for this source.
    Duplicate,
    /// The source is allowlisted and never reported.
    Allowlisted,
}

/// Records abuse incidents as deduplicated pending reports.
pub struct IncidentRecorder {
    store: Arc<dyn ReportStore>,
    reputation: Option<Arc<ReputationCache>>,
    allowlist: Vec<AllowlistEntry>,
}

impl IncidentRecorder {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self {
            store,
            reputation: None,
            allowlist: Vec::new(),
        }
    }

    /// Enrich new reports through this reputation cache.
    pub fn with_reputation(mut self, reputation: Arc<ReputationCache>) -> Self {
        self.reputation = Some(reputation);
        self
    }

    pub fn with_allowlist(mut self, allowlist: Vec<AllowlistEntry>) -> Self {
        self.allowlist = allowlist;
        self
    }

    fn is_allowlisted(&self, ip: &IpAddr) -> bool {
        self.allowlist.iter().any(|entry| entry.contains(ip))
    }

    /// Record a hostile event from `ip`.
    pub async fn record_incident(
        &self,
        ip: &IpAddr,
        reason: &str,
    ) -> Result<RecordOutcome, StoreError> {
        if self.is_allowlisted(ip) {
            debug!(ip = %ip, "Incident source is allowlisted");
            return Ok(RecordOutcome::Allowlisted);
        }

        let source_ip = ip.to_string();

        // Cheap check first so duplicates skip the reputation lookup
        if self.store.has_pending(&source_ip).await? {
            debug!(ip = %ip, "Pending report already exists");
            return Ok(RecordOutcome::Duplicate);
        }

        let mut report = NewReport {
            source_ip,
            evidence: reason.to_string(),
            ..NewReport::default()
        };

        if let Some(ref reputation) = self.reputation {
            match reputation.lookup(ip, false).await {
                Ok(record) => {
                    report.asn = record.asn_label();
                    report.isp = record.isp;
                }
                Err(e) => {
                    warn!(ip = %ip, error = %e, "Recording incident without enrichment");
                }
            }
        }

        match self.store.insert_if_no_pending(report).await? {
            Some(id) => {
                info!(ip = %ip, id, reason = %reason, "Abuse incident recorded");
                Ok(RecordOutcome::Recorded(id))
            }
            None => {
                debug!(ip = %ip, "Pending report created concurrently");
                Ok(RecordOutcome::Duplicate)
            }
        }
    }

    /// Record a failed login for `username` from `ip`.
    pub async fn on_login_failed(
        &self,
        ip: &IpAddr,
        username: &str,
    ) -> Result<RecordOutcome, StoreError> {
        self.record_incident(ip, &format!("Login failed: {}", username))
            .await
    }

    /// Mark a pending report as submitted upstream.
    pub async fn mark_sent(&self, id: i64) -> Result<AbuseReport, StoreError> {
        self.store.update_status(id, ReportStatus::Sent).await
    }

    /// Mark a pending report's submission as failed.
    pub async fn mark_failed(&self, id: i64) -> Result<AbuseReport, StoreError> {
        self.store.update_status(id, ReportStatus::Failed).await
    }

    /// Return a failed report to pending for another submission attempt.
    ///
    /// Refused by the store while another pending report exists for the same
    /// source.
    pub async fn retry(&self, id: i64) -> Result<AbuseReport, StoreError> {
        self.store.update_status(id, ReportStatus::Pending).await
    }

    /// Latest reports, newest first.
    pub async fn recent_reports(&self, limit: usize) -> Result<Vec<AbuseReport>, StoreError> {
        self.store.recent(limit).await
    }
}
