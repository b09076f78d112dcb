//! In-process store backed by `RwLock`-guarded vectors.

use super::{
    invalid_transition, AbuseReport, CountQuery, EventLog, NewReport, ReportStatus, ReportStore,
    UsageEvent, REPORT_METHOD_PENDING,
};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::RwLock;

/// Volatile event log and report store.
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<Vec<UsageEvent>>,
    reports: RwLock<Vec<AbuseReport>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded usage events.
    pub fn event_count(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Number of stored abuse reports.
    pub fn report_count(&self) -> usize {
        self.reports.read().map(|r| r.len()).unwrap_or(0)
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

#[async_trait]
impl EventLog for MemoryStore {
    async fn record(&self, event: &UsageEvent) -> Result<bool, StoreError> {
        let mut events = self.events.write().map_err(|_| poisoned())?;

        if events
            .iter()
            .any(|e| e.attempt_id == event.attempt_id && e.kind == event.kind)
        {
            return Ok(false);
        }

        events.push(event.clone());
        Ok(true)
    }

    async fn count(&self, query: &CountQuery) -> Result<u64, StoreError> {
        let events = self.events.read().map_err(|_| poisoned())?;
        Ok(events.iter().filter(|e| query.matches(e)).count() as u64)
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn has_pending(&self, source_ip: &str) -> Result<bool, StoreError> {
        let reports = self.reports.read().map_err(|_| poisoned())?;
        Ok(reports
            .iter()
            .any(|r| r.source_ip == source_ip && r.status == ReportStatus::Pending))
    }

    async fn insert_if_no_pending(&self, report: NewReport) -> Result<Option<i64>, StoreError> {
        let mut reports = self.reports.write().map_err(|_| poisoned())?;

        if reports
            .iter()
            .any(|r| r.source_ip == report.source_ip && r.status == ReportStatus::Pending)
        {
            return Ok(None);
        }

        let id = reports.last().map_or(1, |r| r.id + 1);
        reports.push(AbuseReport {
            id,
            source_ip: report.source_ip,
            asn: report.asn,
            isp: report.isp,
            evidence: report.evidence,
            report_method: REPORT_METHOD_PENDING.to_string(),
            status: ReportStatus::Pending,
            created_at: Utc::now(),
        });

        Ok(Some(id))
    }

    async fn get(&self, id: i64) -> Result<Option<AbuseReport>, StoreError> {
        let reports = self.reports.read().map_err(|_| poisoned())?;
        Ok(reports.iter().find(|r| r.id == id).cloned())
    }

    async fn update_status(&self, id: i64, to: ReportStatus) -> Result<AbuseReport, StoreError> {
        let mut reports = self.reports.write().map_err(|_| poisoned())?;
        let index = reports
            .iter()
            .position(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        let from = reports[index].status;

        if !from.can_transition_to(to) {
            return Err(invalid_transition(id, from, to));
        }

        // One pending report per source; checked under the same write lock
        if to == ReportStatus::Pending {
            let source = &reports[index].source_ip;
            let other_pending = reports.iter().any(|r| {
                r.id != id && &r.source_ip == source && r.status == ReportStatus::Pending
            });
            if other_pending {
                return Err(invalid_transition(id, from, to));
            }
        }

        reports[index].status = to;
        Ok(reports[index].clone())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AbuseReport>, StoreError> {
        let reports = self.reports.read().map_err(|_| poisoned())?;
        Ok(reports.iter().rev().take(limit).cloned().collect())
    }
}
