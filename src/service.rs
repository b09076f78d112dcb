//! Wiring of the reputation cache, risk gate and incident recorder from a
//! [`Config`].

use crate::config::{Config, StorageBackend};
use crate::error::{LookupError, StoreError};
use crate::incident::IncidentRecorder;
use crate::providers::abuseipdb::AbuseIpDbProvider;
use crate::providers::ReputationRecord;
use crate::reputation::ReputationCache;
use crate::risk::{Decision, Identifiers, RiskGate};
use crate::store::memory::MemoryStore;
use crate::store::sqlite::SqliteStore;
use crate::store::{EventLog, Outcome, ReportStore, UsageEvent};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Risk gate service built from configuration.
pub struct RiskService {
    config: Arc<Config>,
    events: Arc<dyn EventLog>,
    reputation: Option<Arc<ReputationCache>>,
    gate: RiskGate,
    incidents: IncidentRecorder,
}

impl RiskService {
    /// Create the service, opening storage as configured.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let (events, reports): (Arc<dyn EventLog>, Arc<dyn ReportStore>) =
            match config.storage.backend {
                StorageBackend::Memory => {
                    let store = Arc::new(MemoryStore::new());
                    let events: Arc<dyn EventLog> = store.clone();
                    let reports: Arc<dyn ReportStore> = store;
                    (events, reports)
                }
                StorageBackend::Sqlite => {
                    let path = config
                        .storage
                        .path
                        .as_deref()
                        .ok_or_else(|| anyhow::anyhow!("sqlite storage requires a path"))?;
                    let store = Arc::new(SqliteStore::connect(path).await?);
                    let events: Arc<dyn EventLog> = store.clone();
                    let reports: Arc<dyn ReportStore> = store;
                    (events, reports)
                }
            };

        Self::with_stores(config, events, reports)
    }

    /// Create the service over caller-provided stores.
    pub fn with_stores(
        config: Config,
        events: Arc<dyn EventLog>,
        reports: Arc<dyn ReportStore>,
    ) -> anyhow::Result<Self> {
        let reputation = match config.enabled_reputation() {
            Some(rep) => {
                let provider = AbuseIpDbProvider::new(rep.clone())?;
                info!("AbuseIPDB reputation lookups enabled");
                Some(Arc::new(ReputationCache::new(
                    Arc::new(provider),
                    Duration::from_secs(rep.cache_ttl_seconds),
                    rep.max_cache_entries,
                )))
            }
            None => None,
        };

        Ok(Self::assemble(config, events, reports, reputation))
    }

    /// Create the service with an explicit reputation cache.
    pub fn assemble(
        config: Config,
        events: Arc<dyn EventLog>,
        reports: Arc<dyn ReportStore>,
        reputation: Option<Arc<ReputationCache>>,
    ) -> Self {
        let gate = RiskGate::new(events.clone(), config.risk_policies());

        let mut incidents = IncidentRecorder::new(reports).with_allowlist(config.parse_allowlist());
        if let Some(ref cache) = reputation {
            incidents = incidents.with_reputation(cache.clone());
        }

        info!(
            reputation = reputation.is_some(),
            storage = ?config.storage.backend,
            allowlist_entries = config.allowlist.len(),
            "Risk service initialized"
        );

        Self {
            config: Arc::new(config),
            events,
            reputation,
            gate,
            incidents,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gate(&self) -> &RiskGate {
        &self.gate
    }

    pub fn incidents(&self) -> &IncidentRecorder {
        &self.incidents
    }

    pub fn reputation(&self) -> Option<&Arc<ReputationCache>> {
        self.reputation.as_ref()
    }

    /// Reputation lookup through the cache.
    pub async fn lookup(
        &self,
        ip: &IpAddr,
        force_refresh: bool,
    ) -> Result<ReputationRecord, LookupError> {
        match self.reputation {
            Some(ref cache) => cache.lookup(ip, force_refresh).await,
            None => Err(LookupError::Unavailable(
                "reputation lookups are not configured".to_string(),
            )),
        }
    }

    /// Evaluate identifiers using the configured fail policy.
    pub async fn evaluate(&self, identifiers: &Identifiers) -> Decision {
        self.gate
            .evaluate_with(identifiers, self.config.risk.fail_policy)
            .await
    }

    /// Record a completed attempt under each of its identifiers.
    ///
    /// Returns how many events were newly stored; re-recording the same
    /// attempt stores nothing.
    pub async fn record_attempt(
        &self,
        attempt_id: &str,
        identifiers: &Identifiers,
        outcome: Outcome,
    ) -> Result<usize, StoreError> {
        let mut stored = 0;
        for (kind, value) in identifiers.iter() {
            let event = UsageEvent::new(attempt_id, kind, value, outcome);
            if self.events.record(&event).await? {
                stored += 1;
            } else {
                debug!(attempt_id, kind = %kind, "Attempt already recorded");
            }
        }
        Ok(stored)
    }
}
