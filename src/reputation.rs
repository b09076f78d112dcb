//! Reputation cache: a TTL-bounded cache in front of a reputation provider.

use crate::cache::ReputationStore;
use crate::error::LookupError;
use crate::providers::{ReputationProvider, ReputationRecord};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Address used to check that the provider accepts our credential.
pub const CREDENTIAL_PROBE_IP: &str = "8.8.8.8";

/// Cached front for an external reputation provider.
///
/// Failures are never cached. Concurrent misses for the same IP may each
/// call the provider; the last write wins.
pub struct ReputationCache {
    provider: Arc<dyn ReputationProvider>,
    store: ReputationStore,
}

impl ReputationCache {
    pub fn new(provider: Arc<dyn ReputationProvider>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            provider,
            store: ReputationStore::new(ttl, max_entries),
        }
    }

    /// Look up the reputation of `ip`.
    ///
    /// A fresh cached record is returned without network access unless
    /// `force_refresh` is set.
    pub async fn lookup(
        &self,
        ip: &IpAddr,
        force_refresh: bool,
    ) -> Result<ReputationRecord, LookupError> {
        if !force_refresh {
            if let Some(record) = self.store.get(ip) {
                debug!(ip = %ip, provider = self.provider.name(), "Reputation cache hit");
                return Ok(record);
            }
        }

        debug!(ip = %ip, force_refresh, "Reputation cache miss");

        match self.provider.fetch(ip).await {
            Ok(record) => {
                self.store.set(record.clone());
                Ok(record)
            }
            Err(e) => {
                warn!(
                    provider = self.provider.name(),
                    ip = %ip,
                    error = %e,
                    "Reputation lookup failed"
                );
                Err(e)
            }
        }
    }

    /// Validate the provider credential with a forced lookup of a well-known
    /// address. Returns the ISP reported for it.
    pub async fn verify_credential(&self) -> Result<String, LookupError> {
        let ip: IpAddr = CREDENTIAL_PROBE_IP
            .parse()
            .map_err(|_| LookupError::Unavailable("invalid probe address".to_string()))?;

        let record = self.lookup(&ip, true).await?;
        Ok(record.isp)
    }

    /// Drop any cached record for `ip`.
    pub fn invalidate(&self, ip: &IpAddr) -> bool {
        self.store.remove(ip)
    }

    /// Remove expired records.
    pub fn cleanup(&self) {
        self.store.cleanup();
    }

    pub fn cached_entries(&self) -> usize {
        self.store.len()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }
}
