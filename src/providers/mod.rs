//! IP reputation providers.

pub mod abuseipdb;

use crate::error::LookupError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::net::IpAddr;

/// Reputation data for a single IP address.
#[derive(Debug, Clone, Serialize)]
pub struct ReputationRecord {
    /// Address the record describes.
    pub ip: IpAddr,
    /// ISP name reported by the provider.
    pub isp: String,
    /// Autonomous system number, empty if unknown.
    pub asn: String,
    /// Full provider payload.
    pub raw: Map<String, Value>,
    /// When the provider answered.
    pub fetched_at: DateTime<Utc>,
}

impl ReputationRecord {
    /// Create a record with an empty payload, fetched now.
    pub fn new(ip: IpAddr, isp: &str, asn: &str) -> Self {
        Self {
            ip,
            isp: isp.to_string(),
            asn: asn.to_string(),
            raw: Map::new(),
            fetched_at: Utc::now(),
        }
    }

    /// Attach the raw provider payload.
    pub fn with_raw(mut self, raw: Map<String, Value>) -> Self {
        self.raw = raw;
        self
    }

    /// ASN in `AS<number>` form, or an empty string.
    pub fn asn_label(&self) -> String {
        if self.asn.is_empty() {
            String::new()
        } else if self.asn.starts_with("AS") {
            self.asn.clone()
        } else {
            format!("AS{}", self.asn)
        }
    }

    /// Abuse confidence score if the provider reported one.
    pub fn abuse_score(&self) -> Option<u8> {
        self.raw
            .get("abuseConfidenceScore")
            .and_then(Value::as_u64)
            .map(|s| s.min(100) as u8)
    }
}

/// Trait for external IP reputation services.
///
/// Implementations perform exactly one outbound request per call and never
/// cache; caching is the job of [`crate::reputation::ReputationCache`].
#[async_trait]
pub trait ReputationProvider: Send + Sync {
    /// Fetch and parse the reputation of an IP address.
    async fn fetch(&self, ip: &IpAddr) -> Result<ReputationRecord, LookupError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}
