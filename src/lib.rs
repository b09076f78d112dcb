//! Risk gate for Zentinel.
//!
//! Rate-limits identity/action requests by sliding-window usage counts and
//! records abuse incidents enriched with cached IP reputation.
//!
//! # Features
//!
//! - **Reputation Cache** - AbuseIPDB lookups behind a TTL cache; failures are never cached
//! - **Risk Gate** - Per-identifier limits (IP before secondary) over successful attempts
//! - **Incident Recorder** - Deduplicated pending abuse reports with best-effort enrichment
//! - **Fail-Open/Closed** - Explicit behavior when the event log is unavailable
//! - **Storage** - In-memory or SQLite event log and report store
//!
//! # Example Configuration
//!
//! ```yaml
//! reputation:
//!   api_key: "${ABUSEIPDB_API_KEY}"
//!   cache_ttl_seconds: 86400
//!
//! risk:
//!   ip:
//!     window_seconds: 86400
//!     max_count: 5
//!   secondary:
//!     window_seconds: 2592000
//!     max_count: 3
//!   fail_policy: closed
//!
//! storage:
//!   backend: sqlite
//!   path: "risk-gate.db"
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod incident;
pub mod providers;
pub mod reputation;
pub mod risk;
pub mod service;
pub mod store;

pub use config::Config;
pub use error::{EvaluationError, LookupError, StoreError};
pub use incident::{IncidentRecorder, RecordOutcome};
pub use reputation::ReputationCache;
pub use risk::{Decision, Identifiers, RiskGate, RiskPolicy};
pub use service::RiskService;
