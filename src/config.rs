//! Configuration types for the risk gate.

use crate::risk::RiskPolicy;
use crate::store::IdentifierKind;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Reputation lookup configuration. Lookups are disabled when absent.
    #[serde(default)]
    pub reputation: Option<ReputationConfig>,

    /// Sliding-window usage limits.
    #[serde(default)]
    pub risk: RiskConfig,

    /// Event log and report storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Sources never reported as abusive (own infrastructure).
    #[serde(default)]
    pub allowlist: Vec<String>,
}

/// AbuseIPDB lookup and cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReputationConfig {
    /// Enable reputation lookups.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// API key (supports ${ENV_VAR} syntax).
    #[serde(default)]
    pub api_key: String,

    /// API base URL, without the trailing `/check`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Only consider reports from the last N days.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,

    /// Cache TTL in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// API request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Upper bound on cached records.
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
            base_url: default_base_url(),
            max_age_days: default_max_age_days(),
            cache_ttl_seconds: default_cache_ttl(),
            timeout_ms: default_timeout(),
            max_cache_entries: default_max_cache_entries(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.abuseipdb.com/api/v2".to_string()
}

fn default_max_age_days() -> u32 {
    90
}

fn default_cache_ttl() -> u64 {
    86_400
}

fn default_timeout() -> u64 {
    5000
}

fn default_max_cache_entries() -> usize {
    10_000
}

/// Usage limits per identifier kind.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskConfig {
    /// Limit for IP addresses.
    #[serde(default = "default_ip_policy")]
    pub ip: PolicyConfig,

    /// Limit for the secondary identifier (e.g. phone number).
    #[serde(default = "default_secondary_policy")]
    pub secondary: PolicyConfig,

    /// What the CLI does when the event log cannot be read.
    #[serde(default)]
    pub fail_policy: FailPolicy,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            ip: default_ip_policy(),
            secondary: default_secondary_policy(),
            fail_policy: FailPolicy::default(),
        }
    }
}

/// A single sliding-window limit.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Window length in seconds.
    pub window_seconds: u64,
    /// Successful attempts allowed inside the window.
    pub max_count: u32,
}

fn default_ip_policy() -> PolicyConfig {
    PolicyConfig {
        window_seconds: 86_400,
        max_count: 5,
    }
}

fn default_secondary_policy() -> PolicyConfig {
    PolicyConfig {
        window_seconds: 30 * 86_400,
        max_count: 3,
    }
}

/// Outcome when a risk evaluation cannot read the event log.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailPolicy {
    /// Allow the action (informational use only).
    Open,
    /// Block the action.
    #[default]
    Closed,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// SQLite database file.
    #[serde(default = "default_storage_path")]
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> Option<PathBuf> {
    Some(PathBuf::from("risk-gate.db"))
}

/// Storage backend.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local, lost on exit.
    Memory,
    /// SQLite file.
    #[default]
    Sqlite,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(ref reputation) = self.reputation {
            if reputation.enabled && reputation.api_key.is_empty() {
                anyhow::bail!("reputation lookups are enabled but api_key is empty");
            }
            if reputation.cache_ttl_seconds == 0 {
                anyhow::bail!("cache_ttl_seconds must be at least 1");
            }
            if reputation.timeout_ms == 0 {
                anyhow::bail!("timeout_ms must be at least 1");
            }
        }

        for (name, policy) in [("ip", &self.risk.ip), ("secondary", &self.risk.secondary)] {
            if policy.window_seconds == 0 {
                anyhow::bail!("risk.{}.window_seconds must be at least 1", name);
            }
            if policy.max_count == 0 {
                anyhow::bail!("risk.{}.max_count must be at least 1", name);
            }
        }

        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.is_none() {
            anyhow::bail!("sqlite storage requires a path");
        }

        for entry in &self.allowlist {
            if entry.parse::<IpAddr>().is_err() && entry.parse::<IpNet>().is_err() {
                anyhow::bail!("Invalid allowlist entry: {}", entry);
            }
        }

        Ok(())
    }

    /// Enabled reputation configuration, if any.
    pub fn enabled_reputation(&self) -> Option<&ReputationConfig> {
        self.reputation.as_ref().filter(|r| r.enabled)
    }

    /// Risk policies keyed by identifier kind.
    pub fn risk_policies(&self) -> BTreeMap<IdentifierKind, RiskPolicy> {
        let mut policies = BTreeMap::new();
        policies.insert(IdentifierKind::Ip, RiskPolicy::from(self.risk.ip));
        policies.insert(IdentifierKind::Secondary, RiskPolicy::from(self.risk.secondary));
        policies
    }

    /// Parse allowlist entries into IpAddr or IpNet.
    pub fn parse_allowlist(&self) -> Vec<AllowlistEntry> {
        self.allowlist
            .iter()
            .filter_map(|s| {
                if let Ok(ip) = s.parse::<IpAddr>() {
                    Some(AllowlistEntry::Single(ip))
                } else if let Ok(net) = s.parse::<IpNet>() {
                    Some(AllowlistEntry::Network(net))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# Risk Gate Configuration

# AbuseIPDB reputation lookups (optional)
reputation:
  enabled: true
  api_key: "${ABUSEIPDB_API_KEY}"   # Use environment variable
  base_url: "https://api.abuseipdb.com/api/v2"
  max_age_days: 90                  # Only consider reports from last 90 days
  cache_ttl_seconds: 86400          # Cache results for 24 hours
  timeout_ms: 5000                  # API timeout
  max_cache_entries: 10000

# Successful attempts allowed per sliding window
risk:
  ip:
    window_seconds: 86400           # 1 day
    max_count: 5
  secondary:
    window_seconds: 2592000         # 30 days
    max_count: 3
  fail_policy: closed               # open or closed when storage is unavailable

storage:
  backend: sqlite                   # sqlite or memory
  path: "risk-gate.db"

# Never reported as abusive - supports single IPs and CIDR notation
allowlist:
  - "127.0.0.1"
  - "10.0.0.0/8"
"#
        .to_string()
    }
}

/// Parsed allowlist entry.
#[derive(Debug, Clone)]
pub enum AllowlistEntry {
    Single(IpAddr),
    Network(IpNet),
}

impl AllowlistEntry {
    /// Check if an IP address matches this allowlist entry.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            AllowlistEntry::Single(allowed) => allowed == ip,
            AllowlistEntry::Network(net) => net.contains(ip),
        }
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex is valid");

    re.replace_all(content, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}
