//! Risk gate: sliding-window usage limits per identifier.
//!
//! The gate counts SUCCESS events recorded under each identifier inside the
//! window `(now - window, now]` and denies once a count reaches its limit.
//! It never writes; callers record an event only after an attempt completes,
//! so abandoned or failed attempts do not consume quota.

use crate::config::{FailPolicy, PolicyConfig};
use crate::error::EvaluationError;
use crate::store::{CountQuery, EventLog, IdentifierKind, Outcome};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Limit for one identifier kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskPolicy {
    pub window: Duration,
    pub max_count: u32,
}

impl RiskPolicy {
    pub fn new(window: Duration, max_count: u32) -> Self {
        Self { window, max_count }
    }
}

impl From<PolicyConfig> for RiskPolicy {
    fn from(config: PolicyConfig) -> Self {
        let seconds = i64::try_from(config.window_seconds).unwrap_or(i64::MAX);
        Self {
            window: Duration::try_seconds(seconds).unwrap_or(Duration::MAX),
            max_count: config.max_count,
        }
    }
}

/// Identifiers of the action being evaluated, iterated in priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identifiers(BTreeMap<IdentifierKind, String>);

impl Identifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ip(self, ip: impl Into<String>) -> Self {
        self.with(IdentifierKind::Ip, ip)
    }

    pub fn with_secondary(self, value: impl Into<String>) -> Self {
        self.with(IdentifierKind::Secondary, value)
    }

    pub fn with(mut self, kind: IdentifierKind, value: impl Into<String>) -> Self {
        self.0.insert(kind, value.into());
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (IdentifierKind, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Outcome of a risk evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    /// Message suitable for the end user when denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Identifier kind whose limit was reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breached: Option<IdentifierKind>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            breached: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            breached: None,
        }
    }

    fn limit_reached(kind: IdentifierKind, value: &str, policy: &RiskPolicy) -> Self {
        let advice = match kind {
            IdentifierKind::Ip => "Please try again later.",
            IdentifierKind::Secondary => "Please use a different one.",
        };
        Self {
            allowed: false,
            reason: Some(format!(
                "{} {} has reached the limit of {} verifications per {}. {}",
                kind.label(),
                value,
                policy.max_count,
                describe_window(policy.window),
                advice
            )),
            breached: Some(kind),
        }
    }
}

/// Message returned when evaluation fails and the call site fails closed.
pub const UNAVAILABLE_MESSAGE: &str =
    "Verification is temporarily unavailable. Please try again later.";

fn describe_window(window: Duration) -> String {
    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {}", unit)
        } else {
            format!("{} {}s", n, unit)
        }
    };

    let secs = window.num_seconds();
    if secs > 0 && secs % 86_400 == 0 {
        plural(secs / 86_400, "day")
    } else if secs > 0 && secs % 3600 == 0 {
        plural(secs / 3600, "hour")
    } else if secs > 0 && secs % 60 == 0 {
        plural(secs / 60, "minute")
    } else {
        plural(secs, "second")
    }
}

/// Evaluates identifiers against per-kind usage limits.
pub struct RiskGate {
    log: Arc<dyn EventLog>,
    policies: BTreeMap<IdentifierKind, RiskPolicy>,
}

impl RiskGate {
    pub fn new(log: Arc<dyn EventLog>, policies: BTreeMap<IdentifierKind, RiskPolicy>) -> Self {
        Self { log, policies }
    }

    /// Evaluate at the current time.
    pub async fn evaluate(&self, identifiers: &Identifiers) -> Result<Decision, EvaluationError> {
        self.evaluate_at(identifiers, Utc::now()).await
    }

    /// Evaluate at `now`. Kinds are checked IP first and the first limit
    /// reached wins; kinds without a policy are ignored.
    pub async fn evaluate_at(
        &self,
        identifiers: &Identifiers,
        now: DateTime<Utc>,
    ) -> Result<Decision, EvaluationError> {
        for (kind, value) in identifiers.iter() {
            let Some(policy) = self.policies.get(&kind) else {
                debug!(kind = %kind, "No policy for identifier kind");
                continue;
            };

            let query = CountQuery {
                kind,
                value: value.to_string(),
                outcome: Outcome::Success,
                since: now
                    .checked_sub_signed(policy.window)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
                until: now,
            };
            let count = self.log.count(&query).await?;

            debug!(kind = %kind, value = %value, count, limit = policy.max_count, "Usage counted");

            if count >= u64::from(policy.max_count) {
                info!(
                    kind = %kind,
                    value = %value,
                    count,
                    limit = policy.max_count,
                    "Usage limit reached"
                );
                return Ok(Decision::limit_reached(kind, value, policy));
            }
        }

        Ok(Decision::allow())
    }

    /// Evaluate, resolving storage failure with an explicit policy.
    pub async fn evaluate_with(&self, identifiers: &Identifiers, on_error: FailPolicy) -> Decision {
        match self.evaluate(identifiers).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, fail_policy = ?on_error, "Risk evaluation failed");
                match on_error {
                    FailPolicy::Open => Decision::allow(),
                    FailPolicy::Closed => Decision::deny(UNAVAILABLE_MESSAGE),
                }
            }
        }
    }
}
