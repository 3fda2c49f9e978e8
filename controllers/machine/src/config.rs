//! Actuator configuration.
//!
//! Tunables are resolved once at startup from the environment and passed to
//! the actuator explicitly.

use std::env;
use std::time::Duration;
use tracing::warn;

/// Environment variable overriding the instance create timeout, in minutes.
pub const INSTANCE_CREATE_TIMEOUT_ENV: &str = "CLUSTER_API_OPENSTACK_INSTANCE_CREATE_TIMEOUT";

/// Default instance create timeout.
pub const DEFAULT_INSTANCE_CREATE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Interval between instance status polls while waiting for ACTIVE.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Lifetime of issued bootstrap tokens.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Namespace holding bootstrap token secrets.
pub const BOOTSTRAP_TOKEN_NAMESPACE: &str = "kube-system";

/// Configuration for the machine actuator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorConfig {
    /// Interval between instance status polls
    pub poll_interval: Duration,
    /// Upper bound on waiting for a new instance to become ACTIVE
    pub instance_create_timeout: Duration,
    /// Lifetime of issued bootstrap tokens
    pub bootstrap_token_ttl: Duration,
    /// Namespace bootstrap token secrets are written to
    pub bootstrap_token_namespace: String,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            instance_create_timeout: DEFAULT_INSTANCE_CREATE_TIMEOUT,
            bootstrap_token_ttl: DEFAULT_TOKEN_TTL,
            bootstrap_token_namespace: BOOTSTRAP_TOKEN_NAMESPACE.to_string(),
        }
    }
}

impl ActuatorConfig {
    /// Build the configuration, applying the create timeout override if set.
    pub fn from_env() -> Self {
        let raw = env::var(INSTANCE_CREATE_TIMEOUT_ENV).ok();
        Self {
            instance_create_timeout: parse_timeout(raw.as_deref()),
            ..Self::default()
        }
    }
}

/// Parse a timeout override in whole minutes.
///
/// Missing or malformed values fall back to the default.
pub fn parse_timeout(raw: Option<&str>) -> Duration {
    let Some(raw) = raw else {
        return DEFAULT_INSTANCE_CREATE_TIMEOUT;
    };

    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| e.to_string())
        .and_then(|minutes| minutes.checked_mul(60).ok_or_else(|| "value out of range".to_string()));

    match parsed {
        Ok(seconds) => Duration::from_secs(seconds),
        Err(e) => {
            warn!(
                "Ignoring malformed {}={:?} ({}), using default of {} minutes",
                INSTANCE_CREATE_TIMEOUT_ENV,
                raw,
                e,
                DEFAULT_INSTANCE_CREATE_TIMEOUT.as_secs() / 60
            );
            DEFAULT_INSTANCE_CREATE_TIMEOUT
        }
    }
}
