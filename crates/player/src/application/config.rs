//! Coordinator configuration.

use std::str::FromStr;
use std::time::Duration;

/// Default age after which a queued message is dropped instead of flushed.
pub const DEFAULT_QUEUE_TTL_MS: u64 = 30_000;
/// Default number of queued messages per channel kind.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;
/// Default time a pending interaction waits for its reply.
pub const DEFAULT_INTERACTION_TIMEOUT_MS: u64 = 5_000;
/// Default number of live pending interactions.
pub const DEFAULT_MAX_PENDING_INTERACTIONS: usize = 16;
/// Default number of handler registration attempts per channel.
pub const DEFAULT_REGISTRATION_ATTEMPTS: u32 = 10;
/// Default fixed delay between registration attempts.
pub const DEFAULT_REGISTRATION_DELAY_MS: u64 = 500;
/// Default delay before the leave re-entrancy guard is cleared.
pub const DEFAULT_LEAVE_COOLDOWN_MS: u64 = 250;

/// Tunables for the coordination layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub queue_ttl: Duration,
    pub queue_capacity: usize,
    pub interaction_timeout: Duration,
    pub max_pending_interactions: usize,
    pub registration_attempts: u32,
    pub registration_delay: Duration,
    pub leave_cooldown: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            queue_ttl: Duration::from_millis(DEFAULT_QUEUE_TTL_MS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            interaction_timeout: Duration::from_millis(DEFAULT_INTERACTION_TIMEOUT_MS),
            max_pending_interactions: DEFAULT_MAX_PENDING_INTERACTIONS,
            registration_attempts: DEFAULT_REGISTRATION_ATTEMPTS,
            registration_delay: Duration::from_millis(DEFAULT_REGISTRATION_DELAY_MS),
            leave_cooldown: Duration::from_millis(DEFAULT_LEAVE_COOLDOWN_MS),
        }
    }
}

impl CoordinatorConfig {
    /// Defaults overlaid with environment variables.
    ///
    /// Supported environment variables:
    /// - TANDEM_QUEUE_TTL_MS
    /// - TANDEM_QUEUE_CAPACITY (must be >= 1)
    /// - TANDEM_INTERACTION_TIMEOUT_MS
    /// - TANDEM_MAX_PENDING_INTERACTIONS (must be >= 1)
    /// - TANDEM_REGISTRATION_ATTEMPTS (must be >= 1)
    /// - TANDEM_REGISTRATION_DELAY_MS
    /// - TANDEM_LEAVE_COOLDOWN_MS
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, "TANDEM_QUEUE_TTL_MS", |_| true) {
            config.queue_ttl = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<usize>(&lookup, "TANDEM_QUEUE_CAPACITY", |n| *n >= 1) {
            config.queue_capacity = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "TANDEM_INTERACTION_TIMEOUT_MS", |_| true) {
            config.interaction_timeout = Duration::from_millis(ms);
        }
        if let Some(n) =
            parse_var::<usize>(&lookup, "TANDEM_MAX_PENDING_INTERACTIONS", |n| *n >= 1)
        {
            config.max_pending_interactions = n;
        }
        if let Some(n) = parse_var::<u32>(&lookup, "TANDEM_REGISTRATION_ATTEMPTS", |n| *n >= 1) {
            config.registration_attempts = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "TANDEM_REGISTRATION_DELAY_MS", |_| true) {
            config.registration_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "TANDEM_LEAVE_COOLDOWN_MS", |_| true) {
            config.leave_cooldown = Duration::from_millis(ms);
        }

        config
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    valid: impl Fn(&T) -> bool,
) -> Option<T>
where
    T: FromStr + std::fmt::Display,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => {
            tracing::info!(var = name, %value, "Applied environment override");
            Some(value)
        }
        Ok(value) => {
            tracing::warn!(var = name, %value, "Environment value out of range, ignoring");
            None
        }
        Err(_) => {
            tracing::warn!(var = name, val = %raw, "Environment value is not valid, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        assert_eq!(
            CoordinatorConfig::from_lookup(lookup(&[])),
            CoordinatorConfig::default()
        );
    }

    #[test]
    fn test_overrides_apply() {
        let config = CoordinatorConfig::from_lookup(lookup(&[
            ("TANDEM_QUEUE_TTL_MS", "1000"),
            ("TANDEM_QUEUE_CAPACITY", " 4 "),
            ("TANDEM_REGISTRATION_ATTEMPTS", "3"),
        ]));
        assert_eq!(config.queue_ttl, Duration::from_secs(1));
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.registration_attempts, 3);
        assert_eq!(
            config.interaction_timeout,
            Duration::from_millis(DEFAULT_INTERACTION_TIMEOUT_MS)
        );
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = CoordinatorConfig::from_lookup(lookup(&[
            ("TANDEM_QUEUE_CAPACITY", "0"),
            ("TANDEM_MAX_PENDING_INTERACTIONS", "lots"),
        ]));
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(
            config.max_pending_interactions,
            DEFAULT_MAX_PENDING_INTERACTIONS
        );
    }
}
