//! Scheduler configuration, sourced from process environment.
//!
//! All knobs are validated strictly at startup: a malformed value is a
//! configuration error and the process exits with the misconfiguration
//! code before touching any state.

use std::time::Duration;

use semver::Version;

use crate::error::{Error, Result};

const ENV_HIGHLY_AVAILABLE: &str = "BOSUN_HIGHLY_AVAILABLE";
const ENV_LEADER_ELECTION_BACKEND: &str = "BOSUN_LEADER_ELECTION_BACKEND";
const ENV_ZK_TIMEOUT_MS: &str = "BOSUN_ZK_TIMEOUT_MS";
const ENV_COMMAND_QUEUE_CAPACITY: &str = "BOSUN_COMMAND_QUEUE_CAPACITY";
const ENV_REFUSE_OFFER_SECONDS: &str = "BOSUN_REFUSE_OFFER_SECONDS";
const ENV_MIN_BROKER_VERSION: &str = "BOSUN_MIN_BROKER_VERSION";

const DEFAULT_ZK_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_COMMAND_QUEUE_CAPACITY: u64 = 1024;
const DEFAULT_REFUSE_OFFER_SECONDS: f64 = 5.0;
const DEFAULT_MIN_BROKER_VERSION: &str = "1.8.0";

/// The leader-election backend to use when running highly available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeaderElectionBackend {
    /// The external persistence coordinator (fenced leases).
    #[default]
    Coordinator,
}

/// Validated scheduler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Real leader election vs single-process pseudo-leader.
    pub highly_available: bool,
    /// Which coordinator implementation provides leases.
    pub leader_election_backend: LeaderElectionBackend,
    /// Persistence-coordinator operation timeout.
    pub zk_timeout: Duration,
    /// Bounded input queue size; overflow fails synchronously.
    pub command_queue_capacity: usize,
    /// Decline filter duration for unusable offers.
    pub refuse_offer_seconds: f64,
    /// Minimum broker version accepted at registration.
    pub min_broker_version: Version,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            highly_available: false,
            leader_election_backend: LeaderElectionBackend::Coordinator,
            zk_timeout: Duration::from_millis(DEFAULT_ZK_TIMEOUT_MS),
            command_queue_capacity: usize::try_from(DEFAULT_COMMAND_QUEUE_CAPACITY)
                .unwrap_or(1024),
            refuse_offer_seconds: DEFAULT_REFUSE_OFFER_SECONDS,
            min_broker_version: Version::parse(DEFAULT_MIN_BROKER_VERSION)
                .unwrap_or_else(|_| Version::new(1, 8, 0)),
        }
    }
}

impl SchedulerConfig {
    /// Loads configuration from the process environment with strict
    /// validation.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending variable.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration with a custom environment source.
    ///
    /// This entry point is test-friendly and accepts a key lookup function.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending variable.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let highly_available = parse_bool_env(&get_env, ENV_HIGHLY_AVAILABLE, false)?;
        let leader_election_backend = parse_backend_env(&get_env)?;
        let zk_timeout_ms =
            parse_positive_u64_env(&get_env, ENV_ZK_TIMEOUT_MS, DEFAULT_ZK_TIMEOUT_MS)?;
        let command_queue_capacity = parse_positive_u64_env(
            &get_env,
            ENV_COMMAND_QUEUE_CAPACITY,
            DEFAULT_COMMAND_QUEUE_CAPACITY,
        )?;
        let refuse_offer_seconds = parse_refuse_env(&get_env)?;
        let min_broker_version = parse_version_env(&get_env)?;

        Ok(Self {
            highly_available,
            leader_election_backend,
            zk_timeout: Duration::from_millis(zk_timeout_ms),
            command_queue_capacity: usize::try_from(command_queue_capacity).map_err(|_| {
                Error::configuration(format!(
                    "{ENV_COMMAND_QUEUE_CAPACITY} value {command_queue_capacity} exceeds supported range"
                ))
            })?,
            refuse_offer_seconds,
            min_broker_version,
        })
    }
}

fn parse_bool_env<F>(get_env: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::configuration(format!(
            "{key} must be 'true' or 'false', got '{raw}'"
        ))),
    }
}

fn parse_backend_env<F>(get_env: &F) -> Result<LeaderElectionBackend>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(ENV_LEADER_ELECTION_BACKEND) else {
        return Ok(LeaderElectionBackend::Coordinator);
    };
    match raw.as_str() {
        "coordinator" => Ok(LeaderElectionBackend::Coordinator),
        _ => Err(Error::configuration(format!(
            "{ENV_LEADER_ELECTION_BACKEND} must be 'coordinator', got '{raw}'"
        ))),
    }
}

fn parse_positive_u64_env<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };

    let parsed = raw.parse::<u64>().map_err(|_| {
        Error::configuration(format!("{key} must be a positive integer, got '{raw}'"))
    })?;
    if parsed == 0 {
        return Err(Error::configuration(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(parsed)
}

fn parse_refuse_env<F>(get_env: &F) -> Result<f64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(ENV_REFUSE_OFFER_SECONDS) else {
        return Ok(DEFAULT_REFUSE_OFFER_SECONDS);
    };
    let parsed = raw.parse::<f64>().map_err(|_| {
        Error::configuration(format!(
            "{ENV_REFUSE_OFFER_SECONDS} must be a number of seconds, got '{raw}'"
        ))
    })?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err(Error::configuration(format!(
            "{ENV_REFUSE_OFFER_SECONDS} must be finite and non-negative, got '{raw}'"
        )));
    }
    Ok(parsed)
}

fn parse_version_env<F>(get_env: &F) -> Result<Version>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = get_env(ENV_MIN_BROKER_VERSION)
        .unwrap_or_else(|| DEFAULT_MIN_BROKER_VERSION.to_string());
    Version::parse(&raw).map_err(|e| {
        Error::configuration(format!(
            "{ENV_MIN_BROKER_VERSION} must be a semantic version, got '{raw}': {e}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let config = SchedulerConfig::from_env_with(|_| None).expect("config");
        assert!(!config.highly_available);
        assert_eq!(config.command_queue_capacity, 1024);
        assert_eq!(config.zk_timeout, Duration::from_millis(10_000));
        assert!((config.refuse_offer_seconds - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = SchedulerConfig::from_env_with(env(&[
            ("BOSUN_HIGHLY_AVAILABLE", "true"),
            ("BOSUN_COMMAND_QUEUE_CAPACITY", "256"),
            ("BOSUN_ZK_TIMEOUT_MS", "2500"),
            ("BOSUN_REFUSE_OFFER_SECONDS", "1.5"),
            ("BOSUN_MIN_BROKER_VERSION", "1.11.0"),
        ]))
        .expect("config");

        assert!(config.highly_available);
        assert_eq!(config.command_queue_capacity, 256);
        assert_eq!(config.zk_timeout, Duration::from_millis(2500));
        assert!((config.refuse_offer_seconds - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.min_broker_version, Version::new(1, 11, 0));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let err = SchedulerConfig::from_env_with(env(&[("BOSUN_COMMAND_QUEUE_CAPACITY", "0")]))
            .expect_err("must reject");
        assert!(err.to_string().contains("BOSUN_COMMAND_QUEUE_CAPACITY"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = SchedulerConfig::from_env_with(env(&[(
            "BOSUN_LEADER_ELECTION_BACKEND",
            "raft",
        )]))
        .expect_err("must reject");
        assert!(err.to_string().contains("coordinator"));
    }

    #[test]
    fn negative_refuse_duration_is_rejected() {
        let err = SchedulerConfig::from_env_with(env(&[("BOSUN_REFUSE_OFFER_SECONDS", "-1")]))
            .expect_err("must reject");
        assert!(err.to_string().contains("BOSUN_REFUSE_OFFER_SECONDS"));
    }

    #[test]
    fn malformed_version_is_rejected() {
        let err = SchedulerConfig::from_env_with(env(&[("BOSUN_MIN_BROKER_VERSION", "latest")]))
            .expect_err("must reject");
        assert!(err.to_string().contains("BOSUN_MIN_BROKER_VERSION"));
    }

    #[test]
    fn malformed_bool_is_rejected() {
        let err = SchedulerConfig::from_env_with(env(&[("BOSUN_HIGHLY_AVAILABLE", "yes")]))
            .expect_err("must reject");
        assert!(err.to_string().contains("BOSUN_HIGHLY_AVAILABLE"));
    }
}
