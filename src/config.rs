//! Runtime configuration: defaults, environment, and resolved paths.
//!
//! [`Config`] is built once in `main` (defaults < environment < CLI flags)
//! and handed down to the orchestrator; nothing below it reads the
//! environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Local;
use directories::ProjectDirs;

use crate::constants::{
    APP_NAME, DEFAULT_BUS_CAPACITY, DEFAULT_CRINGE_THRESHOLD, DEFAULT_LOG_FOLDER,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CONCURRENT_CALLS, DEFAULT_OPENAI_BASE_URL,
    DEFAULT_OPENAI_MODEL, DEFAULT_PROFILES_DIR, DEFAULT_SHUTDOWN_GRACE_SECS,
    DEFAULT_TWEET_TOPIC, MAX_SHUTDOWN_GRACE_SECS,
};
use crate::util::env_first;

/// Everything the simulation needs to run one session.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding one sub-directory per profile set.
    pub profiles_dir: PathBuf,
    /// Root folder for agent session logs.
    pub log_folder: PathBuf,
    /// Identifier of this run; groups the session logs.
    pub simulation_id: String,
    pub bus: BusSettings,
    pub openai: OpenAiSettings,
    pub cringe: CringeSettings,
    /// Cap on model calls in flight across all agents.
    pub max_concurrent_calls: usize,
    /// Agents stop once the feed has been quiet this long.
    pub receive_timeout: Option<Duration>,
    /// How long `stop()` waits for agents to wind down.
    pub shutdown_grace: Duration,
}

#[derive(Clone, Debug)]
pub struct BusSettings {
    pub topic: String,
    pub capacity: usize,
}

#[derive(Clone, Debug)]
pub struct OpenAiSettings {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
}

/// Settings for the quality gate every agent is built with.
#[derive(Clone, Debug)]
pub struct CringeSettings {
    pub enabled: bool,
    pub threshold: f64,
    /// Drafting attempts per message while the gate is enabled.
    pub max_attempts: usize,
}

impl Default for CringeSettings {
    fn default() -> Self {
        CringeSettings {
            enabled: true,
            threshold: DEFAULT_CRINGE_THRESHOLD,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl CringeSettings {
    /// Attempt budget actually used by an agent: one draft when the gate is
    /// off, otherwise the configured budget (never zero).
    pub fn attempt_budget(&self) -> usize {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }
}

impl Config {
    /// Resolve configuration from the process environment (after `.env`
    /// has been loaded).
    pub fn from_env() -> Result<Self> {
        Self::resolve(env_first)
    }

    /// Resolve configuration from an arbitrary lookup. `lookup` receives a
    /// list of candidate keys and returns the first non-empty value.
    pub fn resolve(lookup: impl Fn(&[&str]) -> Option<String>) -> Result<Self> {
        let data_dir = lookup(&["FLOCK_DATA_DIR"])
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let profiles_dir = lookup(&["FLOCK_PROFILES_DIR"])
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(DEFAULT_PROFILES_DIR));
        let log_folder = lookup(&["FLOCK_LOG_FOLDER", "AGENT_LOG_FOLDER"])
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(DEFAULT_LOG_FOLDER));
        let simulation_id =
            lookup(&["FLOCK_SIMULATION_ID"]).unwrap_or_else(default_simulation_id);

        let bus = BusSettings {
            topic: lookup(&["FLOCK_TWEET_TOPIC", "REDIS_TWEET_TOPIC"])
                .unwrap_or_else(|| DEFAULT_TWEET_TOPIC.to_string()),
            capacity: parse_or(&lookup, &["FLOCK_BUS_CAPACITY"], DEFAULT_BUS_CAPACITY)?,
        };

        let openai = OpenAiSettings {
            model: lookup(&["OPENAI_MODEL", "FLOCK_OPENAI_MODEL"])
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            base_url: lookup(&["OPENAI_BASE_URL", "OPENAI_API_BASE"])
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            api_key: lookup(&["OPENAI_API_KEY"]),
        };

        let cringe = CringeSettings {
            enabled: parse_or(&lookup, &["FLOCK_CRINGE_FILTER"], true)?,
            threshold: parse_or(&lookup, &["FLOCK_CRINGE_THRESHOLD"], DEFAULT_CRINGE_THRESHOLD)?,
            max_attempts: parse_or(&lookup, &["FLOCK_MAX_ATTEMPTS"], DEFAULT_MAX_ATTEMPTS)?,
        };

        let config = Config {
            profiles_dir,
            log_folder,
            simulation_id,
            bus,
            openai,
            cringe,
            max_concurrent_calls: parse_or(
                &lookup,
                &["FLOCK_MAX_CONCURRENT_CALLS"],
                DEFAULT_MAX_CONCURRENT_CALLS,
            )?,
            receive_timeout: lookup(&["FLOCK_RECEIVE_TIMEOUT_SECS"])
                .map(|raw| parse_secs(&raw, "FLOCK_RECEIVE_TIMEOUT_SECS"))
                .transpose()?,
            shutdown_grace: Duration::from_secs(parse_or(
                &lookup,
                &["FLOCK_SHUTDOWN_GRACE_SECS"],
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the pipeline meaningless.
    pub fn validate(&self) -> Result<()> {
        if !self.cringe.threshold.is_finite() {
            bail!("cringe threshold must be a finite number");
        }
        if self.max_concurrent_calls == 0 {
            bail!("max concurrent calls must be at least 1");
        }
        if self.bus.capacity == 0 {
            bail!("bus capacity must be at least 1");
        }
        if self.bus.topic.trim().is_empty() {
            bail!("bus topic must not be empty");
        }
        if self.shutdown_grace > Duration::from_secs(MAX_SHUTDOWN_GRACE_SECS) {
            bail!("shutdown grace must be at most {MAX_SHUTDOWN_GRACE_SECS} seconds");
        }
        if self.simulation_id.trim().is_empty() || self.simulation_id.contains(['/', '\\']) {
            bail!("simulation id must be a non-empty single path segment");
        }
        Ok(())
    }

    /// Folder all agents of this simulation write their session logs to.
    pub fn session_log_dir(&self) -> PathBuf {
        self.log_folder.join(&self.simulation_id)
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&[&str]) -> Option<String>,
    keys: &[&str],
    default: T,
) -> Result<T> {
    match lookup(keys) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => Ok(value),
            Err(_) => bail!("invalid value {raw:?} for {}", keys[0]),
        },
        None => Ok(default),
    }
}

fn parse_secs(raw: &str, key: &str) -> Result<Duration> {
    match raw.trim().parse::<f64>().map(Duration::try_from_secs_f64) {
        Ok(Ok(secs)) if !secs.is_zero() => Ok(secs),
        _ => bail!("invalid value {raw:?} for {key}"),
    }
}

/// Working directory when it already holds profile sets, otherwise the
/// platform data directory, falling back to the working directory.
fn default_data_dir() -> PathBuf {
    let cwd = PathBuf::from(".");
    if cwd.join(DEFAULT_PROFILES_DIR).is_dir() {
        return cwd;
    }
    ProjectDirs::from("com", APP_NAME, APP_NAME)
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or(cwd)
}

fn default_simulation_id() -> String {
    format!("sim-{}", Local::now().format("%Y%m%d-%H%M%S"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&[&str]) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |keys: &[&str]| keys.iter().find_map(|k| map.get(*k).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::resolve(lookup_from(&[("FLOCK_DATA_DIR", "/tmp/flock")])).unwrap();
        assert_eq!(config.profiles_dir, PathBuf::from("/tmp/flock/profiles"));
        assert_eq!(config.log_folder, PathBuf::from("/tmp/flock/agent_logs"));
        assert_eq!(config.bus.topic, DEFAULT_TWEET_TOPIC);
        assert!(config.cringe.enabled);
        assert_eq!(config.cringe.threshold, 0.7);
        assert_eq!(config.cringe.attempt_budget(), 10);
        assert_eq!(config.max_concurrent_calls, 32);
        assert!(config.openai.api_key.is_none());
        assert!(config.simulation_id.starts_with("sim-"));
    }

    #[test]
    fn legacy_variable_names_are_honoured() {
        let config = Config::resolve(lookup_from(&[
            ("AGENT_LOG_FOLDER", "/var/log/agents"),
            ("REDIS_TWEET_TOPIC", "tweet_stream"),
            ("FLOCK_SIMULATION_ID", "run-7"),
        ]))
        .unwrap();
        assert_eq!(config.log_folder, PathBuf::from("/var/log/agents"));
        assert_eq!(config.bus.topic, "tweet_stream");
        assert_eq!(config.session_log_dir(), PathBuf::from("/var/log/agents/run-7"));
    }

    #[test]
    fn receive_timeout_is_optional() {
        let config = Config::resolve(lookup_from(&[("FLOCK_DATA_DIR", "/tmp/flock")])).unwrap();
        assert!(config.receive_timeout.is_none());

        let config = Config::resolve(lookup_from(&[
            ("FLOCK_DATA_DIR", "/tmp/flock"),
            ("FLOCK_RECEIVE_TIMEOUT_SECS", "2.5"),
        ]))
        .unwrap();
        assert_eq!(config.receive_timeout, Some(Duration::from_millis(2500)));

        assert!(
            Config::resolve(lookup_from(&[
                ("FLOCK_DATA_DIR", "/tmp/flock"),
                ("FLOCK_RECEIVE_TIMEOUT_SECS", "-1"),
            ]))
            .is_err()
        );
    }

    #[test]
    fn out_of_range_durations_are_errors() {
        let err = Config::resolve(lookup_from(&[
            ("FLOCK_DATA_DIR", "/tmp/flock"),
            ("FLOCK_RECEIVE_TIMEOUT_SECS", "1e30"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("FLOCK_RECEIVE_TIMEOUT_SECS"));

        let max = u64::MAX.to_string();
        assert!(
            Config::resolve(lookup_from(&[
                ("FLOCK_DATA_DIR", "/tmp/flock"),
                ("FLOCK_SHUTDOWN_GRACE_SECS", max.as_str()),
            ]))
            .is_err()
        );
    }

    #[test]
    fn disabled_filter_means_exactly_one_attempt() {
        let config = Config::resolve(lookup_from(&[
            ("FLOCK_DATA_DIR", "/tmp/flock"),
            ("FLOCK_CRINGE_FILTER", "false"),
            ("FLOCK_MAX_ATTEMPTS", "4"),
        ]))
        .unwrap();
        assert!(!config.cringe.enabled);
        assert_eq!(config.cringe.attempt_budget(), 1);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = Config::resolve(lookup_from(&[
            ("FLOCK_DATA_DIR", "/tmp/flock"),
            ("FLOCK_CRINGE_THRESHOLD", "very"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("FLOCK_CRINGE_THRESHOLD"));

        assert!(
            Config::resolve(lookup_from(&[
                ("FLOCK_DATA_DIR", "/tmp/flock"),
                ("FLOCK_MAX_CONCURRENT_CALLS", "0"),
            ]))
            .is_err()
        );
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let config = Config::resolve(lookup_from(&[
            ("FLOCK_DATA_DIR", "/tmp/flock"),
            ("FLOCK_MAX_ATTEMPTS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.cringe.attempt_budget(), 1);
    }

    #[test]
    fn simulation_id_must_be_a_path_segment() {
        assert!(
            Config::resolve(lookup_from(&[
                ("FLOCK_DATA_DIR", "/tmp/flock"),
                ("FLOCK_SIMULATION_ID", "../escape"),
            ]))
            .is_err()
        );
    }
}
