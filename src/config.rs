//! Configuration management for conductor.
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use regex::Regex;
use serde::Deserialize;
use strum_macros::{AsRefStr, EnumString};
use tracing::debug;

use crate::{
    constants::{
        BROKER_REPLY_TIMEOUT_MS, IDLE_BACKOFF_MS, IDLE_THRESHOLD_MS, LIVENESS_ATTEMPTS,
        LIVENESS_BACKOFF_MS, LIVENESS_TIMEOUT_MS, SHUTDOWN_REPLY_TIMEOUT_MS,
    },
    error::{StorageError, SupervisorError},
};

/// Represents the structure of the configuration file. Every section is
/// optional; a missing file yields the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Directory holding runtime state (the settings store). Defaults to
    /// `$HOME/.local/share/conductor`.
    #[serde(default)]
    pub state_dir: Option<String>,

    /// Startup liveness gate tuning.
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Connection broker tuning.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Shutdown cascade tuning.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Worker idle backoff tuning.
    #[serde(default)]
    pub idle: IdleConfig,
}

/// Policy applied when a worker fails the startup liveness gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, EnumString, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LivenessPolicy {
    /// One probe pass; any unresponsive worker aborts startup.
    #[default]
    FailFast,
    /// Repeat the probe pass up to `attempts` times with `backoff_ms`
    /// between passes.
    Retry,
}

/// Liveness gate settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    /// Bound on one `alive` round-trip, in milliseconds.
    #[serde(default = "default_liveness_timeout_ms")]
    pub timeout_ms: u64,

    /// What to do about workers that miss the probe.
    #[serde(default)]
    pub policy: LivenessPolicy,

    /// Probe passes under the retry policy.
    #[serde(default = "default_liveness_attempts")]
    pub attempts: u32,

    /// Pause between probe passes under the retry policy, in milliseconds.
    #[serde(default = "default_liveness_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_liveness_timeout_ms(),
            policy: LivenessPolicy::default(),
            attempts: default_liveness_attempts(),
            backoff_ms: default_liveness_backoff_ms(),
        }
    }
}

/// Connection broker settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Bound on the wait for the target worker's acknowledgment, in
    /// milliseconds.
    #[serde(default = "default_broker_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: default_broker_reply_timeout_ms(),
        }
    }
}

/// Shutdown cascade settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// Bound on the wait for each worker's `quit` acknowledgment, in
    /// milliseconds.
    #[serde(default = "default_shutdown_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: default_shutdown_reply_timeout_ms(),
        }
    }
}

/// Worker idle backoff settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IdleConfig {
    /// How long without traffic before a worker counts as idle, in
    /// milliseconds.
    #[serde(default = "default_idle_threshold_ms")]
    pub threshold_ms: u64,

    /// Sleep per poll cycle once idle, in milliseconds.
    #[serde(default = "default_idle_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            threshold_ms: default_idle_threshold_ms(),
            backoff_ms: default_idle_backoff_ms(),
        }
    }
}

impl Config {
    /// Resolves (and creates) the state directory.
    pub fn resolve_state_dir(&self) -> Result<PathBuf, SupervisorError> {
        let path = match &self.state_dir {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = env::var("HOME")
                    .map_err(|_| SupervisorError::MissingEnvVar("HOME".to_string()))?;
                PathBuf::from(home).join(".local/share/conductor")
            }
        };
        fs::create_dir_all(&path).map_err(StorageError::ReadError)?;
        Ok(path)
    }

    /// Idle threshold as a duration.
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle.threshold_ms)
    }

    /// Idle backoff as a duration.
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle.backoff_ms)
    }
}

fn default_liveness_timeout_ms() -> u64 {
    LIVENESS_TIMEOUT_MS
}

fn default_liveness_attempts() -> u32 {
    LIVENESS_ATTEMPTS
}

fn default_liveness_backoff_ms() -> u64 {
    LIVENESS_BACKOFF_MS
}

fn default_broker_reply_timeout_ms() -> u64 {
    BROKER_REPLY_TIMEOUT_MS
}

fn default_shutdown_reply_timeout_ms() -> u64 {
    SHUTDOWN_REPLY_TIMEOUT_MS
}

fn default_idle_threshold_ms() -> u64 {
    IDLE_THRESHOLD_MS
}

fn default_idle_backoff_ms() -> u64 {
    IDLE_BACKOFF_MS
}

/// Expands `${VAR}` / `$VAR` references within a string. Unset variables are
/// an error, not an empty substitution.
fn expand_env_vars(input: &str) -> Result<String, SupervisorError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("static regex");
    let mut missing = Vec::new();
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.push(var_name.to_string());
                String::new()
            }
        }
    });

    match missing.into_iter().next() {
        Some(name) => Err(SupervisorError::MissingEnvVar(name)),
        None => Ok(result.to_string()),
    }
}

/// Loads and parses the configuration file, expanding environment variables.
///
/// An explicit path must exist. With no path given, `conductor.yaml` then
/// `condr.yaml` are tried in the working directory, and the built-in defaults
/// apply when neither exists.
pub fn load_config(config_path: Option<&str>) -> Result<Config, SupervisorError> {
    let path = match config_path {
        Some(path) => PathBuf::from(path),
        None => {
            let candidates = [Path::new("conductor.yaml"), Path::new("condr.yaml")];
            match candidates.iter().find(|p| p.exists()) {
                Some(found) => found.to_path_buf(),
                None => {
                    debug!("no configuration file found; using defaults");
                    return Ok(Config::default());
                }
            }
        }
    };

    let content = fs::read_to_string(&path).map_err(|e| {
        SupervisorError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, path.display()),
        ))
    })?;

    let expanded = expand_env_vars(&content)?;
    let config: Config = serde_yaml::from_str(&expanded)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::tempdir;

    use super::*;
    use crate::test_utils::env_lock;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::default();
        assert_eq!(config.liveness.timeout_ms, LIVENESS_TIMEOUT_MS);
        assert_eq!(config.liveness.policy, LivenessPolicy::FailFast);
        assert_eq!(config.broker.reply_timeout_ms, BROKER_REPLY_TIMEOUT_MS);
        assert_eq!(config.idle.threshold_ms, IDLE_THRESHOLD_MS);
        assert!(config.state_dir.is_none());
    }

    #[test]
    fn full_file_parses_every_section() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conductor.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
state_dir: /tmp/conductor-test
liveness:
  timeout_ms: 250
  policy: retry
  attempts: 5
  backoff_ms: 100
broker:
  reply_timeout_ms: 750
shutdown:
  reply_timeout_ms: 300
idle:
  threshold_ms: 2000
  backoff_ms: 50
"#
        )
        .unwrap();

        let config = load_config(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.state_dir.as_deref(), Some("/tmp/conductor-test"));
        assert_eq!(config.liveness.timeout_ms, 250);
        assert_eq!(config.liveness.policy, LivenessPolicy::Retry);
        assert_eq!(config.liveness.attempts, 5);
        assert_eq!(config.broker.reply_timeout_ms, 750);
        assert_eq!(config.shutdown.reply_timeout_ms, 300);
        assert_eq!(config.idle.threshold_ms, 2000);
        assert_eq!(config.idle_backoff(), Duration::from_millis(50));
    }

    #[test]
    fn env_vars_are_expanded() {
        let _guard = env_lock();
        unsafe {
            env::set_var("CONDUCTOR_TEST_STATE", "/tmp/conductor-env");
        }

        let dir = tempdir().unwrap();
        let path = dir.path().join("conductor.yaml");
        std::fs::write(&path, "state_dir: ${CONDUCTOR_TEST_STATE}\n").unwrap();

        let config = load_config(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.state_dir.as_deref(), Some("/tmp/conductor-env"));

        unsafe {
            env::remove_var("CONDUCTOR_TEST_STATE");
        }
    }

    #[test]
    fn unset_env_var_is_an_error() {
        let _guard = env_lock();
        let dir = tempdir().unwrap();
        let path = dir.path().join("conductor.yaml");
        std::fs::write(&path, "state_dir: ${CONDUCTOR_TEST_UNSET_VAR}\n").unwrap();

        let err = load_config(Some(path.to_str().unwrap())).unwrap_err();
        assert!(matches!(err, SupervisorError::MissingEnvVar(name) if name == "CONDUCTOR_TEST_UNSET_VAR"));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = load_config(Some("/nonexistent/conductor.yaml")).unwrap_err();
        assert!(matches!(err, SupervisorError::ConfigReadError(_)));
    }

    #[test]
    fn state_dir_falls_back_to_home() {
        let _guard = env_lock();
        let dir = tempdir().unwrap();
        let original_home = env::var("HOME").ok();
        unsafe {
            env::set_var("HOME", dir.path());
        }

        let config = Config::default();
        let resolved = config.resolve_state_dir().unwrap();
        assert_eq!(resolved, dir.path().join(".local/share/conductor"));
        assert!(resolved.exists());

        match original_home {
            Some(value) => unsafe { env::set_var("HOME", value) },
            None => unsafe { env::remove_var("HOME") },
        }
    }
}
