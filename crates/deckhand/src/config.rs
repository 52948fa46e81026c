//! `deckhand.toml`: storage, secrets, rollout timing, monitor thresholds
//! and infrastructure hooks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use deckhand_env::SecretCipher;
use deckhand_rollback::RollbackTrigger;
use deckhand_rollout::ExecutorTimings;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub secrets: SecretsConfig,
    pub rollout: RolloutSettings,
    pub monitor: MonitorSettings,
    pub hooks: HooksConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or fall back to defaults when it does not exist and
    /// `required` is false.
    pub fn load(path: &Path, required: bool) -> anyhow::Result<Self> {
        if !required && !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Every duration field must parse.
    fn validate(&self) -> anyhow::Result<()> {
        self.timings()?;
        self.trigger()?;
        self.rollout.rolling_delay()?;
        self.rollout.health_retry_delay()?;
        self.monitor.metrics_timeout()?;
        Ok(())
    }

    pub fn timings(&self) -> anyhow::Result<ExecutorTimings> {
        Ok(ExecutorTimings {
            blue_green_window: duration_field("rollout.blue_green_window", &self.rollout.blue_green_window)?,
            progressive_pause: duration_field("rollout.progressive_pause", &self.rollout.progressive_pause)?,
        })
    }

    pub fn trigger(&self) -> anyhow::Result<RollbackTrigger> {
        let m = &self.monitor;
        Ok(RollbackTrigger {
            error_rate_threshold: m.error_rate_threshold,
            latency_threshold: duration_field("monitor.latency_threshold", &m.latency_threshold)?,
            failed_requests_threshold: m.failed_requests_threshold,
            consecutive_failures: m.consecutive_failures,
            cpu_threshold: m.cpu_threshold,
            memory_threshold: m.memory_threshold,
            custom_thresholds: m.custom_thresholds.clone(),
            monitoring_window: duration_field("monitor.window", &m.window)?,
            poll_interval: duration_field("monitor.poll_interval", &m.poll_interval)?,
        })
    }

    /// The secret cipher, keyed from `secrets.key_file` or the `key_env`
    /// environment variable.
    pub fn cipher(&self) -> anyhow::Result<SecretCipher> {
        let encoded = match &self.secrets.key_file {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read secret key {}", path.display()))?,
            None => match std::env::var(&self.secrets.key_env) {
                Ok(key) => key,
                Err(_) => bail!(
                    "no secret key configured: set {} or secrets.key_file (generate one with `deckhand keygen`)",
                    self.secrets.key_env
                ),
            },
        };
        SecretCipher::from_base64(encoded.trim()).context("invalid secret key")
    }
}

// ── Storage ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    File,
    Redb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    pub root: PathBuf,
    pub history_root: PathBuf,
    pub redb_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::File,
            root: PathBuf::from("/var/lib/deckhand/environments"),
            history_root: PathBuf::from("/var/lib/deckhand/deployments"),
            redb_path: PathBuf::from("/var/lib/deckhand/deckhand.redb"),
        }
    }
}

// ── Secrets ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Environment variable holding the base64 key.
    pub key_env: String,
    /// File holding the base64 key. Takes precedence over `key_env`.
    pub key_file: Option<PathBuf>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            key_env: "DECKHAND_SECRET_KEY".to_string(),
            key_file: None,
        }
    }
}

// ── Rollout ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutSettings {
    /// Default wait between rolling batches.
    pub rolling_delay: String,
    pub blue_green_window: String,
    pub progressive_pause: String,
    /// Extra health probe attempts after a failure.
    pub health_retries: u32,
    pub health_retry_delay: String,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            rolling_delay: "30s".to_string(),
            blue_green_window: "30s".to_string(),
            progressive_pause: "30s".to_string(),
            health_retries: 2,
            health_retry_delay: "2s".to_string(),
        }
    }
}

impl RolloutSettings {
    pub fn rolling_delay(&self) -> anyhow::Result<Duration> {
        duration_field("rollout.rolling_delay", &self.rolling_delay)
    }

    pub fn health_retry_delay(&self) -> anyhow::Result<Duration> {
        duration_field("rollout.health_retry_delay", &self.health_retry_delay)
    }
}

// ── Monitor ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub poll_interval: String,
    pub window: String,
    /// Metrics endpoint; `{version}` is replaced with the version watched.
    pub metrics_url: Option<String>,
    pub metrics_timeout: String,
    pub error_rate_threshold: f64,
    pub latency_threshold: String,
    pub failed_requests_threshold: u64,
    pub consecutive_failures: u32,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub custom_thresholds: BTreeMap<String, f64>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        let trigger = RollbackTrigger::default();
        Self {
            poll_interval: "30s".to_string(),
            window: "5m".to_string(),
            metrics_url: None,
            metrics_timeout: "5s".to_string(),
            error_rate_threshold: trigger.error_rate_threshold,
            latency_threshold: "500ms".to_string(),
            failed_requests_threshold: trigger.failed_requests_threshold,
            consecutive_failures: trigger.consecutive_failures,
            cpu_threshold: trigger.cpu_threshold,
            memory_threshold: trigger.memory_threshold,
            custom_thresholds: BTreeMap::new(),
        }
    }
}

impl MonitorSettings {
    pub fn metrics_timeout(&self) -> anyhow::Result<Duration> {
        duration_field("monitor.metrics_timeout", &self.metrics_timeout)
    }
}

// ── Hooks ─────────────────────────────────────────────────────────

/// Shell commands that drive the real infrastructure.
///
/// Placeholders: `{project}`, `{environment}`, `{version}`, `{image}`,
/// `{replicas}`, `{scope}`, `{percent}`, `{from}`, `{to}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub shell: String,
    pub deploy: Option<String>,
    pub remove: Option<String>,
    pub traffic: Option<String>,
    /// Atomic cutover. Without it a switch is two `traffic` calls.
    pub switch: Option<String>,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            deploy: None,
            remove: None,
            traffic: None,
            switch: None,
        }
    }
}

/// Parse a duration string like "5s", "500ms", "5m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn duration_field(name: &str, value: &str) -> anyhow::Result<Duration> {
    parse_duration(value).with_context(|| format!("{name}: invalid duration {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let config = Config::parse(
            r#"
[storage]
backend = "redb"
redb_path = "/tmp/deckhand.redb"

[secrets]
key_env = "MY_KEY"

[rollout]
rolling_delay = "10s"
blue_green_window = "1m"
progressive_pause = "500ms"

[monitor]
poll_interval = "15s"
window = "2m"
metrics_url = "http://metrics.internal/versions/{version}"
error_rate_threshold = 0.02
custom_thresholds = { queue_depth = 1000.0 }

[hooks]
deploy = "kubectl set image deploy/app app={image}"
traffic = "ingressctl weight {version} {percent}"
"#,
        )
        .unwrap();

        assert_eq!(config.storage.backend, Backend::Redb);
        assert_eq!(config.storage.redb_path, PathBuf::from("/tmp/deckhand.redb"));
        assert_eq!(config.secrets.key_env, "MY_KEY");
        assert_eq!(config.rollout.rolling_delay().unwrap(), Duration::from_secs(10));
        assert_eq!(config.hooks.shell, "sh");
        assert!(config.hooks.remove.is_none());

        let timings = config.timings().unwrap();
        assert_eq!(timings.blue_green_window, Duration::from_secs(60));
        assert_eq!(timings.progressive_pause, Duration::from_millis(500));

        let trigger = config.trigger().unwrap();
        assert_eq!(trigger.poll_interval, Duration::from_secs(15));
        assert_eq!(trigger.checks(), 8);
        assert_eq!(trigger.error_rate_threshold, 0.02);
        assert_eq!(trigger.latency_threshold, Duration::from_millis(500));
        assert_eq!(trigger.custom_thresholds["queue_depth"], 1000.0);
    }

    #[test]
    fn empty_config_matches_trigger_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.trigger().unwrap(), RollbackTrigger::default());
        assert_eq!(config.timings().unwrap(), ExecutorTimings::default());
    }

    #[test]
    fn bad_duration_is_rejected_at_load() {
        let err = Config::parse("[monitor]\nwindow = \"soon\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("monitor.window"), "{err:#}");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(Config::parse("[storage]\nbackend = \"postgres\"\n").is_err());
    }

    #[test]
    fn missing_optional_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deckhand.toml");
        assert_eq!(Config::load(&path, false).unwrap(), Config::default());
        assert!(Config::load(&path, true).is_err());
    }

    #[test]
    fn cipher_reads_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("secret.key");
        std::fs::write(&key_path, format!("{}\n", SecretCipher::generate_key())).unwrap();

        let mut config = Config::default();
        config.secrets.key_file = Some(key_path);
        let cipher = config.cipher().unwrap();
        let sealed = cipher.encrypt("hunter2").unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "hunter2");
    }

    #[test]
    fn cipher_requires_a_key() {
        let mut config = Config::default();
        config.secrets.key_env = "DECKHAND_TEST_KEY_THAT_IS_NOT_SET".to_string();
        let err = config.cipher().unwrap_err();
        assert!(err.to_string().contains("DECKHAND_TEST_KEY_THAT_IS_NOT_SET"));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("fast"), None);
    }
}
