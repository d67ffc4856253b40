//! Server configuration.
//!
//! Configuration is read from TOML at `$FORMRELAY_CONFIG`, falling back to
//! `~/.config/formrelay/server.toml`. A missing file means defaults.
//! `FORMRELAY_HOST` and `FORMRELAY_PORT` override the listen address.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use formrelay_job::{JobDefaults, RetryPolicy, Timeouts};
use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "FORMRELAY_CONFIG";
const HOST_ENV: &str = "FORMRELAY_HOST";
const PORT_ENV: &str = "FORMRELAY_PORT";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Listen address.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Applied to jobs whose request carries no rate limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_bytes_per_second: Option<f64>,

    /// Extra attempts at opening a download (transport errors and 5xx only).
    #[serde(default)]
    pub download_retries: u32,

    /// Base delay for exponential download backoff.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Wait for a download's response headers.
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,

    /// Deadline for the whole callback POST.
    #[serde(default = "default_callback_timeout_secs")]
    pub callback_timeout_secs: u64,

    /// How long shutdown waits for cancelled jobs to post their callbacks.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Log process memory usage periodically.
    #[serde(default = "default_true")]
    pub telemetry_enabled: bool,

    #[serde(default = "default_telemetry_interval_secs")]
    pub telemetry_interval_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    3000
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_response_timeout_secs() -> u64 {
    60
}

fn default_callback_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_telemetry_interval_secs() -> u64 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            rate_limit_bytes_per_second: None,
            download_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            response_timeout_secs: default_response_timeout_secs(),
            callback_timeout_secs: default_callback_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            telemetry_enabled: default_true(),
            telemetry_interval_secs: default_telemetry_interval_secs(),
        }
    }
}

impl Config {
    /// Loads configuration from the default location and the environment.
    pub fn load() -> anyhow::Result<Self> {
        let lookup = |key: &str| std::env::var(key).ok();
        let mut config = Self::load_from(&config_path(lookup))?;
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`, or returns defaults if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Applies `FORMRELAY_HOST` / `FORMRELAY_PORT` overrides.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(host) = lookup(HOST_ENV) {
            self.host = host;
        }
        if let Some(port) = lookup(PORT_ENV) {
            self.port = port
                .parse()
                .with_context(|| format!("{PORT_ENV} is not a valid port: {port}"))?;
        }
        Ok(())
    }

    /// Rejects values that would make every job fail.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(rate) = self.rate_limit_bytes_per_second {
            anyhow::ensure!(
                rate.is_finite() && rate >= 1.0,
                "rate_limit_bytes_per_second must be at least 1, got {rate}"
            );
        }
        for (key, secs) in [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("response_timeout_secs", self.response_timeout_secs),
            ("callback_timeout_secs", self.callback_timeout_secs),
        ] {
            anyhow::ensure!(secs > 0, "{key} must be at least 1");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            response: Duration::from_secs(self.response_timeout_secs),
            callback: Duration::from_secs(self.callback_timeout_secs),
        }
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_interval_secs)
    }

    pub fn job_defaults(&self) -> JobDefaults {
        JobDefaults {
            rate_limit_bytes_per_second: self.rate_limit_bytes_per_second,
            retry: RetryPolicy {
                max_retries: self.download_retries,
                backoff: Duration::from_millis(self.retry_backoff_ms),
            },
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}

/// Returns the configuration file path.
fn config_path(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = lookup(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let home = lookup("HOME").unwrap_or_else(|| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("formrelay")
        .join("server.toml")
}
