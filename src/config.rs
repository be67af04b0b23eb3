use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};
use anyhow::{Context, Result};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub log: Log,
}

/// Tunables for a single tracked peer. Every record gets its own copy, so
/// tests can shrink delays without touching any shared state.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// How long an outstanding request may go unanswered.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Minimum acceptable smoothed receive rate, bytes/sec.
    #[serde(default = "default_min_recv_rate")]
    pub min_recv_rate: i64,
    /// Rate estimator sample interval. 0 selects the estimator's own default.
    #[serde(default = "default_sample_rate_ms")]
    pub sample_rate_ms: u64,
    /// Rate estimator averaging window. 0 selects the estimator's own default.
    #[serde(default = "default_window_size_ms")]
    pub window_size_ms: u64,
}

impl PeerConfig {
    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_ms) }
    pub fn sample_rate(&self) -> Duration { Duration::from_millis(self.sample_rate_ms) }
    pub fn window_size(&self) -> Duration { Duration::from_millis(self.window_size_ms) }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            min_recv_rate: default_min_recv_rate(),
            sample_rate_ms: default_sample_rate_ms(),
            window_size_ms: default_window_size_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Metrics {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for Metrics {
    fn default() -> Self {
        Self { enabled: false, bind: default_bind() }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Log {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for Log {
    fn default() -> Self {
        Self { level: default_level() }
    }
}

fn default_timeout_ms() -> u64      { 15_000 }
// ~7.5 KB/s: a slow transatlantic link still clears this.
fn default_min_recv_rate() -> i64   { 7_680 }
fn default_sample_rate_ms() -> u64  { 1_000 }
fn default_window_size_ms() -> u64  { 40_000 }
fn default_bind() -> String         { "127.0.0.1:9101".into() }
fn default_level() -> String        { "info".into() }

/// Read the TOML file at `p` and deserialize into `Config`.
///
/// # Errors
/// * Returns an anyhow::Error if the file cannot be read or parsed.
pub fn load<P: AsRef<Path>>(p: P) -> Result<Config> {
    let text = fs::read_to_string(&p)
        .with_context(|| format!("couldn't read config file {}", p.as_ref().display()))?;
    load_from_str(&text)
}

pub fn load_from_str(text: &str) -> Result<Config> {
    toml::from_str(text)
        .with_context(|| "invalid TOML in config file".to_string())
}

/// Render `cfg` back to TOML, used by `default-config`.
pub fn to_toml(cfg: &Config) -> Result<String> {
    toml::to_string_pretty(cfg).context("failed to serialize config")
}
