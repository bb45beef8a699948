use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use shipcast_core::score::ScoreWeights;
use shipcast_core::Platform;
use shipcast_dispatch::{DispatchConfig, JitterWindow};
use shipcast_pipeline::{AmplifyConfig, RunMode, SelectorConfig};

/// Top-level configuration, loaded from `~/.config/shipcast/config.yaml`.
/// Every field has a default, so a missing file or an empty mapping is a
/// valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default pipeline mode: test, confirm, or auto.
    #[serde(default = "d_mode")]
    pub mode: String,
    #[serde(default = "d_platform")]
    pub platform: Platform,
    /// Registered visual templates.
    #[serde(default = "d_templates")]
    pub templates: Vec<String>,
    /// Learning store directory. Unset → the platform data dir.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub entropy: EntropyConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub scoring: ScoreWeights,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub amplify: AmplifyConfig,
    #[serde(default)]
    pub dispatch: DispatchTuning,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

fn d_mode() -> String {
    "confirm".into()
}
fn d_platform() -> Platform {
    Platform::Twitter
}
fn d_templates() -> Vec<String> {
    vec!["carbon-x".into(), "bento-metrics".into()]
}

impl Default for AppConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("empty mapping parses with defaults")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Command line of the browser driver sidecar.
    #[serde(default = "d_driver_cmd")]
    pub driver_cmd: Vec<String>,
    /// Named browser profile holding the authenticated login.
    #[serde(default = "d_profile")]
    pub profile: String,
    #[serde(default = "d_command_timeout")]
    pub command_timeout_secs: u64,
}

fn d_driver_cmd() -> Vec<String> {
    vec!["shipcast-driver".into()]
}
fn d_profile() -> String {
    "default".into()
}
fn d_command_timeout() -> u64 {
    30
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            driver_cmd: d_driver_cmd(),
            profile: d_profile(),
            command_timeout_secs: d_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntropyConfig {
    #[serde(default = "d_randomize")]
    pub randomize_timing: bool,
    #[serde(default = "d_min_wait")]
    pub min_wait_seconds: f64,
    #[serde(default = "d_max_wait")]
    pub max_wait_seconds: f64,
}

fn d_randomize() -> bool {
    true
}
fn d_min_wait() -> f64 {
    8.4
}
fn d_max_wait() -> f64 {
    22.1
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            randomize_timing: d_randomize(),
            min_wait_seconds: d_min_wait(),
            max_wait_seconds: d_max_wait(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Score assumed for untried (template, hook, bucket) slots.
    #[serde(default = "d_neutral_prior")]
    pub neutral_prior: f64,
}

fn d_neutral_prior() -> f64 {
    1.0
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            neutral_prior: d_neutral_prior(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchTuning {
    #[serde(default = "d_submit_attempts")]
    pub max_submit_attempts: u32,
    #[serde(default = "d_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "d_step_timeout")]
    pub step_timeout_secs: u64,
}

fn d_submit_attempts() -> u32 {
    3
}
fn d_backoff_base() -> u64 {
    2_000
}
fn d_step_timeout() -> u64 {
    30
}

impl Default for DispatchTuning {
    fn default() -> Self {
        Self {
            max_submit_attempts: d_submit_attempts(),
            backoff_base_ms: d_backoff_base(),
            step_timeout_secs: d_step_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "d_bind")]
    pub bind: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default)]
    pub secret: Option<String>,
}

fn d_bind() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8080
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind: d_bind(),
            port: d_port(),
            secret: None,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shipcast")
            .join("config.yaml")
    }

    /// Load from `path` (or the default location). A missing file is the
    /// default configuration, not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn run_mode(&self) -> Result<RunMode> {
        self.mode.parse()
    }

    pub fn store_dir(&self) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(shipcast_store::paths::store_root)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.store_dir().join("artifacts")
    }

    /// Jitter window from the entropy settings. With randomization off the
    /// wait collapses to a fixed ten seconds.
    pub fn jitter(&self) -> JitterWindow {
        if !self.entropy.randomize_timing {
            return JitterWindow::fixed(10_000);
        }
        JitterWindow::new(
            (self.entropy.min_wait_seconds * 1000.0) as u64,
            (self.entropy.max_wait_seconds * 1000.0) as u64,
        )
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            jitter: self.jitter(),
            max_submit_attempts: self.dispatch.max_submit_attempts,
            backoff_base_ms: self.dispatch.backoff_base_ms,
            step_timeout: Duration::from_secs(self.dispatch.step_timeout_secs),
        }
    }
}
