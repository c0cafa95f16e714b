use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{PerTier, Priority};
use crate::error::LabelqError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub scheduler: SchedulerConfig,
    pub renderer: RendererConfig,
    pub storage: StorageConfig,
}

/// Static scheduler settings, loaded once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Concurrent in-flight renderer calls allowed per tier
    pub slots: PerTier<usize>,
    /// Minimum gap between the starts of any two renderer calls
    pub min_time_between_calls_ms: u64,
    /// Total attempts per job, including the first
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub estimated_seconds_per_job: u64,
    /// Wall-clock limit for a single renderer call
    pub call_timeout_ms: u64,
    /// Admission limit per tier queue
    pub max_queued: PerTier<usize>,
    /// How long terminal jobs stay queryable
    pub retention_secs: u64,
    pub prune_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slots: PerTier::new(2, 1),
            min_time_between_calls_ms: 1000,
            max_retries: 3,
            base_delay_ms: 2000,
            max_delay_ms: 30000,
            estimated_seconds_per_job: 2,
            call_timeout_ms: 30000,
            max_queued: PerTier::new(1000, 200),
            retention_secs: 3600,
            prune_interval_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn min_time_between_calls(&self) -> Duration {
        Duration::from_millis(self.min_time_between_calls_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs.max(1))
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        for priority in Priority::ALL {
            if *self.slots.get(priority) == 0 {
                return Err(LabelqError::InvalidConfig(format!(
                    "slots.{} must be at least 1",
                    priority
                )));
            }
            if *self.max_queued.get(priority) == 0 {
                return Err(LabelqError::InvalidConfig(format!(
                    "max_queued.{} must be at least 1",
                    priority
                )));
            }
        }
        if self.max_retries == 0 {
            return Err(LabelqError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(LabelqError::InvalidConfig(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(LabelqError::InvalidConfig(
                "call_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Output format requested from the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Pdf,
}

impl OutputFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Pdf => "application/pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Pdf => "pdf",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub base_url: String,
    /// Print density in dots per millimetre
    pub dpmm: u32,
    pub format: OutputFormat,
    pub timeout_ms: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            base_url: "http://api.labelary.com/v1/printers".to_string(),
            dpmm: 8,
            format: OutputFormat::Png,
            timeout_ms: 30000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the JSONL job store; in-memory when unset
    pub jsonl_dir: Option<PathBuf>,
    /// Re-queue unfinished jobs found in the store at startup
    pub recover_on_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            scheduler: SchedulerConfig::default(),
            renderer: RendererConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Startup checks; any error here is fatal.
    pub fn validate(&self) -> crate::error::Result<()> {
        self.scheduler.validate()?;
        if self.renderer.dpmm == 0 {
            return Err(LabelqError::InvalidConfig("renderer.dpmm must be at least 1".to_string()));
        }
        Ok(())
    }
}
