//! Agent configuration
//!
//! The optional TOML file tunes the scheduler, probe timing, the network clock
//! correction and logging. Every key has a default, so an empty file (or no
//! file at all) is a valid configuration.

pub mod timing;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub use timing::TimingConfig;

/// Top-level agent configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Probe settings
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Network clock settings
    #[serde(default)]
    pub clock: ClockConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[scheduler]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Longest idle wait between due-checks, in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Number of tasks allowed to run at the same time
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Results kept per task report before the oldest are dropped
    #[serde(default = "default_results_per_task")]
    pub results_per_task: usize,
}

/// `[probe]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProbeConfig {
    /// Wait-for-response slice, in milliseconds
    #[serde(default = "default_poll_slice_ms")]
    pub poll_slice_ms: u64,
}

/// `[clock]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClockConfig {
    /// Correction added to the local clock, in milliseconds
    #[serde(default)]
    pub offset_ms: i64,
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default log level when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_tick_ms() -> u64 {
    timing::DEFAULT_SCHEDULER_TICK_MS
}

fn default_max_concurrent_tasks() -> usize {
    4
}

fn default_results_per_task() -> usize {
    100
}

fn default_poll_slice_ms() -> u64 {
    timing::DEFAULT_POLL_SLICE_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            results_per_task: default_results_per_task(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            poll_slice_ms: default_poll_slice_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AgentConfig {
    /// Load the configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::from_toml(&contents)
    }

    /// Parse the configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AgentConfig =
            toml::from_str(contents).with_context(|| "Failed to parse config file")?;

        if config.scheduler.max_concurrent_tasks == 0 {
            anyhow::bail!("scheduler.max_concurrent_tasks must be at least 1");
        }
        if config.probe.poll_slice_ms == 0 {
            anyhow::bail!("probe.poll_slice_ms must be greater than 0");
        }

        Ok(config)
    }

    /// Timing overrides derived from this configuration
    pub fn timing(&self) -> TimingConfig {
        TimingConfig {
            poll_slice: Duration::from_millis(self.probe.poll_slice_ms),
            scheduler_tick: Duration::from_millis(self.scheduler.tick_ms.max(1)),
        }
    }
}
