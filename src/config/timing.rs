//! Global timing configuration with compile-time defaults and runtime overrides
//!
//! Default values are compile-time constants; the agent configuration file or
//! the library user may override them once at startup.

use once_cell::sync::OnceCell;
use std::time::Duration;

// Compile-time defaults as public constants (in milliseconds)
/// Default slice length for the bounded wait on a probe socket
pub const DEFAULT_POLL_SLICE_MS: u64 = 100;
/// Default maximum idle wait between two scheduler due-checks
pub const DEFAULT_SCHEDULER_TICK_MS: u64 = 1000;

/// Runtime timing overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    /// Wait-for-response slice; cancellation is observed between slices
    pub poll_slice: Duration,
    /// Longest the scheduler sleeps before re-checking due tasks
    pub scheduler_tick: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_slice: Duration::from_millis(DEFAULT_POLL_SLICE_MS),
            scheduler_tick: Duration::from_millis(DEFAULT_SCHEDULER_TICK_MS),
        }
    }
}

// Runtime override storage - set once at program startup
static OVERRIDE_CONFIG: OnceCell<TimingConfig> = OnceCell::new();

/// Get the probe poll slice duration
pub fn poll_slice() -> Duration {
    OVERRIDE_CONFIG
        .get()
        .map(|c| c.poll_slice)
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_POLL_SLICE_MS))
}

/// Get the scheduler tick duration
pub fn scheduler_tick() -> Duration {
    OVERRIDE_CONFIG
        .get()
        .map(|c| c.scheduler_tick)
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_SCHEDULER_TICK_MS))
}

/// Set the global timing configuration
///
/// This should be called once at program startup if custom timing is needed.
/// Returns the rejected configuration if one has already been set.
pub fn set_config(config: TimingConfig) -> Result<(), TimingConfig> {
    OVERRIDE_CONFIG.set(config)
}

/// Check if custom timing configuration has been set
pub fn is_custom_config_set() -> bool {
    OVERRIDE_CONFIG.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_default_values() {
        if !is_custom_config_set() {
            assert_eq!(poll_slice(), Duration::from_millis(DEFAULT_POLL_SLICE_MS));
            assert_eq!(
                scheduler_tick(),
                Duration::from_millis(DEFAULT_SCHEDULER_TICK_MS)
            );
        } else {
            assert!(poll_slice() > Duration::ZERO);
            assert!(scheduler_tick() > Duration::ZERO);
        }
    }

    #[test]
    #[serial]
    fn test_set_config_only_once() {
        // OnceCell is global, so another test may have set it first
        let config = TimingConfig {
            poll_slice: Duration::from_millis(50),
            scheduler_tick: Duration::from_millis(500),
        };
        let _ = set_config(config.clone());
        assert!(is_custom_config_set());

        // A second attempt is always rejected and hands the value back
        let rejected = set_config(config.clone());
        assert_eq!(rejected, Err(config));
    }

    #[test]
    fn test_timing_config_values_reasonable() {
        assert!(DEFAULT_POLL_SLICE_MS > 0);
        assert!(DEFAULT_POLL_SLICE_MS <= 1000);
        assert!(DEFAULT_SCHEDULER_TICK_MS >= DEFAULT_POLL_SLICE_MS);
    }
}
