//! Round-trip time statistics

use serde::{Deserialize, Serialize};

/// Summary of RTT samples in microseconds
///
/// Timed-out probes are not samples. With no samples every field is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RttStatistics {
    /// Smallest sample
    pub min: u64,
    /// Largest sample
    pub max: u64,
    /// Arithmetic mean
    pub avg: f64,
    /// Population standard deviation
    pub stdev: f64,
    /// Number of samples
    pub count: usize,
}

impl RttStatistics {
    /// Compute the statistics of `samples`
    pub fn from_samples(samples: &[u64]) -> Self {
        let (Some(&min), Some(&max)) = (samples.iter().min(), samples.iter().max()) else {
            return Self::default();
        };

        let n = samples.len() as f64;
        let avg = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
        let variance = samples
            .iter()
            .map(|&s| {
                let d = s as f64 - avg;
                d * d
            })
            .sum::<f64>()
            / n;

        Self {
            min,
            max,
            avg,
            stdev: variance.sqrt(),
            count: samples.len(),
        }
    }
}
