//! Workload and complexity classification.
//!
//! Classification reads a trailing window of samples plus the per-tick job
//! arrival counts. Threshold values are tunables; the shapes (which metric
//! feeds which pattern) are the contract.

use serde::{Deserialize, Serialize};

use super::sample::MetricsSample;

/// CPU mean above which a workload counts as CPU-heavy.
const CPU_HEAVY_PERCENT: f64 = 70.0;
/// CPU mean below which long executions indicate IO waiting.
const CPU_LIGHT_PERCENT: f64 = 40.0;
/// Memory mean below which CPU-heavy classification applies.
const MEM_LIGHT_PERCENT: f64 = 40.0;
/// Memory mean above which the workload is memory-bound.
const MEM_HEAVY_PERCENT: f64 = 70.0;
/// Execution mean (ms) above which jobs are presumed IO-bound.
const IO_EXECUTION_MS: f64 = 100.0;
/// Arrival variance over mean above which traffic is bursty.
const BURST_VARIANCE_RATIO: f64 = 2.0;
/// Arrival variance over mean below which traffic is steady.
const STEADY_VARIANCE_RATIO: f64 = 0.5;
/// CPU band treated as steady utilization.
const STEADY_CPU_LOW: f64 = 30.0;
const STEADY_CPU_HIGH: f64 = 70.0;

/// The controller's classification of recent traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadPattern {
    /// High CPU, low memory: scale to the core count.
    CpuIntensive,
    /// Long executions at low CPU: jobs wait on IO.
    IoIntensive,
    /// Memory-bound: fewer workers, tighter cleanup.
    MemoryIntensive,
    /// No dominant signal.
    Mixed,
    /// Highly variable arrival rate.
    Burst,
    /// Stable arrival rate at moderate CPU.
    Steady,
}

impl std::fmt::Display for WorkloadPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            WorkloadPattern::CpuIntensive => "cpu-intensive",
            WorkloadPattern::IoIntensive => "io-intensive",
            WorkloadPattern::MemoryIntensive => "memory-intensive",
            WorkloadPattern::Mixed => "mixed",
            WorkloadPattern::Burst => "burst",
            WorkloadPattern::Steady => "steady",
        };
        write!(f, "{tag}")
    }
}

/// Per-job cost class derived from execution duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobComplexity {
    /// Under 1 ms.
    Trivial,
    /// 1 to 10 ms.
    Simple,
    /// 10 to 100 ms.
    Moderate,
    /// 100 to 1000 ms.
    Complex,
    /// 1000 ms and beyond.
    Heavy,
}

impl JobComplexity {
    /// Classifies an execution duration in milliseconds.
    pub fn from_execution_ms(execution_ms: f64) -> Self {
        if execution_ms < 1.0 {
            JobComplexity::Trivial
        } else if execution_ms < 10.0 {
            JobComplexity::Simple
        } else if execution_ms < 100.0 {
            JobComplexity::Moderate
        } else if execution_ms < 1000.0 {
            JobComplexity::Complex
        } else {
            JobComplexity::Heavy
        }
    }
}

/// Sensitivity of the controller: how large and how confident a change must
/// be before the scale flags are raised, and how much safety margin the
/// timeout recommendation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Change rarely, with wide margins.
    Conservative,
    /// The default.
    Moderate,
    /// Change eagerly, with tight margins.
    Aggressive,
}

impl Strategy {
    /// Relative worker-count delta required to raise a scale flag.
    pub fn scale_threshold(&self) -> f64 {
        match self {
            Strategy::Conservative => 0.25,
            Strategy::Moderate => 0.15,
            Strategy::Aggressive => 0.05,
        }
    }

    /// Multiplier applied to the p95 execution time for the recommended
    /// timeout.
    pub fn timeout_safety_factor(&self) -> f64 {
        match self {
            Strategy::Conservative => 2.0,
            Strategy::Moderate => 1.5,
            Strategy::Aggressive => 1.2,
        }
    }

    /// Worker multiple of the host core count for IO-bound workloads.
    pub fn io_worker_multiplier(&self) -> usize {
        match self {
            Strategy::Conservative => 2,
            Strategy::Moderate => 3,
            Strategy::Aggressive => 4,
        }
    }
}

/// Mean of a slice; 0 when empty.
pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance of a slice; 0 when empty.
pub(crate) fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

/// The `p` percentile (0..=100) of the values, by nearest-rank.
pub(crate) fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Classifies the workload over a trailing window of samples.
///
/// `arrival_counts` holds jobs-per-tick figures aligned with the window.
pub fn classify_pattern(window: &[MetricsSample], arrival_counts: &[f64]) -> WorkloadPattern {
    if window.is_empty() {
        return WorkloadPattern::Mixed;
    }

    let cpu_mean = mean(&window.iter().map(|s| s.cpu_utilization).collect::<Vec<_>>());
    let mem_mean = mean(
        &window
            .iter()
            .map(|s| s.memory_usage_percent)
            .collect::<Vec<_>>(),
    );
    let exec_mean = mean(
        &window
            .iter()
            .map(|s| s.avg_execution_time_ms)
            .collect::<Vec<_>>(),
    );
    let arrival_mean = mean(arrival_counts);
    let arrival_var = variance(arrival_counts);

    if cpu_mean > CPU_HEAVY_PERCENT && mem_mean < MEM_LIGHT_PERCENT {
        WorkloadPattern::CpuIntensive
    } else if exec_mean > IO_EXECUTION_MS && cpu_mean < CPU_LIGHT_PERCENT {
        WorkloadPattern::IoIntensive
    } else if mem_mean > MEM_HEAVY_PERCENT {
        WorkloadPattern::MemoryIntensive
    } else if arrival_mean > 0.0 && arrival_var > BURST_VARIANCE_RATIO * arrival_mean {
        WorkloadPattern::Burst
    } else if arrival_mean > 0.0
        && arrival_var < STEADY_VARIANCE_RATIO * arrival_mean
        && (STEADY_CPU_LOW..=STEADY_CPU_HIGH).contains(&cpu_mean)
    {
        WorkloadPattern::Steady
    } else {
        WorkloadPattern::Mixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f64, mem: f64, exec_ms: f64) -> MetricsSample {
        MetricsSample {
            cpu_utilization: cpu,
            memory_usage_percent: mem,
            avg_execution_time_ms: exec_ms,
            ..Default::default()
        }
    }

    #[test]
    fn test_complexity_thresholds() {
        assert_eq!(JobComplexity::from_execution_ms(0.5), JobComplexity::Trivial);
        assert_eq!(JobComplexity::from_execution_ms(1.0), JobComplexity::Simple);
        assert_eq!(JobComplexity::from_execution_ms(9.9), JobComplexity::Simple);
        assert_eq!(
            JobComplexity::from_execution_ms(50.0),
            JobComplexity::Moderate
        );
        assert_eq!(
            JobComplexity::from_execution_ms(500.0),
            JobComplexity::Complex
        );
        assert_eq!(
            JobComplexity::from_execution_ms(1000.0),
            JobComplexity::Heavy
        );
    }

    #[test]
    fn test_cpu_intensive_classification() {
        let window: Vec<_> = (0..8).map(|_| sample(85.0, 20.0, 5.0)).collect();
        assert_eq!(
            classify_pattern(&window, &[1.0; 8]),
            WorkloadPattern::CpuIntensive
        );
    }

    #[test]
    fn test_io_intensive_classification() {
        let window: Vec<_> = (0..8).map(|_| sample(15.0, 30.0, 250.0)).collect();
        assert_eq!(
            classify_pattern(&window, &[1.0; 8]),
            WorkloadPattern::IoIntensive
        );
    }

    #[test]
    fn test_memory_intensive_classification() {
        let window: Vec<_> = (0..8).map(|_| sample(50.0, 85.0, 5.0)).collect();
        assert_eq!(
            classify_pattern(&window, &[1.0; 8]),
            WorkloadPattern::MemoryIntensive
        );
    }

    #[test]
    fn test_burst_classification() {
        let window: Vec<_> = (0..6).map(|_| sample(20.0, 30.0, 5.0)).collect();
        // Highly variable arrivals: variance well above 2x mean.
        let arrivals = [0.0, 40.0, 0.0, 0.0, 45.0, 0.0];
        assert_eq!(classify_pattern(&window, &arrivals), WorkloadPattern::Burst);
    }

    #[test]
    fn test_steady_classification() {
        let window: Vec<_> = (0..6).map(|_| sample(50.0, 30.0, 5.0)).collect();
        let arrivals = [10.0, 10.0, 10.0, 10.0, 10.0, 10.0];
        assert_eq!(
            classify_pattern(&window, &arrivals),
            WorkloadPattern::Steady
        );
    }

    #[test]
    fn test_empty_window_is_mixed() {
        assert_eq!(classify_pattern(&[], &[]), WorkloadPattern::Mixed);
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let values = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&values, 50.0), 30.0);
        assert_eq!(percentile(&values, 95.0), 50.0);
        assert_eq!(percentile(&values, 100.0), 50.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn test_mean_and_variance() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[2.0, 4.0]), 3.0);
        assert_eq!(variance(&[5.0, 5.0, 5.0]), 0.0);
        assert!(variance(&[0.0, 10.0]) > 0.0);
    }

    #[test]
    fn test_strategy_knobs() {
        assert!(Strategy::Conservative.scale_threshold() > Strategy::Aggressive.scale_threshold());
        assert!(
            Strategy::Conservative.timeout_safety_factor()
                > Strategy::Aggressive.timeout_safety_factor()
        );
        assert_eq!(Strategy::Moderate.io_worker_multiplier(), 3);
    }
}
