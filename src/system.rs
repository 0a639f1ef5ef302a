//! Host system introspection.
//!
//! Wraps a shared `sysinfo::System` behind a mutex so the memory-pressure
//! policy and the adaptive sampler read from one consistently refreshed
//! source. CPU utilization needs two refreshes separated by an interval;
//! the sampler's 1 s cadence provides that naturally.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{ProcessesToUpdate, System};

/// Static and point-in-time host figures exposed through the facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    /// RFC 3339 wall-clock timestamp of the snapshot.
    pub timestamp: String,
    /// CPU brand string of the first core.
    pub cpu_model: String,
    /// Number of logical CPU cores.
    pub cpu_cores: usize,
    /// Operating system name.
    pub os: String,
    /// Target architecture.
    pub arch: String,
    /// Total physical memory in bytes.
    pub total_memory_bytes: u64,
    /// Used physical memory in bytes.
    pub used_memory_bytes: u64,
    /// Resident memory of this process in bytes, if resolvable.
    pub process_memory_bytes: Option<u64>,
}

/// Shared sampler over the host system.
pub struct SystemMonitor {
    sys: Mutex<System>,
}

impl SystemMonitor {
    /// Creates a monitor with a fully initialized system handle.
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new_all()),
        }
    }

    /// Refreshes CPU and memory counters. Called by the sampler cadence.
    pub fn refresh(&self) {
        let mut sys = self.sys.lock();
        sys.refresh_cpu_all();
        sys.refresh_memory();
    }

    /// Global CPU utilization percent across all cores, in [0, 100].
    ///
    /// Meaningful only after two `refresh` calls separated by an interval.
    pub fn cpu_percent(&self) -> f64 {
        let sys = self.sys.lock();
        f64::from(sys.global_cpu_usage()).clamp(0.0, 100.0)
    }

    /// System memory usage percent, in [0, 100].
    pub fn memory_percent(&self) -> f64 {
        let sys = self.sys.lock();
        let total = sys.total_memory();
        if total == 0 {
            return 0.0;
        }
        (sys.used_memory() as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Resident memory of the current process in bytes.
    pub fn process_memory_bytes(&self) -> Option<u64> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut sys = self.sys.lock();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid).map(|p| p.memory())
    }

    /// Number of logical CPU cores on the host.
    pub fn cpu_count(&self) -> usize {
        num_cpus::get()
    }

    /// Collects a full snapshot for the facade's `system_info` surface.
    pub fn snapshot(&self) -> SystemInfo {
        let process_memory_bytes = self.process_memory_bytes();
        let sys = self.sys.lock();
        let cpu_model = sys
            .cpus()
            .first()
            .map(|cpu| cpu.brand())
            .unwrap_or("Unknown")
            .to_string();

        SystemInfo {
            timestamp: chrono::Utc::now().to_rfc3339(),
            cpu_model,
            cpu_cores: sys.cpus().len(),
            os: System::name().unwrap_or_else(|| "Unknown".to_string()),
            arch: std::env::consts::ARCH.to_string(),
            total_memory_bytes: sys.total_memory(),
            used_memory_bytes: sys.used_memory(),
            process_memory_bytes,
        }
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}
