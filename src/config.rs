//! Runtime configuration.
//!
//! The configuration surface is an explicit record with defaults rather
//! than a free-form map. Hosts that speak in dynamic option bags go through
//! `Config::from_value`, which enumerates the recognized keys and fails any
//! unknown key or out-of-range value with `InvalidArgument`.

use serde::{Deserialize, Serialize};

use crate::error::TaskletError;

/// Default per-job timeout: disabled.
const DEFAULT_TIMEOUT_MS: u64 = 0;

/// Default critical memory threshold percent.
const DEFAULT_MAX_MEMORY_PERCENT: u8 = 90;

/// Idle timeouts seeded by the workload hint, in milliseconds.
const IDLE_TIMEOUT_CPU_MS: u64 = 10_000;
const IDLE_TIMEOUT_IO_MS: u64 = 2_000;
const IDLE_TIMEOUT_MIXED_MS: u64 = 5_000;

/// Worker-count setting: a fixed count or the host CPU count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerCount {
    /// Resolve to the number of logical CPU cores at startup.
    Auto,
    /// A fixed positive number of workers.
    Fixed(usize),
}

impl WorkerCount {
    /// Resolves to a concrete worker count.
    pub fn resolve(&self) -> usize {
        match self {
            WorkerCount::Auto => num_cpus::get().max(1),
            WorkerCount::Fixed(n) => *n,
        }
    }
}

/// Coarse workload hint used to seed the idle timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadHint {
    /// CPU-bound jobs; keep idle workers around longer.
    Cpu,
    /// IO-bound jobs; release idle workers quickly.
    Io,
    /// A mix of both.
    Mixed,
}

impl WorkloadHint {
    /// The idle timeout this hint seeds, in milliseconds.
    pub fn idle_timeout_ms(&self) -> u64 {
        match self {
            WorkloadHint::Cpu => IDLE_TIMEOUT_CPU_MS,
            WorkloadHint::Io => IDLE_TIMEOUT_IO_MS,
            WorkloadHint::Mixed => IDLE_TIMEOUT_MIXED_MS,
        }
    }

    fn parse(s: &str) -> Result<Self, TaskletError> {
        match s {
            "cpu" => Ok(WorkloadHint::Cpu),
            "io" => Ok(WorkloadHint::Io),
            "mixed" => Ok(WorkloadHint::Mixed),
            other => Err(TaskletError::InvalidArgument(format!(
                "workload must be one of \"cpu\", \"io\", \"mixed\", got \"{other}\""
            ))),
        }
    }
}

/// Logging verbosity, mapped onto the tracing level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// The `tracing` filter directive for this level, if logging is on.
    pub fn as_filter(&self) -> Option<&'static str> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some("error"),
            LogLevel::Warn => Some("warn"),
            LogLevel::Info => Some("info"),
            LogLevel::Debug => Some("debug"),
            LogLevel::Trace => Some("trace"),
        }
    }

    fn parse(s: &str) -> Result<Self, TaskletError> {
        match s {
            "off" => Ok(LogLevel::Off),
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(TaskletError::InvalidArgument(format!(
                "logging must be one of \"off\", \"error\", \"warn\", \"info\", \"debug\", \"trace\", got \"{other}\""
            ))),
        }
    }
}

/// Runtime configuration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Worker count, fixed or resolved from the host CPU count.
    pub workers: WorkerCount,
    /// Lower bound the adaptive controller may not scale below.
    pub min_workers: usize,
    /// How long an idle worker lingers before the pool may retire it.
    pub idle_timeout_ms: u64,
    /// Workload hint; seeds `idle_timeout_ms` when that field is not given.
    pub workload: Option<WorkloadHint>,
    /// Enables the adaptive controller's apply path.
    pub adaptive: bool,
    /// Default per-job timeout in milliseconds (0 = none).
    pub timeout_ms: u64,
    /// Critical memory threshold percent in [1, 99]; submissions fail with
    /// `MemoryPressure` above it.
    pub max_memory_percent: u8,
    /// Logging verbosity.
    pub logging: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: WorkerCount::Auto,
            min_workers: 1,
            idle_timeout_ms: IDLE_TIMEOUT_MIXED_MS,
            workload: None,
            adaptive: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_memory_percent: DEFAULT_MAX_MEMORY_PERCENT,
            logging: LogLevel::Info,
        }
    }
}

impl Config {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a fixed worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = WorkerCount::Fixed(workers);
        self
    }

    /// Resolves the worker count from the host CPU count.
    pub fn with_auto_workers(mut self) -> Self {
        self.workers = WorkerCount::Auto;
        self
    }

    /// Sets the minimum worker count.
    pub fn with_min_workers(mut self, min_workers: usize) -> Self {
        self.min_workers = min_workers;
        self
    }

    /// Sets the workload hint and seeds the idle timeout from it.
    pub fn with_workload(mut self, workload: WorkloadHint) -> Self {
        self.workload = Some(workload);
        self.idle_timeout_ms = workload.idle_timeout_ms();
        self
    }

    /// Enables or disables the adaptive apply path.
    pub fn with_adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    /// Sets the default per-job timeout in milliseconds (0 = none).
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets the critical memory threshold percent.
    pub fn with_max_memory_percent(mut self, percent: u8) -> Self {
        self.max_memory_percent = percent;
        self
    }

    /// Sets the logging verbosity.
    pub fn with_logging(mut self, logging: LogLevel) -> Self {
        self.logging = logging;
        self
    }

    /// Validates bounds. Called by the runtime before wiring components.
    pub fn validate(&self) -> Result<(), TaskletError> {
        if let WorkerCount::Fixed(n) = self.workers {
            if n == 0 {
                return Err(TaskletError::InvalidArgument(
                    "workers must be >= 1".to_string(),
                ));
            }
        }
        if self.min_workers == 0 {
            return Err(TaskletError::InvalidArgument(
                "min_workers must be >= 1".to_string(),
            ));
        }
        if let WorkerCount::Fixed(n) = self.workers {
            if n < self.min_workers {
                return Err(TaskletError::InvalidArgument(format!(
                    "workers ({}) must be >= min_workers ({})",
                    n, self.min_workers
                )));
            }
        }
        if !(1..=99).contains(&self.max_memory_percent) {
            return Err(TaskletError::InvalidArgument(format!(
                "max_memory_percent must be in [1, 99], got {}",
                self.max_memory_percent
            )));
        }
        Ok(())
    }

    /// Parses a dynamic option bag.
    ///
    /// Recognized keys are exactly: `workers`, `min_workers`,
    /// `idle_timeout_ms`, `workload`, `adaptive`, `timeout_ms`,
    /// `max_memory_percent`, `logging`. Any other key fails with
    /// `InvalidArgument`.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, TaskletError> {
        let map = value.as_object().ok_or_else(|| {
            TaskletError::InvalidArgument("configuration must be an object".to_string())
        })?;

        let mut config = Config::default();
        let mut idle_timeout_given = false;

        for (key, val) in map {
            match key.as_str() {
                "workers" => {
                    config.workers = match val {
                        serde_json::Value::String(s) if s == "auto" => WorkerCount::Auto,
                        _ => WorkerCount::Fixed(parse_positive(key, val)?),
                    };
                }
                "min_workers" => config.min_workers = parse_positive(key, val)?,
                "idle_timeout_ms" => {
                    config.idle_timeout_ms = parse_non_negative(key, val)?;
                    idle_timeout_given = true;
                }
                "workload" => {
                    let s = val.as_str().ok_or_else(|| {
                        TaskletError::InvalidArgument("workload must be a string".to_string())
                    })?;
                    config.workload = Some(WorkloadHint::parse(s)?);
                }
                "adaptive" => {
                    config.adaptive = val.as_bool().ok_or_else(|| {
                        TaskletError::InvalidArgument("adaptive must be a boolean".to_string())
                    })?;
                }
                "timeout_ms" => config.timeout_ms = parse_non_negative(key, val)?,
                "max_memory_percent" => {
                    let n = parse_positive(key, val)?;
                    config.max_memory_percent = u8::try_from(n).map_err(|_| {
                        TaskletError::InvalidArgument(format!(
                            "max_memory_percent must be in [1, 99], got {n}"
                        ))
                    })?;
                }
                "logging" => {
                    let s = val.as_str().ok_or_else(|| {
                        TaskletError::InvalidArgument("logging must be a string".to_string())
                    })?;
                    config.logging = LogLevel::parse(s)?;
                }
                unknown => {
                    return Err(TaskletError::InvalidArgument(format!(
                        "unknown configuration key \"{unknown}\""
                    )));
                }
            }
        }

        // The workload hint seeds the idle timeout only when the caller did
        // not set one explicitly.
        if let (Some(hint), false) = (config.workload, idle_timeout_given) {
            config.idle_timeout_ms = hint.idle_timeout_ms();
        }

        config.validate()?;
        Ok(config)
    }

    /// Resolves the configured worker count to a concrete number.
    pub fn resolved_workers(&self) -> usize {
        self.workers.resolve().max(self.min_workers)
    }
}

fn parse_positive(key: &str, val: &serde_json::Value) -> Result<usize, TaskletError> {
    let n = val.as_u64().ok_or_else(|| {
        TaskletError::InvalidArgument(format!("{key} must be a positive integer"))
    })?;
    if n == 0 {
        return Err(TaskletError::InvalidArgument(format!(
            "{key} must be >= 1"
        )));
    }
    usize::try_from(n)
        .map_err(|_| TaskletError::InvalidArgument(format!("{key} is out of range")))
}

fn parse_non_negative(key: &str, val: &serde_json::Value) -> Result<u64, TaskletError> {
    val.as_u64().ok_or_else(|| {
        TaskletError::InvalidArgument(format!("{key} must be a non-negative integer"))
    })
}
