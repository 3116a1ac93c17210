//! Resource samplers feeding the [`ResourceMonitor`](super::ResourceMonitor).
//!
//! [`ProcSampler`] reads host-wide figures from the Linux `/proc` files:
//!
//! - `/proc/stat`: first line `cpu  user nice system idle iowait irq softirq steal ...`
//!   (cumulative jiffies); CPU% is the busy share of the delta between two reads.
//! - `/proc/meminfo`: `MemTotal:` and `MemAvailable:` in kilobytes; memory% is
//!   `100 * (1 - available / total)`.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::{AppError, Result};

/// Upper bound on bytes read from one `/proc` file.
///
/// The figures sit in the first lines of both files; the cap keeps a
/// many-core `/proc/stat` from being read in full on every sample.
pub const MAX_PROC_READ_BYTES: u64 = 16 * 1024;

/// One CPU and memory reading, both in percent (`0.0..=100.0`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// Host CPU utilisation.
    pub cpu_percent: f32,
    /// Host memory utilisation.
    pub memory_percent: f32,
}

impl ResourceSample {
    /// Whether either reading is strictly above its threshold.
    #[must_use]
    pub fn exceeds(&self, cpu_threshold: f32, memory_threshold: f32) -> bool {
        self.cpu_percent > cpu_threshold || self.memory_percent > memory_threshold
    }
}

/// Source of [`ResourceSample`]s.
///
/// Implementations must be cheap enough to call on every dispatcher
/// iteration. [`sample`](Self::sample) may block briefly on file I/O; the
/// monitor always calls it from the blocking pool.
pub trait ResourceSampler: Send + Sync {
    /// Take a fresh reading.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Monitor` if the underlying figures cannot be read.
    fn sample(&self) -> Result<ResourceSample>;
}

/// Cumulative CPU counters from `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

/// Linux `/proc` sampler.
#[derive(Debug)]
pub struct ProcSampler {
    stat_path: PathBuf,
    meminfo_path: PathBuf,
    previous: Mutex<Option<CpuTimes>>,
}

impl Default for ProcSampler {
    fn default() -> Self {
        Self::with_paths("/proc/stat", "/proc/meminfo")
    }
}

impl ProcSampler {
    /// Sampler reading the live `/proc` files.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sampler reading alternative files with the `/proc` formats.
    #[must_use]
    pub fn with_paths(stat_path: impl Into<PathBuf>, meminfo_path: impl Into<PathBuf>) -> Self {
        Self {
            stat_path: stat_path.into(),
            meminfo_path: meminfo_path.into(),
            previous: Mutex::new(None),
        }
    }

    fn cpu_percent(&self) -> Result<f32> {
        let raw = read_bounded(&self.stat_path)?;
        let current = parse_cpu_times(&raw)?;

        let mut previous = self
            .previous
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Without a previous reading the delta covers the time since boot.
        let baseline = previous.unwrap_or(CpuTimes { busy: 0, total: 0 });
        *previous = Some(current);

        let total = current.total.saturating_sub(baseline.total);
        let busy = current.busy.saturating_sub(baseline.busy);
        if total == 0 {
            return Ok(0.0);
        }
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)] // jiffy deltas are far below 2^52
        let percent = (busy as f64 / total as f64 * 100.0) as f32;
        Ok(percent)
    }

    fn memory_percent(&self) -> Result<f32> {
        let raw = read_bounded(&self.meminfo_path)?;
        parse_memory_percent(&raw)
    }
}

impl ResourceSampler for ProcSampler {
    fn sample(&self) -> Result<ResourceSample> {
        Ok(ResourceSample {
            cpu_percent: self.cpu_percent()?,
            memory_percent: self.memory_percent()?,
        })
    }
}

/// Read at most [`MAX_PROC_READ_BYTES`] of `path`.
fn read_bounded(path: &Path) -> Result<String> {
    let failed = |err: std::io::Error| {
        AppError::Monitor(format!("failed to read {}: {err}", path.display()))
    };
    let file = File::open(path).map_err(failed)?;
    let mut content = String::with_capacity(4096);
    BufReader::new(file)
        .take(MAX_PROC_READ_BYTES)
        .read_to_string(&mut content)
        .map_err(failed)?;
    Ok(content)
}

fn parse_cpu_times(content: &str) -> Result<CpuTimes> {
    let line = content
        .lines()
        .find(|line| line.starts_with("cpu "))
        .ok_or_else(|| AppError::Monitor("aggregate cpu line missing from /proc/stat".into()))?;

    let fields = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|value| {
            value
                .parse::<u64>()
                .map_err(|err| AppError::Monitor(format!("invalid cpu counter {value:?}: {err}")))
        })
        .collect::<Result<Vec<u64>>>()?;

    if fields.len() < 4 {
        return Err(AppError::Monitor(format!(
            "expected at least 4 cpu counters, found {}",
            fields.len()
        )));
    }

    let total: u64 = fields.iter().sum();
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Ok(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

fn parse_memory_percent(content: &str) -> Result<f32> {
    let mut total = None;
    let mut available = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let key = parts.next();
        let value = parts.next().and_then(|v| v.parse::<u64>().ok());
        match key {
            Some("MemTotal:") => total = value,
            Some("MemAvailable:") => available = value,
            _ => {}
        }
    }

    let total = total.ok_or_else(|| AppError::Monitor("MemTotal missing from meminfo".into()))?;
    let available =
        available.ok_or_else(|| AppError::Monitor("MemAvailable missing from meminfo".into()))?;
    if total == 0 {
        return Err(AppError::Monitor("MemTotal is zero".into()));
    }

    #[allow(clippy::cast_precision_loss)] // kB figures are far below 2^52
    let used = 1.0 - available.min(total) as f64 / total as f64;
    #[allow(clippy::cast_possible_truncation)]
    let percent = (used * 100.0) as f32;
    Ok(percent)
}
