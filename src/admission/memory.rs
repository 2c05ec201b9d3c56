//! Memory pressure probing
//!
//! Reads the container's cgroup accounting (v1, then v2) and falls back to
//! host-wide figures from sysinfo when no cgroup files are mounted.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sysinfo::System;

const MB: u64 = 1024 * 1024;

/// cgroup v1 reports "no limit" as a page-aligned i64::MAX
const UNLIMITED_SENTINEL: u64 = 1 << 60;

/// Raw usage/limit pair, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReading {
    pub usage_bytes: u64,
    pub limit_bytes: Option<u64>,
}

/// Source of memory readings
pub trait MemoryProbe: Send + Sync {
    /// `None` when nothing could be read at all
    fn read(&self) -> Option<MemoryReading>;
}

/// When memory counts as low
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemoryPolicy {
    /// Low when `usage >= fraction * limit`
    Threshold(f64),
    /// Low when `limit - usage` drops below a floor
    FreeMinimum { bytes: u64 },
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self::Threshold(0.8)
    }
}

impl MemoryPolicy {
    pub fn free_minimum_mb(mb: u64) -> Self {
        Self::FreeMinimum { bytes: mb.saturating_mul(MB) }
    }

    /// Classify a reading. Missing figures are treated as enough memory.
    pub fn evaluate(&self, reading: Option<MemoryReading>) -> MemoryStatus {
        let Some(reading) = reading else {
            return MemoryStatus::unknown();
        };
        let Some(limit) = reading.limit_bytes else {
            return MemoryStatus {
                usage_bytes: Some(reading.usage_bytes),
                limit_bytes: None,
                low: false,
            };
        };

        let usage = reading.usage_bytes;
        let low = match *self {
            Self::Threshold(fraction) => usage as f64 >= fraction * limit as f64,
            Self::FreeMinimum { bytes } => limit.saturating_sub(usage) < bytes,
        };

        MemoryStatus {
            usage_bytes: Some(usage),
            limit_bytes: Some(limit),
            low,
        }
    }
}

/// Result of a memory check, as reported by `/healthcheck`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryStatus {
    pub usage_bytes: Option<u64>,
    pub limit_bytes: Option<u64>,
    pub low: bool,
}

impl MemoryStatus {
    pub fn unknown() -> Self {
        Self {
            usage_bytes: None,
            limit_bytes: None,
            low: false,
        }
    }
}

// ============================================================================
// System probe
// ============================================================================

/// Probe backed by `/sys/fs/cgroup` and sysinfo
#[derive(Debug, Clone)]
pub struct SystemMemoryProbe {
    cgroup_root: PathBuf,
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new("/sys/fs/cgroup")
    }
}

impl SystemMemoryProbe {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
        }
    }

    /// cgroup figures only; `limit_bytes` is `None` when unlimited
    pub fn read_cgroup(&self) -> Option<MemoryReading> {
        let v1 = self.cgroup_root.join("memory");
        if let Some(usage) = read_bytes(&v1.join("memory.usage_in_bytes")) {
            let limit = read_bytes(&v1.join("memory.limit_in_bytes")).filter(|l| *l < UNLIMITED_SENTINEL);
            return Some(MemoryReading {
                usage_bytes: usage,
                limit_bytes: limit,
            });
        }

        let usage = read_bytes(&self.cgroup_root.join("memory.current"))?;
        // "max" fails to parse and means unlimited
        let limit = read_bytes(&self.cgroup_root.join("memory.max"));
        Some(MemoryReading {
            usage_bytes: usage,
            limit_bytes: limit,
        })
    }

    fn read_host() -> Option<MemoryReading> {
        let mut sys = System::new();
        sys.refresh_memory();

        let total = sys.total_memory();
        if total == 0 {
            return None;
        }
        Some(MemoryReading {
            usage_bytes: total.saturating_sub(sys.available_memory()),
            limit_bytes: Some(total),
        })
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn read(&self) -> Option<MemoryReading> {
        match self.read_cgroup() {
            // An unlimited cgroup is bounded by the host
            Some(reading) if reading.limit_bytes.is_none() => Some(MemoryReading {
                usage_bytes: reading.usage_bytes,
                limit_bytes: Self::read_host().and_then(|host| host.limit_bytes),
            }),
            Some(reading) => Some(reading),
            None => Self::read_host(),
        }
    }
}

fn read_bytes(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}
