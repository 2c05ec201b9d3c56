//! Admission gate
//!
//! Tracks in-flight partition requests and memory pressure, decides whether a
//! new request may start, and answers the health/ready/live probes.
//!
//! ```text
//!   admit() ──► [shutting down?] ──► [memory low?] ──► [at limit?] ──► permit
//!                     │                   │                 │            │
//!                     └──────── 503 ◄─────┴─────────────────┘     drop: active--
//! ```

use std::sync::Arc;

use axum::http::StatusCode;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use super::memory::{MemoryPolicy, MemoryProbe, MemoryStatus};

/// Why a request was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("Service is currently unavailable due to low memory")]
    LowMemory,

    #[error("Server is under heavy load. Please try again later.")]
    ConcurrencyLimit { limit: usize },

    #[error("Service is shutting down")]
    ShuttingDown,

    /// Single-shot instance that already served its request
    #[error("Service is no longer accepting requests")]
    Retired,
}

impl AdmissionError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::SERVICE_UNAVAILABLE
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::LowMemory => "LOW_MEMORY",
            Self::ConcurrencyLimit { .. } => "CONCURRENCY_LIMIT",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Retired => "RETIRED",
        }
    }
}

/// Gate behaviour switches
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub policy: MemoryPolicy,
    /// Refresh the memory reading on every admission, not only on probes
    pub check_on_admit: bool,
    /// `None` means unlimited
    pub max_concurrent: Option<usize>,
    /// Report not-ready while any request is in flight
    pub strict_readiness: bool,
    /// Serve one request, then report not-live
    pub single_shot: bool,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            policy: MemoryPolicy::default(),
            check_on_admit: true,
            max_concurrent: None,
            strict_readiness: false,
            single_shot: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    ShuttingDown,
}

/// Body of `/healthcheck`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub active_requests: usize,
    pub memory: MemoryStatus,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[derive(Debug)]
struct GateState {
    active_requests: usize,
    memory: MemoryStatus,
    shutting_down: bool,
    completed: usize,
}

struct GateInner {
    settings: GateSettings,
    probe: Box<dyn MemoryProbe>,
    state: Mutex<GateState>,
}

/// Process-wide admission control, cheap to clone
#[derive(Clone)]
pub struct AdmissionGate {
    inner: Arc<GateInner>,
}

impl AdmissionGate {
    pub fn new(settings: GateSettings, probe: impl MemoryProbe + 'static) -> Self {
        Self {
            inner: Arc::new(GateInner {
                settings,
                probe: Box::new(probe),
                state: Mutex::new(GateState {
                    active_requests: 0,
                    memory: MemoryStatus::unknown(),
                    shutting_down: false,
                    completed: 0,
                }),
            }),
        }
    }

    /// Read memory now and record whether it is low
    pub fn check_memory(&self) -> MemoryStatus {
        // Read outside the lock; the probe may touch the filesystem
        let status = self.inner.settings.policy.evaluate(self.inner.probe.read());

        let mut state = self.inner.state.lock();
        if status.low != state.memory.low {
            tracing::warn!(
                low = status.low,
                usage_bytes = ?status.usage_bytes,
                limit_bytes = ?status.limit_bytes,
                "Memory pressure changed"
            );
        }
        state.memory = status;
        status
    }

    /// Try to start a request.
    ///
    /// On success the in-flight count is incremented and stays so until the
    /// returned permit is dropped. Rejections leave the count untouched.
    pub fn admit(&self) -> Result<AdmissionPermit, AdmissionError> {
        if self.inner.settings.check_on_admit {
            self.check_memory();
        }

        let mut state = self.inner.state.lock();
        let rejection = if state.shutting_down {
            Some(AdmissionError::ShuttingDown)
        } else if state.memory.low {
            Some(AdmissionError::LowMemory)
        } else if self.inner.settings.single_shot && state.completed > 0 {
            Some(AdmissionError::Retired)
        } else {
            self.inner
                .settings
                .max_concurrent
                .filter(|limit| state.active_requests >= *limit)
                .map(|limit| AdmissionError::ConcurrencyLimit { limit })
        };

        if let Some(err) = rejection {
            tracing::warn!(
                reason = err.reason(),
                active_requests = state.active_requests,
                "Request rejected"
            );
            return Err(err);
        }

        state.active_requests += 1;
        Ok(AdmissionPermit { gate: self.clone() })
    }

    fn release(&self) {
        let mut state = self.inner.state.lock();
        state.active_requests = state.active_requests.saturating_sub(1);
        state.completed += 1;
    }

    /// Health probe; refreshes the memory reading first
    pub fn health(&self) -> HealthReport {
        let memory = self.check_memory();
        let state = self.inner.state.lock();

        let (status, reason) = if state.shutting_down {
            (HealthStatus::ShuttingDown, Some("Service is shutting down"))
        } else if memory.low {
            (HealthStatus::Unhealthy, Some("Low memory"))
        } else {
            (HealthStatus::Healthy, None)
        };

        HealthReport {
            status,
            reason,
            active_requests: state.active_requests,
            memory,
        }
    }

    /// Whether new traffic should be routed here
    pub fn ready(&self) -> bool {
        let state = self.inner.state.lock();
        let settings = &self.inner.settings;

        if state.shutting_down || state.memory.low {
            return false;
        }
        if settings.strict_readiness && state.active_requests > 0 {
            return false;
        }
        !(settings.single_shot && state.completed > 0)
    }

    /// Whether the process is still worth keeping around
    pub fn live(&self) -> bool {
        let state = self.inner.state.lock();
        !(self.inner.settings.single_shot && state.completed > 0 && state.active_requests == 0)
    }

    pub fn active_requests(&self) -> usize {
        self.inner.state.lock().active_requests
    }

    /// Stop admitting; in-flight requests keep their permits
    pub fn begin_shutdown(&self) {
        let mut state = self.inner.state.lock();
        if !state.shutting_down {
            tracing::info!(active_requests = state.active_requests, "Admission closed for shutdown");
        }
        state.shutting_down = true;
    }
}

/// RAII guard for one admitted request; releases the slot on drop
pub struct AdmissionPermit {
    gate: AdmissionGate,
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit").finish_non_exhaustive()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
