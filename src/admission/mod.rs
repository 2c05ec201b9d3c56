//! Admission control
//!
//! Every partition request holds an [`AdmissionPermit`] for its whole
//! lifetime, including the time spent streaming a multipart response.

mod gate;
mod memory;

pub use gate::{AdmissionError, AdmissionGate, AdmissionPermit, GateSettings, HealthReport, HealthStatus};
pub use memory::{MemoryPolicy, MemoryProbe, MemoryReading, MemoryStatus, SystemMemoryProbe};

#[cfg(test)]
pub(crate) use memory::fixtures;
