//! Application state management

use std::sync::Arc;

use crate::admission::{AdmissionGate, SystemMemoryProbe};
use crate::config::Config;
use crate::dispatch::{ChunkBackend, FanOutDispatcher, LocalBackend, PageSplitter, RemoteBackend, SplitError};
use crate::engine::{HttpPartitionEngine, PartitionEngine, PartitionError};
use crate::orchestrator::RequestOrchestrator;

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to initialize partition client: {0}")]
    Client(#[from] PartitionError),

    #[error("Invalid parallel mode settings: {0}")]
    Splitter(#[from] SplitError),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    gate: AdmissionGate,
    orchestrator: Arc<RequestOrchestrator>,
}

impl AppState {
    /// Build the engine client, the optional fan-out dispatcher and the
    /// admission gate from configuration
    pub fn new(config: Config) -> Result<Self, StateError> {
        let engine: Arc<dyn PartitionEngine> =
            Arc::new(HttpPartitionEngine::new(&config.engine.url, config.engine.timeout)?);

        let dispatcher = if config.parallel.enabled {
            let backend: Arc<dyn ChunkBackend> = match &config.parallel.url {
                Some(url) => Arc::new(RemoteBackend::new(url, config.engine.timeout)?),
                None => Arc::new(LocalBackend::new(engine.clone())),
            };
            let dispatcher = FanOutDispatcher::new(
                engine.clone(),
                backend,
                PageSplitter::new(config.parallel.split_size)?,
                config.parallel.retry_policy(),
                config.parallel.threads,
            );
            tracing::info!(
                backend = dispatcher.backend_name(),
                split_size = config.parallel.split_size,
                threads = config.parallel.threads,
                "Parallel mode enabled"
            );
            Some(dispatcher)
        } else {
            None
        };

        let orchestrator = RequestOrchestrator::new(
            engine,
            dispatcher,
            config.server.allowed_mimetypes.clone(),
            config.server.max_upload_bytes,
        );
        let gate = AdmissionGate::new(config.admission.gate_settings(), SystemMemoryProbe::default());

        Ok(Self::from_parts(config, gate, orchestrator))
    }

    /// Assemble state from already-built collaborators
    pub fn from_parts(config: Config, gate: AdmissionGate, orchestrator: RequestOrchestrator) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                gate,
                orchestrator: Arc::new(orchestrator),
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the admission gate
    pub fn gate(&self) -> &AdmissionGate {
        &self.inner.gate
    }

    /// Get the request orchestrator
    pub fn orchestrator(&self) -> &Arc<RequestOrchestrator> {
        &self.inner.orchestrator
    }
}
