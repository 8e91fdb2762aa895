//! Shared application state for the HTTP server.

use std::sync::Arc;

use mender::core::patch::Patcher;
use mender::io::advisor::patcher_for_config;
use mender::io::config::RepairConfig;
use mender::io::executor::{CodeExecutor, SandboxExecutor};

/// Immutable services shared by every request handler.
///
/// Handlers never mutate this; each request owns its own session.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RepairConfig>,
    pub executor: Arc<dyn CodeExecutor + Send + Sync>,
    pub patcher: Arc<dyn Patcher + Send + Sync>,
}

impl AppState {
    pub fn from_config(config: RepairConfig) -> Self {
        let executor = SandboxExecutor::from_config(&config);
        let patcher = patcher_for_config(&config);
        Self {
            executor: Arc::new(executor),
            patcher: Arc::from(patcher),
            config: Arc::new(config),
        }
    }

    /// State with explicit services, for swapping in test doubles.
    #[cfg(test)]
    pub fn with_services(
        config: RepairConfig,
        executor: Arc<dyn CodeExecutor + Send + Sync>,
        patcher: Arc<dyn Patcher + Send + Sync>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            executor,
            patcher,
        }
    }
}
