// ── Supervisor ──
//
// Service surface around a single live `Armer`: start, forced reset,
// configuration enquiry, reload and shutdown.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::armer::Armer;
use crate::config::ArmerConfig;
use crate::error::CoreError;
use crate::health::HealthSnapshot;
use crate::host::HostPorts;
use crate::model::ChangeSource;

/// Result string of a reset that changed nothing.
pub const NO_CHANGE: &str = "NO_CHANGE";

/// Produces a fresh configuration on start and on every reload.
pub type ConfigLoader = Arc<dyn Fn() -> Result<ArmerConfig, CoreError> + Send + Sync>;

pub struct Supervisor {
    ports: HostPorts,
    loader: ConfigLoader,
    current: Mutex<Option<Armer>>,
}

impl Supervisor {
    pub fn new(ports: HostPorts, loader: ConfigLoader) -> Self {
        Self {
            ports,
            loader,
            current: Mutex::new(None),
        }
    }

    /// Supervisor whose loader always yields `config`.
    pub fn with_config(ports: HostPorts, config: ArmerConfig) -> Self {
        Self::new(ports, Arc::new(move || Ok(config.clone())))
    }

    /// Load the configuration and bring an engine up. Starting twice is a
    /// no-op that reports the running engine's health.
    pub async fn start(&self) -> Result<HealthSnapshot, CoreError> {
        let mut current = self.current.lock().await;
        if let Some(armer) = current.as_ref() {
            return Ok(armer.health());
        }
        let armer = Armer::new((self.loader)()?, self.ports.clone());
        let health = armer.initialize().await?;
        *current = Some(armer);
        Ok(health)
    }

    pub async fn armer(&self) -> Option<Armer> {
        self.current.lock().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Force a reconciliation as an explicit action. Returns the resulting
    /// state, or [`NO_CHANGE`].
    pub async fn reset_state(&self) -> Result<String, CoreError> {
        let armer = self.armer().await.ok_or(CoreError::NotRunning)?;
        let intervention = armer.record_intervention(ChangeSource::Action, None).await;
        let result = armer
            .reset_armed_state(Some(intervention), ChangeSource::Action)
            .await;
        info!(result = ?result, "reset requested");
        Ok(result.map_or_else(|| NO_CHANGE.to_owned(), |s| s.to_string()))
    }

    /// Effective configuration of the running engine.
    pub async fn enquire_configuration(&self) -> Result<Value, CoreError> {
        let armer = self.armer().await.ok_or(CoreError::NotRunning)?;
        serde_json::to_value(armer.config()).map_err(|e| CoreError::Internal(e.to_string()))
    }

    /// Replace the running engine with one built from freshly loaded
    /// configuration. A configuration that fails to load leaves the
    /// current engine running.
    pub async fn reload(&self) -> Result<HealthSnapshot, CoreError> {
        let config = (self.loader)().inspect_err(|e| {
            warn!(error = %e, "reload aborted, configuration invalid");
        })?;
        let mut current = self.current.lock().await;
        if let Some(old) = current.take() {
            old.shutdown().await;
        }
        let armer = Armer::new(config, self.ports.clone());
        let health = armer.initialize().await?;
        *current = Some(armer);
        info!("autoarm reloaded");
        Ok(health)
    }

    pub async fn shutdown(&self) {
        if let Some(armer) = self.current.lock().await.take() {
            armer.shutdown().await;
        }
    }
}
