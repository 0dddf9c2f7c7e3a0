use std::sync::Arc;

use anyhow::Result;
use flume::Sender;

use crate::config::CompanionConfig;
use crate::persistence::{PersistenceGateway, SqliteStore, SupabaseStore};
use crate::responder::{LlmResponder, Responder};
use crate::session::{CompanionEngine, CompanionEvent};

pub struct BackendRuntime {
    pub config: CompanionConfig,
    pub engine: Arc<CompanionEngine>,
}

pub struct BackendRuntimeBuilder {
    config: CompanionConfig,
    event_tx: Sender<CompanionEvent>,
    gateway: Option<PersistenceGateway>,
    responder: Option<Arc<dyn Responder>>,
}

impl BackendRuntimeBuilder {
    pub fn new(config: CompanionConfig, event_tx: Sender<CompanionEvent>) -> Self {
        Self {
            config,
            event_tx,
            gateway: None,
            responder: None,
        }
    }

    /// Uses `gateway` instead of the one derived from the config.
    pub fn with_gateway(mut self, gateway: PersistenceGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn build(self) -> Result<BackendRuntime> {
        let config = self.config;
        let gateway = match self.gateway {
            Some(gateway) => gateway,
            None => build_gateway(&config),
        };
        let responder = match self.responder {
            Some(responder) => Some(responder),
            None => build_responder(&config)?,
        };

        tracing::info!(
            "Companion runtime ready (persistence: {}, mode: {}, responder: {})",
            gateway.backend_name(),
            config.default_processing_mode.as_db_str(),
            if responder.is_some() { "configured" } else { "none" }
        );

        let engine = Arc::new(
            CompanionEngine::new(config.clone(), gateway)
                .with_responder(responder)
                .with_events(self.event_tx),
        );

        Ok(BackendRuntime { config, engine })
    }
}

impl BackendRuntime {
    pub fn bootstrap(config: CompanionConfig, event_tx: Sender<CompanionEvent>) -> Result<Self> {
        BackendRuntimeBuilder::new(config, event_tx).build()
    }
}

/// Supabase when credentials are configured, else the local SQLite file. A
/// store that cannot be opened leaves the companion running without memory.
fn build_gateway(config: &CompanionConfig) -> PersistenceGateway {
    let timeout = config.persistence_timeout();

    if let Some((url, key)) = config.supabase_credentials() {
        match SupabaseStore::new(url, key, timeout) {
            Ok(store) => return PersistenceGateway::new(Arc::new(store), timeout),
            Err(e) => tracing::warn!("Failed to create Supabase client, trying SQLite: {}", e),
        }
    }

    match SqliteStore::new(&config.database_path) {
        Ok(store) => PersistenceGateway::new(Arc::new(store), timeout),
        Err(e) => {
            tracing::warn!(
                "Failed to open database {}: {}. Conversations will not be saved.",
                config.database_path,
                e
            );
            PersistenceGateway::unavailable()
        }
    }
}

fn build_responder(config: &CompanionConfig) -> Result<Option<Arc<dyn Responder>>> {
    let Some(url) = config.llm_api_url.as_deref().filter(|u| !u.trim().is_empty()) else {
        return Ok(None);
    };
    tracing::info!("Grounded responder enabled: {} ({})", url, config.llm_model);
    let responder = LlmResponder::new(
        url.to_string(),
        config.llm_api_key.clone().unwrap_or_default(),
        config.llm_model.clone(),
        config.responder_timeout(),
    )?;
    Ok(Some(Arc::new(responder)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_database_is_used_without_supabase_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let config = CompanionConfig {
            database_path: dir.path().join("memory.db").to_string_lossy().to_string(),
            ..CompanionConfig::default()
        };
        let gateway = build_gateway(&config);
        assert!(gateway.is_available());
        assert_eq!(gateway.backend_name(), "sqlite");
    }

    #[test]
    fn unopenable_database_degrades_to_no_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let config = CompanionConfig {
            database_path: dir
                .path()
                .join("missing")
                .join("nested")
                .join("memory.db")
                .to_string_lossy()
                .to_string(),
            ..CompanionConfig::default()
        };
        assert!(!build_gateway(&config).is_available());
    }

    #[test]
    fn responder_is_only_built_when_a_url_is_set() {
        let config = CompanionConfig::default();
        assert!(build_responder(&config).unwrap().is_none());

        let config = CompanionConfig {
            llm_api_url: Some("http://localhost:11434/v1/".to_string()),
            ..CompanionConfig::default()
        };
        assert!(build_responder(&config).unwrap().is_some());
    }
}
