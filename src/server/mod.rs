//! MCP server: JSON-RPC over stdio, tool routing and the state shared by
//! every handler.

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use tracing::info;

use crate::concept_map::ExpertConceptMap;
use crate::config::Config;
use crate::llm::Generator;
use crate::session::Orchestrator;
use crate::storage::Storage;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Session engine owning every live session.
    pub orchestrator: Arc<Orchestrator>,
    /// Persistence for exported records and generation logs.
    pub storage: Arc<dyn Storage>,
}

impl AppState {
    /// Wire the orchestrator to its backend and storage.
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        generator: Arc<dyn Generator>,
        reference: Option<ExpertConceptMap>,
    ) -> Self {
        info!(
            policy = %config.session.sequence_policy,
            max_exchanges = config.session.max_exchanges,
            round_time_limit_secs = config.session.round_time_limit_secs,
            has_reference = reference.is_some(),
            "AppState initializing"
        );

        let mut orchestrator = Orchestrator::new(
            config.session.clone(),
            config.zpd.clone(),
            generator,
            Arc::clone(&storage),
        );
        if let Some(reference) = reference {
            orchestrator = orchestrator.with_reference(reference);
        }

        Self {
            config,
            orchestrator: Arc::new(orchestrator),
            storage,
        }
    }

    /// Reference map configured for the whole server, if any.
    pub fn default_reference(&self) -> Option<&ExpertConceptMap> {
        self.orchestrator.default_reference()
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept_map::{Concept, ConceptMap, Relationship};
    use crate::config::{
        DatabaseConfig, LlmConfig, LogFormat, LoggingConfig, RequestConfig, SessionConfig,
        ZpdConfig,
    };
    use crate::llm::DisabledGenerator;
    use crate::storage::SqliteStorage;
    use std::path::PathBuf;

    fn create_test_config() -> Config {
        Config {
            llm: LlmConfig::default(),
            request: RequestConfig::default(),
            database: DatabaseConfig {
                path: PathBuf::from(":memory:"),
                max_connections: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            session: SessionConfig::default(),
            zpd: ZpdConfig::default(),
            expert_map_path: None,
        }
    }

    fn reference() -> ExpertConceptMap {
        let map = ConceptMap::from_parts(
            0,
            vec![
                Concept {
                    id: "ref-demand".to_string(),
                    label: "Demand".to_string(),
                },
                Concept {
                    id: "ref-price".to_string(),
                    label: "Price".to_string(),
                },
            ],
            vec![Relationship {
                id: "ref-edge-1".to_string(),
                source: "ref-demand".to_string(),
                target: "ref-price".to_string(),
                label: "raises".to_string(),
            }],
        )
        .unwrap();
        ExpertConceptMap::new(map).unwrap()
    }

    async fn create_state(reference: Option<ExpertConceptMap>) -> AppState {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        AppState::new(
            create_test_config(),
            Arc::new(storage),
            Arc::new(DisabledGenerator::default()),
            reference,
        )
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let state = create_state(None).await;
        assert_eq!(state.config.database.max_connections, 5);
        assert!(state.default_reference().is_none());
    }

    #[tokio::test]
    async fn test_app_state_with_reference() {
        let state = create_state(Some(reference())).await;
        let default = state.default_reference().unwrap();
        assert_eq!(default.map().concept_count(), 2);
    }

    #[tokio::test]
    async fn test_shared_state_type() {
        let shared: SharedState = Arc::new(create_state(None).await);

        let shared2 = Arc::clone(&shared);
        assert_eq!(Arc::strong_count(&shared), 2);
        drop(shared2);
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[tokio::test]
    async fn test_app_state_clone_shares_orchestrator() {
        let state1 = create_state(None).await;
        let state2 = state1.clone();

        let status = state1
            .orchestrator
            .create_session("p-01", None, None)
            .await
            .unwrap();
        assert!(state2.orchestrator.status(&status.session_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_app_state_storage_access() {
        let state = create_state(None).await;
        let records = state.storage.list_session_records(10).await.unwrap();
        assert!(records.is_empty());
    }
}
