//! Server module for the assessment tools.
//!
//! This module provides:
//! - JSON-RPC 2.0 server over stdio
//! - Tool call handlers and routing
//! - Shared application state

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::assessment::PhaseRegistry;
use crate::config::Config;
use crate::conversation::ConversationStore;
use crate::error::AppResult;
use crate::oracle::{OracleClient, PipeRunner, PipeTable};
use crate::pipeline::{PipelineSettings, SessionPipeline};
use crate::storage::Storage;

/// Application state shared across handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Storage backend.
    pub storage: Arc<dyn Storage>,
    /// Phase catalogue and sequence.
    pub registry: Arc<PhaseRegistry>,
    /// History queries for the read tools.
    pub conversations: ConversationStore,
    /// Turn orchestrator.
    pub pipeline: SessionPipeline,
}

impl AppState {
    /// Wire up the pipeline from configuration.
    ///
    /// Fails if the phase sequence names an unknown phase or a pipe is missing.
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        runner: Arc<dyn PipeRunner>,
    ) -> AppResult<Self> {
        let registry = Arc::new(PhaseRegistry::with_sequence(&config.chat.phase_sequence)?);
        let pipes = PipeTable::from_config(&config.pipes)?;

        tracing::info!(
            sequence = ?registry.sequence(),
            classify_pipe = %config.pipes.classify,
            score_pipe = %config.pipes.score,
            compose_pipe = %config.pipes.compose,
            session_timeout_minutes = config.chat.session_timeout_minutes,
            "AppState initializing"
        );

        let pipeline = SessionPipeline::new(
            storage.clone(),
            registry.clone(),
            OracleClient::new(runner, pipes),
            PipelineSettings::from(&config.chat),
        );

        Ok(Self {
            conversations: ConversationStore::new(storage.clone()),
            config,
            storage,
            registry,
            pipeline,
        })
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ChatConfig, DatabaseConfig, LangbaseConfig, LogFormat, LoggingConfig, PipeConfig,
        RequestConfig,
    };
    use crate::error::AppError;
    use crate::oracle::MockPipeRunner;
    use crate::storage::SqliteStorage;
    use std::path::PathBuf;

    fn create_test_config() -> Config {
        Config {
            langbase: LangbaseConfig {
                api_key: "test-key".to_string(),
                base_url: "https://api.langbase.com".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from(":memory:"),
                max_connections: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            request: RequestConfig::default(),
            pipes: PipeConfig::default(),
            chat: ChatConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let storage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let state = AppState::new(
            create_test_config(),
            storage,
            Arc::new(MockPipeRunner::new()),
        )
        .unwrap();

        assert_eq!(state.config.langbase.api_key, "test-key");
        assert_eq!(state.registry.sequence().len(), 3);
        assert_eq!(state.pipeline.registry().first(), "assessment.phq9");
    }

    #[tokio::test]
    async fn test_app_state_rejects_unknown_phase() {
        let mut config = create_test_config();
        config.chat.phase_sequence = vec!["assessment.phq9".to_string(), "bogus".to_string()];

        let storage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let result = AppState::new(config, storage, Arc::new(MockPipeRunner::new()));
        assert!(matches!(result, Err(AppError::Graph(_))));
    }

    #[tokio::test]
    async fn test_app_state_rejects_blank_pipe() {
        let mut config = create_test_config();
        config.pipes.score = String::new();

        let storage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let result = AppState::new(config, storage, Arc::new(MockPipeRunner::new()));
        assert!(result.is_err());
    }
}
