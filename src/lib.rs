//! # BeaconMind Assessment
//!
//! A conversational mental-health assessment engine. Patients chat in free
//! text; each message is classified against the current question of a
//! clinical questionnaire (PHQ-9, GAD-7, ASQ, monitoring), the session moves
//! through that questionnaire's question graph, and completed phases are
//! scored by a Langbase pipe and stored with a severity label.
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → McpServer (stdio) → SessionPipeline → Langbase Pipes (HTTP)
//!                                        ↓
//!                                  SQLite (sessions, messages, scores)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use beaconmind_assessment::{Config, AppState, McpServer};
//! use beaconmind_assessment::langbase::LangbaseClient;
//! use beaconmind_assessment::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let langbase = LangbaseClient::new(&config.langbase, config.request.clone())?;
//!     let state = AppState::new(config, Arc::new(storage), Arc::new(langbase))?;
//!     McpServer::new(Arc::new(state)).run().await?;
//!     Ok(())
//! }
//! ```

/// Questionnaires, question graphs and score aggregation.
pub mod assessment;
/// Operator subcommands.
pub mod cli;
/// Configuration management.
pub mod config;
/// Conversation history queries and transcript rendering.
pub mod conversation;
/// Error types and result aliases for the application.
pub mod error;
/// Langbase API client and types for pipe communication.
pub mod langbase;
/// Classification, composition and scoring calls to the language model.
pub mod oracle;
/// Per-turn orchestration and session lifecycle.
pub mod pipeline;
/// System prompts and prompt templates for Langbase pipes.
pub mod prompts;
/// MCP server implementation and request handling.
pub mod server;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
