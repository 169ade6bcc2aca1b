//! # MCP Concept Scaffolding
//!
//! A Model Context Protocol (MCP) server that runs scaffolded concept-mapping
//! sessions. A learner builds a concept map over a baseline round and one
//! round per scaffolding type; in each scaffolded round an agent responds to
//! the learner's messages, adapting its intensity to a running ZPD estimate.
//!
//! ## Components
//!
//! - **Session engine**: phase state machine, round bookkeeping, export
//! - **Agent sequencer**: fixed or randomized order of scaffolding types
//! - **Response classifier**: lexical pattern tagging and gibberish checks
//! - **Template selector**: deterministic prompt choice by context fit
//! - **ZPD estimator**: background scoring and per-round smoothing
//! - **Concept map analysis**: diffs, coverage and longitudinal growth
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → MCP Server (stdio) → Orchestrator → Generative backend (HTTP)
//!                                         ↓
//!                                   SQLite (exports)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_concept_scaffolding::{AppState, Config, McpServer};
//! use mcp_concept_scaffolding::llm::generator_from_config;
//! use mcp_concept_scaffolding::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let generator = generator_from_config(&config.llm, config.request.clone());
//!     let state = Arc::new(AppState::new(config, Arc::new(storage), generator, None));
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

/// Scaffolding types, agents and the round sequencer.
pub mod agents;
/// Learner utterance classification.
pub mod classifier;
/// Command-line entry points.
pub mod cli;
/// Concept map model, diffing and coverage.
pub mod concept_map;
/// Configuration loaded from the environment.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Generative backend client.
pub mod llm;
/// Agent system prompts and fixed texts.
pub mod prompts;
/// MCP server implementation and request handling.
pub mod server;
/// Session state machine and orchestration.
pub mod session;
/// Persistence of exported sessions.
pub mod storage;
/// Prompt template library and selection.
pub mod templates;
/// Zone-of-proximal-development estimation.
pub mod zpd;

pub use concept_map::{ConceptMap, ExpertConceptMap, MapEdit};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
pub use session::Orchestrator;
