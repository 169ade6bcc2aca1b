use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::SharedState;
use crate::concept_map::{
    coverage_report, longitudinal, ConceptMap, ConceptMapInput, ExpertConceptMap, MapEdit,
    Snapshot,
};
use crate::error::{McpError, McpResult, ValidationError};
use crate::session::ProfileAnswers;

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        // Session lifecycle
        "scaffold_create_session" => handle_create_session(state, arguments).await,
        "scaffold_submit_profile" => handle_submit_profile(state, arguments).await,
        "scaffold_start_round" => handle_start_round(state, arguments).await,
        // Map editing
        "scaffold_edit_map" => handle_edit_map(state, arguments).await,
        "scaffold_replace_map" => handle_replace_map(state, arguments).await,
        // Dialogue
        "scaffold_submit_utterance" => handle_submit_utterance(state, arguments).await,
        "scaffold_finish_round" => handle_finish_round(state, arguments).await,
        "scaffold_check_timer" => handle_check_timer(state, arguments).await,
        // Ending and export
        "scaffold_end_session" => handle_end_session(state, arguments).await,
        "scaffold_export_session" => handle_export_session(state, arguments).await,
        "scaffold_session_status" => handle_session_status(state, arguments).await,
        // Offline analysis
        "scaffold_coverage" => handle_coverage(state, arguments).await,
        "scaffold_progress" => handle_progress(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

// ============================================================================
// Tool parameters
// ============================================================================

/// Arguments of tools that only name a session.
#[derive(Debug, Deserialize)]
pub struct SessionParams {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionParams {
    pub participant_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub expert_map: Option<ExpertConceptMap>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitProfileParams {
    pub session_id: String,
    #[serde(flatten)]
    pub answers: ProfileAnswers,
}

#[derive(Debug, Deserialize)]
pub struct EditMapParams {
    pub session_id: String,
    pub edit: MapEdit,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceMapParams {
    pub session_id: String,
    pub map: ConceptMapInput,
}

#[derive(Debug, Deserialize)]
pub struct UtteranceParams {
    pub session_id: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct CoverageParams {
    pub map: ConceptMap,
    #[serde(default)]
    pub reference: Option<ExpertConceptMap>,
    #[serde(default)]
    pub previous: Option<ConceptMap>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressParams {
    pub snapshots: Vec<Snapshot>,
    #[serde(default)]
    pub reference: Option<ExpertConceptMap>,
}

// ============================================================================
// Session handlers
// ============================================================================

async fn handle_create_session(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "scaffold_create_session",
        arguments,
        |params: CreateSessionParams| async move {
            state
                .orchestrator
                .create_session(&params.participant_id, params.display_name, params.expert_map)
                .await
        },
    )
    .await
}

async fn handle_submit_profile(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "scaffold_submit_profile",
        arguments,
        |params: SubmitProfileParams| async move {
            state
                .orchestrator
                .submit_profile(&params.session_id, params.answers)
                .await
        },
    )
    .await
}

async fn handle_start_round(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "scaffold_start_round",
        arguments,
        |params: SessionParams| async move {
            state.orchestrator.start_round(&params.session_id).await
        },
    )
    .await
}

async fn handle_edit_map(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "scaffold_edit_map",
        arguments,
        |params: EditMapParams| async move {
            state
                .orchestrator
                .apply_edit(&params.session_id, params.edit)
                .await
        },
    )
    .await
}

async fn handle_replace_map(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "scaffold_replace_map",
        arguments,
        |params: ReplaceMapParams| async move {
            state
                .orchestrator
                .replace_snapshot(&params.session_id, params.map)
                .await
        },
    )
    .await
}

async fn handle_submit_utterance(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    execute_handler(
        "scaffold_submit_utterance",
        arguments,
        |params: UtteranceParams| async move {
            state
                .orchestrator
                .submit_utterance(&params.session_id, &params.text)
                .await
        },
    )
    .await
}

async fn handle_finish_round(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "scaffold_finish_round",
        arguments,
        |params: SessionParams| async move {
            state.orchestrator.finish_round(&params.session_id).await
        },
    )
    .await
}

async fn handle_check_timer(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "scaffold_check_timer",
        arguments,
        |params: SessionParams| async move {
            state.orchestrator.check_round_timer(&params.session_id).await
        },
    )
    .await
}

async fn handle_end_session(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "scaffold_end_session",
        arguments,
        |params: SessionParams| async move {
            state.orchestrator.end_session(&params.session_id).await
        },
    )
    .await
}

async fn handle_export_session(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "scaffold_export_session",
        arguments,
        |params: SessionParams| async move {
            state.orchestrator.export_session(&params.session_id).await
        },
    )
    .await
}

async fn handle_session_status(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "scaffold_session_status",
        arguments,
        |params: SessionParams| async move { state.orchestrator.status(&params.session_id).await },
    )
    .await
}

// ============================================================================
// Analysis handlers
// ============================================================================

async fn handle_coverage(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("scaffold_coverage", arguments, |params: CoverageParams| async move {
        let reference = resolve_reference(state, params.reference)?;
        let previous = params.previous.unwrap_or_default();
        coverage_report(&params.map, &previous, reference.map())
    })
    .await
}

async fn handle_progress(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("scaffold_progress", arguments, |params: ProgressParams| async move {
        let reference = params
            .reference
            .or_else(|| state.default_reference().cloned());
        longitudinal(&params.snapshots, reference.as_ref().map(ExpertConceptMap::map))
    })
    .await
}

/// Explicit reference first, then the server default.
fn resolve_reference(
    state: &SharedState,
    explicit: Option<ExpertConceptMap>,
) -> Result<ExpertConceptMap, ValidationError> {
    explicit
        .or_else(|| state.default_reference().cloned())
        .ok_or_else(|| {
            ValidationError::field("reference", "required when no default reference is configured")
        })
}

// ============================================================================
// Helper functions
// ============================================================================

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Parse typed parameters, run the operation and serialize its result.
/// Operation errors surface as `ExecutionFailed` with the original message.
async fn execute_handler<P, R, E, F, Fut>(
    tool_name: &str,
    arguments: Option<Value>,
    operation: F,
) -> McpResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    E: std::fmt::Display,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
{
    let params: P = parse_arguments(tool_name, arguments)?;

    let result = operation(params)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(result).map_err(McpError::Json)
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod handlers_tests;
