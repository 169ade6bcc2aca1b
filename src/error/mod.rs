use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("State violation: {0}")]
    State(#[from] StateViolation),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Export failed for session {session_id} after {attempts} attempts: {message}")]
    Export {
        session_id: String,
        attempts: u32,
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Malformed input rejected at the boundary before it reaches session state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} - {reason}")]
    Field { field: String, reason: String },

    #[error("duplicate concept id '{id}'")]
    DuplicateConcept { id: String },

    #[error("duplicate relationship id '{id}'")]
    DuplicateRelationship { id: String },

    #[error("unknown concept '{id}'")]
    UnknownConcept { id: String },

    #[error("unknown relationship '{id}'")]
    UnknownRelationship { id: String },

    #[error("relationship '{relationship}' references missing concept '{concept}'")]
    DanglingEndpoint {
        relationship: String,
        concept: String,
    },

    #[error("reference map has no {what}")]
    EmptyReference { what: String },

    #[error("snapshot drops {count} element(s) present at round start, first: '{first}'")]
    SnapshotDropsElements { count: usize, first: String },
}

impl ValidationError {
    /// Shorthand for a field-level validation failure.
    pub fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::Field {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Requests that are well-formed but not allowed in the current session state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateViolation {
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("operation '{operation}' not allowed in phase {phase}")]
    InvalidPhase { operation: String, phase: String },

    #[error("round {round} has no learner turn yet")]
    NoLearnerTurn { round: usize },

    #[error("round index {index} is beyond the agent sequence (length {len})")]
    SequenceOutOfRange { index: usize, len: usize },

    #[error("a learner turn is already being processed for session {session_id}")]
    TurnInFlight { session_id: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Session record not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Generative backend errors
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation backend unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Generation disabled: {reason}")]
    Disabled { reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for boundary validation
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for generative backend calls
pub type GenerationResult<T> = Result<T, GenerationError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;
