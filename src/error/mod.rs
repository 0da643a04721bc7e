use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Message not found: {message_id}")]
    MessageNotFound { message_id: String },

    #[error("Assessment not found: {assessment_id}")]
    AssessmentNotFound { assessment_id: String },

    #[error("Session {session_id} was modified concurrently (expected revision {expected})")]
    RevisionConflict { session_id: String, expected: i64 },

    #[error("Assessment {assessment_id} already has a result")]
    DuplicateResult { assessment_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Langbase API errors
#[derive(Debug, Error)]
pub enum LangbaseError {
    #[error("Langbase unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors in a phase's static question graph.
///
/// These indicate a corrupted definition rather than a user condition and are
/// surfaced at startup validation whenever possible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Unknown node '{node_id}' in phase {phase}")]
    UnknownNode { phase: String, node_id: String },

    #[error("Invalid graph definition in phase {phase} at node '{node_id}': {reason}")]
    InvalidGraphDefinition {
        phase: String,
        node_id: String,
        reason: String,
    },

    #[error("Unknown phase: {name}")]
    UnknownPhase { name: String },

    #[error("Invalid phase sequence: {reason}")]
    InvalidSequence { reason: String },
}

/// Errors from the classify/compose/score oracle calls.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("{task} oracle violated its contract: {message}")]
    ContractViolation { task: String, message: String },

    #[error("No pipe registered for {task}")]
    MissingPipe { task: String },

    #[error("Oracle transport failed: {0}")]
    Transport(#[from] LangbaseError),
}

/// Turn orchestration errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Phase {phase} was already finalized for session {session_id}")]
    DuplicateFinalization { phase: String, session_id: String },

    #[error("Session {session_id} changed or expired while the turn was in flight")]
    SessionTimeoutRace { session_id: String },

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Conversation not found: {conversation_id}")]
    ConversationNotFound { conversation_id: String },
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

impl OracleError {
    /// Build a contract violation for the given oracle task.
    pub fn contract(task: impl Into<String>, message: impl Into<String>) -> Self {
        OracleError::ContractViolation {
            task: task.into(),
            message: message.into(),
        }
    }
}

impl AppError {
    /// Whether this error came from an oracle call and should be reported to the
    /// user as a failed turn rather than propagated.
    pub fn is_oracle_failure(&self) -> bool {
        matches!(self, AppError::Oracle(_) | AppError::Langbase(_))
    }
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

impl From<StorageError> for McpError {
    fn from(err: StorageError) -> Self {
        AppError::from(err).into()
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for Langbase operations
pub type LangbaseResult<T> = Result<T, LangbaseError>;

/// Result type alias for oracle operations
pub type OracleResult<T> = Result<T, OracleError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::SessionNotFound {
            session_id: "sess-123".to_string(),
        };
        assert_eq!(err.to_string(), "Session not found: sess-123");

        let err = StorageError::RevisionConflict {
            session_id: "sess-1".to_string(),
            expected: 4,
        };
        assert_eq!(
            err.to_string(),
            "Session sess-1 was modified concurrently (expected revision 4)"
        );

        let err = StorageError::DuplicateResult {
            assessment_id: "a-1".to_string(),
        };
        assert_eq!(err.to_string(), "Assessment a-1 already has a result");
    }

    #[test]
    fn test_graph_error_display() {
        let err = GraphError::UnknownNode {
            phase: "assessment.phq9".to_string(),
            node_id: "42".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown node '42' in phase assessment.phq9");

        let err = GraphError::InvalidGraphDefinition {
            phase: "assessment.gad7".to_string(),
            node_id: "3".to_string(),
            reason: "yes transition loops back to itself".to_string(),
        };
        assert!(err.to_string().contains("yes transition loops back"));
    }

    #[test]
    fn test_oracle_error_display() {
        let err = OracleError::contract("classify", "unknown verdict 'MAYBE'");
        assert_eq!(
            err.to_string(),
            "classify oracle violated its contract: unknown verdict 'MAYBE'"
        );
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::DuplicateFinalization {
            phase: "assessment.phq9".to_string(),
            session_id: "s-1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Phase assessment.phq9 was already finalized for session s-1"
        );
    }

    #[test]
    fn test_oracle_failures_are_classified() {
        let err: AppError = OracleError::contract("compose", "bad json").into();
        assert!(err.is_oracle_failure());

        let err: AppError = LangbaseError::Timeout { timeout_ms: 10 }.into();
        assert!(err.is_oracle_failure());

        let err: AppError = PipelineError::EmptyMessage.into();
        assert!(!err.is_oracle_failure());
    }

    #[test]
    fn test_app_error_conversion_to_mcp_error() {
        let app_err = AppError::Config {
            message: "test error".to_string(),
        };
        let mcp_err: McpError = app_err.into();
        assert!(matches!(mcp_err, McpError::ExecutionFailed { .. }));
        assert!(mcp_err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_storage_error_conversion_to_app_error() {
        let storage_err = StorageError::SessionNotFound {
            session_id: "test-123".to_string(),
        };
        let app_err: AppError = storage_err.into();
        assert!(matches!(app_err, AppError::Storage(_)));
    }
}
