//! Operator commands.
//!
//! Offline views over the phase catalogue and a patient's stored
//! assessments, next to the default `serve` command.

use clap::Subcommand;

use crate::assessment::Questionnaire;
use crate::conversation::render_transcript;
use crate::oracle::PipeTable;
use crate::server::AppState;
use crate::storage::Storage;

const RULE: &str =
    "═══════════════════════════════════════════════════════════════════════════════\n\n";

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Serve the assessment tools over stdio (default)
    Serve,

    /// List the questionnaire catalogue and the configured phase sequence
    Phases,

    /// Check configuration and print the pipes that would be provisioned
    Validate,

    /// Show a patient's stored assessments and scores
    Results {
        /// Patient identifier
        patient: String,
    },

    /// Print a patient's conversation transcript
    History {
        /// Patient identifier
        patient: String,

        /// Only show messages from the last N hours
        #[arg(long)]
        hours: Option<i64>,
    },
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute an offline command. `Serve` is handled by the binary.
pub async fn execute_command(command: Commands, state: &AppState) -> CliResult {
    match command {
        Commands::Serve => CliResult::error("serve is not an offline command"),
        Commands::Phases => execute_phases(state),
        Commands::Validate => execute_validate(state),
        Commands::Results { patient } => execute_results(state, &patient).await,
        Commands::History { patient, hours } => execute_history(state, &patient, hours).await,
    }
}

fn execute_phases(state: &AppState) -> CliResult {
    let mut output = String::new();
    output.push_str("\nQuestionnaires\n");
    output.push_str(RULE);

    for phase in state.registry.all() {
        let position = state
            .registry
            .sequence()
            .iter()
            .position(|name| name == phase.name())
            .map(|i| format!("#{}", i + 1))
            .unwrap_or_else(|| "-".to_string());
        let bounds = phase.score_bounds();
        output.push_str(&format!(
            "{:>3}  {:<18} {:<28} {:>2} questions  scores {}..{}  cap {}\n",
            position,
            phase.name(),
            phase.display_name(),
            phase.question_count(),
            bounds.low,
            bounds.high,
            phase.cap()
        ));
    }

    CliResult::success(output)
}

fn execute_validate(state: &AppState) -> CliResult {
    let pipes = match PipeTable::from_config(&state.config.pipes) {
        Ok(p) => p,
        Err(e) => return CliResult::error(format!("Invalid pipe configuration: {}", e)),
    };

    if let Err(e) = state.registry.validate() {
        return CliResult::error(format!("Invalid question graph: {}", e));
    }

    let mut output = String::new();
    output.push_str("\nConfiguration\n");
    output.push_str(RULE);
    output.push_str(&format!(
        "Database:         {}\n",
        state.config.database.path.display()
    ));
    output.push_str(&format!(
        "Phase sequence:   {}\n",
        state.registry.sequence().join(" → ")
    ));
    output.push_str(&format!(
        "Session timeout:  {} minutes\n",
        state.config.chat.session_timeout_minutes
    ));
    output.push_str(&format!(
        "History window:   {} hours\n\n",
        state.config.chat.history_window_hours
    ));

    output.push_str("Graphs:\n");
    for phase in state.registry.all() {
        output.push_str(&format!(
            "  {:<20} {:>2} nodes, longest path {}\n",
            phase.name(),
            phase.graph().nodes().len(),
            phase.graph().longest_path()
        ));
    }
    output.push('\n');

    output.push_str("Pipes:\n");
    for def in pipes.definitions(&state.config.pipes.model) {
        output.push_str(&format!(
            "  {:<32} {}\n",
            def.name,
            def.description.as_deref().unwrap_or("")
        ));
    }

    CliResult::success(output)
}

async fn execute_results(state: &AppState, username: &str) -> CliResult {
    let patient = match state.storage.find_patient(username).await {
        Ok(Some(p)) => p,
        Ok(None) => return CliResult::error(format!("Unknown patient: {}", username)),
        Err(e) => return CliResult::error(format!("Error loading patient: {}", e)),
    };

    let assessments = match state.storage.list_assessments(&patient.id).await {
        Ok(a) => a,
        Err(e) => return CliResult::error(format!("Error loading assessments: {}", e)),
    };

    let mut output = String::new();
    output.push_str(&format!("\nAssessments for {}\n", patient.username));
    output.push_str(RULE);

    if assessments.is_empty() {
        output.push_str("No assessments recorded.\n");
        return CliResult::success(output);
    }

    for assessment in assessments {
        let result = match state.storage.get_result(&assessment.id).await {
            Ok(r) => r,
            Err(e) => return CliResult::error(format!("Error loading result: {}", e)),
        };
        let summary = match result {
            Some(r) => format!("{} ({})", r.total_score, r.severity_label),
            None => "no result".to_string(),
        };
        output.push_str(&format!(
            "[{}] {} started {}: {}\n",
            assessment.status,
            assessment.phase,
            assessment.started_at.format("%Y-%m-%d %H:%M"),
            summary
        ));

        if let Ok(records) = state.storage.get_records(&assessment.id).await {
            for record in records {
                let flag = if record.is_dirty { " *" } else { "" };
                output.push_str(&format!(
                    "    Q{:<3} {}{}  {}\n",
                    record.question_number, record.score, flag, record.remark
                ));
            }
        }
    }

    CliResult::success(output)
}

async fn execute_history(state: &AppState, username: &str, hours: Option<i64>) -> CliResult {
    let conversation = match state.storage.find_patient(username).await {
        Ok(Some(patient)) => match state.storage.find_conversation(&patient.id).await {
            Ok(Some(c)) => c,
            Ok(None) => return CliResult::success("No conversation recorded.\n"),
            Err(e) => return CliResult::error(format!("Error loading conversation: {}", e)),
        },
        Ok(None) => return CliResult::error(format!("Unknown patient: {}", username)),
        Err(e) => return CliResult::error(format!("Error loading patient: {}", e)),
    };

    let messages = match hours {
        Some(h) => state.conversations.recent(&conversation.id, h).await,
        None => state.conversations.history(&conversation.id).await,
    };

    match messages {
        Ok(messages) => CliResult::success(render_transcript(&messages)),
        Err(e) => CliResult::error(format!("Error loading messages: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ChatConfig, Config, DatabaseConfig, LangbaseConfig, LogFormat, LoggingConfig, PipeConfig,
        RequestConfig,
    };
    use crate::oracle::MockPipeRunner;
    use crate::storage::SqliteStorage;
    use std::path::PathBuf;
    use std::sync::Arc;

    async fn test_state() -> AppState {
        let config = Config {
            langbase: LangbaseConfig {
                api_key: "k".to_string(),
                base_url: "http://localhost".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from(":memory:"),
                max_connections: 1,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            request: RequestConfig::default(),
            pipes: PipeConfig::default(),
            chat: ChatConfig::default(),
        };
        let storage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        AppState::new(config, storage, Arc::new(MockPipeRunner::new())).unwrap()
    }

    #[tokio::test]
    async fn test_phases_lists_every_questionnaire() {
        let state = test_state().await;
        let result = execute_command(Commands::Phases, &state).await;
        assert_eq!(result.exit_code, 0);
        assert!(result.message.contains("assessment.phq9"));
        assert!(result.message.contains("assessment.asq"));
        assert!(result.message.contains("#3"));
    }

    #[tokio::test]
    async fn test_validate_lists_distinct_pipes() {
        let state = test_state().await;
        let result = execute_command(Commands::Validate, &state).await;
        assert_eq!(result.exit_code, 0);
        assert!(result.message.contains("assessment-classify-v1"));
        assert!(result.message.contains("assessment-score-v1"));
        assert_eq!(result.message.matches("assessment-compose-v1").count(), 1);
        assert!(result.message.contains("assessment.asq"));
        assert!(result.message.contains("longest path 9"));
    }

    #[tokio::test]
    async fn test_results_unknown_patient() {
        let state = test_state().await;
        let result = execute_command(
            Commands::Results {
                patient: "ghost".to_string(),
            },
            &state,
        )
        .await;
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_results_empty_patient() {
        let state = test_state().await;
        state.storage.get_or_create_patient("alice").await.unwrap();
        let result = execute_command(
            Commands::Results {
                patient: "alice".to_string(),
            },
            &state,
        )
        .await;
        assert_eq!(result.exit_code, 0);
        assert!(result.message.contains("No assessments recorded"));
    }
}
