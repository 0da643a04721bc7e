use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::SharedState;
use crate::assessment::Questionnaire;
use crate::conversation::render_transcript;
use crate::error::{McpError, McpResult};
use crate::pipeline::{ConversationalState, TurnOutcome};
use crate::storage::{Conversation, Patient, SessionStatus, Storage};

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        "assessment_turn" => handle_turn(state, arguments).await,
        "assessment_history" => handle_history(state, arguments).await,
        "assessment_session" => handle_session(state, arguments).await,
        "assessment_results" => handle_results(state, arguments).await,
        "assessment_phases" => handle_phases(state).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

/// Parameters for the `assessment_turn` tool.
#[derive(Debug, Deserialize)]
pub struct TurnParams {
    /// Patient identifier.
    pub patient_id: String,
    /// The patient's message.
    pub query: String,
}

#[derive(Debug, Deserialize)]
struct PatientParams {
    patient_id: String,
}

/// Which messages `assessment_history` returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryScope {
    /// Messages of the most recent session.
    #[default]
    Session,
    /// The whole conversation.
    All,
    /// Messages within the last `hours` hours.
    Recent,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    patient_id: String,
    #[serde(default)]
    scope: HistoryScope,
    hours: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SessionView {
    id: String,
    status: SessionStatus,
    phase: String,
    node_id: String,
    retry_count: u32,
    is_initial: bool,
    state: Option<ConversationalState>,
}

/// Handle assessment_turn: run one message through the pipeline.
async fn handle_turn(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: TurnParams = parse_arguments("assessment_turn", arguments)?;
    if params.patient_id.trim().is_empty() {
        return Err(McpError::InvalidParameters {
            tool_name: "assessment_turn".to_string(),
            message: "patient_id must not be empty".to_string(),
        });
    }

    let outcome = state
        .pipeline
        .process_turn(params.patient_id.trim(), &params.query)
        .await?;

    match outcome {
        TurnOutcome::Replied(reply) => {
            let session = SessionView {
                node_id: reply.session.node_id.to_string(),
                status: reply.session.status,
                phase: reply.session.phase,
                retry_count: reply.session.retry_count,
                is_initial: reply.session.is_initial,
                id: reply.session.id,
                state: Some(reply.state),
            };
            Ok(json!({
                "ai_response": reply.ai_response,
                "state": reply.state,
                "message_id": reply.message_id,
                "session": session,
            }))
        }
        TurnOutcome::Failed(failure) => Err(McpError::ExecutionFailed {
            message: format!(
                "The message could not be processed, please send it again ({}; message {} kept)",
                failure.error, failure.message_id
            ),
        }),
    }
}

/// Handle assessment_history: messages plus the rendered transcript.
async fn handle_history(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: HistoryParams = parse_arguments("assessment_history", arguments)?;
    let Some((_, conversation)) = find_conversation(state, &params.patient_id).await? else {
        return Ok(json!({ "messages": [], "transcript": "" }));
    };

    let conversations = &state.conversations;
    let messages = match params.scope {
        HistoryScope::All => conversations.history(&conversation.id).await,
        HistoryScope::Recent => {
            let hours = params
                .hours
                .unwrap_or(state.config.chat.history_window_hours);
            conversations.recent(&conversation.id, hours).await
        }
        HistoryScope::Session => {
            match state.storage.list_sessions(&conversation.id).await?.last() {
                Some(session) => conversations.session_history(&session.id).await,
                None => Ok(Vec::new()),
            }
        }
    }?;

    Ok(json!({
        "conversation_id": conversation.id,
        "transcript": render_transcript(&messages),
        "messages": messages,
    }))
}

/// Handle assessment_session: the latest session and its last assistant marker.
async fn handle_session(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: PatientParams = parse_arguments("assessment_session", arguments)?;
    let Some((patient, conversation)) = find_conversation(state, &params.patient_id).await? else {
        return Err(unknown_patient(&params.patient_id));
    };

    let session = state
        .storage
        .list_sessions(&conversation.id)
        .await?
        .pop();
    let marker = state
        .conversations
        .last_assistant_marker(&conversation.id)
        .await?;

    let view = session.map(|s| {
        let state = match s.status {
            SessionStatus::Closed => Some(ConversationalState::Complete),
            _ => marker.as_ref().map(|m| m.state),
        };
        SessionView {
            node_id: s.node_id.to_string(),
            status: s.status,
            phase: s.phase,
            retry_count: s.retry_count,
            is_initial: s.is_initial,
            id: s.id,
            state,
        }
    });

    Ok(json!({
        "patient_id": patient.username,
        "current_phase": patient.current_phase,
        "session": view,
        "last_marker": marker,
    }))
}

/// Handle assessment_results: assessments with records and results.
async fn handle_results(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: PatientParams = parse_arguments("assessment_results", arguments)?;
    let Some(patient) = state.storage.find_patient(&params.patient_id).await? else {
        return Err(unknown_patient(&params.patient_id));
    };

    let mut assessments = Vec::new();
    for assessment in state.storage.list_assessments(&patient.id).await? {
        let records = state.storage.get_records(&assessment.id).await?;
        let result = state.storage.get_result(&assessment.id).await?;
        assessments.push(json!({
            "assessment": assessment,
            "records": records,
            "result": result,
        }));
    }

    Ok(json!({
        "patient_id": patient.username,
        "assessments": assessments,
    }))
}

/// Handle assessment_phases: the catalogue and the configured sequence.
async fn handle_phases(state: &SharedState) -> McpResult<Value> {
    let registry = &state.registry;
    let phases: Vec<Value> = registry
        .all()
        .iter()
        .map(|phase| phase_summary(phase.as_ref(), registry.is_sequenced(phase.name())))
        .collect();

    Ok(json!({
        "sequence": registry.sequence(),
        "phases": phases,
    }))
}

/// Catalogue entry for one questionnaire.
pub fn phase_summary(phase: &dyn Questionnaire, sequenced: bool) -> Value {
    let bounds = phase.score_bounds();
    json!({
        "name": phase.name(),
        "display_name": phase.display_name(),
        "short_name": phase.short_name(),
        "description": phase.description(),
        "question_count": phase.question_count(),
        "score_bounds": [bounds.low, bounds.high],
        "cap": phase.cap(),
        "labels": phase.labels(),
        "supports_scoring": phase.supports_scoring(),
        "base_node": phase.base_node(),
        "sequenced": sequenced,
        "questions": phase.questions_json(),
    })
}

// ============================================================================
// Helper functions
// ============================================================================

async fn find_conversation(
    state: &SharedState,
    username: &str,
) -> McpResult<Option<(Patient, Conversation)>> {
    let Some(patient) = state.storage.find_patient(username).await? else {
        return Ok(None);
    };
    let conversation = state.storage.find_conversation(&patient.id).await?;
    Ok(conversation.map(|c| (patient, c)))
}

fn unknown_patient(patient_id: &str) -> McpError {
    McpError::ExecutionFailed {
        message: format!("Unknown patient: {}", patient_id),
    }
}

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::phases::Gad7;

    #[test]
    fn test_parse_arguments_missing() {
        let err = parse_arguments::<PatientParams>("assessment_session", None).unwrap_err();
        assert!(matches!(err, McpError::InvalidParameters { .. }));
    }

    #[test]
    fn test_history_scope_defaults_to_session() {
        let params: HistoryParams =
            serde_json::from_value(json!({"patient_id": "p"})).unwrap();
        assert_eq!(params.scope, HistoryScope::Session);

        let params: HistoryParams =
            serde_json::from_value(json!({"patient_id": "p", "scope": "recent", "hours": 2}))
                .unwrap();
        assert_eq!(params.scope, HistoryScope::Recent);
        assert_eq!(params.hours, Some(2));
    }

    #[test]
    fn test_phase_summary_fields() {
        let gad7 = Gad7::new().unwrap();
        let summary = phase_summary(&gad7, true);
        assert_eq!(summary["short_name"], "gad7");
        assert_eq!(summary["question_count"], 7);
        assert_eq!(summary["cap"], 21);
        assert_eq!(summary["score_bounds"], json!([0, 3]));
        assert_eq!(summary["questions"]["1"]["qid"], "1");
    }
}
