//! Language-model oracle calls.
//!
//! The pipeline sees three black-box calls: classify a turn, compose a reply,
//! and score a finished questionnaire. Each goes through a [`PipeRunner`] and
//! must answer with a `{"response": ...}` JSON envelope; anything else is an
//! [`OracleError::ContractViolation`].

pub mod classifier;
pub mod composer;

pub use classifier::{ClassifyRequest, TurnClassifier, Verdict};
pub use composer::{ComposeRequest, ResponseComposer};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::PipeConfig;
use crate::error::{LangbaseError, LangbaseResult, OracleError, OracleResult};
use crate::langbase::{CreatePipeRequest, LangbaseClient, Message, PipeRequest, PipeStatus};
use crate::pipeline::state::ConversationalState;
use crate::prompts::{CLASSIFY_SYSTEM_PROMPT, COMPOSE_SYSTEM_PROMPT, SCORE_SYSTEM_PROMPT};

/// Runs a named pipe and returns the raw completion text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PipeRunner: Send + Sync {
    async fn run_pipe(&self, pipe: &str, messages: Vec<Message>) -> LangbaseResult<String>;
}

#[async_trait]
impl PipeRunner for LangbaseClient {
    async fn run_pipe(&self, pipe: &str, messages: Vec<Message>) -> LangbaseResult<String> {
        let response = self.call_pipe(PipeRequest::new(pipe, messages)).await?;
        if !response.success {
            return Err(LangbaseError::InvalidResponse {
                message: format!("pipe {} reported failure", pipe),
            });
        }
        Ok(response.completion)
    }
}

/// One oracle call kind. Composition is keyed by conversational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OracleTask {
    Classify,
    Compose(ConversationalState),
    Score,
}

impl fmt::Display for OracleTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleTask::Classify => write!(f, "classify"),
            OracleTask::Compose(state) => write!(f, "compose.{}", state.as_str()),
            OracleTask::Score => write!(f, "score"),
        }
    }
}

impl OracleTask {
    /// Every task the pipeline may issue.
    pub fn all() -> Vec<OracleTask> {
        let mut tasks = vec![OracleTask::Classify, OracleTask::Score];
        tasks.extend(
            ConversationalState::COMPOSABLE
                .iter()
                .map(|s| OracleTask::Compose(*s)),
        );
        tasks
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            OracleTask::Classify => CLASSIFY_SYSTEM_PROMPT,
            OracleTask::Compose(_) => COMPOSE_SYSTEM_PROMPT,
            OracleTask::Score => SCORE_SYSTEM_PROMPT,
        }
    }
}

/// Dispatch table from task to pipe name.
#[derive(Debug, Clone)]
pub struct PipeTable {
    pipes: HashMap<OracleTask, String>,
}

impl PipeTable {
    /// Build the table from configuration and check every task is covered.
    pub fn from_config(config: &PipeConfig) -> OracleResult<Self> {
        let mut pipes = HashMap::new();
        pipes.insert(OracleTask::Classify, config.classify.clone());
        pipes.insert(OracleTask::Score, config.score.clone());
        for state in ConversationalState::COMPOSABLE {
            pipes.insert(
                OracleTask::Compose(state),
                config.compose_pipe_for(state.as_str()).to_string(),
            );
        }

        let table = Self { pipes };
        table.validate()?;
        Ok(table)
    }

    fn validate(&self) -> OracleResult<()> {
        for task in OracleTask::all() {
            match self.pipes.get(&task) {
                Some(name) if !name.trim().is_empty() => {}
                _ => {
                    return Err(OracleError::MissingPipe {
                        task: task.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    pub fn pipe_for(&self, task: OracleTask) -> OracleResult<&str> {
        self.pipes
            .get(&task)
            .map(String::as_str)
            .ok_or_else(|| OracleError::MissingPipe {
                task: task.to_string(),
            })
    }

    /// Pipe creation requests, one per distinct pipe name.
    pub fn definitions(&self, model: &str) -> Vec<CreatePipeRequest> {
        let mut seen = std::collections::HashSet::new();
        let mut defs = Vec::new();
        for task in OracleTask::all() {
            let Some(name) = self.pipes.get(&task) else {
                continue;
            };
            if !seen.insert(name.clone()) {
                continue;
            }
            let (temperature, max_tokens) = match task {
                OracleTask::Classify => (0.0, 50),
                OracleTask::Score => (0.2, 2000),
                OracleTask::Compose(_) => (0.7, 600),
            };
            defs.push(
                CreatePipeRequest::new(name.clone())
                    .with_description(format!("Assessment {} pipe", task))
                    .with_status(PipeStatus::Private)
                    .with_model(model)
                    .with_upsert(true)
                    .with_json_output(true)
                    .with_store(false)
                    .with_temperature(temperature)
                    .with_max_tokens(max_tokens)
                    .with_messages(vec![Message::system(task.system_prompt())]),
            );
        }
        defs
    }
}

/// Shared oracle client: runs a task's pipe and unwraps the response envelope.
#[derive(Clone)]
pub struct OracleClient {
    runner: Arc<dyn PipeRunner>,
    pipes: PipeTable,
}

impl OracleClient {
    pub fn new(runner: Arc<dyn PipeRunner>, pipes: PipeTable) -> Self {
        Self { runner, pipes }
    }

    /// Run a task with a rendered prompt and return the `response` value.
    pub async fn request(&self, task: OracleTask, prompt: String) -> OracleResult<Value> {
        let pipe = self.pipes.pipe_for(task)?;
        let messages = vec![
            Message::system(task.system_prompt()),
            Message::user(prompt),
        ];

        let start = Instant::now();
        let completion = self.runner.run_pipe(pipe, messages).await?;
        debug!(
            task = %task,
            pipe = %pipe,
            latency_ms = start.elapsed().as_millis(),
            "Oracle call returned"
        );

        parse_envelope(task, &completion)
    }
}

/// Parse `{"response": ...}` out of a completion.
pub fn parse_envelope(task: OracleTask, completion: &str) -> OracleResult<Value> {
    let json_str = extract_json_from_completion(completion).map_err(|e| {
        warn!(task = %task, error = %e, "Oracle reply is not JSON");
        OracleError::contract(task.to_string(), e)
    })?;

    let mut value: Value = serde_json::from_str(json_str).map_err(|e| {
        warn!(
            task = %task,
            error = %e,
            completion_preview = %completion.chars().take(200).collect::<String>(),
            "Oracle reply failed to parse"
        );
        OracleError::contract(task.to_string(), format!("invalid JSON: {}", e))
    })?;

    value
        .get_mut("response")
        .map(Value::take)
        .ok_or_else(|| OracleError::contract(task.to_string(), "missing \"response\" key"))
}

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Attempts extraction in this order:
/// 1. Raw JSON
/// 2. A ```json fenced block
/// 3. Any ``` fenced block
pub fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;
    use serde_json::json;

    #[test]
    fn test_extract_raw_and_fenced_json() {
        assert_eq!(
            extract_json_from_completion("  {\"response\": 1} ").unwrap(),
            "{\"response\": 1}"
        );
        assert_eq!(
            extract_json_from_completion("Sure:\n```json\n{\"a\": 1}\n```").unwrap(),
            "{\"a\": 1}"
        );
        assert_eq!(
            extract_json_from_completion("```\n{\"b\": 2}\n```").unwrap(),
            "{\"b\": 2}"
        );
        assert!(extract_json_from_completion("no json here").is_err());
        assert!(extract_json_from_completion("```json\n```").is_err());
    }

    #[test]
    fn test_parse_envelope() {
        let value = parse_envelope(OracleTask::Classify, r#"{"response": "DRIFT"}"#).unwrap();
        assert_eq!(value, json!("DRIFT"));

        let err = parse_envelope(OracleTask::Classify, r#"{"category": "DRIFT"}"#).unwrap_err();
        assert!(matches!(err, OracleError::ContractViolation { .. }));

        let err = parse_envelope(OracleTask::Score, "{not json").unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));
    }

    #[test]
    fn test_pipe_table_defaults_and_overrides() {
        let mut config = PipeConfig::default();
        config
            .compose_overrides
            .insert("conclude".to_string(), "closing-pipe".to_string());
        let table = PipeTable::from_config(&config).unwrap();

        assert_eq!(
            table.pipe_for(OracleTask::Classify).unwrap(),
            "assessment-classify-v1"
        );
        assert_eq!(
            table
                .pipe_for(OracleTask::Compose(ConversationalState::Drift))
                .unwrap(),
            "assessment-compose-v1"
        );
        assert_eq!(
            table
                .pipe_for(OracleTask::Compose(ConversationalState::Conclude))
                .unwrap(),
            "closing-pipe"
        );
        assert!(table
            .pipe_for(OracleTask::Compose(ConversationalState::Complete))
            .is_err());

        // classify, score, shared compose, closing override
        assert_eq!(table.definitions("openai:gpt-4o").len(), 4);
    }

    #[test]
    fn test_pipe_table_rejects_blank_names() {
        let config = PipeConfig {
            classify: "  ".to_string(),
            ..PipeConfig::default()
        };
        assert!(matches!(
            PipeTable::from_config(&config),
            Err(OracleError::MissingPipe { task }) if task == "classify"
        ));
    }

    #[tokio::test]
    async fn test_oracle_client_sends_system_and_user_messages() {
        let mut runner = MockPipeRunner::new();
        runner
            .expect_run_pipe()
            .with(eq("assessment-score-v1"), always())
            .times(1)
            .returning(|_, messages| {
                assert_eq!(messages.len(), 2);
                assert_eq!(messages[1].content, "score this");
                Ok("```json\n{\"response\": {\"1\": {\"score\": 2}}}\n```".to_string())
            });

        let client = OracleClient::new(
            Arc::new(runner),
            PipeTable::from_config(&PipeConfig::default()).unwrap(),
        );
        let value = client
            .request(OracleTask::Score, "score this".to_string())
            .await
            .unwrap();
        assert_eq!(value["1"]["score"], 2);
    }

    #[tokio::test]
    async fn test_oracle_client_propagates_transport_errors() {
        let mut runner = MockPipeRunner::new();
        runner.expect_run_pipe().returning(|_, _| {
            Err(LangbaseError::Unavailable {
                message: "down".to_string(),
                retries: 3,
            })
        });

        let client = OracleClient::new(
            Arc::new(runner),
            PipeTable::from_config(&PipeConfig::default()).unwrap(),
        );
        let err = client
            .request(OracleTask::Classify, String::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::Transport(_)));
    }
}
