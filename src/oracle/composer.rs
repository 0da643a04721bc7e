//! Reply composition.

use tracing::info;

use super::{OracleClient, OracleTask};
use crate::error::{OracleError, OracleResult};
use crate::pipeline::state::ConversationalState;
use crate::prompts::{compose_prompt, render};

/// Inputs for one reply.
#[derive(Debug, Clone, Copy)]
pub struct ComposeRequest<'a> {
    pub state: ConversationalState,
    pub phase_display: &'a str,
    /// Question to ask next; empty when the sequence is over.
    pub question: &'a str,
    pub user_text: &'a str,
    pub transcript: &'a str,
}

/// Produces the assistant's natural-language reply for a turn.
#[derive(Clone)]
pub struct ResponseComposer {
    oracle: OracleClient,
}

impl ResponseComposer {
    pub fn new(oracle: OracleClient) -> Self {
        Self { oracle }
    }

    pub async fn compose(&self, request: ComposeRequest<'_>) -> OracleResult<String> {
        // COMPLETE shares the closing pipe and template.
        let state = match request.state {
            ConversationalState::Complete => ConversationalState::Conclude,
            other => other,
        };
        let task = OracleTask::Compose(state);

        let prompt = render(
            compose_prompt(state),
            &[
                ("message", request.user_text),
                ("phase", request.phase_display),
                ("question", request.question),
                ("conversation", request.transcript),
            ],
        );

        let value = self.oracle.request(task, prompt).await?;
        let reply = value
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                OracleError::contract(task.to_string(), "expected a non-empty string reply")
            })?;

        info!(state = %state, reply_len = reply.len(), "Reply composed");
        Ok(reply.to_string())
    }
}
