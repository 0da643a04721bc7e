//! Per-turn orchestration.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::lifecycle::SessionLifecycleManager;
use super::locks::ConversationLocks;
use super::scoring::ScoringEngine;
use super::state::{AssistantMarker, ConversationalState, UserMarker};
use super::transition::{plan_transition, TransitionPlan, SKIPPED_REMARK};
use crate::assessment::{PhaseRegistry, Questionnaire, Target};
use crate::config::ChatConfig;
use crate::conversation::{render_transcript, ConversationStore};
use crate::error::{AppError, AppResult, PipelineError, StorageError};
use crate::oracle::{
    ClassifyRequest, ComposeRequest, OracleClient, ResponseComposer, TurnClassifier,
};
use crate::storage::{
    Assessment, AssessmentRecord, ChatMessage, ChatSession, Patient, Storage, TurnCommit,
};

/// Timing knobs for the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub session_timeout: Duration,
    /// How far back the transcript handed to the oracle reaches.
    pub history_window: Duration,
}

impl From<&ChatConfig> for PipelineSettings {
    fn from(config: &ChatConfig) -> Self {
        Self {
            session_timeout: Duration::minutes(config.session_timeout_minutes),
            history_window: Duration::hours(config.history_window_hours),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

/// A successfully processed turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub ai_response: String,
    pub session: ChatSession,
    pub state: ConversationalState,
    pub message_id: String,
}

/// A turn whose oracle calls failed; nothing but the user message was written.
#[derive(Debug, Clone, Serialize)]
pub struct TurnFailure {
    pub error: String,
    pub message_id: String,
    pub session_id: String,
}

/// Result of [`SessionPipeline::process_turn`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    Replied(TurnReply),
    Failed(TurnFailure),
}

/// Drives one conversation turn from raw user text to the persisted reply.
pub struct SessionPipeline {
    storage: Arc<dyn Storage>,
    registry: Arc<PhaseRegistry>,
    conversations: ConversationStore,
    lifecycle: SessionLifecycleManager,
    classifier: TurnClassifier,
    composer: ResponseComposer,
    scoring: ScoringEngine,
    locks: ConversationLocks,
    settings: PipelineSettings,
}

impl SessionPipeline {
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: Arc<PhaseRegistry>,
        oracle: OracleClient,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            conversations: ConversationStore::new(storage.clone()),
            lifecycle: SessionLifecycleManager::new(
                storage.clone(),
                registry.clone(),
                settings.session_timeout,
            ),
            classifier: TurnClassifier::new(oracle.clone()),
            composer: ResponseComposer::new(oracle.clone()),
            scoring: ScoringEngine::new(oracle, storage.clone()),
            locks: ConversationLocks::new(),
            storage,
            registry,
            settings,
        }
    }

    pub fn registry(&self) -> &PhaseRegistry {
        &self.registry
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Process one user message for a patient.
    ///
    /// Oracle failures come back as [`TurnOutcome::Failed`] with no state
    /// change besides the stored user message. Storage and graph errors, and
    /// races detected at commit time, are returned as errors.
    pub async fn process_turn(&self, username: &str, query: &str) -> AppResult<TurnOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::EmptyMessage.into());
        }

        let patient = self.storage.get_or_create_patient(username).await?;
        let conversation = self.storage.get_or_create_conversation(&patient.id).await?;
        let _turn = self.locks.acquire(&conversation.id).await;

        let (session, is_new) = self.lifecycle.resolve_session(&conversation.id).await?;
        let message = ChatMessage::from_user(&session, query);
        self.storage.create_message(&message).await?;

        let start = Instant::now();
        match self.run_turn(&patient, &session, &message).await {
            Ok(reply) => {
                info!(
                    session_id = %reply.session.id,
                    new_session = is_new,
                    phase = %reply.session.phase,
                    node_id = %reply.session.node_id,
                    state = %reply.state,
                    latency_ms = start.elapsed().as_millis(),
                    "Turn completed"
                );
                Ok(TurnOutcome::Replied(reply))
            }
            Err(e) if e.is_oracle_failure() => {
                warn!(
                    session_id = %session.id,
                    message_id = %message.id,
                    error = %e,
                    latency_ms = start.elapsed().as_millis(),
                    "Turn failed, session position unchanged"
                );
                Ok(TurnOutcome::Failed(TurnFailure {
                    error: e.to_string(),
                    message_id: message.id,
                    session_id: session.id,
                }))
            }
            Err(AppError::Storage(StorageError::RevisionConflict { session_id, .. })) => {
                error!(session_id = %session_id, "Session changed during the turn");
                Err(PipelineError::SessionTimeoutRace { session_id }.into())
            }
            Err(AppError::Storage(StorageError::DuplicateResult { .. })) => {
                Err(PipelineError::DuplicateFinalization {
                    phase: session.phase.clone(),
                    session_id: session.id.clone(),
                }
                .into())
            }
            Err(e) => Err(e),
        }
    }

    async fn run_turn(
        &self,
        patient: &Patient,
        session: &ChatSession,
        message: &ChatMessage,
    ) -> AppResult<TurnReply> {
        let phase = self.registry.get(&session.phase)?;
        let history = self
            .conversations
            .recent(&session.conversation_id, self.settings.history_window.num_hours())
            .await?;
        let transcript = render_transcript(&history);

        // The phase's assessment row is created lazily with the first commit.
        let (assessment, new_assessment) = match self
            .storage
            .get_assessment(&session.id, &session.phase)
            .await?
        {
            Some(existing) => (existing, None),
            None => {
                let created = Assessment::new(&patient.id, &session.id, &session.phase);
                (created.clone(), Some(created))
            }
        };

        if session.is_initial {
            return self
                .initial_turn(session, message, phase.as_ref(), &transcript, new_assessment)
                .await;
        }

        let node_id = session.node_id.node_id().unwrap_or_default();
        let node = phase.graph().node(node_id)?;
        let last_asked = session.last_outgoing.as_deref().unwrap_or(&node.text);

        let verdict = self
            .classifier
            .classify(ClassifyRequest {
                user_text: &message.user_text,
                phase_display: phase.display_name(),
                question_original: &node.text,
                last_asked,
                transcript: &transcript,
            })
            .await?;

        let plan = plan_transition(session, verdict, &self.registry)?;
        info!(
            session_id = %session.id,
            phase = %session.phase,
            node_id = %session.node_id,
            verdict = %verdict,
            state = %plan.state,
            next_node = %plan.position.node_id,
            retry_count = plan.retry_count,
            "Turn classified and planned"
        );

        let provisional = plan.provisional.as_ref().map(|answer| {
            let record = AssessmentRecord::provisional(
                &assessment.id,
                &answer.question_number,
                &answer.question_text,
                answer.score,
            );
            if answer.skipped {
                record.with_remark(SKIPPED_REMARK)
            } else {
                record
            }
        });

        let finalization = match &plan.finalize {
            Some(_) => {
                let phase_messages = self
                    .conversations
                    .phase_history(&session.id, &session.phase)
                    .await?;
                Some(
                    self.scoring
                        .finalize(
                            phase.as_ref(),
                            &assessment,
                            &phase_messages,
                            provisional.as_ref(),
                        )
                        .await?,
                )
            }
            None => None,
        };

        let (phase_display, question) = self.next_question(&plan, phase.as_ref())?;
        let reply = self
            .composer
            .compose(ComposeRequest {
                state: plan.state,
                phase_display: &phase_display,
                question: &question,
                user_text: &message.user_text,
                transcript: &transcript,
            })
            .await?;

        let mut updated = session.clone();
        updated.phase = plan.position.phase.clone();
        updated.node_id = plan.position.node_id.clone();
        updated.retry_count = plan.position.retry_count;
        updated.status = plan.position.status;
        updated.is_initial = false;
        updated.last_outgoing = Some(reply.clone());
        updated.updated_at = Utc::now();

        let commit = TurnCommit {
            message_id: message.id.clone(),
            user_marker: UserMarker::Classified {
                phase: session.phase.clone(),
                node_id: session.node_id.clone(),
                verdict,
                category: plan.category,
                retry_count: plan.retry_count,
            },
            assistant_text: reply.clone(),
            assistant_sent_at: Utc::now(),
            assistant_marker: AssistantMarker {
                state: plan.state,
                phase: updated.phase.clone(),
                node_id: updated.node_id.clone(),
                retry_count: updated.retry_count,
            },
            assessment: new_assessment,
            provisional,
            finalization,
            patient_phase: plan
                .advanced_to
                .clone()
                .map(|next| (patient.id.clone(), next)),
            session: updated,
        };

        let committed = self.storage.commit_turn(&commit).await?;
        Ok(TurnReply {
            ai_response: reply,
            session: committed,
            state: plan.state,
            message_id: message.id.clone(),
        })
    }

    /// Opening turn of a session: greet and ask the base question, no classification.
    async fn initial_turn(
        &self,
        session: &ChatSession,
        message: &ChatMessage,
        phase: &dyn Questionnaire,
        transcript: &str,
        new_assessment: Option<Assessment>,
    ) -> AppResult<TurnReply> {
        let node_id = session.node_id.node_id().unwrap_or_default();
        let question = &phase.graph().node(node_id)?.text;

        let reply = self
            .composer
            .compose(ComposeRequest {
                state: ConversationalState::Init,
                phase_display: phase.display_name(),
                question,
                user_text: &message.user_text,
                transcript,
            })
            .await?;

        let mut updated = session.clone();
        updated.is_initial = false;
        updated.last_outgoing = Some(reply.clone());
        updated.updated_at = Utc::now();

        let commit = TurnCommit {
            message_id: message.id.clone(),
            user_marker: UserMarker::Initial {
                phase: session.phase.clone(),
                node_id: session.node_id.clone(),
            },
            assistant_text: reply.clone(),
            assistant_sent_at: Utc::now(),
            assistant_marker: AssistantMarker {
                state: ConversationalState::Init,
                phase: updated.phase.clone(),
                node_id: updated.node_id.clone(),
                retry_count: 0,
            },
            assessment: new_assessment,
            provisional: None,
            finalization: None,
            patient_phase: None,
            session: updated,
        };

        let committed = self.storage.commit_turn(&commit).await?;
        Ok(TurnReply {
            ai_response: reply,
            session: committed,
            state: ConversationalState::Init,
            message_id: message.id.clone(),
        })
    }

    /// Display name and question text for the position the plan lands on.
    fn next_question(
        &self,
        plan: &TransitionPlan,
        current: &dyn Questionnaire,
    ) -> AppResult<(String, String)> {
        match &plan.position.node_id {
            Target::Node(node_id) => {
                let phase = self.registry.get(&plan.position.phase)?;
                let text = phase.graph().node(node_id)?.text.clone();
                Ok((phase.display_name().to_string(), text))
            }
            Target::End => Ok((current.display_name().to_string(), String::new())),
        }
    }
}
