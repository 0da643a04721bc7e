//! Pure per-turn decision: from a classified turn to the next session position.

use serde::Serialize;

use super::state::ConversationalState;
use crate::assessment::{Category, PhaseRegistry, PhaseStep, Target};
use crate::error::GraphError;
use crate::oracle::Verdict;
use crate::storage::{ChatSession, SessionStatus};

/// Remark stored on a question settled by the retry budget.
pub const SKIPPED_REMARK: &str = "skipped";

/// Where the session stands after a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub phase: String,
    pub node_id: Target,
    pub retry_count: u32,
    pub status: SessionStatus,
}

/// A question settled during the turn loop, before the final scoring pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionalAnswer {
    pub phase: String,
    pub question_number: String,
    pub question_text: String,
    pub score: i64,
    pub skipped: bool,
}

/// Everything the pipeline must do for a classified turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub state: ConversationalState,
    pub category: Category,
    /// Retry count the classification was evaluated with.
    pub retry_count: u32,
    pub provisional: Option<ProvisionalAnswer>,
    /// Phase whose graph reached `END` and needs its scoring pass.
    pub finalize: Option<String>,
    /// Phase entered this turn, if the sequence advanced.
    pub advanced_to: Option<String>,
    pub position: Position,
}

/// Apply a verdict to the session's current position.
///
/// Fails only when the session points outside its phase's graph or the phase
/// is not in the sequence, both of which mean corrupted static definitions.
pub fn plan_transition(
    session: &ChatSession,
    verdict: Verdict,
    registry: &PhaseRegistry,
) -> Result<TransitionPlan, GraphError> {
    let phase = registry.get(&session.phase)?;
    let graph = phase.graph();
    let node_id = session
        .node_id
        .node_id()
        .ok_or_else(|| GraphError::UnknownNode {
            phase: session.phase.clone(),
            node_id: session.node_id.to_string(),
        })?;
    let node = graph.node(node_id)?;

    let category = verdict.to_category();
    let retry_count = match category {
        Category::Other => session.retry_count + 1,
        Category::Yes | Category::No | Category::Clarify => 0,
    };
    let target = graph.next(node_id, category, retry_count)?;

    let skipped = category == Category::Other && retry_count > node.retry_limit;
    let state = if skipped {
        ConversationalState::Skipped
    } else {
        ConversationalState::from_verdict(verdict)
    };

    let provisional = if skipped {
        Some(phase.score_bounds().low)
    } else {
        phase.provisional_score(category)
    }
    .map(|score| ProvisionalAnswer {
        phase: session.phase.clone(),
        question_number: node.question_number.clone(),
        question_text: node.text.clone(),
        score,
        skipped,
    });

    let mut plan = TransitionPlan {
        state,
        category,
        retry_count,
        provisional,
        finalize: None,
        advanced_to: None,
        position: Position {
            phase: session.phase.clone(),
            node_id: target.clone(),
            retry_count: if skipped { 0 } else { retry_count },
            status: SessionStatus::Open,
        },
    };

    if target.is_end() {
        if phase.supports_scoring() {
            plan.finalize = Some(session.phase.clone());
        }

        match registry.next(&session.phase, false)? {
            PhaseStep::End => {
                plan.state = ConversationalState::Conclude;
                plan.position.status = SessionStatus::Closed;
                plan.position.retry_count = 0;
            }
            PhaseStep::Phase(next) => {
                let next_phase = registry.get(&next)?;
                plan.position = Position {
                    phase: next.clone(),
                    node_id: Target::Node(next_phase.base_node().to_string()),
                    retry_count: 0,
                    status: SessionStatus::Open,
                };
                plan.advanced_to = Some(next);
            }
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::phases::{Gad7, Monitoring, Phq9};
    use pretty_assertions::assert_eq;

    fn session_at(phase: &str, node: &str, retry_count: u32) -> ChatSession {
        let mut session = ChatSession::new("conv", phase, node);
        session.is_initial = false;
        session.retry_count = retry_count;
        session
    }

    #[test]
    fn test_answer_moves_on_and_resets_retries() {
        let registry = PhaseRegistry::with_defaults().unwrap();
        let plan = plan_transition(
            &session_at(Phq9::NAME, "1", 2),
            Verdict::NormalYes,
            &registry,
        )
        .unwrap();

        assert_eq!(plan.state, ConversationalState::Normal);
        assert_eq!(plan.position.node_id, Target::from("2"));
        assert_eq!(plan.position.retry_count, 0);
        let answer = plan.provisional.unwrap();
        assert_eq!(answer.question_number, "1");
        assert_eq!(answer.score, 1);
        assert!(!answer.skipped);
    }

    #[test]
    fn test_drift_within_budget_stays_put() {
        let registry = PhaseRegistry::with_defaults().unwrap();
        let plan =
            plan_transition(&session_at(Phq9::NAME, "1", 1), Verdict::Drift, &registry).unwrap();

        assert_eq!(plan.state, ConversationalState::Drift);
        assert_eq!(plan.position.node_id, Target::from("1"));
        assert_eq!(plan.position.retry_count, 2);
        assert!(plan.provisional.is_none());
    }

    #[test]
    fn test_third_other_skips_and_advances() {
        let registry = PhaseRegistry::with_defaults().unwrap();
        let plan = plan_transition(
            &session_at(Phq9::NAME, "1", 2),
            Verdict::Ambiguous,
            &registry,
        )
        .unwrap();

        assert_eq!(plan.state, ConversationalState::Skipped);
        assert_eq!(plan.retry_count, 3);
        assert_eq!(plan.position.node_id, Target::from("2"));
        assert_eq!(plan.position.retry_count, 0);
        let answer = plan.provisional.unwrap();
        assert!(answer.skipped);
        assert_eq!(answer.score, 0);
    }

    #[test]
    fn test_clarify_resets_retries_without_moving() {
        let registry = PhaseRegistry::with_defaults().unwrap();
        let plan = plan_transition(
            &session_at(Phq9::NAME, "4", 2),
            Verdict::Clarify,
            &registry,
        )
        .unwrap();

        assert_eq!(plan.state, ConversationalState::Clarify);
        assert_eq!(plan.position.node_id, Target::from("4"));
        assert_eq!(plan.position.retry_count, 0);
        assert!(plan.provisional.is_none());
    }

    #[test]
    fn test_last_phq9_question_advances_to_gad7() {
        let registry = PhaseRegistry::with_defaults().unwrap();
        let plan =
            plan_transition(&session_at(Phq9::NAME, "9", 0), Verdict::NormalNo, &registry).unwrap();

        assert_eq!(plan.state, ConversationalState::Normal);
        assert_eq!(plan.finalize.as_deref(), Some(Phq9::NAME));
        assert_eq!(plan.advanced_to.as_deref(), Some(Gad7::NAME));
        assert_eq!(plan.position.phase, Gad7::NAME);
        assert_eq!(plan.position.node_id, Target::from("1"));
        assert_eq!(plan.position.status, SessionStatus::Open);
        assert_eq!(plan.provisional.unwrap().phase, Phq9::NAME);
    }

    #[test]
    fn test_gad7_early_exit() {
        let registry = PhaseRegistry::with_defaults().unwrap();
        let plan =
            plan_transition(&session_at(Gad7::NAME, "1", 0), Verdict::NormalNo, &registry).unwrap();

        assert_eq!(plan.finalize.as_deref(), Some(Gad7::NAME));
        assert_eq!(plan.advanced_to.as_deref(), Some(Monitoring::NAME));
    }

    #[test]
    fn test_end_of_sequence_concludes() {
        let registry = PhaseRegistry::with_sequence(&[Gad7::NAME]).unwrap();
        let plan =
            plan_transition(&session_at(Gad7::NAME, "1", 0), Verdict::NormalNo, &registry).unwrap();

        assert_eq!(plan.state, ConversationalState::Conclude);
        assert_eq!(plan.position.status, SessionStatus::Closed);
        assert_eq!(plan.position.node_id, Target::End);
        assert!(plan.advanced_to.is_none());
    }

    #[test]
    fn test_skip_into_next_phase_keeps_skipped_state() {
        let registry = PhaseRegistry::with_defaults().unwrap();
        let plan =
            plan_transition(&session_at(Phq9::NAME, "9", 2), Verdict::Drift, &registry).unwrap();

        assert_eq!(plan.state, ConversationalState::Skipped);
        assert_eq!(plan.position.phase, Gad7::NAME);
    }

    #[test]
    fn test_unknown_node_fails() {
        let registry = PhaseRegistry::with_defaults().unwrap();
        let err = plan_transition(
            &session_at(Phq9::NAME, "42", 0),
            Verdict::NormalYes,
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::UnknownNode { .. }));
    }
}
