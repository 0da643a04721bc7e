//! Turn-processing pipeline.
//!
//! Per user message: resolve the session, persist the raw turn, classify it,
//! plan the graph transition, score a finished phase, compose the reply and
//! commit every write of the turn in one transaction.

pub mod lifecycle;
pub mod locks;
pub mod scoring;
pub mod state;
pub mod transition;
pub mod turn;

pub use lifecycle::SessionLifecycleManager;
pub use locks::ConversationLocks;
pub use scoring::{ScoringEngine, DEFAULTED_REMARK};
pub use state::{AssistantMarker, ConversationalState, UserMarker};
pub use transition::{plan_transition, Position, ProvisionalAnswer, TransitionPlan};
pub use turn::{PipelineSettings, SessionPipeline, TurnFailure, TurnOutcome, TurnReply};
