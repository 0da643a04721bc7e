//! Conversation-level states and the typed markers persisted with each turn.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::assessment::{Category, Target};
use crate::oracle::Verdict;

/// State of the conversation for one turn; selects the reply template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationalState {
    /// First turn of a session.
    Init,
    Normal,
    Drift,
    Ambiguous,
    Clarify,
    /// Retry budget on the previous node exhausted.
    Skipped,
    /// The last phase in the sequence just ended.
    Conclude,
    /// Whole sequence exhausted; reported for closed sessions.
    Complete,
}

impl ConversationalState {
    /// States that have their own reply template.
    pub const COMPOSABLE: [ConversationalState; 7] = [
        ConversationalState::Init,
        ConversationalState::Normal,
        ConversationalState::Drift,
        ConversationalState::Ambiguous,
        ConversationalState::Clarify,
        ConversationalState::Skipped,
        ConversationalState::Conclude,
    ];

    /// Lowercase name used for pipe overrides and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationalState::Init => "init",
            ConversationalState::Normal => "normal",
            ConversationalState::Drift => "drift",
            ConversationalState::Ambiguous => "ambiguous",
            ConversationalState::Clarify => "clarify",
            ConversationalState::Skipped => "skipped",
            ConversationalState::Conclude => "conclude",
            ConversationalState::Complete => "complete",
        }
    }

    /// State implied by a classifier verdict before retry budgets are applied.
    pub fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::NormalYes | Verdict::NormalNo => ConversationalState::Normal,
            Verdict::Drift => ConversationalState::Drift,
            Verdict::Ambiguous => ConversationalState::Ambiguous,
            Verdict::Clarify => ConversationalState::Clarify,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversationalState::Conclude | ConversationalState::Complete
        )
    }
}

impl fmt::Display for ConversationalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

impl FromStr for ConversationalState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "init" => Ok(ConversationalState::Init),
            "normal" => Ok(ConversationalState::Normal),
            "drift" => Ok(ConversationalState::Drift),
            "ambiguous" => Ok(ConversationalState::Ambiguous),
            "clarify" => Ok(ConversationalState::Clarify),
            "skipped" => Ok(ConversationalState::Skipped),
            "conclude" => Ok(ConversationalState::Conclude),
            "complete" => Ok(ConversationalState::Complete),
            _ => Err(format!("Unknown conversational state: {}", s)),
        }
    }
}

/// Metadata attached to the user half of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UserMarker {
    /// Persisted, not yet processed (or the turn failed).
    Pending { phase: String, node_id: Target },
    /// Opened a session; never classified.
    Initial { phase: String, node_id: Target },
    Classified {
        phase: String,
        node_id: Target,
        verdict: Verdict,
        category: Category,
        retry_count: u32,
    },
}

impl UserMarker {
    pub fn phase(&self) -> &str {
        match self {
            UserMarker::Pending { phase, .. }
            | UserMarker::Initial { phase, .. }
            | UserMarker::Classified { phase, .. } => phase,
        }
    }

    pub fn node_id(&self) -> &Target {
        match self {
            UserMarker::Pending { node_id, .. }
            | UserMarker::Initial { node_id, .. }
            | UserMarker::Classified { node_id, .. } => node_id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, UserMarker::Pending { .. })
    }
}

/// Metadata attached to the assistant half of a turn: where the session
/// stood after the reply and which template produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantMarker {
    pub state: ConversationalState,
    pub phase: String,
    pub node_id: Target,
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in ConversationalState::COMPOSABLE {
            assert_eq!(state.as_str().parse::<ConversationalState>(), Ok(state));
        }
        assert_eq!(ConversationalState::Skipped.to_string(), "SKIPPED");
        assert!("bogus".parse::<ConversationalState>().is_err());
    }

    #[test]
    fn test_user_marker_is_tagged() {
        let marker = UserMarker::Classified {
            phase: "assessment.phq9".to_string(),
            node_id: Target::from("3"),
            verdict: Verdict::Drift,
            category: Category::Other,
            retry_count: 1,
        };
        let json = serde_json::to_value(&marker).unwrap();
        assert_eq!(json["status"], "classified");
        assert_eq!(json["node_id"], "3");
        assert_eq!(json["category"], "other");

        let back: UserMarker = serde_json::from_value(json).unwrap();
        assert_eq!(back, marker);
        assert_eq!(back.phase(), "assessment.phq9");
    }

    #[test]
    fn test_assistant_marker_serializes_state_upper() {
        let marker = AssistantMarker {
            state: ConversationalState::Conclude,
            phase: "monitoring".to_string(),
            node_id: Target::End,
            retry_count: 0,
        };
        let json = serde_json::to_value(&marker).unwrap();
        assert_eq!(json["state"], "CONCLUDE");
        assert_eq!(json["node_id"], "END");
    }
}
