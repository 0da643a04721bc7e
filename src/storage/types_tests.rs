//! Unit tests for storage types, constructors, and status enums.

use super::*;
use serde_json::json;

// ============================================================================
// Session tests
// ============================================================================

#[test]
fn test_chat_session_new() {
    let session = ChatSession::new("conv-1", "assessment.phq9", "1");
    assert!(!session.id.is_empty());
    assert_eq!(session.conversation_id, "conv-1");
    assert_eq!(session.status, SessionStatus::Open);
    assert_eq!(session.phase, "assessment.phq9");
    assert_eq!(session.node_id, Target::from("1"));
    assert_eq!(session.retry_count, 0);
    assert!(session.is_initial);
    assert!(session.last_outgoing.is_none());
    assert_eq!(session.revision, 0);
    assert!(session.is_open());
}

#[test]
fn test_session_status_transitions() {
    assert!(SessionStatus::Open.can_transition_to(&SessionStatus::Closed));
    assert!(SessionStatus::Open.can_transition_to(&SessionStatus::Aborted));
    assert!(!SessionStatus::Closed.can_transition_to(&SessionStatus::Open));
    assert!(!SessionStatus::Aborted.can_transition_to(&SessionStatus::Closed));
    assert!(SessionStatus::Closed.is_terminal());
    assert!(!SessionStatus::Open.is_terminal());
}

#[test]
fn test_session_status_round_trip() {
    for status in [
        SessionStatus::Open,
        SessionStatus::Closed,
        SessionStatus::Aborted,
    ] {
        assert_eq!(status.to_string().parse::<SessionStatus>(), Ok(status));
    }
    assert_eq!("OPEN".parse::<SessionStatus>(), Ok(SessionStatus::Open));
    assert!("stale".parse::<SessionStatus>().is_err());
}

// ============================================================================
// Message tests
// ============================================================================

#[test]
fn test_message_from_user_is_pending() {
    let session = ChatSession::new("conv-1", "assessment.gad7", "3");
    let message = ChatMessage::from_user(&session, "I slept badly");
    assert_eq!(message.session_id, session.id);
    assert_eq!(message.conversation_id, "conv-1");
    assert_eq!(message.phase, "assessment.gad7");
    assert!(!message.is_answered());
    assert!(message.user_marker.is_pending());
    assert_eq!(message.user_marker.node_id(), &Target::from("3"));
}

// ============================================================================
// Assessment tests
// ============================================================================

#[test]
fn test_assessment_new_is_pending() {
    let assessment = Assessment::new("patient-1", "sess-1", "assessment.phq9");
    assert_eq!(assessment.status, AssessmentStatus::Pending);
    assert!(assessment.completed_at.is_none());
    assert!(AssessmentStatus::Pending.can_transition_to(&AssessmentStatus::Completed));
    assert!(!AssessmentStatus::Completed.can_transition_to(&AssessmentStatus::Aborted));
}

#[test]
fn test_assessment_status_serializes_snake_case() {
    assert_eq!(json!(AssessmentStatus::Completed), json!("completed"));
    let parsed: AssessmentStatus = serde_json::from_value(json!("aborted")).unwrap();
    assert_eq!(parsed, AssessmentStatus::Aborted);
}

#[test]
fn test_provisional_record() {
    let record = AssessmentRecord::provisional("a-1", "4", "Feeling tired", 1).with_remark("skipped");
    assert_eq!(record.score, 1);
    assert_eq!(record.provisional_score, Some(1));
    assert_eq!(record.remark, "skipped");
    assert!(!record.is_dirty);
    assert!(!record.is_final);
    assert!(record.keywords.is_empty());
}

#[test]
fn test_result_new() {
    let result = AssessmentResult::new("a-1", 12, "Moderate depression");
    assert_eq!(result.assessment_id, "a-1");
    assert_eq!(result.total_score, 12);
    assert_eq!(result.severity_label, "Moderate depression");
}
