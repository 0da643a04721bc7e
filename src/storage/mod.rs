//! Storage layer for patients, chat sessions, turns, and assessment outcomes.
//!
//! This module provides the [`Storage`] trait consumed by the pipeline and a
//! SQLite implementation. Multi-row writes that belong to one turn go through
//! [`Storage::commit_turn`] so they land in a single transaction.

mod sqlite;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assessment::Target;
use crate::error::StorageResult;
use crate::pipeline::state::{AssistantMarker, UserMarker};

/// The human subject of the assessments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub username: String,
    /// Last phase the patient was moved into.
    pub current_phase: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The single chat thread a patient owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub patient_id: String,
    pub created_at: DateTime<Utc>,
}

/// One bounded conversational episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub conversation_id: String,
    pub status: SessionStatus,
    /// Current phase name.
    pub phase: String,
    /// Current node in the phase graph, or `END` once the sequence concluded.
    pub node_id: Target,
    /// Unresolved turns spent on the current node.
    pub retry_count: u32,
    /// True until the first turn has been answered.
    pub is_initial: bool,
    pub last_outgoing: Option<String>,
    /// Bumped on every committed write; used for compare-and-set.
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle status of a chat session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Open,
    Closed,
    Aborted,
}

impl SessionStatus {
    pub fn can_transition_to(&self, target: &Self) -> bool {
        matches!(
            (self, target),
            (SessionStatus::Open, SessionStatus::Closed)
                | (SessionStatus::Open, SessionStatus::Aborted)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Open)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Open => write!(f, "open"),
            SessionStatus::Closed => write!(f, "closed"),
            SessionStatus::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(SessionStatus::Open),
            "closed" => Ok(SessionStatus::Closed),
            "aborted" => Ok(SessionStatus::Aborted),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// One turn: the user's message and, once answered, the assistant reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub session_id: String,
    /// Phase the session was in when the user message arrived.
    pub phase: String,
    pub user_text: String,
    pub assistant_text: Option<String>,
    pub user_sent_at: DateTime<Utc>,
    pub assistant_sent_at: Option<DateTime<Utc>>,
    pub user_marker: UserMarker,
    pub assistant_marker: Option<AssistantMarker>,
}

/// One run of a phase for a patient within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: String,
    pub patient_id: String,
    pub session_id: String,
    pub phase: String,
    pub status: AssessmentStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Lifecycle status of an assessment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    #[default]
    Pending,
    Completed,
    Aborted,
}

impl AssessmentStatus {
    pub fn can_transition_to(&self, target: &Self) -> bool {
        matches!(
            (self, target),
            (AssessmentStatus::Pending, AssessmentStatus::Completed)
                | (AssessmentStatus::Pending, AssessmentStatus::Aborted)
        )
    }
}

impl std::fmt::Display for AssessmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssessmentStatus::Pending => write!(f, "pending"),
            AssessmentStatus::Completed => write!(f, "completed"),
            AssessmentStatus::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::str::FromStr for AssessmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(AssessmentStatus::Pending),
            "completed" => Ok(AssessmentStatus::Completed),
            "aborted" => Ok(AssessmentStatus::Aborted),
            _ => Err(format!("Unknown assessment status: {}", s)),
        }
    }
}

/// Score for one question of an assessment.
///
/// Written provisionally during the turn loop and overwritten once by the
/// final scoring pass, which sets `is_final` and flags `is_dirty` when the two
/// scores disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub id: String,
    pub assessment_id: String,
    pub question_number: String,
    pub question_text: String,
    pub score: i64,
    pub provisional_score: Option<i64>,
    pub remark: String,
    pub snippet: String,
    pub keywords: Vec<String>,
    pub is_dirty: bool,
    pub is_final: bool,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate outcome of a completed assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub id: String,
    pub assessment_id: String,
    pub total_score: i64,
    pub severity_label: String,
    pub created_at: DateTime<Utc>,
}

/// Final scoring output for one assessment, written inside a turn commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalization {
    pub assessment_id: String,
    pub records: Vec<AssessmentRecord>,
    pub result: AssessmentResult,
    pub completed_at: DateTime<Utc>,
}

/// Everything one processed turn writes, applied atomically.
#[derive(Debug, Clone)]
pub struct TurnCommit {
    /// Session state after the turn; `revision` is the value read before it.
    pub session: ChatSession,
    pub message_id: String,
    pub user_marker: UserMarker,
    pub assistant_text: String,
    pub assistant_sent_at: DateTime<Utc>,
    pub assistant_marker: AssistantMarker,
    /// Assessment for the phase being answered, inserted if absent.
    pub assessment: Option<Assessment>,
    pub provisional: Option<AssessmentRecord>,
    pub finalization: Option<Finalization>,
    /// New legacy phase pointer for the patient.
    pub patient_phase: Option<(String, String)>,
}

impl Patient {
    pub fn new(username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.into(),
            current_phase: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Conversation {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            patient_id: patient_id.into(),
            created_at: Utc::now(),
        }
    }
}

impl ChatSession {
    /// Fresh open session positioned at a phase's base node.
    pub fn new(
        conversation_id: impl Into<String>,
        phase: impl Into<String>,
        base_node: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            status: SessionStatus::Open,
            phase: phase.into(),
            node_id: Target::Node(base_node.into()),
            retry_count: 0,
            is_initial: true,
            last_outgoing: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }
}

impl ChatMessage {
    /// User half of a turn, not yet processed.
    pub fn from_user(session: &ChatSession, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: session.conversation_id.clone(),
            session_id: session.id.clone(),
            phase: session.phase.clone(),
            user_text: text.into(),
            assistant_text: None,
            user_sent_at: Utc::now(),
            assistant_sent_at: None,
            user_marker: UserMarker::Pending {
                phase: session.phase.clone(),
                node_id: session.node_id.clone(),
            },
            assistant_marker: None,
        }
    }

    pub fn with_sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.user_sent_at = sent_at;
        self
    }

    pub fn is_answered(&self) -> bool {
        self.assistant_text.is_some()
    }
}

impl Assessment {
    pub fn new(
        patient_id: impl Into<String>,
        session_id: impl Into<String>,
        phase: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            patient_id: patient_id.into(),
            session_id: session_id.into(),
            phase: phase.into(),
            status: AssessmentStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

impl AssessmentRecord {
    /// Provisional record written during the turn loop.
    pub fn provisional(
        assessment_id: impl Into<String>,
        question_number: impl Into<String>,
        question_text: impl Into<String>,
        score: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            assessment_id: assessment_id.into(),
            question_number: question_number.into(),
            question_text: question_text.into(),
            score,
            provisional_score: Some(score),
            remark: String::new(),
            snippet: String::new(),
            keywords: Vec::new(),
            is_dirty: false,
            is_final: false,
            updated_at: Utc::now(),
        }
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }
}

impl AssessmentResult {
    pub fn new(
        assessment_id: impl Into<String>,
        total_score: i64,
        severity_label: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            assessment_id: assessment_id.into(),
            total_score,
            severity_label: severity_label.into(),
            created_at: Utc::now(),
        }
    }
}

/// Persistence collaborator for the assessment pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    // Patient and conversation operations

    /// Get a patient by username, creating one if absent.
    async fn get_or_create_patient(&self, username: &str) -> StorageResult<Patient>;
    /// Get a patient by ID.
    async fn get_patient(&self, id: &str) -> StorageResult<Option<Patient>>;
    /// Get a patient by username.
    async fn find_patient(&self, username: &str) -> StorageResult<Option<Patient>>;
    /// Get a patient's conversation, creating one if absent.
    async fn get_or_create_conversation(&self, patient_id: &str) -> StorageResult<Conversation>;
    /// Get a conversation by ID.
    async fn get_conversation(&self, id: &str) -> StorageResult<Option<Conversation>>;
    /// Get a patient's conversation without creating it.
    async fn find_conversation(&self, patient_id: &str) -> StorageResult<Option<Conversation>>;

    // Session operations

    /// Create a new session.
    async fn create_session(&self, session: &ChatSession) -> StorageResult<()>;
    /// Get a session by ID.
    async fn get_session(&self, id: &str) -> StorageResult<Option<ChatSession>>;
    /// Most recent open session of a conversation.
    async fn get_open_session(&self, conversation_id: &str) -> StorageResult<Option<ChatSession>>;
    /// All sessions of a conversation, oldest first.
    async fn list_sessions(&self, conversation_id: &str) -> StorageResult<Vec<ChatSession>>;
    /// Mark an open session aborted together with its pending assessments.
    /// Returns the number of assessments aborted.
    async fn abort_session(&self, session: &ChatSession) -> StorageResult<u64>;

    // Message operations

    /// Persist the user half of a turn.
    async fn create_message(&self, message: &ChatMessage) -> StorageResult<()>;
    /// Get a message by ID.
    async fn get_message(&self, id: &str) -> StorageResult<Option<ChatMessage>>;
    /// Messages of a conversation, oldest first, optionally only those sent at or after `since`.
    async fn list_messages(
        &self,
        conversation_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<ChatMessage>>;
    /// Messages of one session, oldest first.
    async fn list_session_messages(&self, session_id: &str) -> StorageResult<Vec<ChatMessage>>;
    /// Messages of one phase within a session, oldest first. A message counts
    /// when either its user turn or its assistant reply belongs to the phase.
    async fn list_phase_messages(
        &self,
        session_id: &str,
        phase: &str,
    ) -> StorageResult<Vec<ChatMessage>>;
    /// Latest answered message of a conversation.
    async fn last_answered_message(
        &self,
        conversation_id: &str,
    ) -> StorageResult<Option<ChatMessage>>;

    // Assessment operations

    /// Assessment for a phase within a session.
    async fn get_assessment(
        &self,
        session_id: &str,
        phase: &str,
    ) -> StorageResult<Option<Assessment>>;
    /// All assessments of a patient, oldest first.
    async fn list_assessments(&self, patient_id: &str) -> StorageResult<Vec<Assessment>>;
    /// Records of an assessment, by question number.
    async fn get_records(&self, assessment_id: &str) -> StorageResult<Vec<AssessmentRecord>>;
    /// Result of an assessment, if finalized.
    async fn get_result(&self, assessment_id: &str) -> StorageResult<Option<AssessmentResult>>;

    // Turn commit

    /// Apply every write of a processed turn in one transaction.
    ///
    /// Fails with `RevisionConflict` if the session changed since it was read
    /// and with `DuplicateResult` if the finalized assessment already has a result.
    async fn commit_turn(&self, commit: &TurnCommit) -> StorageResult<ChatSession>;
}
