use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use tracing::{debug, info};

use super::{
    Assessment, AssessmentRecord, AssessmentResult, AssessmentStatus, ChatMessage, ChatSession,
    Conversation, Patient, SessionStatus, Storage, TurnCommit,
};
use crate::assessment::Target;
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::pipeline::state::AssistantMarker;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// In-memory database for tests. A single connection keeps one shared database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn upsert_record(
        tx: &mut Transaction<'_, Sqlite>,
        record: &AssessmentRecord,
    ) -> StorageResult<()> {
        let keywords = serde_json::to_string(&record.keywords).unwrap_or_else(|_| "[]".into());

        sqlx::query(
            r#"
            INSERT INTO assessment_records
                (id, assessment_id, question_number, question_text, score, provisional_score,
                 remark, snippet, keywords, is_dirty, is_final, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (assessment_id, question_number) DO UPDATE SET
                question_text = excluded.question_text,
                score = excluded.score,
                provisional_score = excluded.provisional_score,
                remark = excluded.remark,
                snippet = excluded.snippet,
                keywords = excluded.keywords,
                is_dirty = excluded.is_dirty,
                is_final = excluded.is_final,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.assessment_id)
        .bind(&record.question_number)
        .bind(&record.question_text)
        .bind(record.score)
        .bind(record.provisional_score)
        .bind(&record.remark)
        .bind(&record.snippet)
        .bind(&keywords)
        .bind(record.is_dirty)
        .bind(record.is_final)
        .bind(ts(&record.updated_at))
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, session_id, phase, user_text, assistant_text, \
     user_sent_at, assistant_sent_at, user_marker, assistant_marker";

const SESSION_COLUMNS: &str = "id, conversation_id, status, phase, node_id, retry_count, \
     is_initial, last_outgoing, revision, created_at, updated_at";

const ASSESSMENT_COLUMNS: &str =
    "id, patient_id, session_id, phase, status, started_at, completed_at";

#[async_trait]
impl Storage for SqliteStorage {
    async fn get_or_create_patient(&self, username: &str) -> StorageResult<Patient> {
        let candidate = Patient::new(username);
        sqlx::query(
            r#"
            INSERT INTO patients (id, username, current_phase, created_at, updated_at)
            VALUES (?, ?, NULL, ?, ?)
            ON CONFLICT (username) DO NOTHING
            "#,
        )
        .bind(&candidate.id)
        .bind(&candidate.username)
        .bind(ts(&candidate.created_at))
        .bind(ts(&candidate.updated_at))
        .execute(&self.pool)
        .await?;

        let row: PatientRow = sqlx::query_as(
            r#"
            SELECT id, username, current_phase, created_at, updated_at
            FROM patients
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_patient(&self, id: &str) -> StorageResult<Option<Patient>> {
        let row: Option<PatientRow> = sqlx::query_as(
            r#"
            SELECT id, username, current_phase, created_at, updated_at
            FROM patients
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn find_patient(&self, username: &str) -> StorageResult<Option<Patient>> {
        let row: Option<PatientRow> = sqlx::query_as(
            r#"
            SELECT id, username, current_phase, created_at, updated_at
            FROM patients
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn get_or_create_conversation(&self, patient_id: &str) -> StorageResult<Conversation> {
        let candidate = Conversation::new(patient_id);
        sqlx::query(
            r#"
            INSERT INTO conversations (id, patient_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT (patient_id) DO NOTHING
            "#,
        )
        .bind(&candidate.id)
        .bind(&candidate.patient_id)
        .bind(ts(&candidate.created_at))
        .execute(&self.pool)
        .await?;

        let row: ConversationRow = sqlx::query_as(
            "SELECT id, patient_id, created_at FROM conversations WHERE patient_id = ?",
        )
        .bind(patient_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_conversation(&self, id: &str) -> StorageResult<Option<Conversation>> {
        let row: Option<ConversationRow> =
            sqlx::query_as("SELECT id, patient_id, created_at FROM conversations WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn find_conversation(&self, patient_id: &str) -> StorageResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            "SELECT id, patient_id, created_at FROM conversations WHERE patient_id = ?",
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn create_session(&self, session: &ChatSession) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_sessions
                (id, conversation_id, status, phase, node_id, retry_count, is_initial,
                 last_outgoing, revision, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.conversation_id)
        .bind(session.status.to_string())
        .bind(&session.phase)
        .bind(session.node_id.to_string())
        .bind(session.retry_count as i64)
        .bind(session.is_initial)
        .bind(&session.last_outgoing)
        .bind(session.revision)
        .bind(ts(&session.created_at))
        .bind(ts(&session.updated_at))
        .execute(&self.pool)
        .await?;

        debug!(session_id = %session.id, phase = %session.phase, "Session created");
        Ok(())
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<ChatSession>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM chat_sessions WHERE id = ?",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChatSession::try_from).transpose()
    }

    async fn get_open_session(&self, conversation_id: &str) -> StorageResult<Option<ChatSession>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM chat_sessions \
             WHERE conversation_id = ? AND status = 'open' \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            SESSION_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChatSession::try_from).transpose()
    }

    async fn list_sessions(&self, conversation_id: &str) -> StorageResult<Vec<ChatSession>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM chat_sessions WHERE conversation_id = ? \
             ORDER BY created_at ASC, rowid ASC",
            SESSION_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChatSession::try_from).collect()
    }

    async fn abort_session(&self, session: &ChatSession) -> StorageResult<u64> {
        let mut tx = self.pool.begin().await?;
        let now = ts(&Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET status = 'aborted', revision = revision + 1, updated_at = ?
            WHERE id = ? AND status = 'open' AND revision = ?
            "#,
        )
        .bind(&now)
        .bind(&session.id)
        .bind(session.revision)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RevisionConflict {
                session_id: session.id.clone(),
                expected: session.revision,
            });
        }

        let aborted = sqlx::query(
            r#"
            UPDATE assessments
            SET status = 'aborted'
            WHERE session_id = ? AND status = 'pending'
            "#,
        )
        .bind(&session.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(aborted)
    }

    async fn create_message(&self, message: &ChatMessage) -> StorageResult<()> {
        let user_marker = serde_json::to_string(&message.user_marker).map_err(marker_error)?;
        let assistant_marker = message
            .assistant_marker
            .as_ref()
            .map(|m| serde_json::to_string(m))
            .transpose()
            .map_err(marker_error)?;

        sqlx::query(
            r#"
            INSERT INTO chat_messages
                (id, conversation_id, session_id, phase, user_text, assistant_text,
                 user_sent_at, assistant_sent_at, user_marker, assistant_marker)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.session_id)
        .bind(&message.phase)
        .bind(&message.user_text)
        .bind(&message.assistant_text)
        .bind(ts(&message.user_sent_at))
        .bind(message.assistant_sent_at.as_ref().map(ts))
        .bind(&user_marker)
        .bind(&assistant_marker)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_message(&self, id: &str) -> StorageResult<Option<ChatMessage>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM chat_messages WHERE id = ?",
            MESSAGE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChatMessage::try_from).transpose()
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<ChatMessage>> {
        let since = since.as_ref().map(ts);
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM chat_messages \
             WHERE conversation_id = ? AND (? IS NULL OR user_sent_at >= ?) \
             ORDER BY user_sent_at ASC, rowid ASC",
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .bind(&since)
        .bind(&since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn list_session_messages(&self, session_id: &str) -> StorageResult<Vec<ChatMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM chat_messages WHERE session_id = ? \
             ORDER BY user_sent_at ASC, rowid ASC",
            MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn list_phase_messages(
        &self,
        session_id: &str,
        phase: &str,
    ) -> StorageResult<Vec<ChatMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM chat_messages WHERE session_id = ? \
             AND (phase = ? OR json_extract(assistant_marker, '$.phase') = ?) \
             ORDER BY user_sent_at ASC, rowid ASC",
            MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .bind(phase)
        .bind(phase)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn last_answered_message(
        &self,
        conversation_id: &str,
    ) -> StorageResult<Option<ChatMessage>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM chat_messages \
             WHERE conversation_id = ? AND assistant_text IS NOT NULL \
             ORDER BY user_sent_at DESC, rowid DESC LIMIT 1",
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChatMessage::try_from).transpose()
    }

    async fn get_assessment(
        &self,
        session_id: &str,
        phase: &str,
    ) -> StorageResult<Option<Assessment>> {
        let row: Option<AssessmentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM assessments WHERE session_id = ? AND phase = ?",
            ASSESSMENT_COLUMNS
        ))
        .bind(session_id)
        .bind(phase)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Assessment::try_from).transpose()
    }

    async fn list_assessments(&self, patient_id: &str) -> StorageResult<Vec<Assessment>> {
        let rows: Vec<AssessmentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM assessments WHERE patient_id = ? \
             ORDER BY started_at ASC, rowid ASC",
            ASSESSMENT_COLUMNS
        ))
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Assessment::try_from).collect()
    }

    async fn get_records(&self, assessment_id: &str) -> StorageResult<Vec<AssessmentRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT id, assessment_id, question_number, question_text, score, provisional_score,
                   remark, snippet, keywords, is_dirty, is_final, updated_at
            FROM assessment_records
            WHERE assessment_id = ?
            ORDER BY question_number ASC
            "#,
        )
        .bind(assessment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn get_result(&self, assessment_id: &str) -> StorageResult<Option<AssessmentResult>> {
        let row: Option<ResultRow> = sqlx::query_as(
            r#"
            SELECT id, assessment_id, total_score, severity_label, created_at
            FROM assessment_results
            WHERE assessment_id = ?
            "#,
        )
        .bind(assessment_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn commit_turn(&self, commit: &TurnCommit) -> StorageResult<ChatSession> {
        let mut tx = self.pool.begin().await?;
        let session = &commit.session;
        let mut updated = session.clone();
        updated.revision = session.revision + 1;

        // Session position, guarded by the revision read at the start of the turn
        let result = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET status = ?, phase = ?, node_id = ?, retry_count = ?, is_initial = ?,
                last_outgoing = ?, revision = ?, updated_at = ?
            WHERE id = ? AND revision = ? AND status = 'open'
            "#,
        )
        .bind(updated.status.to_string())
        .bind(&updated.phase)
        .bind(updated.node_id.to_string())
        .bind(updated.retry_count as i64)
        .bind(updated.is_initial)
        .bind(&updated.last_outgoing)
        .bind(updated.revision)
        .bind(ts(&updated.updated_at))
        .bind(&session.id)
        .bind(session.revision)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RevisionConflict {
                session_id: session.id.clone(),
                expected: session.revision,
            });
        }

        // Assistant half of the turn
        let user_marker = serde_json::to_string(&commit.user_marker).map_err(marker_error)?;
        let assistant_marker =
            serde_json::to_string(&commit.assistant_marker).map_err(marker_error)?;
        let result = sqlx::query(
            r#"
            UPDATE chat_messages
            SET assistant_text = ?, assistant_sent_at = ?, user_marker = ?, assistant_marker = ?
            WHERE id = ? AND session_id = ?
            "#,
        )
        .bind(&commit.assistant_text)
        .bind(ts(&commit.assistant_sent_at))
        .bind(&user_marker)
        .bind(&assistant_marker)
        .bind(&commit.message_id)
        .bind(&session.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::MessageNotFound {
                message_id: commit.message_id.clone(),
            });
        }

        if let Some(assessment) = &commit.assessment {
            sqlx::query(
                r#"
                INSERT INTO assessments
                    (id, patient_id, session_id, phase, status, started_at, completed_at)
                VALUES (?, ?, ?, ?, ?, ?, NULL)
                ON CONFLICT (session_id, phase) DO NOTHING
                "#,
            )
            .bind(&assessment.id)
            .bind(&assessment.patient_id)
            .bind(&assessment.session_id)
            .bind(&assessment.phase)
            .bind(assessment.status.to_string())
            .bind(ts(&assessment.started_at))
            .execute(&mut *tx)
            .await?;
        }

        if let Some(record) = &commit.provisional {
            Self::upsert_record(&mut tx, record).await?;
        }

        if let Some(finalization) = &commit.finalization {
            let assessment_id = &finalization.assessment_id;

            let (existing,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM assessment_results WHERE assessment_id = ?")
                    .bind(assessment_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if existing > 0 {
                return Err(StorageError::DuplicateResult {
                    assessment_id: assessment_id.clone(),
                });
            }

            for record in &finalization.records {
                Self::upsert_record(&mut tx, record).await?;
            }

            let result = &finalization.result;
            sqlx::query(
                r#"
                INSERT INTO assessment_results
                    (id, assessment_id, total_score, severity_label, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&result.id)
            .bind(&result.assessment_id)
            .bind(result.total_score)
            .bind(&result.severity_label)
            .bind(ts(&result.created_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    StorageError::DuplicateResult {
                        assessment_id: assessment_id.clone(),
                    }
                }
                other => StorageError::Sqlx(other),
            })?;

            let completed = sqlx::query(
                r#"
                UPDATE assessments
                SET status = 'completed', completed_at = ?
                WHERE id = ? AND status = 'pending'
                "#,
            )
            .bind(ts(&finalization.completed_at))
            .bind(assessment_id)
            .execute(&mut *tx)
            .await?;

            if completed.rows_affected() == 0 {
                return Err(StorageError::DuplicateResult {
                    assessment_id: assessment_id.clone(),
                });
            }
        }

        if let Some((patient_id, phase)) = &commit.patient_phase {
            sqlx::query("UPDATE patients SET current_phase = ?, updated_at = ? WHERE id = ?")
                .bind(phase)
                .bind(ts(&Utc::now()))
                .bind(patient_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(
            session_id = %updated.id,
            revision = updated.revision,
            node_id = %updated.node_id,
            "Turn committed"
        );
        Ok(updated)
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn marker_error(e: serde_json::Error) -> StorageError {
    StorageError::Query {
        message: format!("Invalid marker JSON: {}", e),
    }
}

fn invalid_column(column: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::Query {
        message: format!("Invalid value in column {}: {}", column, e),
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct PatientRow {
    id: String,
    username: String,
    current_phase: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<PatientRow> for Patient {
    fn from(row: PatientRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            current_phase: row.current_phase,
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: String,
    patient_id: String,
    created_at: String,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id,
            patient_id: row.patient_id,
            created_at: parse_ts(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    conversation_id: String,
    status: String,
    phase: String,
    node_id: String,
    retry_count: i64,
    is_initial: bool,
    last_outgoing: Option<String>,
    revision: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SessionRow> for ChatSession {
    type Error = StorageError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: SessionStatus::from_str(&row.status)
                .map_err(|e| invalid_column("chat_sessions.status", e))?,
            retry_count: u32::try_from(row.retry_count)
                .map_err(|e| invalid_column("chat_sessions.retry_count", e))?,
            node_id: Target::from(row.node_id),
            id: row.id,
            conversation_id: row.conversation_id,
            phase: row.phase,
            is_initial: row.is_initial,
            last_outgoing: row.last_outgoing,
            revision: row.revision,
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    session_id: String,
    phase: String,
    user_text: String,
    assistant_text: Option<String>,
    user_sent_at: String,
    assistant_sent_at: Option<String>,
    user_marker: String,
    assistant_marker: Option<String>,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = StorageError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_marker: serde_json::from_str(&row.user_marker).map_err(marker_error)?,
            assistant_marker: row
                .assistant_marker
                .as_deref()
                .map(|m| serde_json::from_str::<AssistantMarker>(m))
                .transpose()
                .map_err(marker_error)?,
            id: row.id,
            conversation_id: row.conversation_id,
            session_id: row.session_id,
            phase: row.phase,
            user_text: row.user_text,
            assistant_text: row.assistant_text,
            user_sent_at: parse_ts(&row.user_sent_at),
            assistant_sent_at: row.assistant_sent_at.as_deref().map(parse_ts),
        })
    }
}

#[derive(sqlx::FromRow)]
struct AssessmentRow {
    id: String,
    patient_id: String,
    session_id: String,
    phase: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
}

impl TryFrom<AssessmentRow> for Assessment {
    type Error = StorageError;

    fn try_from(row: AssessmentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: AssessmentStatus::from_str(&row.status)
                .map_err(|e| invalid_column("assessments.status", e))?,
            id: row.id,
            patient_id: row.patient_id,
            session_id: row.session_id,
            phase: row.phase,
            started_at: parse_ts(&row.started_at),
            completed_at: row.completed_at.as_deref().map(parse_ts),
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: String,
    assessment_id: String,
    question_number: String,
    question_text: String,
    score: i64,
    provisional_score: Option<i64>,
    remark: String,
    snippet: String,
    keywords: String,
    is_dirty: bool,
    is_final: bool,
    updated_at: String,
}

impl From<RecordRow> for AssessmentRecord {
    fn from(row: RecordRow) -> Self {
        Self {
            id: row.id,
            assessment_id: row.assessment_id,
            question_number: row.question_number,
            question_text: row.question_text,
            score: row.score,
            provisional_score: row.provisional_score,
            remark: row.remark,
            snippet: row.snippet,
            keywords: serde_json::from_str(&row.keywords).unwrap_or_default(),
            is_dirty: row.is_dirty,
            is_final: row.is_final,
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    id: String,
    assessment_id: String,
    total_score: i64,
    severity_label: String,
    created_at: String,
}

impl From<ResultRow> for AssessmentResult {
    fn from(row: ResultRow) -> Self {
        Self {
            id: row.id,
            assessment_id: row.assessment_id,
            total_score: row.total_score,
            severity_label: row.severity_label,
            created_at: parse_ts(&row.created_at),
        }
    }
}
