//! Session resolution: resume the open session or abort it on inactivity.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::assessment::PhaseRegistry;
use crate::error::{AppResult, PipelineError, StorageError};
use crate::storage::{ChatSession, Storage};

/// Decides whether a conversation's open session is resumed or replaced.
#[derive(Clone)]
pub struct SessionLifecycleManager {
    storage: Arc<dyn Storage>,
    registry: Arc<PhaseRegistry>,
    timeout: Duration,
}

impl SessionLifecycleManager {
    pub fn new(storage: Arc<dyn Storage>, registry: Arc<PhaseRegistry>, timeout: Duration) -> Self {
        Self {
            storage,
            registry,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open session for the conversation, and whether it was just created.
    pub async fn resolve_session(&self, conversation_id: &str) -> AppResult<(ChatSession, bool)> {
        self.resolve_session_at(conversation_id, Utc::now()).await
    }

    /// As [`resolve_session`](Self::resolve_session), evaluated at `now`.
    pub async fn resolve_session_at(
        &self,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<(ChatSession, bool)> {
        if let Some(session) = self.storage.get_open_session(conversation_id).await? {
            let started = self.session_start(&session).await?;
            if now - started <= self.timeout {
                return Ok((session, false));
            }

            let aborted = match self.storage.abort_session(&session).await {
                Ok(aborted) => aborted,
                Err(StorageError::RevisionConflict { session_id, .. }) => {
                    warn!(session_id = %session_id, "Session changed while timing out");
                    return Err(PipelineError::SessionTimeoutRace { session_id }.into());
                }
                Err(e) => return Err(e.into()),
            };
            info!(
                session_id = %session.id,
                phase = %session.phase,
                inactive_minutes = (now - started).num_minutes(),
                assessments_aborted = aborted,
                "Session timed out, aborted"
            );
        }

        let session = self.open_session(conversation_id).await?;
        Ok((session, true))
    }

    /// Time of the session's first user message, or its creation time.
    async fn session_start(&self, session: &ChatSession) -> AppResult<DateTime<Utc>> {
        let first = self
            .storage
            .list_session_messages(&session.id)
            .await?
            .into_iter()
            .next()
            .map(|m| m.user_sent_at);
        Ok(first.unwrap_or(session.created_at))
    }

    async fn open_session(&self, conversation_id: &str) -> AppResult<ChatSession> {
        let phase = self.registry.first_phase()?;
        let session = ChatSession::new(conversation_id, phase.name(), phase.base_node());
        self.storage.create_session(&session).await?;

        info!(
            session_id = %session.id,
            conversation_id = %conversation_id,
            phase = %session.phase,
            node_id = %session.node_id,
            "Session opened"
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::storage::MockStorage;

    fn stale_session() -> ChatSession {
        let mut session = ChatSession::new("conv-1", "assessment.phq9", "3");
        session.created_at = Utc::now() - Duration::days(3);
        session
    }

    fn manager(storage: MockStorage) -> SessionLifecycleManager {
        SessionLifecycleManager::new(
            Arc::new(storage),
            Arc::new(PhaseRegistry::with_defaults().unwrap()),
            Duration::minutes(30),
        )
    }

    #[tokio::test]
    async fn test_conflicting_abort_is_a_timeout_race() {
        let session = stale_session();
        let session_id = session.id.clone();

        let mut storage = MockStorage::new();
        storage
            .expect_get_open_session()
            .returning(move |_| Ok(Some(session.clone())));
        storage
            .expect_list_session_messages()
            .returning(|_| Ok(vec![]));
        storage.expect_abort_session().returning(|s| {
            Err(StorageError::RevisionConflict {
                session_id: s.id.clone(),
                expected: s.revision,
            })
        });
        storage.expect_create_session().never();

        let err = manager(storage).resolve_session("conv-1").await.unwrap_err();
        match err {
            AppError::Pipeline(PipelineError::SessionTimeoutRace { session_id: id }) => {
                assert_eq!(id, session_id)
            }
            other => panic!("expected a timeout race, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_other_abort_failures_pass_through() {
        let mut storage = MockStorage::new();
        storage
            .expect_get_open_session()
            .returning(|_| Ok(Some(stale_session())));
        storage
            .expect_list_session_messages()
            .returning(|_| Ok(vec![]));
        storage.expect_abort_session().returning(|_| {
            Err(StorageError::Query {
                message: "disk I/O error".to_string(),
            })
        });

        let err = manager(storage).resolve_session("conv-1").await.unwrap_err();
        assert!(matches!(err, AppError::Storage(StorageError::Query { .. })));
    }
}
