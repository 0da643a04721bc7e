//! Read-side queries over persisted chat turns.
//!
//! [`ConversationStore`] wraps the [`Storage`] collaborator with the history
//! views the pipeline and the read tools need, plus the two renderings sent
//! to the oracle: a role-tagged transcript and a detailed per-message map.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};

use crate::error::StorageResult;
use crate::pipeline::state::AssistantMarker;
use crate::storage::{ChatMessage, Storage};

/// History queries over one storage backend.
#[derive(Clone)]
pub struct ConversationStore {
    storage: Arc<dyn Storage>,
}

impl ConversationStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Every message of a conversation, oldest first.
    pub async fn history(&self, conversation_id: &str) -> StorageResult<Vec<ChatMessage>> {
        self.storage.list_messages(conversation_id, None).await
    }

    /// Messages sent within the last `hours` hours.
    pub async fn recent(
        &self,
        conversation_id: &str,
        hours: i64,
    ) -> StorageResult<Vec<ChatMessage>> {
        self.recent_since(conversation_id, Utc::now() - Duration::hours(hours))
            .await
    }

    pub async fn recent_since(
        &self,
        conversation_id: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<ChatMessage>> {
        self.storage.list_messages(conversation_id, Some(since)).await
    }

    pub async fn session_history(&self, session_id: &str) -> StorageResult<Vec<ChatMessage>> {
        self.storage.list_session_messages(session_id).await
    }

    /// Messages that belong to one phase within a session.
    pub async fn phase_history(
        &self,
        session_id: &str,
        phase: &str,
    ) -> StorageResult<Vec<ChatMessage>> {
        self.storage.list_phase_messages(session_id, phase).await
    }

    /// Marker of the most recent assistant reply in the conversation.
    pub async fn last_assistant_marker(
        &self,
        conversation_id: &str,
    ) -> StorageResult<Option<AssistantMarker>> {
        Ok(self
            .storage
            .last_answered_message(conversation_id)
            .await?
            .and_then(|m| m.assistant_marker))
    }
}

/// Timestamp prefix for human lines, e.g. `3 mar 2025 9:05am`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%-d %b %Y %-I:%M%p").to_string().to_lowercase()
}

/// Role-tagged transcript: `human: <ts> <text>` and `ai: <text>` lines.
pub fn render_transcript(messages: &[ChatMessage]) -> String {
    let mut lines = Vec::with_capacity(messages.len() * 2);
    for message in messages {
        lines.push(format!(
            "human: {} {}",
            format_timestamp(&message.user_sent_at),
            message.user_text
        ));
        if let Some(reply) = &message.assistant_text {
            lines.push(format!("ai: {}", reply));
        }
    }
    lines.join("\n")
}

/// Per-message map keyed by message id, with markers and timestamps. Keys
/// keep the order of `messages`.
pub fn detailed_map(messages: &[ChatMessage]) -> Value {
    let mut map = Map::new();
    for message in messages {
        map.insert(
            message.id.clone(),
            json!({
                "human": message.user_text,
                "ai": message.assistant_text,
                "user_marker": message.user_marker,
                "ai_marker": message.assistant_marker,
                "timestamp": message.user_sent_at.to_rfc3339(),
            }),
        );
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::Target;
    use crate::pipeline::state::ConversationalState;
    use crate::storage::ChatSession;
    use chrono::TimeZone;

    fn answered(session: &ChatSession, text: &str, reply: &str, at: DateTime<Utc>) -> ChatMessage {
        let mut message = ChatMessage::from_user(session, text).with_sent_at(at);
        message.assistant_text = Some(reply.to_string());
        message.assistant_sent_at = Some(at);
        message.assistant_marker = Some(AssistantMarker {
            state: ConversationalState::Normal,
            phase: session.phase.clone(),
            node_id: Target::from("2"),
            retry_count: 0,
        });
        message
    }

    #[test]
    fn test_format_timestamp_lowercase() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 3, 21, 5, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "3 mar 2025 9:05pm");
    }

    #[test]
    fn test_render_transcript_roles() {
        let session = ChatSession::new("conv", "assessment.phq9", "1");
        let ts = Utc.with_ymd_and_hms(2025, 1, 10, 8, 30, 0).unwrap();
        let messages = vec![
            answered(&session, "hello", "Hi! How have you been sleeping?", ts),
            ChatMessage::from_user(&session, "badly").with_sent_at(ts),
        ];

        let transcript = render_transcript(&messages);
        let lines: Vec<&str> = transcript.lines().collect();
        assert_eq!(
            lines,
            vec![
                "human: 10 jan 2025 8:30am hello",
                "ai: Hi! How have you been sleeping?",
                "human: 10 jan 2025 8:30am badly",
            ]
        );
    }

    #[test]
    fn test_detailed_map_keeps_chronological_order() {
        let session = ChatSession::new("conv", "assessment.phq9", "1");
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
        let messages: Vec<ChatMessage> = (0..12)
            .map(|i| {
                let at = start + chrono::Duration::minutes(i);
                answered(&session, &format!("answer {}", i), "ok", at)
            })
            .collect();

        let map = detailed_map(&messages);
        let keys: Vec<&String> = map.as_object().unwrap().keys().collect();
        let ids: Vec<&String> = messages.iter().map(|m| &m.id).collect();
        assert_eq!(keys, ids);
        let text = map.to_string();
        assert!(text.find("answer 0") < text.find("answer 11"));
    }

    #[test]
    fn test_detailed_map_keys_by_message_id() {
        let session = ChatSession::new("conv", "assessment.gad7", "1");
        let message = answered(&session, "not really", "Okay.", Utc::now());
        let map = detailed_map(std::slice::from_ref(&message));

        let entry = &map[&message.id];
        assert_eq!(entry["human"], "not really");
        assert_eq!(entry["ai"], "Okay.");
        assert_eq!(entry["user_marker"]["status"], "pending");
        assert_eq!(entry["ai_marker"]["state"], "NORMAL");
    }
}
