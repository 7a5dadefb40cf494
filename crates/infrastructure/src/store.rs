//! 内存消息存储

use std::collections::{HashMap, VecDeque};

use application::{MessagingError, MessagingService, StructuredMessageType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{MessageId, Participant, SessionId};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

/// 已保存的消息记录
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    /// 系统消息没有发送者
    pub sender: Option<Participant>,
    pub content: Value,
    pub message_type: StructuredMessageType,
    pub created_at: DateTime<Utc>,
}

/// 每个会话保留最近 `history_limit` 条消息
pub struct InMemoryMessageStore {
    sessions: RwLock<HashMap<SessionId, VecDeque<StoredMessage>>>,
    history_limit: usize,
}

impl InMemoryMessageStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            history_limit: history_limit.max(1),
        }
    }

    /// 会话最近的消息，按保存顺序
    pub async fn history(&self, session_id: &SessionId) -> Vec<StoredMessage> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|messages| messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn append(&self, message: StoredMessage) -> MessageId {
        let id = message.id;
        let mut sessions = self.sessions.write().await;
        let messages = sessions.entry(message.session_id.clone()).or_default();
        if messages.len() >= self.history_limit {
            messages.pop_front();
        }
        messages.push_back(message);
        id
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new(500)
    }
}

#[async_trait]
impl MessagingService for InMemoryMessageStore {
    async fn send_structured_message(
        &self,
        session_id: &SessionId,
        sender: &Participant,
        content: Value,
        message_type: StructuredMessageType,
    ) -> Result<MessageId, MessagingError> {
        if message_type == StructuredMessageType::System {
            return Err(MessagingError::Rejected(
                "system messages must not carry a sender".to_string(),
            ));
        }

        Ok(self
            .append(StoredMessage {
                id: MessageId::generate(),
                session_id: session_id.clone(),
                sender: Some(sender.clone()),
                content,
                message_type,
                created_at: Utc::now(),
            })
            .await)
    }

    async fn send_system_message(
        &self,
        session_id: &SessionId,
        content: String,
    ) -> Result<MessageId, MessagingError> {
        Ok(self
            .append(StoredMessage {
                id: MessageId::generate(),
                session_id: session_id.clone(),
                sender: None,
                content: Value::String(content),
                message_type: StructuredMessageType::System,
                created_at: Utc::now(),
            })
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::UserId;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_history_is_bounded_per_session() {
        let store = InMemoryMessageStore::new(2);
        let room = SessionId::parse("room").unwrap();
        let sender = Participant::new(UserId::from(Uuid::new_v4()), "mallory");

        for i in 0..3 {
            store
                .send_structured_message(&room, &sender, json!(i), StructuredMessageType::Text)
                .await
                .unwrap();
        }
        store
            .send_system_message(&SessionId::parse("other").unwrap(), "hello".into())
            .await
            .unwrap();

        let history = store.history(&room).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, json!(1));
        assert_eq!(history[1].content, json!(2));
    }

    #[tokio::test]
    async fn test_system_type_requires_system_call() {
        let store = InMemoryMessageStore::default();
        let room = SessionId::parse("room").unwrap();
        let sender = Participant::new(UserId::from(Uuid::new_v4()), "mallory");
        let result = store
            .send_structured_message(&room, &sender, json!("x"), StructuredMessageType::System)
            .await;
        assert!(matches!(result, Err(MessagingError::Rejected(_))));
    }
}
