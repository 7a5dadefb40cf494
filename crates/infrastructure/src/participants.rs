//! 内存参与者状态表

use std::collections::HashMap;

use application::{ParticipantStatusService, StatusError};
use async_trait::async_trait;
use domain::{Participant, ParticipantStatus, SessionId, UserId};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct ParticipantEntry {
    participant: Participant,
    status: ParticipantStatus,
    /// 同一用户在该会话中的连接数
    connections: u32,
}

/// 会话 → 用户 → 状态
#[derive(Default)]
pub struct InMemoryParticipantRegistry {
    sessions: RwLock<HashMap<SessionId, HashMap<UserId, ParticipantEntry>>>,
}

impl InMemoryParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 连接加入会话。重复加入只增加连接计数。
    pub async fn join(&self, session_id: &SessionId, participant: Participant) {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.clone())
            .or_default()
            .entry(participant.user_id)
            .and_modify(|entry| entry.connections += 1)
            .or_insert(ParticipantEntry {
                participant,
                status: ParticipantStatus::Active,
                connections: 1,
            });
    }

    /// 连接离开会话，最后一个连接离开时移除参与者
    pub async fn leave(&self, session_id: &SessionId, user_id: UserId) {
        let mut sessions = self.sessions.write().await;
        let Some(members) = sessions.get_mut(session_id) else {
            return;
        };
        if let Some(entry) = members.get_mut(&user_id) {
            entry.connections = entry.connections.saturating_sub(1);
            if entry.connections == 0 {
                members.remove(&user_id);
            }
        }
        if members.is_empty() {
            sessions.remove(session_id);
        }
    }

    pub async fn status(&self, session_id: &SessionId, user_id: UserId) -> Option<ParticipantStatus> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .and_then(|members| members.get(&user_id))
            .map(|entry| entry.status)
    }

    pub async fn participants(&self, session_id: &SessionId) -> Vec<(Participant, ParticipantStatus)> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|members| {
                members
                    .values()
                    .map(|entry| (entry.participant.clone(), entry.status))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ParticipantStatusService for InMemoryParticipantRegistry {
    async fn update_participant_status(
        &self,
        session_id: &SessionId,
        user_id: UserId,
        new_status: ParticipantStatus,
        changed_by: UserId,
    ) -> Result<(), StatusError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .and_then(|members| members.get_mut(&user_id))
            .ok_or_else(|| StatusError::ParticipantNotFound {
                session_id: session_id.clone(),
                user_id,
            })?;

        let previous = std::mem::replace(&mut entry.status, new_status);
        tracing::debug!(
            session_id = %session_id,
            user_id = %user_id,
            changed_by = %changed_by,
            from = %previous,
            to = %new_status,
            "Participant status changed"
        );
        Ok(())
    }
}
