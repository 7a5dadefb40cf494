//! 处理器调用的外部协作者接口
//!
//! 连接/广播管理、消息持久化与通知、参与者状态服务都在路由核心之外，
//! 这里只定义调用契约。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{MessageId, Participant, ParticipantStatus, SessionId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("message rejected by store: {0}")]
    Rejected(String),
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("participant {user_id} not found in session {session_id}")]
    ParticipantNotFound {
        session_id: SessionId,
        user_id: UserId,
    },
    #[error("status update failed: {0}")]
    Failed(String),
}

/// 结构化消息的语义类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredMessageType {
    Text,
    FileReference,
    System,
}

/// 会话广播：向会话内所有连接扇出，发出即返回
#[async_trait]
pub trait SessionBroadcaster: Send + Sync {
    async fn broadcast(&self, event: Value, session_id: &SessionId) -> Result<(), BroadcastError>;
}

/// 消息持久化与投递
#[async_trait]
pub trait MessagingService: Send + Sync {
    async fn send_structured_message(
        &self,
        session_id: &SessionId,
        sender: &Participant,
        content: Value,
        message_type: StructuredMessageType,
    ) -> Result<MessageId, MessagingError>;

    async fn send_system_message(
        &self,
        session_id: &SessionId,
        content: String,
    ) -> Result<MessageId, MessagingError>;
}

/// 参与者在线/角色状态
#[async_trait]
pub trait ParticipantStatusService: Send + Sync {
    async fn update_participant_status(
        &self,
        session_id: &SessionId,
        user_id: UserId,
        new_status: ParticipantStatus,
        changed_by: UserId,
    ) -> Result<(), StatusError>;
}

/// 内置处理器共享的协作者集合
#[derive(Clone)]
pub struct Collaborators {
    pub broadcaster: Arc<dyn SessionBroadcaster>,
    pub messaging: Arc<dyn MessagingService>,
    pub participant_status: Arc<dyn ParticipantStatusService>,
}
