//! 内置消息处理器
//!
//! 每个处理器只负责调用与其类型相应的协作者，广播事件沿用原消息的
//! 类型标签，并且只发往来源会话。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{InboundMessage, MessageKind, ParticipantStatus, QueuedMessage};
use serde_json::json;

use crate::collaborators::{Collaborators, StructuredMessageType};
use crate::error::HandlerError;
use crate::registry::{HandlerRegistry, MessageHandler};

async fn broadcast_event(
    collaborators: &Collaborators,
    message: &QueuedMessage,
) -> Result<(), HandlerError> {
    collaborators
        .broadcaster
        .broadcast(message.broadcast_event(), &message.session_id)
        .await?;
    Ok(())
}

/// 文本消息：持久化后广播
pub struct TextMessageHandler {
    collaborators: Collaborators,
}

#[async_trait]
impl MessageHandler for TextMessageHandler {
    async fn handle(&self, message: Arc<QueuedMessage>) -> Result<(), HandlerError> {
        let InboundMessage::TextMessage(text) = &message.payload else {
            return Err(HandlerError::UnexpectedPayload {
                expected: "text_message",
            });
        };

        let stored_id = self
            .collaborators
            .messaging
            .send_structured_message(
                &message.session_id,
                &message.sender(),
                json!(text.content),
                StructuredMessageType::Text,
            )
            .await?;
        tracing::debug!(message_id = %message.id, stored_id = %stored_id, "Text message stored");

        broadcast_event(&self.collaborators, &message).await
    }
}

/// 文件分享：保存引用记录后广播
pub struct FileShareHandler {
    collaborators: Collaborators,
}

#[async_trait]
impl MessageHandler for FileShareHandler {
    async fn handle(&self, message: Arc<QueuedMessage>) -> Result<(), HandlerError> {
        let InboundMessage::FileShare(share) = &message.payload else {
            return Err(HandlerError::UnexpectedPayload {
                expected: "file_share",
            });
        };

        self.collaborators
            .messaging
            .send_structured_message(
                &message.session_id,
                &message.sender(),
                json!({
                    "file_name": share.file_name,
                    "file_size": share.file_size,
                    "file_type": share.file_type,
                    "file_url": share.file_url,
                    "description": share.description,
                }),
                StructuredMessageType::FileReference,
            )
            .await?;

        broadcast_event(&self.collaborators, &message).await
    }
}

/// 发起投票：发送系统公告后广播投票事件
pub struct PollCreateHandler {
    collaborators: Collaborators,
}

#[async_trait]
impl MessageHandler for PollCreateHandler {
    async fn handle(&self, message: Arc<QueuedMessage>) -> Result<(), HandlerError> {
        let InboundMessage::PollCreate(poll) = &message.payload else {
            return Err(HandlerError::UnexpectedPayload {
                expected: "poll_create",
            });
        };

        self.collaborators
            .messaging
            .send_system_message(
                &message.session_id,
                format!("{} started a poll: {}", message.metadata.username, poll.question),
            )
            .await?;

        broadcast_event(&self.collaborators, &message).await
    }
}

/// 公告：发送系统消息后广播
pub struct AnnouncementHandler {
    collaborators: Collaborators,
}

#[async_trait]
impl MessageHandler for AnnouncementHandler {
    async fn handle(&self, message: Arc<QueuedMessage>) -> Result<(), HandlerError> {
        let InboundMessage::Announcement(announcement) = &message.payload else {
            return Err(HandlerError::UnexpectedPayload {
                expected: "announcement",
            });
        };

        self.collaborators
            .messaging
            .send_system_message(&message.session_id, announcement.content.clone())
            .await?;

        broadcast_event(&self.collaborators, &message).await
    }
}

/// 举手 / 放下：更新参与者状态后广播
pub struct HandStatusHandler {
    collaborators: Collaborators,
}

#[async_trait]
impl MessageHandler for HandStatusHandler {
    async fn handle(&self, message: Arc<QueuedMessage>) -> Result<(), HandlerError> {
        let new_status = match &message.payload {
            InboundMessage::HandRaise(_) => ParticipantStatus::HandRaised,
            InboundMessage::HandLower => ParticipantStatus::Active,
            _ => {
                return Err(HandlerError::UnexpectedPayload {
                    expected: "hand_raise",
                })
            }
        };

        self.collaborators
            .participant_status
            .update_participant_status(
                &message.session_id,
                message.user_id,
                new_status,
                message.user_id,
            )
            .await?;

        broadcast_event(&self.collaborators, &message).await
    }
}

/// 正在输入、投票、表情回应等只需广播、不持久化的事件
pub struct BroadcastOnlyHandler {
    collaborators: Collaborators,
}

#[async_trait]
impl MessageHandler for BroadcastOnlyHandler {
    async fn handle(&self, message: Arc<QueuedMessage>) -> Result<(), HandlerError> {
        broadcast_event(&self.collaborators, &message).await
    }
}

/// 为全部内置类型注册处理器
pub fn register_default_handlers(registry: &HandlerRegistry, collaborators: &Collaborators) {
    let hand: Arc<dyn MessageHandler> = Arc::new(HandStatusHandler {
        collaborators: collaborators.clone(),
    });
    let broadcast_only: Arc<dyn MessageHandler> = Arc::new(BroadcastOnlyHandler {
        collaborators: collaborators.clone(),
    });

    registry.register(MessageKind::TypingStart, broadcast_only.clone());
    registry.register(MessageKind::TypingStop, broadcast_only.clone());
    registry.register(
        MessageKind::TextMessage,
        Arc::new(TextMessageHandler {
            collaborators: collaborators.clone(),
        }),
    );
    registry.register(
        MessageKind::FileShare,
        Arc::new(FileShareHandler {
            collaborators: collaborators.clone(),
        }),
    );
    registry.register(
        MessageKind::PollCreate,
        Arc::new(PollCreateHandler {
            collaborators: collaborators.clone(),
        }),
    );
    registry.register(MessageKind::PollVote, broadcast_only.clone());
    registry.register(MessageKind::HandRaise, hand.clone());
    registry.register(MessageKind::HandLower, hand);
    registry.register(
        MessageKind::Announcement,
        Arc::new(AnnouncementHandler {
            collaborators: collaborators.clone(),
        }),
    );
    registry.register(MessageKind::Reaction, broadcast_only);
}
