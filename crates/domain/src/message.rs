//! 入站消息与排队消息
//!
//! 原始事件在准入时被解析为封闭的 `InboundMessage` 和类型，
//! 之后不再重新解析原始 JSON。

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::participant::Participant;
use crate::priority::MessagePriority;
use crate::value_objects::{ConnectionId, MessageId, SessionId, Timestamp, UserId};

/// 消息类型标签（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    TextMessage,
    TypingStart,
    TypingStop,
    FileShare,
    PollCreate,
    PollVote,
    HandRaise,
    HandLower,
    Announcement,
    Reaction,
}

impl MessageKind {
    pub const ALL: [MessageKind; 10] = [
        MessageKind::TextMessage,
        MessageKind::TypingStart,
        MessageKind::TypingStop,
        MessageKind::FileShare,
        MessageKind::PollCreate,
        MessageKind::PollVote,
        MessageKind::HandRaise,
        MessageKind::HandLower,
        MessageKind::Announcement,
        MessageKind::Reaction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextMessage => "text_message",
            Self::TypingStart => "typing_start",
            Self::TypingStop => "typing_stop",
            Self::FileShare => "file_share",
            Self::PollCreate => "poll_create",
            Self::PollVote => "poll_vote",
            Self::HandRaise => "hand_raise",
            Self::HandLower => "hand_lower",
            Self::Announcement => "announcement",
            Self::Reaction => "reaction",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 文本消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub content: String,
}

/// 文件分享
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileShare {
    pub file_name: String,
    /// 文件大小（字节）
    pub file_size: u64,
    /// MIME类型
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FileShare {
    /// 小写的扩展名，没有扩展名时返回 None
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.file_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// 投票选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
}

/// 发起投票
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCreate {
    pub poll_id: String,
    pub question: String,
    pub options: Vec<PollOption>,
    #[serde(default)]
    pub multiple_choice: bool,
    #[serde(default)]
    pub anonymous: bool,
    /// 投票持续时间（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// 投票
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollVote {
    pub poll_id: String,
    pub option_indices: Vec<usize>,
}

/// 举手
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HandRaise {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// 会话公告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub content: String,
}

/// 对某条消息的表情回应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub target_message_id: String,
    pub emoji: String,
}

/// 经过校验与清洗的入站消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    TextMessage(TextMessage),
    TypingStart,
    TypingStop,
    FileShare(FileShare),
    PollCreate(PollCreate),
    PollVote(PollVote),
    HandRaise(HandRaise),
    HandLower,
    Announcement(Announcement),
    Reaction(Reaction),
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::TextMessage(_) => MessageKind::TextMessage,
            Self::TypingStart => MessageKind::TypingStart,
            Self::TypingStop => MessageKind::TypingStop,
            Self::FileShare(_) => MessageKind::FileShare,
            Self::PollCreate(_) => MessageKind::PollCreate,
            Self::PollVote(_) => MessageKind::PollVote,
            Self::HandRaise(_) => MessageKind::HandRaise,
            Self::HandLower => MessageKind::HandLower,
            Self::Announcement(_) => MessageKind::Announcement,
            Self::Reaction(_) => MessageKind::Reaction,
        }
    }
}

/// 处理器需要、但不属于消息载荷的上下文
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageMetadata {
    /// 消息来源连接
    pub connection_id: ConnectionId,
    /// 发送者显示名
    pub username: String,
}

/// 准入后进入队列的消息，入队后不可变
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub payload: InboundMessage,
    pub priority: MessagePriority,
    pub session_id: SessionId,
    pub user_id: UserId,
    /// 准入时间
    pub created_at: Timestamp,
    /// 准入序号，同一优先级内按其先进先出
    pub sequence: u64,
    pub metadata: MessageMetadata,
}

impl QueuedMessage {
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// 发送者信息
    pub fn sender(&self) -> Participant {
        Participant::new(self.user_id, self.metadata.username.clone())
    }

    /// 广播到会话的事件，类型标签与原消息一致
    pub fn broadcast_event(&self) -> Value {
        let mut event = match serde_json::to_value(&self.payload) {
            Ok(Value::Object(map)) => map,
            _ => {
                let mut map = Map::new();
                map.insert("type".into(), Value::String(self.kind().as_str().into()));
                map
            }
        };
        event.insert("message_id".into(), Value::String(self.id.to_string()));
        event.insert(
            "session_id".into(),
            Value::String(self.session_id.to_string()),
        );
        event.insert("user_id".into(), Value::String(self.user_id.to_string()));
        event.insert(
            "username".into(),
            Value::String(self.metadata.username.clone()),
        );
        event.insert(
            "priority".into(),
            Value::String(self.priority.as_str().into()),
        );
        event.insert(
            "timestamp".into(),
            Value::String(self.created_at.to_rfc3339()),
        );
        Value::Object(event)
    }
}
