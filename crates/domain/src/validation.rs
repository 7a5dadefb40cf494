//! 入站消息校验规则
//!
//! 每种消息类型对应一个纯函数，返回清洗后的载荷或拒绝原因。
//! 校验不访问共享状态，也不会阻塞。

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RejectionReason;
use crate::message::{
    Announcement, FileShare, HandRaise, InboundMessage, MessageKind, PollCreate, PollOption,
    PollVote, Reaction, TextMessage,
};
use crate::priority::MessagePriority;
use crate::sanitizer::MarkupSanitizer;
use crate::value_objects::SessionId;

/// 清洗前原始内容的硬上限（字节），避免对超大输入运行正则
pub const MAX_RAW_CONTENT_BYTES: usize = 64 * 1024;

/// 校验阈值
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationLimits {
    /// 文本内容最大字符数（清洗后计算）
    pub max_text_length: usize,
    /// 文件最大字节数
    pub max_file_size_bytes: u64,
    /// 允许的文件扩展名（小写，不含点）
    pub allowed_file_extensions: Vec<String>,
    pub max_poll_options: usize,
    pub max_reason_length: usize,
    pub max_emoji_length: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_text_length: 4_000,
            max_file_size_bytes: 100 * 1024 * 1024,
            allowed_file_extensions: default_allowed_extensions(),
            max_poll_options: 10,
            max_reason_length: 200,
            max_emoji_length: 32,
        }
    }
}

/// 默认允许的文档与媒体类型
pub fn default_allowed_extensions() -> Vec<String> {
    [
        "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "txt", "md",
        "csv", "rtf", "png", "jpg", "jpeg", "gif", "webp", "bmp", "mp3", "wav", "ogg", "m4a",
        "flac", "mp4", "webm", "mov", "avi", "mkv", "zip",
    ]
    .iter()
    .map(|ext| ext.to_string())
    .collect()
}

/// 通过校验的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedMessage {
    pub payload: InboundMessage,
    pub priority: MessagePriority,
}

/// 消息校验器
#[derive(Debug, Clone, Default)]
pub struct MessageValidator {
    limits: ValidationLimits,
    sanitizer: MarkupSanitizer,
}

impl MessageValidator {
    pub fn new(limits: ValidationLimits) -> Self {
        Self {
            limits,
            sanitizer: MarkupSanitizer::default(),
        }
    }

    pub fn with_sanitizer(limits: ValidationLimits, sanitizer: MarkupSanitizer) -> Self {
        Self { limits, sanitizer }
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// 校验原始事件，`bound_session` 为连接所属会话
    pub fn validate(
        &self,
        raw: &Value,
        bound_session: &SessionId,
    ) -> Result<ValidatedMessage, RejectionReason> {
        let object = raw
            .as_object()
            .ok_or_else(|| RejectionReason::malformed("payload must be a JSON object"))?;

        let tag = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(RejectionReason::MissingField { field: "type" })?;

        let session = object
            .get("session_id")
            .and_then(Value::as_str)
            .ok_or(RejectionReason::MissingField {
                field: "session_id",
            })?;
        let session = SessionId::parse(session)?;
        if &session != bound_session {
            return Err(RejectionReason::SessionMismatch {
                expected: bound_session.to_string(),
                actual: session.to_string(),
            });
        }

        let kind = MessageKind::parse(tag).ok_or_else(|| RejectionReason::UnknownType {
            tag: tag.to_owned(),
        })?;
        let priority = MessagePriority::from_hint(object.get("priority"));

        let payload = match kind {
            MessageKind::TextMessage => {
                InboundMessage::TextMessage(self.validate_text(parse_fields(raw)?)?)
            }
            MessageKind::TypingStart => InboundMessage::TypingStart,
            MessageKind::TypingStop => InboundMessage::TypingStop,
            MessageKind::FileShare => {
                InboundMessage::FileShare(self.validate_file_share(parse_fields(raw)?)?)
            }
            MessageKind::PollCreate => {
                InboundMessage::PollCreate(self.validate_poll_create(parse_fields(raw)?)?)
            }
            MessageKind::PollVote => {
                InboundMessage::PollVote(self.validate_poll_vote(parse_fields(raw)?)?)
            }
            MessageKind::HandRaise => {
                InboundMessage::HandRaise(self.validate_hand_raise(parse_fields(raw)?)?)
            }
            MessageKind::HandLower => InboundMessage::HandLower,
            MessageKind::Announcement => {
                InboundMessage::Announcement(self.validate_announcement(parse_fields(raw)?)?)
            }
            MessageKind::Reaction => {
                InboundMessage::Reaction(self.validate_reaction(parse_fields(raw)?)?)
            }
        };

        Ok(ValidatedMessage { payload, priority })
    }

    /// 清洗并检查长度
    fn clean_content(&self, content: &str) -> Result<String, RejectionReason> {
        if content.len() > MAX_RAW_CONTENT_BYTES {
            return Err(RejectionReason::ContentTooLong {
                length: content.chars().count(),
                max: self.limits.max_text_length,
            });
        }

        let cleaned = self.sanitizer.sanitize(content);
        if cleaned.trim().is_empty() {
            return Err(RejectionReason::EmptyContent);
        }

        let length = cleaned.chars().count();
        if length > self.limits.max_text_length {
            return Err(RejectionReason::ContentTooLong {
                length,
                max: self.limits.max_text_length,
            });
        }
        Ok(cleaned)
    }

    pub fn validate_text(&self, message: TextMessage) -> Result<TextMessage, RejectionReason> {
        Ok(TextMessage {
            content: self.clean_content(&message.content)?,
        })
    }

    pub fn validate_announcement(
        &self,
        message: Announcement,
    ) -> Result<Announcement, RejectionReason> {
        Ok(Announcement {
            content: self.clean_content(&message.content)?,
        })
    }

    pub fn validate_file_share(&self, share: FileShare) -> Result<FileShare, RejectionReason> {
        let file_name = share.file_name.trim().to_owned();
        if file_name.is_empty() {
            return Err(RejectionReason::invalid_field("file_name", "cannot be empty"));
        }
        if file_name.contains(['/', '\\']) || file_name.contains("..") {
            return Err(RejectionReason::invalid_field(
                "file_name",
                "must not contain path components",
            ));
        }

        let share = FileShare { file_name, ..share };
        let extension = share.extension().unwrap_or_default();
        if extension.is_empty()
            || !self
                .limits
                .allowed_file_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
        {
            return Err(RejectionReason::DisallowedFileType {
                extension: if extension.is_empty() {
                    "(none)".to_string()
                } else {
                    extension
                },
            });
        }

        if share.file_size > self.limits.max_file_size_bytes {
            return Err(RejectionReason::FileTooLarge {
                size: share.file_size,
                max: self.limits.max_file_size_bytes,
            });
        }

        let file_type = share.file_type.trim().to_owned();
        if file_type.is_empty() {
            return Err(RejectionReason::invalid_field("file_type", "cannot be empty"));
        }

        let description = share
            .description
            .as_deref()
            .map(|text| self.sanitizer.sanitize(text).trim().to_owned())
            .filter(|text| !text.is_empty());

        Ok(FileShare {
            file_type,
            description,
            ..share
        })
    }

    pub fn validate_poll_create(&self, poll: PollCreate) -> Result<PollCreate, RejectionReason> {
        if poll.poll_id.trim().is_empty() {
            return Err(RejectionReason::invalid_field("poll_id", "cannot be empty"));
        }

        let question = self.sanitizer.sanitize(&poll.question).trim().to_owned();
        if question.is_empty() {
            return Err(RejectionReason::invalid_field("question", "cannot be empty"));
        }

        let count = poll.options.len();
        if count < 2 {
            return Err(RejectionReason::TooFewPollOptions { count });
        }
        if count > self.limits.max_poll_options {
            return Err(RejectionReason::TooManyPollOptions {
                count,
                max: self.limits.max_poll_options,
            });
        }

        let mut seen = HashSet::with_capacity(count);
        let mut options = Vec::with_capacity(count);
        for option in poll.options {
            let text = self.sanitizer.sanitize(&option.text).trim().to_owned();
            if text.is_empty() {
                return Err(RejectionReason::invalid_field("options", "option text cannot be empty"));
            }
            if !seen.insert(text.to_lowercase()) {
                return Err(RejectionReason::DuplicatePollOption { text });
            }
            options.push(PollOption { text });
        }

        if poll.duration == Some(0) {
            return Err(RejectionReason::invalid_field("duration", "must be positive"));
        }

        Ok(PollCreate {
            question,
            options,
            ..poll
        })
    }

    pub fn validate_poll_vote(&self, vote: PollVote) -> Result<PollVote, RejectionReason> {
        if vote.poll_id.trim().is_empty() {
            return Err(RejectionReason::invalid_field("poll_id", "cannot be empty"));
        }
        if vote.option_indices.is_empty() {
            return Err(RejectionReason::invalid_field(
                "option_indices",
                "at least one option is required",
            ));
        }
        if vote.option_indices.iter().any(|&index| index >= self.limits.max_poll_options) {
            return Err(RejectionReason::invalid_field(
                "option_indices",
                "option index out of range",
            ));
        }
        let unique: HashSet<_> = vote.option_indices.iter().collect();
        if unique.len() != vote.option_indices.len() {
            return Err(RejectionReason::invalid_field(
                "option_indices",
                "duplicate option index",
            ));
        }
        Ok(vote)
    }

    pub fn validate_hand_raise(&self, raise: HandRaise) -> Result<HandRaise, RejectionReason> {
        let reason = match raise.reason {
            Some(reason) => {
                let cleaned = self.sanitizer.sanitize(&reason).trim().to_owned();
                if cleaned.chars().count() > self.limits.max_reason_length {
                    return Err(RejectionReason::invalid_field("reason", "too long"));
                }
                Some(cleaned).filter(|text| !text.is_empty())
            }
            None => None,
        };
        Ok(HandRaise { reason })
    }

    pub fn validate_reaction(&self, reaction: Reaction) -> Result<Reaction, RejectionReason> {
        let target_message_id = reaction.target_message_id.trim().to_owned();
        if target_message_id.is_empty() {
            return Err(RejectionReason::invalid_field(
                "target_message_id",
                "cannot be empty",
            ));
        }
        let emoji = reaction.emoji.trim().to_owned();
        if emoji.is_empty() || emoji.chars().count() > self.limits.max_emoji_length {
            return Err(RejectionReason::invalid_field("emoji", "invalid emoji"));
        }
        if emoji.contains(['<', '>']) {
            return Err(RejectionReason::invalid_field("emoji", "markup not allowed"));
        }
        Ok(Reaction {
            target_message_id,
            emoji,
        })
    }
}

fn parse_fields<T: DeserializeOwned>(raw: &Value) -> Result<T, RejectionReason> {
    serde_json::from_value(raw.clone()).map_err(|err| RejectionReason::malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> SessionId {
        SessionId::parse("session-1").unwrap()
    }

    fn validator() -> MessageValidator {
        MessageValidator::default()
    }

    #[test]
    fn test_text_message_accepted_and_sanitized() {
        let raw = json!({
            "type": "text_message",
            "session_id": "session-1",
            "content": "hello <em>team</em><script>alert(1)</script>"
        });
        let validated = validator().validate(&raw, &session()).unwrap();
        assert_eq!(validated.priority, MessagePriority::Normal);
        match validated.payload {
            InboundMessage::TextMessage(text) => assert_eq!(text.content, "hello <em>team</em>"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_text_message_too_long_rejected() {
        let raw = json!({
            "type": "text_message",
            "session_id": "session-1",
            "content": "x".repeat(5_000)
        });
        let err = validator().validate(&raw, &session()).unwrap_err();
        assert_eq!(
            err,
            RejectionReason::ContentTooLong {
                length: 5_000,
                max: 4_000
            }
        );

        let raw = json!({
            "type": "text_message",
            "session_id": "session-1",
            "content": "y".repeat(300)
        });
        assert!(validator().validate(&raw, &session()).is_ok());
    }

    #[test]
    fn test_length_measured_after_sanitizing() {
        let padding = format!("<script>{}</script>", "z".repeat(5_000));
        let raw = json!({
            "type": "text_message",
            "session_id": "session-1",
            "content": format!("short{padding}")
        });
        assert!(validator().validate(&raw, &session()).is_ok());
    }

    #[test]
    fn test_script_only_content_is_empty() {
        let raw = json!({
            "type": "text_message",
            "session_id": "session-1",
            "content": "<script>alert(1)</script>"
        });
        assert_eq!(
            validator().validate(&raw, &session()).unwrap_err(),
            RejectionReason::EmptyContent
        );
    }

    #[test]
    fn test_split_script_tag_not_admitted() {
        let raw = json!({
            "type": "text_message",
            "session_id": "session-1",
            "content": "hi <<div>script>alert(1)<</div>/script>"
        });
        match validator().validate(&raw, &session()).unwrap().payload {
            InboundMessage::TextMessage(text) => {
                assert!(!text.content.contains("<script"), "{}", text.content);
                assert!(text.content.starts_with("hi"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }

        let raw = json!({
            "type": "text_message",
            "session_id": "session-1",
            "content": "hi <img src=x onerror=alert(1) "
        });
        match validator().validate(&raw, &session()).unwrap().payload {
            InboundMessage::TextMessage(text) => {
                assert_eq!(text.content, "hi &lt;img src=x onerror=alert(1) ")
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_missing_routing_fields() {
        let raw = json!({ "session_id": "session-1" });
        assert_eq!(
            validator().validate(&raw, &session()).unwrap_err(),
            RejectionReason::MissingField { field: "type" }
        );

        let raw = json!({ "type": "typing_start" });
        assert_eq!(
            validator().validate(&raw, &session()).unwrap_err(),
            RejectionReason::MissingField {
                field: "session_id"
            }
        );

        assert!(matches!(
            validator().validate(&json!("text"), &session()),
            Err(RejectionReason::Malformed { .. })
        ));
    }

    #[test]
    fn test_session_mismatch_rejected() {
        let raw = json!({ "type": "typing_start", "session_id": "other" });
        assert!(matches!(
            validator().validate(&raw, &session()),
            Err(RejectionReason::SessionMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let raw = json!({ "type": "launch_missiles", "session_id": "session-1" });
        assert_eq!(
            validator().validate(&raw, &session()).unwrap_err(),
            RejectionReason::UnknownType {
                tag: "launch_missiles".to_string()
            }
        );
    }

    #[test]
    fn test_structural_only_types() {
        for tag in ["typing_start", "typing_stop", "hand_lower"] {
            let raw = json!({ "type": tag, "session_id": "session-1", "priority": "low" });
            let validated = validator().validate(&raw, &session()).unwrap();
            assert_eq!(validated.payload.kind().as_str(), tag);
            assert_eq!(validated.priority, MessagePriority::Low);
        }
    }

    fn file_share(name: &str, size: u64) -> serde_json::Value {
        json!({
            "type": "file_share",
            "session_id": "session-1",
            "file_name": name,
            "file_size": size,
            "file_type": "application/octet-stream"
        })
    }

    #[test]
    fn test_file_share_rules() {
        let v = validator();

        assert!(v.validate(&file_share("notes.pdf", 4 * 1024), &session()).is_ok());

        assert_eq!(
            v.validate(&file_share("setup.exe", 10), &session()).unwrap_err(),
            RejectionReason::DisallowedFileType {
                extension: "exe".to_string()
            }
        );

        assert!(matches!(
            v.validate(&file_share("movie.mp4", 200 * 1024 * 1024), &session()),
            Err(RejectionReason::FileTooLarge { .. })
        ));

        assert!(matches!(
            v.validate(&file_share("../etc/passwd.txt", 10), &session()),
            Err(RejectionReason::InvalidField { .. })
        ));

        assert!(matches!(
            v.validate(&file_share("noextension", 10), &session()),
            Err(RejectionReason::DisallowedFileType { .. })
        ));
    }

    #[test]
    fn test_file_share_missing_size_is_malformed() {
        let raw = json!({
            "type": "file_share",
            "session_id": "session-1",
            "file_name": "a.pdf",
            "file_type": "application/pdf"
        });
        assert!(matches!(
            validator().validate(&raw, &session()),
            Err(RejectionReason::Malformed { .. })
        ));
    }

    fn poll(options: &[&str]) -> serde_json::Value {
        json!({
            "type": "poll_create",
            "session_id": "session-1",
            "poll_id": "poll-1",
            "question": "Lunch?",
            "options": options.iter().map(|text| json!({ "text": text })).collect::<Vec<_>>()
        })
    }

    #[test]
    fn test_poll_option_rules() {
        let v = validator();
        assert_eq!(
            v.validate(&poll(&["pizza"]), &session()).unwrap_err(),
            RejectionReason::TooFewPollOptions { count: 1 }
        );
        assert!(v.validate(&poll(&["pizza", "sushi"]), &session()).is_ok());
        assert!(matches!(
            v.validate(&poll(&["Pizza", "pizza "]), &session()),
            Err(RejectionReason::DuplicatePollOption { .. })
        ));

        let many: Vec<String> = (0..11).map(|i| format!("option {i}")).collect();
        let many: Vec<&str> = many.iter().map(String::as_str).collect();
        assert!(matches!(
            v.validate(&poll(&many), &session()),
            Err(RejectionReason::TooManyPollOptions { .. })
        ));
    }

    #[test]
    fn test_hand_raise_reason_length() {
        let v = validator();
        let raw = json!({ "type": "hand_raise", "session_id": "session-1" });
        assert_eq!(
            v.validate(&raw, &session()).unwrap().payload,
            InboundMessage::HandRaise(HandRaise { reason: None })
        );

        let raw = json!({
            "type": "hand_raise",
            "session_id": "session-1",
            "reason": "r".repeat(201)
        });
        assert!(v.validate(&raw, &session()).is_err());
    }

    #[test]
    fn test_reaction_and_vote_rules() {
        let v = validator();
        let raw = json!({
            "type": "reaction",
            "session_id": "session-1",
            "target_message_id": "m-1",
            "emoji": "👍"
        });
        assert!(v.validate(&raw, &session()).is_ok());

        let raw = json!({
            "type": "poll_vote",
            "session_id": "session-1",
            "poll_id": "poll-1",
            "option_indices": []
        });
        assert!(v.validate(&raw, &session()).is_err());

        let raw = json!({
            "type": "poll_vote",
            "session_id": "session-1",
            "poll_id": "poll-1",
            "option_indices": [0, 2]
        });
        assert!(v.validate(&raw, &session()).is_ok());
    }
}
