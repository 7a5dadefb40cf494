//! 领域模型错误定义
//!
//! `DomainError` 用于值对象构造失败；`RejectionReason` 描述一条入站消息
//! 在准入阶段被拒绝的原因，调用方只会看到准入结果。

use thiserror::Error;

use crate::priority::MessagePriority;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 验证错误
    #[error("验证失败: {field}: {message}")]
    ValidationError { field: String, message: String },

    /// 业务规则违反错误
    #[error("业务规则违反: {rule}")]
    BusinessRuleViolation { rule: String },
}

impl DomainError {
    /// 创建验证错误
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建业务规则违反错误
    pub fn business_rule_violation(rule: impl Into<String>) -> Self {
        Self::BusinessRuleViolation { rule: rule.into() }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 入站消息被拒绝的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    #[error("malformed message: {reason}")]
    Malformed { reason: String },

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("unknown message type: {tag}")]
    UnknownType { tag: String },

    #[error("session mismatch: connection bound to {expected}, message targets {actual}")]
    SessionMismatch { expected: String, actual: String },

    #[error("content is empty")]
    EmptyContent,

    #[error("content too long: {length}/{max} characters")]
    ContentTooLong { length: usize, max: usize },

    #[error("file type not allowed: {extension}")]
    DisallowedFileType { extension: String },

    #[error("file too large: {size}/{max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("poll needs at least two options, got {count}")]
    TooFewPollOptions { count: usize },

    #[error("poll has too many options: {count}/{max}")]
    TooManyPollOptions { count: usize, max: usize },

    #[error("duplicate poll option: {text}")]
    DuplicatePollOption { text: String },

    #[error("invalid field {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("rate limit exceeded for {priority} priority: {max} messages per window")]
    RateLimited { priority: MessagePriority, max: u32 },

    #[error("message queue is full ({capacity})")]
    QueueFull { capacity: usize },

    #[error("router is not accepting messages")]
    RouterStopped,
}

impl RejectionReason {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 稳定的机器可读错误码，用于回执帧
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "MALFORMED",
            Self::MissingField { .. } => "MISSING_FIELD",
            Self::UnknownType { .. } => "UNKNOWN_TYPE",
            Self::SessionMismatch { .. } => "SESSION_MISMATCH",
            Self::EmptyContent => "EMPTY_CONTENT",
            Self::ContentTooLong { .. } => "CONTENT_TOO_LONG",
            Self::DisallowedFileType { .. } => "FILE_TYPE_NOT_ALLOWED",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::TooFewPollOptions { .. } => "TOO_FEW_POLL_OPTIONS",
            Self::TooManyPollOptions { .. } => "TOO_MANY_POLL_OPTIONS",
            Self::DuplicatePollOption { .. } => "DUPLICATE_POLL_OPTION",
            Self::InvalidField { .. } => "INVALID_FIELD",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::QueueFull { .. } => "QUEUE_FULL",
            Self::RouterStopped => "ROUTER_STOPPED",
        }
    }

    /// 是否为校验阶段（而非限流、队列）产生的拒绝
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            Self::RateLimited { .. } | Self::QueueFull { .. } | Self::RouterStopped
        )
    }
}

impl From<DomainError> for RejectionReason {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::ValidationError { field, message } => {
                RejectionReason::InvalidField { field, message }
            }
            DomainError::BusinessRuleViolation { rule } => RejectionReason::Malformed { reason: rule },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_codes() {
        assert_eq!(RejectionReason::EmptyContent.code(), "EMPTY_CONTENT");
        assert_eq!(
            RejectionReason::RateLimited {
                priority: MessagePriority::Normal,
                max: 30
            }
            .code(),
            "RATE_LIMITED"
        );
    }

    #[test]
    fn test_validation_classification() {
        assert!(RejectionReason::ContentTooLong { length: 10, max: 5 }.is_validation());
        assert!(!RejectionReason::QueueFull { capacity: 1 }.is_validation());
        assert!(!RejectionReason::RouterStopped.is_validation());
    }

    #[test]
    fn test_domain_error_conversion() {
        let err = DomainError::validation_error("session_id", "cannot be empty");
        let reason = RejectionReason::from(err);
        assert_eq!(
            reason,
            RejectionReason::InvalidField {
                field: "session_id".to_string(),
                message: "cannot be empty".to_string()
            }
        );
    }
}
