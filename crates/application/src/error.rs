use domain::DomainError;
use thiserror::Error;

use crate::collaborators::{BroadcastError, MessagingError, StatusError};

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),
    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),
    #[error("participant status error: {0}")]
    Status(#[from] StatusError),
    #[error("invalid router state: {0}")]
    InvalidState(String),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }
}

/// 处理器执行失败，在分发边界被捕获并计入统计
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
    #[error(transparent)]
    Messaging(#[from] MessagingError),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error("unexpected payload for {expected} handler")]
    UnexpectedPayload { expected: &'static str },
    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}
