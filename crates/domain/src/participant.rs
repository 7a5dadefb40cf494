//! 会话参与者

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 提交消息的参与者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub username: String,
}

impl Participant {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}

/// 参与者在会话中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    #[default]
    Active,
    HandRaised,
    Muted,
    Away,
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Active => "active",
            Self::HandRaised => "hand_raised",
            Self::Muted => "muted",
            Self::Away => "away",
        };
        f.write_str(text)
    }
}
