//! 基础设施层实现。
//!
//! 提供进程内的会话广播、消息存储与参与者状态表，实现应用层定义的
//! 协作者接口，并按配置组装消息路由器。

pub mod broadcast;
pub mod builder;
pub mod participants;
pub mod store;

pub use broadcast::{LocalSessionBroadcaster, SessionEvent, SessionStream};
pub use builder::Infrastructure;
pub use participants::InMemoryParticipantRegistry;
pub use store::{InMemoryMessageStore, StoredMessage};
