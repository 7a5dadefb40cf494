//! 应用层实现。
//!
//! 消息路由核心：限流、优先级队列、处理器注册表与消费循环，
//! 以及处理器依赖的外部协作者接口。

pub mod clock;
pub mod collaborators;
pub mod error;
pub mod handlers;
pub mod priority_queue;
pub mod rate_limiter;
pub mod registry;
pub mod router;
pub mod stats;

pub use clock::{Clock, SystemClock};
pub use collaborators::{
    BroadcastError, Collaborators, MessagingError, MessagingService, ParticipantStatusService,
    SessionBroadcaster, StatusError, StructuredMessageType,
};
pub use error::{ApplicationError, HandlerError};
pub use handlers::register_default_handlers;
pub use priority_queue::{EnqueueOutcome, OverflowPolicy, PriorityQueue, QueueError};
pub use rate_limiter::{MessageRateLimiter, RateLimitError, RateLimitPolicy, TierQuotas};
pub use registry::{handler_fn, HandlerRegistry, MessageHandler};
pub use router::{MessageRouter, RouterConfig, ShutdownPolicy};
pub use stats::{RouterState, RouterStats};
