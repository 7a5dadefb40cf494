//! 实时协作会话的核心领域模型
//!
//! 包含入站消息的类型化表示、优先级、参与者状态，以及
//! 每种消息类型的校验与内容清洗规则。

pub mod errors;
pub mod message;
pub mod participant;
pub mod priority;
pub mod sanitizer;
pub mod validation;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use message::*;
pub use participant::*;
pub use priority::*;
pub use sanitizer::MarkupSanitizer;
pub use validation::{default_allowed_extensions, MessageValidator, ValidationLimits};
pub use value_objects::*;
