//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 入口把客户端事件交给消息路由器，
//! 并把会话广播转发给同一会话内的连接。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
