//! 进程内会话广播
//!
//! 所有会话共用一个 tokio broadcast 通道，订阅端按会话过滤。

use application::{BroadcastError, SessionBroadcaster};
use async_trait::async_trait;
use domain::SessionId;
use serde_json::Value;
use tokio::sync::broadcast;

/// 发往某个会话的事件
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub payload: Value,
}

#[derive(Clone)]
pub struct LocalSessionBroadcaster {
    sender: broadcast::Sender<SessionEvent>,
}

impl LocalSessionBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 订阅某个会话的事件
    pub fn subscribe(&self, session_id: SessionId) -> SessionStream {
        SessionStream {
            receiver: self.sender.subscribe(),
            session_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalSessionBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl SessionBroadcaster for LocalSessionBroadcaster {
    async fn broadcast(&self, event: Value, session_id: &SessionId) -> Result<(), BroadcastError> {
        // 没有订阅者时视为成功，广播本身不保证送达
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(SessionEvent {
                session_id: session_id.clone(),
                payload: event,
            })
            .map_err(|err| BroadcastError::failed(err.to_string()))?;
        Ok(())
    }
}

/// 单个会话的事件流
pub struct SessionStream {
    receiver: broadcast::Receiver<SessionEvent>,
    session_id: SessionId,
}

impl SessionStream {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// 接收下一条属于本会话的事件，通道关闭时返回 None
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.session_id == self.session_id => return Some(event.payload),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        session_id = %self.session_id,
                        skipped,
                        "Session stream lagged behind, events skipped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
