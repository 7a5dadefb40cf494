//! 消息类型到处理器的映射

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use domain::{MessageKind, QueuedMessage};

use crate::error::HandlerError;

/// 某种消息类型的异步处理器
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Arc<QueuedMessage>) -> Result<(), HandlerError>;
}

/// 把异步闭包包装成处理器
pub struct FnHandler<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Arc<QueuedMessage>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: Arc<QueuedMessage>) -> Result<(), HandlerError> {
        (self.func)(message).await
    }
}

pub fn handler_fn<F, Fut>(func: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Arc<QueuedMessage>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler { func })
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<MessageKind, Arc<dyn MessageHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，返回被替换的旧处理器
    pub fn register(
        &self,
        kind: MessageKind,
        handler: Arc<dyn MessageHandler>,
    ) -> Option<Arc<dyn MessageHandler>> {
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, handler);
        if previous.is_some() {
            tracing::debug!(kind = %kind, "Replaced message handler");
        }
        previous
    }

    pub fn unregister(&self, kind: MessageKind) -> Option<Arc<dyn MessageHandler>> {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind)
    }

    pub fn lookup(&self, kind: MessageKind) -> Option<Arc<dyn MessageHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
    }

    pub fn registered_kinds(&self) -> Vec<MessageKind> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        MessageKind::ALL
            .into_iter()
            .filter(|kind| handlers.contains_key(kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
