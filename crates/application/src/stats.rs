//! 路由统计计数

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// 路由器状态机：Stopped → Running → Stopping → Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouterState {
    #[default]
    Stopped,
    Running,
    Stopping,
}

/// 单调递增的计数器集合
#[derive(Debug, Default)]
pub struct RouterMetrics {
    pub(crate) received: AtomicU64,
    pub(crate) admitted: AtomicU64,
    pub(crate) rejected_validation: AtomicU64,
    pub(crate) rejected_rate_limit: AtomicU64,
    pub(crate) rejected_queue_full: AtomicU64,
    pub(crate) rejected_stopped: AtomicU64,
    pub(crate) dropped_overflow: AtomicU64,
    pub(crate) discarded_on_shutdown: AtomicU64,
    pub(crate) processed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) no_handler: AtomicU64,
    pub(crate) handler_errors: AtomicU64,
    pub(crate) handler_panics: AtomicU64,
    pub(crate) handler_timeouts: AtomicU64,
}

impl RouterMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        state: RouterState,
        queue_depth: usize,
        registered_handlers: usize,
    ) -> RouterStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        RouterStats {
            state,
            messages_received: load(&self.received),
            messages_admitted: load(&self.admitted),
            messages_rejected_validation: load(&self.rejected_validation),
            messages_rejected_rate_limit: load(&self.rejected_rate_limit),
            messages_rejected_queue_full: load(&self.rejected_queue_full),
            messages_rejected_stopped: load(&self.rejected_stopped),
            messages_dropped_overflow: load(&self.dropped_overflow),
            messages_discarded_on_shutdown: load(&self.discarded_on_shutdown),
            messages_processed: load(&self.processed),
            messages_failed: load(&self.failed),
            no_handler: load(&self.no_handler),
            handler_errors: load(&self.handler_errors),
            handler_panics: load(&self.handler_panics),
            handler_timeouts: load(&self.handler_timeouts),
            queue_depth,
            registered_handlers,
        }
    }
}

/// 统计快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub state: RouterState,
    pub messages_received: u64,
    pub messages_admitted: u64,
    pub messages_rejected_validation: u64,
    pub messages_rejected_rate_limit: u64,
    pub messages_rejected_queue_full: u64,
    pub messages_rejected_stopped: u64,
    pub messages_dropped_overflow: u64,
    pub messages_discarded_on_shutdown: u64,
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub no_handler: u64,
    pub handler_errors: u64,
    pub handler_panics: u64,
    pub handler_timeouts: u64,
    pub queue_depth: usize,
    pub registered_handlers: usize,
}
