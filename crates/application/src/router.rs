//! 消息路由器
//!
//! 准入（校验 → 限流 → 入队）在调用方线程同步完成，从不等待处理；
//! 单个消费任务按优先级取出消息并交给对应处理器。处理器的错误、
//! panic 与超时都在分发边界被吸收，只体现在统计里。

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use domain::{
    ConnectionId, MessageId, MessageKind, MessageMetadata, MessageValidator, Participant,
    QueuedMessage, RejectionReason, SessionId,
};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::clock::{Clock, SystemClock};
use crate::error::ApplicationError;
use crate::priority_queue::{EnqueueOutcome, OverflowPolicy, PriorityQueue};
use crate::rate_limiter::MessageRateLimiter;
use crate::registry::{HandlerRegistry, MessageHandler};
use crate::stats::{RouterMetrics, RouterState, RouterStats};

/// 停止时如何处理仍在排队的消息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// 处理完队列中剩余的消息再退出
    #[default]
    Drain,
    /// 丢弃剩余消息
    Discard,
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub shutdown_policy: ShutdownPolicy,
    /// 队列为空时消费循环的周期唤醒间隔
    pub idle_tick: Duration,
    /// 单个处理器的执行上限，None 表示不限制
    pub handler_timeout: Option<Duration>,
    /// 限流计数器清理周期
    pub cleanup_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            overflow_policy: OverflowPolicy::default(),
            shutdown_policy: ShutdownPolicy::default(),
            idle_tick: Duration::from_millis(500),
            handler_timeout: Some(Duration::from_secs(10)),
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

const MIN_TICK: Duration = Duration::from_millis(1);

#[derive(Default)]
struct Lifecycle {
    state: RouterState,
    /// 每次启动递增，区分新旧消费任务
    generation: u64,
    cancel: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

struct RouterInner {
    config: RouterConfig,
    validator: MessageValidator,
    rate_limiter: Arc<MessageRateLimiter>,
    registry: Arc<HandlerRegistry>,
    queue: PriorityQueue,
    metrics: RouterMetrics,
    clock: Arc<dyn Clock>,
    sequence: AtomicU64,
    accepting: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    /// 所有路由器句柄释放时被取消，连带停止后台任务
    root: CancellationToken,
}

/// 路由器句柄，克隆后共享同一实例
#[derive(Clone)]
pub struct MessageRouter {
    inner: Arc<RouterInner>,
    _shutdown: Arc<DropGuard>,
}

impl MessageRouter {
    pub fn new(
        config: RouterConfig,
        validator: MessageValidator,
        rate_limiter: Arc<MessageRateLimiter>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self::with_clock(
            config,
            validator,
            rate_limiter,
            registry,
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(
        mut config: RouterConfig,
        validator: MessageValidator,
        rate_limiter: Arc<MessageRateLimiter>,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        // tokio 的 interval 不接受零周期
        config.idle_tick = config.idle_tick.max(MIN_TICK);
        config.cleanup_interval = config.cleanup_interval.max(MIN_TICK);

        let root = CancellationToken::new();
        let queue = PriorityQueue::new(config.queue_capacity, config.overflow_policy);
        let inner = RouterInner {
            config,
            validator,
            rate_limiter,
            registry,
            queue,
            metrics: RouterMetrics::default(),
            clock,
            sequence: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
            lifecycle: Mutex::new(Lifecycle::default()),
            root: root.clone(),
        };

        Self {
            inner: Arc::new(inner),
            _shutdown: Arc::new(root.drop_guard()),
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    pub fn rate_limiter(&self) -> &Arc<MessageRateLimiter> {
        &self.inner.rate_limiter
    }

    pub fn register_handler(&self, kind: MessageKind, handler: Arc<dyn MessageHandler>) {
        self.inner.registry.register(kind, handler);
    }

    /// 准入一条原始消息，成功时返回分配的消息 ID
    pub fn admit(
        &self,
        raw: &Value,
        sender: &Participant,
        session_id: &SessionId,
        connection_id: ConnectionId,
    ) -> Result<MessageId, RejectionReason> {
        let inner = &self.inner;
        RouterMetrics::incr(&inner.metrics.received);

        if !inner.accepting.load(Ordering::Acquire) {
            RouterMetrics::incr(&inner.metrics.rejected_stopped);
            return Err(RejectionReason::RouterStopped);
        }

        let validated = match inner.validator.validate(raw, session_id) {
            Ok(validated) => validated,
            Err(reason) => {
                RouterMetrics::incr(&inner.metrics.rejected_validation);
                tracing::debug!(
                    user_id = %sender.user_id,
                    session_id = %session_id,
                    code = reason.code(),
                    "Message rejected by validation: {}",
                    reason
                );
                return Err(reason);
            }
        };

        let priority = validated.priority;
        if !inner.rate_limiter.is_allowed(sender.user_id, priority) {
            RouterMetrics::incr(&inner.metrics.rejected_rate_limit);
            let max = inner.rate_limiter.policy().quotas.quota_for(priority);
            tracing::warn!(
                user_id = %sender.user_id,
                priority = %priority,
                max,
                "Message rejected by rate limiter"
            );
            return Err(RejectionReason::RateLimited { priority, max });
        }

        let message = Arc::new(QueuedMessage {
            id: MessageId::generate(),
            payload: validated.payload,
            priority,
            session_id: session_id.clone(),
            user_id: sender.user_id,
            created_at: inner.clock.now(),
            sequence: inner.sequence.fetch_add(1, Ordering::Relaxed),
            metadata: MessageMetadata {
                connection_id,
                username: sender.username.clone(),
            },
        });
        let id = message.id;
        let kind = message.kind();

        match inner.queue.enqueue(message) {
            Ok(outcome) => {
                RouterMetrics::incr(&inner.metrics.admitted);
                if let EnqueueOutcome::Displaced(dropped) = outcome {
                    RouterMetrics::incr(&inner.metrics.dropped_overflow);
                    tracing::warn!(
                        dropped_id = %dropped.id,
                        dropped_priority = %dropped.priority,
                        "Queue full, dropped lower priority message"
                    );
                }
                tracing::trace!(message_id = %id, kind = %kind, priority = %priority, "Message admitted");
                Ok(id)
            }
            Err(err) => {
                inner.rate_limiter.refund(sender.user_id, priority);
                RouterMetrics::incr(&inner.metrics.rejected_queue_full);
                tracing::warn!(user_id = %sender.user_id, priority = %priority, "{}", err);
                Err(RejectionReason::QueueFull {
                    capacity: inner.queue.capacity(),
                })
            }
        }
    }

    /// 准入文本帧，JSON 解析失败视为格式错误
    pub fn admit_text(
        &self,
        text: &str,
        sender: &Participant,
        session_id: &SessionId,
        connection_id: ConnectionId,
    ) -> Result<MessageId, RejectionReason> {
        match serde_json::from_str::<Value>(text) {
            Ok(raw) => self.admit(&raw, sender, session_id, connection_id),
            Err(err) => {
                RouterMetrics::incr(&self.inner.metrics.received);
                RouterMetrics::incr(&self.inner.metrics.rejected_validation);
                Err(RejectionReason::malformed(err.to_string()))
            }
        }
    }

    /// 准入的布尔形式
    pub fn route_message(
        &self,
        raw: &Value,
        sender: &Participant,
        session_id: &SessionId,
        connection_id: ConnectionId,
    ) -> bool {
        self.admit(raw, sender, session_id, connection_id).is_ok()
    }

    /// 启动消费循环。已在运行时返回 `Ok(false)`。
    pub fn start_processing(&self) -> Result<bool, ApplicationError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| ApplicationError::infrastructure(format!("no tokio runtime: {err}")))?;

        let mut lifecycle = self.inner.lifecycle();
        match lifecycle.state {
            RouterState::Running => return Ok(false),
            RouterState::Stopping => {
                return Err(ApplicationError::InvalidState(
                    "router is still stopping".to_string(),
                ))
            }
            RouterState::Stopped => {}
        }

        let cancel = self.inner.root.child_token();
        lifecycle.generation += 1;
        self.inner.accepting.store(true, Ordering::Release);
        lifecycle.worker = Some(runtime.spawn(Self::run(
            Arc::clone(&self.inner),
            cancel.clone(),
            lifecycle.generation,
        )));
        lifecycle.sweeper = Some(runtime.spawn(Self::sweep(
            Arc::clone(&self.inner),
            cancel.clone(),
        )));
        lifecycle.cancel = Some(cancel);
        lifecycle.state = RouterState::Running;

        tracing::info!(
            queue_capacity = self.inner.queue.capacity(),
            handlers = self.inner.registry.len(),
            "Message router started"
        );
        Ok(true)
    }

    /// 停止准入并等待消费循环退出。未运行时返回 false。
    ///
    /// 返回的 future 被提前丢弃时，消费任务仍会按停机策略收尾，
    /// 并在退出时自行把状态置为 `Stopped`。
    pub async fn stop_processing(&self) -> bool {
        let (generation, cancel, worker, sweeper) = {
            let mut lifecycle = self.inner.lifecycle();
            if lifecycle.state != RouterState::Running {
                return false;
            }
            lifecycle.state = RouterState::Stopping;
            self.inner.accepting.store(false, Ordering::Release);
            (
                lifecycle.generation,
                lifecycle.cancel.take(),
                lifecycle.worker.take(),
                lifecycle.sweeper.take(),
            )
        };

        tracing::info!(
            pending = self.inner.queue.len(),
            policy = ?self.inner.config.shutdown_policy,
            "Stopping message router"
        );

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        for handle in [worker, sweeper].into_iter().flatten() {
            if let Err(err) = handle.await {
                tracing::error!("Router task ended abnormally: {}", err);
            }
        }

        self.inner.mark_stopped(generation);
        tracing::info!("Message router stopped");
        true
    }

    pub fn state(&self) -> RouterState {
        self.inner.lifecycle().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == RouterState::Running
    }

    pub fn get_stats(&self) -> RouterStats {
        self.inner.metrics.snapshot(
            self.state(),
            self.inner.queue.len(),
            self.inner.registry.len(),
        )
    }

    async fn run(inner: Arc<RouterInner>, cancel: CancellationToken, generation: u64) {
        let _stopped = StoppedOnExit {
            inner: Arc::clone(&inner),
            generation,
        };
        let mut tick = tokio::time::interval(inner.config.idle_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if let Some(message) = inner.queue.dequeue() {
                inner.dispatch(message).await;
                continue;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = inner.queue.notified() => {}
                _ = tick.tick() => {}
            }
        }

        match inner.config.shutdown_policy {
            ShutdownPolicy::Drain => {
                let mut drained = 0u64;
                while let Some(message) = inner.queue.dequeue() {
                    inner.dispatch(message).await;
                    drained += 1;
                }
                tracing::debug!(drained, "Queue drained on shutdown");
            }
            ShutdownPolicy::Discard => {
                let discarded = inner.queue.clear() as u64;
                RouterMetrics::add(&inner.metrics.discarded_on_shutdown, discarded);
                if discarded > 0 {
                    tracing::warn!(discarded, "Discarded queued messages on shutdown");
                }
            }
        }
    }

    async fn sweep(inner: Arc<RouterInner>, cancel: CancellationToken) {
        let period = inner.config.cleanup_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let removed = inner.rate_limiter.cleanup_expired_quotas();
                    if removed > 0 {
                        tracing::debug!(removed, "Cleaned up expired rate limit counters");
                    }
                }
            }
        }
    }
}

/// 消费任务退出（包括被中止）时完成 Stopping → Stopped
struct StoppedOnExit {
    inner: Arc<RouterInner>,
    generation: u64,
}

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.inner.mark_stopped(self.generation);
    }
}

impl RouterInner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 只结束同一次启动的停机过程，避免覆盖之后的重新启动
    fn mark_stopped(&self, generation: u64) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.generation == generation && lifecycle.state == RouterState::Stopping {
            lifecycle.state = RouterState::Stopped;
        }
    }

    async fn dispatch(&self, message: Arc<QueuedMessage>) {
        let kind = message.kind();
        let Some(handler) = self.registry.lookup(kind) else {
            RouterMetrics::incr(&self.metrics.no_handler);
            RouterMetrics::incr(&self.metrics.failed);
            tracing::warn!(message_id = %message.id, kind = %kind, "No handler registered");
            return;
        };

        let handling = AssertUnwindSafe(handler.handle(Arc::clone(&message))).catch_unwind();
        let outcome = match self.config.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, handling).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    RouterMetrics::incr(&self.metrics.handler_timeouts);
                    RouterMetrics::incr(&self.metrics.failed);
                    tracing::error!(
                        message_id = %message.id,
                        kind = %kind,
                        timeout_ms = limit.as_millis() as u64,
                        "Handler timed out"
                    );
                    return;
                }
            },
            None => handling.await,
        };

        match outcome {
            Ok(Ok(())) => {
                RouterMetrics::incr(&self.metrics.processed);
                tracing::trace!(message_id = %message.id, kind = %kind, "Message processed");
            }
            Ok(Err(err)) => {
                RouterMetrics::incr(&self.metrics.handler_errors);
                RouterMetrics::incr(&self.metrics.failed);
                tracing::error!(
                    message_id = %message.id,
                    kind = %kind,
                    session_id = %message.session_id,
                    "Handler failed: {}",
                    err
                );
            }
            Err(_) => {
                RouterMetrics::incr(&self.metrics.handler_panics);
                RouterMetrics::incr(&self.metrics.failed);
                tracing::error!(message_id = %message.id, kind = %kind, "Handler panicked");
            }
        }
    }
}
