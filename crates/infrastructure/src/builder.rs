use std::sync::Arc;
use std::time::Duration;

use application::{
    register_default_handlers, Collaborators, HandlerRegistry, MessageRateLimiter, MessageRouter,
    OverflowPolicy, RateLimitPolicy, RouterConfig, ShutdownPolicy, TierQuotas,
};
use config::{AppConfig, OverflowMode, RateLimitSettings, RouterSettings, ShutdownMode, ValidationSettings};
use domain::{MessageValidator, ValidationLimits};

use crate::{
    broadcast::LocalSessionBroadcaster, participants::InMemoryParticipantRegistry,
    store::InMemoryMessageStore,
};

/// 进程内协作者与路由器的集合
#[derive(Clone)]
pub struct Infrastructure {
    pub broadcaster: Arc<LocalSessionBroadcaster>,
    pub store: Arc<InMemoryMessageStore>,
    pub participants: Arc<InMemoryParticipantRegistry>,
    pub rate_limiter: Arc<MessageRateLimiter>,
    pub router: MessageRouter,
}

impl Infrastructure {
    /// 按配置组装所有组件，并为全部内置消息类型注册处理器
    pub fn build(config: &AppConfig) -> Self {
        let broadcaster = Arc::new(LocalSessionBroadcaster::new(config.router.queue_capacity.min(4096)));
        let store = Arc::new(InMemoryMessageStore::default());
        let participants = Arc::new(InMemoryParticipantRegistry::new());
        let rate_limiter = Arc::new(MessageRateLimiter::new(rate_limit_policy(&config.rate_limit)));

        let registry = Arc::new(HandlerRegistry::new());
        let collaborators = Collaborators {
            broadcaster: broadcaster.clone(),
            messaging: store.clone(),
            participant_status: participants.clone(),
        };
        register_default_handlers(&registry, &collaborators);

        let router = MessageRouter::new(
            router_config(&config.router, &config.rate_limit),
            MessageValidator::new(validation_limits(&config.validation)),
            rate_limiter.clone(),
            registry,
        );

        Self {
            broadcaster,
            store,
            participants,
            rate_limiter,
            router,
        }
    }
}

pub fn router_config(router: &RouterSettings, rate_limit: &RateLimitSettings) -> RouterConfig {
    RouterConfig {
        queue_capacity: router.queue_capacity,
        overflow_policy: match router.overflow_policy {
            OverflowMode::Reject => OverflowPolicy::Reject,
            OverflowMode::DropOldestLower => OverflowPolicy::DropOldestLower,
        },
        shutdown_policy: match router.shutdown_policy {
            ShutdownMode::Drain => ShutdownPolicy::Drain,
            ShutdownMode::Discard => ShutdownPolicy::Discard,
        },
        idle_tick: Duration::from_millis(router.idle_tick_ms),
        handler_timeout: (router.handler_timeout_ms > 0)
            .then(|| Duration::from_millis(router.handler_timeout_ms)),
        cleanup_interval: Duration::from_secs(rate_limit.cleanup_interval_secs),
    }
}

pub fn rate_limit_policy(settings: &RateLimitSettings) -> RateLimitPolicy {
    RateLimitPolicy {
        window: Duration::from_secs(settings.window_secs),
        quotas: TierQuotas {
            urgent: settings.urgent,
            high: settings.high,
            normal: settings.normal,
            low: settings.low,
        },
        max_tracked_entries: settings.max_tracked_users,
        max_connections_per_user: settings.max_connections_per_user,
    }
}

pub fn validation_limits(settings: &ValidationSettings) -> ValidationLimits {
    ValidationLimits {
        max_text_length: settings.max_text_length,
        max_file_size_bytes: settings.max_file_size_bytes,
        allowed_file_extensions: settings
            .allowed_file_extensions
            .iter()
            .map(|extension| extension.trim_start_matches('.').to_ascii_lowercase())
            .collect(),
        max_poll_options: settings.max_poll_options,
        max_reason_length: settings.max_reason_length,
        ..ValidationLimits::default()
    }
}
