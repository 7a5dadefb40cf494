use dashmap::DashMap;
use domain::{MessagePriority, UserId};
use std::time::{Duration, Instant};

/// 用户在某个优先级上的消息配额
#[derive(Debug, Clone)]
pub struct UserQuota {
    /// 当前时间窗口内的消息数量
    pub message_count: u32,
    /// 当前时间窗口的开始时间
    pub window_start: Instant,
    /// 最后一次访问时间，用于淘汰
    pub last_seen: Instant,
}

impl Default for UserQuota {
    fn default() -> Self {
        Self::new()
    }
}

impl UserQuota {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            message_count: 0,
            window_start: now,
            last_seen: now,
        }
    }

    /// 重置时间窗口
    pub fn reset_window(&mut self, now: Instant) {
        self.message_count = 0;
        self.window_start = now;
    }

    /// 检查是否超过限制
    pub fn is_over_limit(&self, max_messages: u32) -> bool {
        self.message_count >= max_messages
    }

    /// 增加消息计数
    pub fn increment(&mut self) {
        self.message_count += 1;
    }
}

/// 限流错误类型
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded: {current}/{max} {priority} messages per window")]
    RateLimitExceeded {
        priority: MessagePriority,
        current: u32,
        max: u32,
    },

    #[error("Too many connections: {current}/{max} connections per user")]
    TooManyConnections { current: u32, max: u32 },
}

/// 各优先级独立的配额
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierQuotas {
    pub urgent: u32,
    pub high: u32,
    pub normal: u32,
    pub low: u32,
}

impl TierQuotas {
    pub fn quota_for(&self, priority: MessagePriority) -> u32 {
        match priority {
            MessagePriority::Urgent => self.urgent,
            MessagePriority::High => self.high,
            MessagePriority::Normal => self.normal,
            MessagePriority::Low => self.low,
        }
    }
}

impl Default for TierQuotas {
    fn default() -> Self {
        Self {
            urgent: 10,
            high: 20,
            normal: 30,
            low: 60,
        }
    }
}

/// 限流策略
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// 时间窗口大小
    pub window: Duration,
    pub quotas: TierQuotas,
    /// 最多跟踪的 (用户, 优先级) 计数器数量，超出时按最近访问时间淘汰
    pub max_tracked_entries: usize,
    /// 每用户最大连接数
    pub max_connections_per_user: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            quotas: TierQuotas::default(),
            max_tracked_entries: 50_000,
            max_connections_per_user: 5,
        }
    }
}

/// 消息限流器
///
/// 每个 (用户, 优先级) 一个固定窗口计数器。检查与递增在同一个
/// 分片写锁内完成，不同用户的准入检查互不阻塞。
pub struct MessageRateLimiter {
    policy: RateLimitPolicy,
    /// 用户配额存储
    user_quotas: DashMap<(UserId, MessagePriority), UserQuota>,
    /// 用户连接计数
    user_connections: DashMap<UserId, u32>,
}

impl MessageRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            user_quotas: DashMap::new(),
            user_connections: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// 检查用户是否可以以该优先级发送消息，允许时占用一个名额
    pub fn check_message_rate(
        &self,
        user_id: UserId,
        priority: MessagePriority,
    ) -> Result<(), RateLimitError> {
        let key = (user_id, priority);
        let max = self.policy.quotas.quota_for(priority);

        if !self.user_quotas.contains_key(&key)
            && self.user_quotas.len() >= self.policy.max_tracked_entries
        {
            self.evict_least_recent();
        }

        let mut quota = self.user_quotas.entry(key).or_default();
        let now = Instant::now();
        quota.last_seen = now;

        // 检查是否需要重置时间窗口
        if now.duration_since(quota.window_start) >= self.policy.window {
            quota.reset_window(now);
        }

        if quota.is_over_limit(max) {
            return Err(RateLimitError::RateLimitExceeded {
                priority,
                current: quota.message_count,
                max,
            });
        }

        quota.increment();
        Ok(())
    }

    /// 布尔形式的准入检查
    pub fn is_allowed(&self, user_id: UserId, priority: MessagePriority) -> bool {
        self.check_message_rate(user_id, priority).is_ok()
    }

    /// 退还一个名额（消息在入队阶段被拒绝时使用）
    pub fn refund(&self, user_id: UserId, priority: MessagePriority) {
        if let Some(mut quota) = self.user_quotas.get_mut(&(user_id, priority)) {
            quota.message_count = quota.message_count.saturating_sub(1);
        }
    }

    /// 用户连接时调用
    pub fn add_connection(&self, user_id: UserId) -> Result<(), RateLimitError> {
        let mut count = self.user_connections.entry(user_id).or_insert(0);
        if *count >= self.policy.max_connections_per_user {
            return Err(RateLimitError::TooManyConnections {
                current: *count,
                max: self.policy.max_connections_per_user,
            });
        }
        *count += 1;
        Ok(())
    }

    /// 用户断开连接时调用
    pub fn remove_connection(&self, user_id: UserId) {
        if let Some(mut count) = self.user_connections.get_mut(&user_id) {
            *count = count.saturating_sub(1);
        }
        // 如果连接数为0，从map中移除
        self.user_connections.remove_if(&user_id, |_, count| *count == 0);
    }

    /// 获取用户在某优先级上的当前状态：(窗口内消息数, 连接数)
    pub fn get_user_status(&self, user_id: UserId, priority: MessagePriority) -> (u32, u32) {
        let message_count = self
            .user_quotas
            .get(&(user_id, priority))
            .map(|quota| quota.message_count)
            .unwrap_or(0);
        let connection_count = self
            .user_connections
            .get(&user_id)
            .map(|count| *count)
            .unwrap_or(0);
        (message_count, connection_count)
    }

    /// 当前跟踪的计数器数量
    pub fn tracked_entries(&self) -> usize {
        self.user_quotas.len()
    }

    /// 清理窗口已过期的配额记录，返回清理数量
    pub fn cleanup_expired_quotas(&self) -> usize {
        let before = self.user_quotas.len();
        let now = Instant::now();
        let window = self.policy.window;
        self.user_quotas
            .retain(|_, quota| now.duration_since(quota.window_start) < window);
        before.saturating_sub(self.user_quotas.len())
    }

    /// 淘汰最久未访问的一批计数器
    fn evict_least_recent(&self) {
        let expired = self.cleanup_expired_quotas();
        if expired > 0 && self.user_quotas.len() < self.policy.max_tracked_entries {
            return;
        }

        let mut entries: Vec<((UserId, MessagePriority), Instant)> = self
            .user_quotas
            .iter()
            .map(|entry| (*entry.key(), entry.value().last_seen))
            .collect();
        let batch = (self.policy.max_tracked_entries / 100).max(1).min(entries.len());
        if batch == 0 {
            return;
        }
        entries.select_nth_unstable_by_key(batch - 1, |(_, last_seen)| *last_seen);
        for (key, _) in entries.into_iter().take(batch) {
            self.user_quotas.remove(&key);
        }
        tracing::debug!(evicted = batch, "Evicted least recently used rate limit counters");
    }
}

impl Default for MessageRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitPolicy::default())
    }
}
