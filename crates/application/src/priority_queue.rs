//! 准入消息的优先级队列
//!
//! 四条先进先出通道（每个优先级一条），按 urgent → low 的严格顺序出队。
//! 入队与出队均为 O(1)。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use domain::{MessagePriority, QueuedMessage};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// 队列满时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// 直接拒绝新消息
    Reject,
    /// 丢弃优先级更低通道中最旧的消息；没有更低优先级的消息时拒绝
    #[default]
    DropOldestLower,
}

/// 入队结果
#[derive(Debug)]
pub enum EnqueueOutcome {
    Queued,
    /// 为腾出空间被丢弃的消息
    Displaced(Arc<QueuedMessage>),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full (capacity {capacity})")]
    Full { capacity: usize },
}

type Lanes = [VecDeque<Arc<QueuedMessage>>; 4];

pub struct PriorityQueue {
    lanes: Mutex<Lanes>,
    capacity: usize,
    policy: OverflowPolicy,
    notify: Notify,
}

impl PriorityQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            lanes: Mutex::new(Default::default()),
            capacity: capacity.max(1),
            policy,
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn enqueue(&self, message: Arc<QueuedMessage>) -> Result<EnqueueOutcome, QueueError> {
        let outcome = {
            let mut lanes = self.lock();
            let len: usize = lanes.iter().map(VecDeque::len).sum();

            let outcome = if len < self.capacity {
                EnqueueOutcome::Queued
            } else {
                match self.policy {
                    OverflowPolicy::Reject => {
                        return Err(QueueError::Full {
                            capacity: self.capacity,
                        })
                    }
                    OverflowPolicy::DropOldestLower => {
                        let incoming = message.priority.lane();
                        let victim = lanes
                            .iter_mut()
                            .enumerate()
                            .rev()
                            .find(|(lane, queue)| *lane > incoming && !queue.is_empty())
                            .and_then(|(_, queue)| queue.pop_front());
                        match victim {
                            Some(dropped) => EnqueueOutcome::Displaced(dropped),
                            None => {
                                return Err(QueueError::Full {
                                    capacity: self.capacity,
                                })
                            }
                        }
                    }
                }
            };

            lanes[message.priority.lane()].push_back(message);
            outcome
        };

        self.notify.notify_one();
        Ok(outcome)
    }

    /// 取出优先级最高、同优先级中最早入队的消息
    pub fn dequeue(&self) -> Option<Arc<QueuedMessage>> {
        let mut lanes = self.lock();
        lanes.iter_mut().find_map(VecDeque::pop_front)
    }

    /// 等待下一次入队通知。通知在没有等待者时会被保留一次。
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn len(&self) -> usize {
        self.lock().iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 各优先级的排队数量
    pub fn depth(&self, priority: MessagePriority) -> usize {
        self.lock()[priority.lane()].len()
    }

    /// 清空队列，返回被丢弃的数量
    pub fn clear(&self) -> usize {
        let mut lanes = self.lock();
        let len = lanes.iter().map(VecDeque::len).sum();
        lanes.iter_mut().for_each(VecDeque::clear);
        len
    }
}
