use std::sync::Arc;

use application::{MessageRateLimiter, MessageRouter};
use infrastructure::{Infrastructure, InMemoryParticipantRegistry, LocalSessionBroadcaster};

#[derive(Clone)]
pub struct AppState {
    pub router: MessageRouter,
    pub broadcaster: Arc<LocalSessionBroadcaster>,
    pub participants: Arc<InMemoryParticipantRegistry>,
    pub rate_limiter: Arc<MessageRateLimiter>,
}

impl AppState {
    pub fn new(infrastructure: &Infrastructure) -> Self {
        Self {
            router: infrastructure.router.clone(),
            broadcaster: infrastructure.broadcaster.clone(),
            participants: infrastructure.participants.clone(),
            rate_limiter: infrastructure.rate_limiter.clone(),
        }
    }
}
