//! Periodic keyframe requests so late subscribers get a decodable picture

use super::registry::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub struct KeyframeScheduler {
    registry: Arc<SessionRegistry>,
    interval: Duration,
}

impl KeyframeScheduler {
    pub fn new(registry: Arc<SessionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Ask every live session's inbound tracks for a keyframe
    pub async fn dispatch(&self) {
        let state = self.registry.lock().await;
        for session in state.sessions() {
            session.transport().request_keyframes().await;
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.dispatch().await;
        }
    }
}
