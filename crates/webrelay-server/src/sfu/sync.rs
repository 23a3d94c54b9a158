//! Track synchronization engine
//!
//! Makes every session forward exactly the published tracks it does not
//! own. One run repeats full passes over the registry under the registry
//! lock until a pass completes without a restart; a pass restarts from the
//! first session whenever it prunes a closed session or a transport or
//! control call fails. After `attempt_limit` restarts the run gives up,
//! releases the lock, and leaves one deferred retry to the retry worker.
//!
//! The lock is held across negotiation calls. A slow `create_offer` or a
//! stalled control channel therefore blocks every other registry user for
//! the length of the run.

use super::keyframe::KeyframeScheduler;
use super::registry::{RegistryState, Session, SessionId, SessionRegistry};
use super::transport::{ControlError, TransportError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use webrelay_protocol::ServerMessage;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Passes per run before deferring
    pub attempt_limit: usize,
    /// Delay before the deferred retry
    pub retry_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            attempt_limit: 25,
            retry_delay: Duration::from_secs(3),
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncFault {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Control(#[from] ControlError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A pass finished without restarting
    Converged { passes: usize },
    /// Attempt limit reached; a deferred retry is scheduled
    Deferred,
}

enum PassOutcome {
    Quiescent,
    /// A closed session was pruned, so the session list changed under the pass
    Pruned(Session),
    Failed { session: SessionId, fault: SyncFault },
}

pub struct SyncEngine {
    registry: Arc<SessionRegistry>,
    keyframes: Arc<KeyframeScheduler>,
    settings: SyncSettings,
    retry_scheduled: AtomicBool,
    retry_wakeup: Notify,
}

impl SyncEngine {
    pub fn new(
        registry: Arc<SessionRegistry>,
        keyframes: Arc<KeyframeScheduler>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            registry,
            keyframes,
            settings,
            retry_scheduled: AtomicBool::new(false),
            retry_wakeup: Notify::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Run passes until quiescent or the attempt limit is reached, then
    /// ask every session for a keyframe. Never blocks beyond its own
    /// bounded passes.
    pub async fn synchronize(&self) -> SyncOutcome {
        let mut pruned = Vec::new();
        let outcome = {
            let mut state = self.registry.lock().await;
            self.run_passes(&mut state, &mut pruned).await
        };
        // Address leases go back to the table only once the registry lock is released
        drop(pruned);

        if outcome == SyncOutcome::Deferred {
            tracing::warn!(
                "Track sync did not settle after {} passes, retrying in {:?}",
                self.settings.attempt_limit,
                self.settings.retry_delay
            );
            self.schedule_retry();
        }

        self.keyframes.dispatch().await;
        outcome
    }

    /// Record a negotiation answer from `session`; runs another sync if the
    /// session still owes rounds.
    pub async fn acknowledge(&self, session: SessionId) -> Option<SyncOutcome> {
        let remaining = self.registry.acknowledge(session).await?;
        if remaining > 0 {
            tracing::debug!("Session {} still owes {} rounds", session, remaining);
            return Some(self.synchronize().await);
        }
        None
    }

    /// True while a deferred retry is waiting to run
    pub fn retry_scheduled(&self) -> bool {
        self.retry_scheduled.load(Ordering::SeqCst)
    }

    fn schedule_retry(&self) {
        // Coalesce: only the first trigger wakes the worker
        if !self.retry_scheduled.swap(true, Ordering::SeqCst) {
            self.retry_wakeup.notify_one();
        }
    }

    /// Deferred retry worker; at most one retry is ever in flight
    pub async fn run_retry_worker(self: Arc<Self>) {
        loop {
            self.retry_wakeup.notified().await;
            tokio::time::sleep(self.settings.retry_delay).await;
            self.retry_scheduled.store(false, Ordering::SeqCst);

            tracing::debug!("Running deferred track sync");
            self.synchronize().await;
        }
    }

    async fn run_passes(
        &self,
        state: &mut RegistryState,
        pruned: &mut Vec<Session>,
    ) -> SyncOutcome {
        for attempt in 1..=self.settings.attempt_limit {
            match self.attempt_sync(state).await {
                PassOutcome::Quiescent => {
                    tracing::debug!("Track sync settled after {} passes", attempt);
                    return SyncOutcome::Converged { passes: attempt };
                }
                PassOutcome::Pruned(session) => {
                    tracing::info!(
                        "Pruned closed session {}, restarting sync pass {}",
                        session.id(),
                        attempt
                    );
                    pruned.push(session);
                }
                PassOutcome::Failed { session, fault } => {
                    tracing::warn!(
                        "Sync pass {} failed for session {}: {}",
                        attempt,
                        session,
                        fault
                    );
                }
            }
        }

        SyncOutcome::Deferred
    }

    async fn attempt_sync(&self, state: &mut RegistryState) -> PassOutcome {
        for index in 0..state.sessions().len() {
            let session = &state.sessions()[index];
            let id = session.id();

            if session.transport().is_closed() {
                return PassOutcome::Pruned(state.remove_at(index));
            }

            if session.pending_rounds() == 0 {
                continue;
            }

            if let Err(fault) = reconcile(state, index).await {
                return PassOutcome::Failed { session: id, fault };
            }
        }

        PassOutcome::Quiescent
    }
}

/// Align one session's forwarded tracks with the published set and send it
/// a fresh offer
async fn reconcile(state: &RegistryState, index: usize) -> Result<(), SyncFault> {
    let session = &state.sessions()[index];
    let transport = session.transport();
    let tracks = state.tracks();

    let mut present: HashSet<String> = HashSet::new();

    for track_id in transport.forwarded_tracks().await {
        if !tracks.contains_key(&track_id) {
            transport.remove_track(&track_id).await?;
            tracing::debug!("Stopped forwarding {} to session {}", track_id, session.id());
        }
        present.insert(track_id);
    }

    // Never loop a session's own media back to it
    present.extend(transport.received_tracks().await);

    for (track_id, track) in tracks {
        if track.origin() == session.id() || present.contains(track_id) {
            continue;
        }
        transport.add_track(track).await?;
        tracing::debug!("Forwarding {} to session {}", track_id, session.id());
    }

    let offer = transport.create_offer().await?;
    session.control().send(ServerMessage::Offer(offer)).await?;

    Ok(())
}
