//! Session registry
//!
//! Live sessions and the global set of published tracks, behind one
//! exclusive lock. Reconciliation passes hold that lock for their whole
//! duration, so every mutation here is linearized with them.

use super::transport::{ControlChannel, MediaTransport};
use super::PublishedTrack;
use crate::net::{AddressLease, VirtualAddr};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closed,
}

/// One connected party
pub struct Session {
    id: SessionId,
    address: VirtualAddr,
    transport: Arc<dyn MediaTransport>,
    control: Arc<dyn ControlChannel>,
    /// Released when the session is dropped, whichever path removed it
    lease: Option<AddressLease>,
    /// Negotiation rounds still owed to this session
    pending_rounds: u32,
    state: SessionState,
}

impl Session {
    pub fn new(
        id: SessionId,
        address: VirtualAddr,
        transport: Arc<dyn MediaTransport>,
        control: Arc<dyn ControlChannel>,
    ) -> Self {
        Self {
            id,
            address,
            transport,
            control,
            lease: None,
            pending_rounds: 0,
            state: SessionState::Active,
        }
    }

    /// Tie the session's address slot to its lifetime
    pub fn with_lease(mut self, lease: AddressLease) -> Self {
        self.address = lease.addr();
        self.lease = Some(lease);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn address(&self) -> VirtualAddr {
        self.address
    }

    pub fn transport(&self) -> &Arc<dyn MediaTransport> {
        &self.transport
    }

    pub fn control(&self) -> &Arc<dyn ControlChannel> {
        &self.control
    }

    pub fn pending_rounds(&self) -> u32 {
        self.pending_rounds
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub address: VirtualAddr,
    pub pending_rounds: u32,
    pub state: SessionState,
}

/// Everything the registry lock protects
pub struct RegistryState {
    sessions: Vec<Session>,
    tracks: HashMap<String, Arc<PublishedTrack>>,
    dirty_rounds: u32,
}

impl RegistryState {
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn tracks(&self) -> &HashMap<String, Arc<PublishedTrack>> {
        &self.tracks
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Register a session; it starts out owing a full negotiation
    pub fn add(&mut self, mut session: Session) -> SessionId {
        let id = session.id;
        session.pending_rounds = self.dirty_rounds;
        self.sessions.push(session);
        id
    }

    /// Remove a session and everything it published
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let index = self.sessions.iter().position(|s| s.id == id)?;
        Some(self.remove_at(index))
    }

    pub(crate) fn remove_at(&mut self, index: usize) -> Session {
        let mut session = self.sessions.remove(index);
        session.state = SessionState::Closed;

        let before = self.tracks.len();
        self.tracks.retain(|_, track| track.origin() != session.id);
        if self.tracks.len() != before {
            tracing::info!(
                "Dropped {} tracks published by session {}",
                before - self.tracks.len(),
                session.id
            );
            self.mark_all_dirty();
        }

        session
    }

    pub fn publish(&mut self, track: Arc<PublishedTrack>) {
        tracing::info!("Session {} published track {}", track.origin(), track.id());
        self.tracks.insert(track.id().to_string(), track);
        self.mark_all_dirty();
    }

    pub fn unpublish(&mut self, track_id: &str) -> Option<Arc<PublishedTrack>> {
        let removed = self.tracks.remove(track_id);
        if removed.is_some() {
            tracing::info!("Track {} unpublished", track_id);
            self.mark_all_dirty();
        }
        removed
    }

    /// Every session owes a fresh negotiation after the track set changed
    pub fn mark_all_dirty(&mut self) {
        for session in &mut self.sessions {
            session.pending_rounds = self.dirty_rounds;
        }
    }

    /// Count one negotiation answer; returns the rounds still owed
    pub fn acknowledge(&mut self, id: SessionId) -> Option<u32> {
        let session = self.sessions.iter_mut().find(|s| s.id == id)?;
        session.pending_rounds = session.pending_rounds.saturating_sub(1);
        Some(session.pending_rounds)
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .iter()
            .map(|s| SessionSnapshot {
                id: s.id,
                address: s.address,
                pending_rounds: s.pending_rounds,
                state: s.state,
            })
            .collect()
    }
}

pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    /// `dirty_rounds` is the pending counter every session gets whenever
    /// the published track set changes
    pub fn new(dirty_rounds: u32) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                sessions: Vec::new(),
                tracks: HashMap::new(),
                dirty_rounds: dirty_rounds.max(1),
            }),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().await
    }

    pub async fn add(&self, session: Session) -> SessionId {
        let mut state = self.lock().await;
        let id = state.add(session);
        tracing::info!("Session {} registered ({} live)", id, state.sessions.len());
        id
    }

    pub async fn remove(&self, id: SessionId) -> Option<Session> {
        let mut state = self.lock().await;
        let removed = state.remove(id);
        if removed.is_some() {
            tracing::info!("Session {} removed ({} live)", id, state.sessions.len());
        }
        removed
    }

    pub async fn publish(&self, track: Arc<PublishedTrack>) {
        self.lock().await.publish(track);
    }

    pub async fn unpublish(&self, track_id: &str) -> Option<Arc<PublishedTrack>> {
        self.lock().await.unpublish(track_id)
    }

    /// Unpublish `track` only if it is still the registered instance for
    /// its id; a later publisher of the same id keeps its track.
    pub async fn retract(&self, track: &Arc<PublishedTrack>) -> bool {
        let mut state = self.lock().await;
        let current = state
            .tracks
            .get(track.id())
            .is_some_and(|registered| Arc::ptr_eq(registered, track));
        if current {
            state.unpublish(track.id());
        }
        current
    }

    pub async fn mark_all_dirty(&self) {
        self.lock().await.mark_all_dirty();
    }

    pub async fn acknowledge(&self, id: SessionId) -> Option<u32> {
        self.lock().await.acknowledge(id)
    }

    pub async fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.lock().await.snapshot()
    }

    pub async fn len(&self) -> usize {
        self.lock().await.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sfu::testing::{session, track};

    #[tokio::test]
    async fn test_add_starts_dirty() {
        let registry = SessionRegistry::new(3);
        let (s, _, _) = session(0);
        let id = registry.add(s).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
        assert_eq!(snapshot[0].pending_rounds, 3);
        assert_eq!(snapshot[0].state, SessionState::Active);
    }

    #[tokio::test]
    async fn test_acknowledge_never_goes_negative() {
        let registry = SessionRegistry::new(2);
        let (s, _, _) = session(0);
        let id = registry.add(s).await;

        assert_eq!(registry.acknowledge(id).await, Some(1));
        assert_eq!(registry.acknowledge(id).await, Some(0));
        assert_eq!(registry.acknowledge(id).await, Some(0));
        assert_eq!(registry.acknowledge(Uuid::new_v4()).await, None);
    }

    #[tokio::test]
    async fn test_publish_marks_every_session_dirty() {
        let registry = SessionRegistry::new(1);
        let (a, _, _) = session(0);
        let (b, _, _) = session(1);
        let a = registry.add(a).await;
        let b = registry.add(b).await;
        registry.acknowledge(a).await;
        registry.acknowledge(b).await;

        registry.publish(track("cam", a)).await;

        for snapshot in registry.snapshot().await {
            assert_eq!(snapshot.pending_rounds, 1);
        }
    }

    #[tokio::test]
    async fn test_remove_drops_owned_tracks() {
        let registry = SessionRegistry::new(1);
        let (a, _, _) = session(0);
        let (b, _, _) = session(1);
        let a = registry.add(a).await;
        let b = registry.add(b).await;
        registry.publish(track("a-cam", a)).await;
        registry.publish(track("b-cam", b)).await;
        registry.acknowledge(b).await;

        let removed = registry.remove(a).await.unwrap();
        assert_eq!(removed.state(), SessionState::Closed);

        let state = registry.lock().await;
        assert!(!state.tracks().contains_key("a-cam"));
        assert!(state.tracks().contains_key("b-cam"));
        assert_eq!(state.session(b).unwrap().pending_rounds(), 1);
    }

    #[tokio::test]
    async fn test_retract_leaves_replacement_in_place() {
        let registry = SessionRegistry::new(1);
        let (a, _, _) = session(0);
        let (b, _, _) = session(1);
        let a = registry.add(a).await;
        let b = registry.add(b).await;

        let first = track("mic", a);
        let second = track("mic", b);
        registry.publish(first.clone()).await;
        registry.publish(second.clone()).await;

        assert!(!registry.retract(&first).await);
        assert_eq!(registry.lock().await.tracks()["mic"].origin(), b);

        assert!(registry.retract(&second).await);
        assert!(registry.lock().await.tracks().is_empty());
    }

    #[tokio::test]
    async fn test_unpublish_unknown_track_leaves_sessions_clean() {
        let registry = SessionRegistry::new(1);
        let (a, _, _) = session(0);
        let a = registry.add(a).await;
        registry.publish(track("cam", a)).await;
        registry.acknowledge(a).await;

        assert!(registry.unpublish("missing").await.is_none());
        assert_eq!(registry.snapshot().await[0].pending_rounds, 0);

        assert!(registry.unpublish("cam").await.is_some());
        assert_eq!(registry.snapshot().await[0].pending_rounds, 1);
    }

    #[tokio::test]
    async fn test_remove_unknown_session_is_noop() {
        let registry = SessionRegistry::new(1);
        assert!(registry.remove(Uuid::new_v4()).await.is_none());
        assert_eq!(registry.len().await, 0);
    }
}
