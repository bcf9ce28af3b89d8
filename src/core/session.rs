//! Session state for one accepted connection
//!
//! The state machine below is the source of truth for the readiness flags;
//! there is no separate bitfield to keep in sync. Transitions on a closed
//! session are no-ops so late identity-resolution continuations cannot
//! mutate a session that is already gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use crate::core::address::SourceAddress;

/// Resolved account identity; absent for guest sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub rank: i32,
}

/// Control messages emitted to the peer during admission and bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Kick { reason: String },
    Login { success: bool, name: String, guest: bool },
    Rank { rank: i32 },
}

impl ControlMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Readiness state machine for a session.
///
/// ```text
/// Anonymous ──token──> PendingAuth ──confirmed──> LoggedIn
///     │                     │
///     └──no token────┐      └──failed──> AnonymousReady
///                    └────────────────>
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Initial state, no flags set.
    Anonymous,
    /// Handshake carried an identity; awaiting post-accept confirmation.
    PendingAuth,
    /// Identity confirmed. Terminal.
    LoggedIn,
    /// No identity (none presented, or resolution failed). Terminal.
    AnonymousReady,
}

impl SessionState {
    pub fn registered(self) -> bool {
        matches!(self, Self::PendingAuth | Self::LoggedIn)
    }

    pub fn logged_in(self) -> bool {
        matches!(self, Self::LoggedIn)
    }

    /// The signal the application layer waits on before using a session.
    pub fn ready(self) -> bool {
        matches!(self, Self::LoggedIn | Self::AnonymousReady)
    }

    fn can_transition_to(self, to: SessionState) -> bool {
        matches!(
            (self, to),
            (Self::Anonymous, Self::PendingAuth)
                | (Self::Anonymous, Self::AnonymousReady)
                | (Self::PendingAuth, Self::LoggedIn)
                | (Self::PendingAuth, Self::AnonymousReady)
        )
    }
}

/// Handle to the underlying transport connection, for emitting control
/// messages and forcing disconnection. Implemented by the embedding
/// transport layer.
pub trait ConnectionHandle: Send + Sync {
    /// Queue a control message for the peer. Returns false if the
    /// connection can no longer accept messages.
    fn send_control(&self, message: ControlMessage) -> bool;

    /// Forcibly close the underlying connection.
    fn force_disconnect(&self);
}

/// Channel-backed `ConnectionHandle` for tests and in-process transports.
/// The receiving half is what a transport writer task would drain.
pub struct ChannelConnection {
    sender: mpsc::UnboundedSender<ControlMessage>,
    disconnected: AtomicBool,
}

impl ChannelConnection {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ControlMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                disconnected: AtomicBool::new(false),
            },
            receiver,
        )
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl ConnectionHandle for ChannelConnection {
    fn send_control(&self, message: ControlMessage) -> bool {
        if self.is_disconnected() {
            return false;
        }
        match self.sender.send(message) {
            Ok(_) => true,
            Err(_) => {
                warn!("Failed to queue control message: peer receiver dropped");
                false
            }
        }
    }

    fn force_disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Server-side state for one accepted connection.
pub struct Session {
    id: Uuid,
    address: SourceAddress,
    state: RwLock<SessionState>,
    identity: RwLock<Option<Identity>>,
    handle: Arc<dyn ConnectionHandle>,
    live: AtomicBool,
    ready: Notify,
    connected_at: DateTime<Utc>,
}

impl Session {
    pub fn new(address: SourceAddress, handle: Arc<dyn ConnectionHandle>) -> Self {
        Self {
            id: Uuid::new_v4(),
            address,
            state: RwLock::new(SessionState::Anonymous),
            identity: RwLock::new(None),
            handle,
            live: AtomicBool::new(true),
            ready: Notify::new(),
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> SourceAddress {
        self.address
    }

    pub fn handle(&self) -> &Arc<dyn ConnectionHandle> {
        &self.handle
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.identity.read().await.clone()
    }

    pub(crate) async fn set_identity(&self, identity: Identity) {
        if !self.is_live() {
            return;
        }
        *self.identity.write().await = Some(identity);
    }

    /// Attempt a state transition. Returns false (without mutating) when
    /// the transition is not in the table or the session is closed.
    pub async fn transition(&self, to: SessionState) -> bool {
        if !self.is_live() {
            return false;
        }
        let mut state = self.state.write().await;
        if !state.can_transition_to(to) {
            return false;
        }
        *state = to;
        drop(state);
        if to.ready() {
            self.ready.notify_waiters();
        }
        true
    }

    /// Wait until the session reaches a ready state (`LoggedIn` or
    /// `AnonymousReady`). Returns false if the session closed before it
    /// became ready, so callers are not left waiting on a dead session.
    pub async fn wait_ready(&self) -> bool {
        loop {
            let notified = self.ready.notified();
            if self.state.read().await.ready() {
                return true;
            }
            if !self.is_live() {
                return false;
            }
            notified.await;
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Mark the session as gone. Any in-flight resolution continuation
    /// becomes a no-op from this point on.
    pub fn close(&self) {
        self.live.store(false, Ordering::SeqCst);
        // Unblock waiters so nothing hangs on a session that will never
        // become ready
        self.ready.notify_waiters();
    }
}
