//! Session bootstrap and identity resolution
//!
//! Identity is resolved twice: an advisory lookup during the pre-accept
//! handshake (the transport always accepts regardless of the outcome) and
//! a confirming lookup after acceptance. Only the second one grants the
//! logged-in state. Store failures are never connection-fatal; they
//! degrade the session to anonymous.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::core::session::{ControlMessage, Identity, Session, SessionState};
use crate::stores::SessionStore;

/// Credentials presented with a connection attempt. The token is opaque to
/// the gateway; only the session store can interpret it.
#[derive(Debug, Clone, Default)]
pub struct ConnectionCredentials {
    pub token: Option<String>,
}

/// Result of the pre-accept handshake phase. The transport-level accept
/// decision never depends on this; a failed resolution simply yields no
/// identity.
#[derive(Debug, Clone, Default)]
pub struct HandshakeOutcome {
    pub identity: Option<Identity>,
}

/// Drives the two resolution calls and the session readiness transitions.
#[derive(Clone)]
pub struct IdentityResolver {
    session_store: Arc<dyn SessionStore>,
    resolve_timeout: Duration,
}

impl IdentityResolver {
    pub fn new(session_store: Arc<dyn SessionStore>, resolve_timeout: Duration) -> Self {
        Self {
            session_store,
            resolve_timeout,
        }
    }

    /// Pre-accept resolution. Looks the token up if one is present; always
    /// "accepts" in the sense that the caller proceeds either way.
    pub async fn resolve_handshake(&self, credentials: &ConnectionCredentials) -> HandshakeOutcome {
        let token = match &credentials.token {
            Some(token) => token,
            None => return HandshakeOutcome::default(),
        };

        let resolved = tokio::time::timeout(
            self.resolve_timeout,
            self.session_store.verify_token(token),
        )
        .await;

        match resolved {
            Ok(Ok(identity)) => HandshakeOutcome {
                identity: Some(identity),
            },
            Ok(Err(e)) => {
                debug!("Handshake token resolution failed: {}", e);
                HandshakeOutcome::default()
            }
            Err(_) => {
                debug!("Handshake token resolution timed out");
                HandshakeOutcome::default()
            }
        }
    }

    /// Post-accept bootstrap. Re-confirms a handshake-resolved identity,
    /// emits the login and rank notifications, and moves the session to a
    /// ready state on every path exactly once.
    ///
    /// Safe to race connection teardown: every mutation goes through the
    /// session's liveness-checked transitions, so a closed session makes
    /// the rest of this a no-op.
    pub async fn bootstrap(&self, session: &Arc<Session>, handshake: HandshakeOutcome) {
        if !session.is_live() {
            return;
        }

        let identity = match handshake.identity {
            Some(identity) => identity,
            None => {
                // Guest session: no resolution to wait on
                session.handle().send_control(ControlMessage::Rank { rank: -1 });
                session.transition(SessionState::AnonymousReady).await;
                return;
            }
        };

        session.transition(SessionState::PendingAuth).await;

        let confirmed = tokio::time::timeout(
            self.resolve_timeout,
            self.session_store.fetch_account(&identity.name),
        )
        .await;

        let account = match confirmed {
            Ok(Ok(account)) => account,
            Ok(Err(e)) => {
                debug!("Account confirmation failed for '{}': {}", identity.name, e);
                session.transition(SessionState::AnonymousReady).await;
                return;
            }
            Err(_) => {
                debug!("Account confirmation timed out for '{}'", identity.name);
                session.transition(SessionState::AnonymousReady).await;
                return;
            }
        };

        if !session.is_live() {
            return;
        }

        session.set_identity(account.clone()).await;
        session.handle().send_control(ControlMessage::Login {
            success: true,
            name: account.name.clone(),
            guest: false,
        });
        if let Err(e) = self
            .session_store
            .record_visit(&session.address(), &account.name)
            .await
        {
            debug!("Visit record failed for '{}': {}", account.name, e);
        }
        session.handle().send_control(ControlMessage::Rank { rank: account.rank });
        info!(
            "{} logged in as {}",
            session.address().masked(),
            account.name
        );
        session.transition(SessionState::LoggedIn).await;
    }
}
