//! The assembled gateway
//!
//! Owns the limiter registry, connection counter, and session table, and
//! exposes the three callbacks the transport layer drives: `on_handshake`,
//! `on_accepted`, and `on_disconnected`. All shared state is created at
//! gateway startup and torn down at shutdown; nothing lives in process
//! globals.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use log::info;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::core::address::SourceAddress;
use crate::core::admission::{AdmissionPipeline, AdmissionVerdict};
use crate::core::bootstrap::{ConnectionCredentials, HandshakeOutcome, IdentityResolver};
use crate::core::connection_counter::ConnectionCounter;
use crate::core::rate_limiter::LimiterRegistry;
use crate::core::session::{ConnectionHandle, ControlMessage, Session};
use crate::error::{GatewardError, Result};
use crate::stores::{BanStore, ExitNodeBlocklist, SessionStore};

pub struct Gateway {
    config: Arc<GatewayConfig>,
    limiters: Arc<LimiterRegistry>,
    counter: Arc<ConnectionCounter>,
    pipeline: AdmissionPipeline,
    resolver: IdentityResolver,
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        session_store: Arc<dyn SessionStore>,
        ban_store: Arc<dyn BanStore>,
        blocklist: Option<Arc<dyn ExitNodeBlocklist>>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let limiters = Arc::new(LimiterRegistry::new(config.idle_threshold));
        let counter = Arc::new(ConnectionCounter::new());
        let pipeline = AdmissionPipeline::new(
            config.clone(),
            limiters.clone(),
            counter.clone(),
            ban_store,
            blocklist,
        );
        let resolver = IdentityResolver::new(session_store, config.identity_timeout);

        Arc::new(Self {
            config,
            limiters,
            counter,
            pipeline,
            resolver,
            sessions: RwLock::new(HashMap::new()),
            sweep_task: Mutex::new(None),
        })
    }

    /// Start the background limiter sweep. Idempotent.
    pub async fn start(&self) {
        let mut task = self.sweep_task.lock().await;
        if task.is_none() {
            *task = Some(
                self.limiters
                    .clone()
                    .start_sweep_task(self.config.sweep_interval),
            );
        }
    }

    /// Stop the sweep task and close every remaining session.
    pub async fn shutdown(&self) {
        if let Some(task) = self.sweep_task.lock().await.take() {
            task.abort();
        }
        let mut sessions = self.sessions.write().await;
        for session in sessions.values() {
            session.close();
            session.handle().force_disconnect();
            self.counter.decrement(session.address()).await;
        }
        sessions.clear();
    }

    /// Pre-accept handshake callback. The transport always accepts at its
    /// level; the returned outcome just carries any advisory identity along
    /// to `on_accepted`.
    pub async fn on_handshake(&self, credentials: &ConnectionCredentials) -> HandshakeOutcome {
        self.resolver.resolve_handshake(credentials).await
    }

    /// Post-accept callback: run admission, then construct the session and
    /// start its bootstrap. On rejection the peer is notified and forcibly
    /// disconnected, and no session exists afterwards.
    pub async fn on_accepted(
        &self,
        ip: IpAddr,
        handle: Arc<dyn ConnectionHandle>,
        handshake: HandshakeOutcome,
    ) -> Result<Arc<Session>> {
        let address = SourceAddress::new(ip);

        match self.pipeline.admit(address).await {
            AdmissionVerdict::Reject(reason) => {
                handle.send_control(ControlMessage::Kick {
                    reason: reason.message().to_string(),
                });
                handle.force_disconnect();
                return Err(GatewardError::RejectedAdmission(reason));
            }
            AdmissionVerdict::Accept => {}
        }

        info!("Accepted connection from {}", address.masked());
        let session = Arc::new(Session::new(address, handle));
        self.sessions
            .write()
            .await
            .insert(session.id(), session.clone());

        // Bootstrap runs concurrently with other connections; its
        // continuations no-op if the session closes first
        let resolver = self.resolver.clone();
        let bootstrap_session = session.clone();
        tokio::spawn(async move {
            resolver.bootstrap(&bootstrap_session, handshake).await;
        });

        Ok(session)
    }

    /// Disconnect callback. Closes the session and releases its counter
    /// slot; unknown ids (e.g. a second disconnect event) are ignored.
    pub async fn on_disconnected(&self, session_id: Uuid) {
        let session = self.sessions.write().await.remove(&session_id);
        if let Some(session) = session {
            session.close();
            self.counter.decrement(session.address()).await;
        }
    }

    pub async fn session(&self, session_id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub fn counter(&self) -> &Arc<ConnectionCounter> {
        &self.counter
    }

    pub fn limiters(&self) -> &Arc<LimiterRegistry> {
        &self.limiters
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}
