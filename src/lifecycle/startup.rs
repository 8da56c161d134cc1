//! Startup and shutdown orchestration.
//!
//! # Responsibilities
//! - Build the shared registry, authenticator and dispatcher from the config
//! - Bind the gateway and control listeners (plain or TLS) and serve them
//! - Stop in order: signal sessions, drain in-flight requests, close
//!   listeners, clear the registry
//!
//! # Design Decisions
//! - Fail fast: a bind or TLS error leaves the server Closed
//! - The registry is cleared on both start and stop; routing state never
//!   survives a restart

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::ProxyConfig;
use crate::control::auth::{Authenticator, CertStore, CertStoreAuthenticator, OriginPolicy};
use crate::control::handler::{CustomEventHandler, EventDispatcher, RejectUnknownEvents};
use crate::control::server::{control_router, ControlState};
use crate::http::server::{gateway_router, GatewayState};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{LoadBalancer, TargetRegistry, WeightedRoundRobin};
use crate::net::tls::load_tls_config;
use crate::net::ConnectionTracker;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind { address: String, source: io::Error },

    #[error("failed to load TLS material: {0}")]
    Tls(io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Lifecycle state of a [`ProxyServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Closed,
    Pending,
    Open,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServerState::Closed => "closed",
            ServerState::Pending => "pending",
            ServerState::Open => "open",
        })
    }
}

struct Running {
    shutdown: Shutdown,
    tracker: ConnectionTracker,
    control_state: ControlState,
    gateway: Listener,
    control: Listener,
}

struct Listener {
    addr: SocketAddr,
    handle: Handle,
    task: JoinHandle<io::Result<()>>,
}

/// The proxy: a public gateway plus the agent control channel.
pub struct ProxyServer {
    config: ProxyConfig,
    registry: Arc<TargetRegistry>,
    authenticator: Arc<dyn Authenticator>,
    custom_handler: Arc<dyn CustomEventHandler>,
    origin_policy: Option<Arc<dyn OriginPolicy>>,
    state: ServerState,
    running: Option<Running>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        let balancer = WeightedRoundRobin::new(config.balancer.pending_on_wrap);
        let store = CertStore::new(config.auth.certstore_dir.clone());
        Self {
            registry: Arc::new(TargetRegistry::new(Box::new(balancer))),
            authenticator: Arc::new(CertStoreAuthenticator::new(store)),
            custom_handler: Arc::new(RejectUnknownEvents),
            origin_policy: None,
            state: ServerState::Closed,
            running: None,
            config,
        }
    }

    /// Replace the credential check used for upgrades and messages.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Replace the handler for unknown event types.
    pub fn with_custom_handler(mut self, handler: Arc<dyn CustomEventHandler>) -> Self {
        self.custom_handler = handler;
        self
    }

    /// Replace the origin policy derived from `control.allowed_origins`.
    pub fn with_origin_policy(mut self, policy: Arc<dyn OriginPolicy>) -> Self {
        self.origin_policy = Some(policy);
        self
    }

    /// Replace the selection strategy. Starts from an empty registry.
    pub fn with_load_balancer(mut self, balancer: Box<dyn LoadBalancer>) -> Self {
        self.registry = Arc::new(TargetRegistry::new(balancer));
        self
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    /// Bound gateway address while open.
    pub fn gateway_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.gateway.addr)
    }

    /// Bound control address while open.
    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.control.addr)
    }

    /// Number of live control sessions.
    pub fn session_count(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.control_state.sessions().len())
    }

    /// Bind and serve both listeners. Returns `Ok(false)` unless the server was Closed.
    pub async fn start(&mut self) -> Result<bool, ServerError> {
        if self.state != ServerState::Closed {
            tracing::warn!(state = %self.state, "Start requested while not closed");
            return Ok(false);
        }
        self.state = ServerState::Pending;

        match self.launch().await {
            Ok(running) => {
                tracing::info!(
                    gateway = %running.gateway.addr,
                    control = %running.control.addr,
                    tls = self.config.tls.is_some(),
                    "Proxy started"
                );
                self.running = Some(running);
                self.state = ServerState::Open;
                Ok(true)
            }
            Err(e) => {
                tracing::error!(error = %e, "Proxy failed to start");
                self.state = ServerState::Closed;
                Err(e)
            }
        }
    }

    async fn launch(&self) -> Result<Running, ServerError> {
        self.registry.clean_host();

        let tls = match &self.config.tls {
            Some(tls) => Some(
                load_tls_config(&tls.cert_path, &tls.key_path)
                    .await
                    .map_err(ServerError::Tls)?,
            ),
            None => None,
        };

        let shutdown = Shutdown::new();
        let tracker = ConnectionTracker::new();

        let gateway_state = GatewayState::new(self.registry.clone(), tracker.clone(), &self.config.timeouts);

        let store = CertStore::new(self.config.auth.certstore_dir.clone());
        let dispatcher = EventDispatcher::new(
            self.registry.clone(),
            self.authenticator.clone(),
            store,
            self.config.control.sysadmin_agent_id.clone(),
        )
        .with_custom_handler(self.custom_handler.clone());

        let mut control_state = ControlState::new(
            self.config.control.clone(),
            Arc::new(dispatcher),
            self.authenticator.clone(),
            shutdown.clone(),
        );
        if let Some(policy) = &self.origin_policy {
            control_state = control_state.with_origin_policy(policy.clone());
        }

        let gateway_listener = bind(&self.config.gateway.bind_address).await?;
        let control_listener = bind(&self.config.control.bind_address).await?;

        let gateway = serve(gateway_listener, tls.clone(), gateway_router(gateway_state))?;
        let control = serve(control_listener, tls, control_router(control_state.clone()))?;

        Ok(Running {
            shutdown,
            tracker,
            control_state,
            gateway,
            control,
        })
    }

    /// Stop both listeners. Returns `Ok(false)` unless the server was Open.
    pub async fn stop(&mut self) -> Result<bool, ServerError> {
        if self.state != ServerState::Open {
            tracing::warn!(state = %self.state, "Stop requested while not open");
            return Ok(false);
        }
        let Some(running) = self.running.take() else {
            self.state = ServerState::Closed;
            return Ok(false);
        };
        self.state = ServerState::Pending;

        let close_timeout = self.config.shutdown.close_timeout();
        tracing::info!(
            in_flight = running.tracker.active_count(),
            sessions = running.control_state.sessions().len(),
            "Stopping proxy"
        );

        running.shutdown.trigger();
        running.gateway.handle.graceful_shutdown(Some(close_timeout));
        running.control.handle.graceful_shutdown(Some(close_timeout));

        if !running.tracker.drain(close_timeout).await {
            tracing::warn!(remaining = running.tracker.active_count(), "In-flight requests did not drain in time");
        }
        if !running.control_state.drain_sessions(close_timeout).await {
            tracing::warn!(remaining = running.control_state.sessions().len(), "Control sessions did not close in time");
        }

        for listener in [running.gateway, running.control] {
            join_listener(listener, close_timeout).await;
        }

        self.registry.clean_host();
        self.state = ServerState::Closed;
        tracing::info!("Proxy stopped");
        Ok(true)
    }
}

async fn bind(address: &str) -> Result<std::net::TcpListener, ServerError> {
    let bind_err = |source| ServerError::Bind {
        address: address.to_string(),
        source,
    };
    let listener = tokio::net::TcpListener::bind(address).await.map_err(bind_err)?;
    listener.into_std().map_err(bind_err)
}

fn serve(listener: std::net::TcpListener, tls: Option<RustlsConfig>, app: Router) -> Result<Listener, ServerError> {
    let addr = listener.local_addr()?;
    let handle = Handle::new();
    let service = app.into_make_service_with_connect_info::<SocketAddr>();

    let task = match tls {
        Some(config) => {
            let server = axum_server::tls_rustls::from_tcp_rustls(listener, config).handle(handle.clone());
            tokio::spawn(async move { server.serve(service).await })
        }
        None => {
            let server = axum_server::from_tcp(listener).handle(handle.clone());
            tokio::spawn(async move { server.serve(service).await })
        }
    };

    Ok(Listener { addr, handle, task })
}

async fn join_listener(listener: Listener, close_timeout: Duration) {
    let Listener { addr, handle, mut task } = listener;
    // Connections still open after the grace period are dropped by the handle.
    match tokio::time::timeout(close_timeout + Duration::from_millis(500), &mut task).await {
        Ok(Ok(Ok(()))) => tracing::debug!(address = %addr, "Listener closed"),
        Ok(Ok(Err(e))) => tracing::error!(address = %addr, error = %e, "Listener failed"),
        Ok(Err(e)) => tracing::error!(address = %addr, error = %e, "Listener task panicked"),
        Err(_) => {
            tracing::warn!(address = %addr, "Listener did not close in time, aborting");
            handle.shutdown();
            task.abort();
        }
    }
}
