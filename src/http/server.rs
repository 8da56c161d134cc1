//! Forwarding gateway.
//!
//! # Responsibilities
//! - Create the Axum Router for the public listener
//! - Wire up middleware (request ID, tracing)
//! - Ask the registry for a target per request
//! - Forward to the target through the pooled client, or answer 503
//! - Record request metrics

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::TimeoutConfig;
use crate::http::request::{prepare_upstream, request_id, MakeRequestUuid};
use crate::http::response::{from_upstream, service_unavailable};
use crate::load_balancer::TargetRegistry;
use crate::net::ConnectionTracker;
use crate::observability::metrics;

/// Application state injected into the gateway handler.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<TargetRegistry>,
    pub client: Client<HttpConnector, Body>,
    pub tracker: ConnectionTracker,
    pub request_timeout: Duration,
}

impl GatewayState {
    pub fn new(registry: Arc<TargetRegistry>, tracker: ConnectionTracker, timeouts: &TimeoutConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            registry,
            client,
            tracker,
            request_timeout: Duration::from_secs(timeouts.request_secs),
        }
    }
}

/// Build the gateway router with all middleware layers.
pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/", any(proxy_handler))
        .route("/{*path}", any(proxy_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

/// Selects a target for the request path and forwards the request.
async fn proxy_handler(
    State(state): State<GatewayState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let in_flight = state.tracker.track();

    let request_id = request_id(&request);
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let Some(target) = state.registry.get_target_host(&path) else {
        tracing::debug!(request_id = %request_id, path = %path, "No target for path");
        metrics::record_request(&method, 503, "none", start_time);
        return service_unavailable();
    };

    let target_label = target.address.to_string();
    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        agent_id = %target.id,
        target = %target_label,
        client = %client_addr,
        "Proxying request"
    );

    let upstream = match prepare_upstream(request, &target.address) {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::warn!(request_id = %request_id, target = %target_label, error = %e, "Could not build upstream request");
            metrics::record_request(&method, 503, &target_label, start_time);
            return service_unavailable();
        }
    };

    match tokio::time::timeout(state.request_timeout, state.client.request(upstream)).await {
        Ok(Ok(response)) => {
            metrics::record_request(&method, response.status().as_u16(), &target_label, start_time);
            from_upstream(response, in_flight)
        }
        Ok(Err(e)) => {
            tracing::warn!(request_id = %request_id, agent_id = %target.id, target = %target_label, error = %e, "Upstream request failed");
            metrics::record_request(&method, 503, &target_label, start_time);
            service_unavailable()
        }
        Err(_) => {
            tracing::warn!(
                request_id = %request_id,
                agent_id = %target.id,
                target = %target_label,
                timeout = ?state.request_timeout,
                "Upstream request timed out"
            );
            metrics::record_request(&method, 503, &target_label, start_time);
            service_unavailable()
        }
    }
}
