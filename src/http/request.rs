//! Request identity and upstream request preparation.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for every gateway request
//! - Rewrite the request URI onto the selected target
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - An incoming x-request-id is kept
//! - Only hop-by-hop headers are removed; Host and application headers pass
//!   through untouched

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request, Uri};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::http::response::strip_hop_by_hop;
use crate::load_balancer::TargetAddress;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Issues UUID v4 request ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string()).ok().map(RequestId::new)
    }
}

/// Request id of `request`, or "unknown".
pub fn request_id<B>(request: &Request<B>) -> String {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// `http://<target>` + incoming path and query.
pub fn upstream_uri(target: &TargetAddress, incoming: &Uri) -> Result<Uri, axum::http::Error> {
    let path_and_query = incoming.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Uri::builder()
        .scheme("http")
        .authority(target.authority())
        .path_and_query(path_and_query)
        .build()
}

/// Turn a gateway request into the request sent to `target`.
pub fn prepare_upstream(mut request: Request<Body>, target: &TargetAddress) -> Result<Request<Body>, axum::http::Error> {
    let uri = upstream_uri(target, request.uri())?;
    *request.uri_mut() = uri;
    strip_hop_by_hop(request.headers_mut());
    Ok(request)
}
