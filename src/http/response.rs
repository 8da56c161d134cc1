//! Response helpers.
//!
//! Clients only ever see a backend response or 503.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Response, StatusCode};
use axum::response::IntoResponse;
use futures_util::StreamExt;

use crate::net::ConnectionGuard;

/// Connection-scoped headers that must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// The 503 answered when no target serves a request or forwarding fails.
pub fn service_unavailable() -> axum::response::Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "Service unavailable",
    )
        .into_response()
}

/// Convert an upstream response for the client. The request stays in flight
/// until the body has been streamed.
pub fn from_upstream(
    response: Response<hyper::body::Incoming>,
    in_flight: ConnectionGuard,
) -> axum::response::Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, track_body(Body::new(body), in_flight))
}

/// Hold `in_flight` until `body` is finished or dropped.
pub fn track_body(body: Body, in_flight: ConnectionGuard) -> Body {
    let stream = body.into_data_stream().map(move |chunk| {
        let _in_flight = &in_flight;
        chunk
    });
    Body::from_stream(stream)
}
