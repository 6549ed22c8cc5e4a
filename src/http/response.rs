//! Response transformation.
//!
//! Downstream responses pass through verbatim apart from hop-by-hop headers.
//! The serving service is tagged on the response as an extension so the
//! request logger can attribute it.

use axum::response::Response;

use crate::http::request::strip_hop_by_hop;

/// Name of the service that produced (or refused) a response.
#[derive(Debug, Clone)]
pub struct ServedBy(pub String);

pub fn sanitize(mut response: Response) -> Response {
    strip_hop_by_hop(response.headers_mut());
    response
}

pub fn tag(mut response: Response, service: &str) -> Response {
    response.extensions_mut().insert(ServedBy(service.to_string()));
    response
}
