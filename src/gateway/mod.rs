//! HTTP gateway that puts the admission pipeline in front of a downstream.

mod downstream;
mod server;
mod service;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};

pub use downstream::{bad_gateway, Downstream, LocalResponder, UpstreamForwarder, DOWNSTREAM_ERROR_MESSAGE};
pub use server::HttpServer;
pub use service::{describe_request, GatewayService, IdentityOptions};

/// Response body type used throughout the gateway.
pub type RespBody = BoxBody<Bytes, hyper::Error>;

/// Wrap fixed bytes in a [`RespBody`].
pub fn full(body: impl Into<Bytes>) -> RespBody {
    Full::new(body.into()).map_err(|never| match never {}).boxed()
}

/// Build a JSON response with the given status.
pub(crate) fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<RespBody> {
    let mut response = Response::new(full(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
