//! Where admitted requests go.

use async_trait::async_trait;
use http::{Request, Response, StatusCode, Uri};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::json;
use tracing::{debug, error};
use uuid::Uuid;

use super::{json_response, RespBody};
use crate::error::{GatehouseError, Result};

/// Message returned to the caller when the downstream fails.
pub const DOWNSTREAM_ERROR_MESSAGE: &str = "An error occurred while processing your request.";

type HttpClient = Client<HttpConnector, Incoming>;

/// The service behind the gateway. Only admitted requests reach it.
#[async_trait]
pub trait Downstream: Send + Sync {
    /// Handle an admitted request. Failures are turned into responses.
    async fn call(&self, req: Request<Incoming>) -> Response<RespBody>;
}

/// The 502 response sent when the downstream cannot produce one.
pub fn bad_gateway(correlation_id: &str) -> Response<RespBody> {
    json_response(
        StatusCode::BAD_GATEWAY,
        &json!({
            "status": StatusCode::BAD_GATEWAY.as_u16(),
            "error": DOWNSTREAM_ERROR_MESSAGE,
            "correlationId": correlation_id,
        }),
    )
}

/// Forwards admitted requests, unchanged, to a single upstream.
pub struct UpstreamForwarder {
    /// Upstream origin, e.g. `http://127.0.0.1:9000`
    origin: String,
    client: HttpClient,
}

impl UpstreamForwarder {
    /// `upstream` is `host:port`, optionally with an `http://` scheme.
    pub fn new(upstream: &str) -> Self {
        let upstream = upstream.trim_end_matches('/');
        let origin = if upstream.starts_with("http://") {
            upstream.to_string()
        } else {
            format!("http://{}", upstream)
        };

        Self {
            origin,
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Rewrite a request URI to point at the upstream, keeping path and query.
    pub fn upstream_uri(&self, uri: &Uri) -> Result<Uri> {
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

        format!("{}{}", self.origin, path_and_query)
            .parse::<Uri>()
            .map_err(|e| GatehouseError::Http(format!("invalid upstream URI: {}", e)))
    }
}

#[async_trait]
impl Downstream for UpstreamForwarder {
    async fn call(&self, req: Request<Incoming>) -> Response<RespBody> {
        let (mut parts, body) = req.into_parts();

        parts.uri = match self.upstream_uri(&parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                let correlation_id = Uuid::new_v4().to_string();
                error!(error = %e, correlation_id = %correlation_id, "Failed to build upstream request");
                return bad_gateway(&correlation_id);
            }
        };

        debug!(uri = %parts.uri, "Forwarding admitted request");

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(resp) => resp.map(|b| b.boxed()),
            Err(e) => {
                let correlation_id = Uuid::new_v4().to_string();
                error!(
                    error = %e,
                    upstream = %self.origin,
                    correlation_id = %correlation_id,
                    "Upstream request failed"
                );
                bad_gateway(&correlation_id)
            }
        }
    }
}

/// Answers admitted requests itself when no upstream is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalResponder;

impl LocalResponder {
    pub fn new() -> Self {
        Self
    }

    /// Build the local answer for a request path.
    pub fn respond(&self, method: &http::Method, path: &str) -> Response<RespBody> {
        if path == "/health" {
            return json_response(StatusCode::OK, &json!({ "status": "Healthy" }));
        }

        json_response(
            StatusCode::OK,
            &json!({
                "success": true,
                "message": "Request admitted",
                "data": { "method": method.as_str(), "path": path },
            }),
        )
    }
}

#[async_trait]
impl Downstream for LocalResponder {
    async fn call(&self, req: Request<Incoming>) -> Response<RespBody> {
        self.respond(req.method(), req.uri().path())
    }
}
