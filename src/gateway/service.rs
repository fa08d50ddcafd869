//! Per-request handling: describe, admit, forward or reject.

use http::header::HeaderName;
use http::{HeaderMap, Request, Response};
use hyper::body::Incoming;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

use super::downstream::Downstream;
use super::{full, RespBody};
use crate::admission::{AdmissionPipeline, RejectionNotifier, RequestDescriptor};
use crate::config::ServerConfig;
use crate::error::{GatehouseError, Result};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// How caller identity is read from a request.
#[derive(Debug, Clone)]
pub struct IdentityOptions {
    /// Header carrying the authenticated subject
    pub principal_header: HeaderName,
    /// Take the caller address from the first `x-forwarded-for` hop
    pub trust_forwarded_for: bool,
}

impl IdentityOptions {
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let principal_header = HeaderName::from_bytes(config.principal_header.as_bytes())
            .map_err(|e| {
                GatehouseError::Config(format!(
                    "invalid principal_header '{}': {}",
                    config.principal_header, e
                ))
            })?;

        Ok(Self {
            principal_header,
            trust_forwarded_for: config.trust_forwarded_for,
        })
    }
}

/// Build the admission descriptor for a request.
///
/// A request is authenticated when it carries a non-blank principal header.
pub fn describe_request(
    headers: &HeaderMap,
    path: &str,
    peer: SocketAddr,
    identity: &IdentityOptions,
) -> RequestDescriptor {
    let principal_id = header_str(headers, identity.principal_header.as_str()).map(str::to_string);

    let forwarded = if identity.trust_forwarded_for {
        header_str(headers, FORWARDED_FOR)
            .and_then(|hops| hops.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .map(str::to_string)
    } else {
        None
    };

    RequestDescriptor {
        is_authenticated: principal_id.is_some(),
        principal_id,
        remote_address: Some(forwarded.unwrap_or_else(|| peer.ip().to_string())),
        path: path.to_string(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The gateway's request handler.
pub struct GatewayService {
    pipeline: Arc<AdmissionPipeline>,
    notifier: RejectionNotifier,
    downstream: Arc<dyn Downstream>,
    identity: IdentityOptions,
}

impl GatewayService {
    pub fn new(
        pipeline: Arc<AdmissionPipeline>,
        downstream: Arc<dyn Downstream>,
        identity: IdentityOptions,
    ) -> Self {
        Self {
            pipeline,
            notifier: RejectionNotifier::new(),
            downstream,
            identity,
        }
    }

    pub fn pipeline(&self) -> &Arc<AdmissionPipeline> {
        &self.pipeline
    }

    /// Admit the request and pass it downstream, or answer 429.
    #[instrument(skip_all, fields(peer = %peer))]
    pub async fn handle(&self, req: Request<Incoming>, peer: SocketAddr) -> Response<RespBody> {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let descriptor = describe_request(req.headers(), &path, peer, &self.identity);

        let response = match self
            .pipeline
            .process(&descriptor, || self.downstream.call(req))
            .await
        {
            Ok(response) => response,
            Err(record) => {
                let record = record.with_correlation_id(Uuid::new_v4().to_string());
                self.notifier.notify(&record).map(full)
            }
        };

        info!(
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "HTTP request completed"
        );

        response
    }
}
