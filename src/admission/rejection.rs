//! Rejection records and the 429 response built from them.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::{Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::partition::RequestDescriptor;
use super::policy::PolicyName;

/// Message returned to every rejected caller.
pub const REJECTION_MESSAGE: &str = "Too many requests. Please try again later.";

/// Response header carrying the request's correlation id.
pub const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

/// Everything known about one refused request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionRecord {
    pub status_code: StatusCode,
    pub message: String,
    /// Whole seconds the caller should wait, at least 1
    pub retry_after_secs: u64,
    pub correlation_id: Option<String>,
    /// Policy whose limiter refused the request
    pub policy: PolicyName,
    pub remote_address: Option<String>,
    pub path: String,
    pub rejected_at: DateTime<Utc>,
}

impl RejectionRecord {
    pub fn new(policy: PolicyName, request: &RequestDescriptor, retry_after: Duration) -> Self {
        Self {
            status_code: StatusCode::TOO_MANY_REQUESTS,
            message: REJECTION_MESSAGE.to_string(),
            retry_after_secs: retry_after_secs(retry_after),
            correlation_id: None,
            policy,
            remote_address: request.remote_address.clone(),
            path: request.path.clone(),
            rejected_at: Utc::now(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Round a wait up to whole seconds, never below one.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

/// JSON body of a 429 response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody<'a> {
    pub error: &'a str,
    pub retry_after: u64,
}

/// Builds the response for a rejected request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectionNotifier;

impl RejectionNotifier {
    pub fn new() -> Self {
        Self
    }

    /// Build the 429 response for `record`.
    ///
    /// Never fails: if the body cannot be produced the status and headers
    /// are still returned.
    pub fn notify(&self, record: &RejectionRecord) -> Response<Bytes> {
        let body = match serde_json::to_vec(&RejectionBody {
            error: &record.message,
            retry_after: record.retry_after_secs,
        }) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                warn!(error = %e, "Failed to serialize rejection body");
                Bytes::new()
            }
        };

        let mut response = Response::new(body);
        *response.status_mut() = record.status_code;

        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(RETRY_AFTER, HeaderValue::from(record.retry_after_secs));
        if let Some(value) = record
            .correlation_id
            .as_deref()
            .and_then(|id| HeaderValue::from_str(id).ok())
        {
            headers.insert(CORRELATION_ID_HEADER, value);
        }

        debug!(
            policy = %record.policy,
            correlation_id = record.correlation_id.as_deref().unwrap_or("-"),
            rejected_at = %record.rejected_at.to_rfc3339(),
            "Rejection response built"
        );

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(retry_after: Duration) -> RejectionRecord {
        let request = RequestDescriptor {
            is_authenticated: false,
            principal_id: None,
            remote_address: Some("10.0.0.1".to_string()),
            path: "/api/v1/users".to_string(),
        };
        RejectionRecord::new(PolicyName::PerUserRateLimit, &request, retry_after)
    }

    #[test]
    fn test_record_fields() {
        let record = record(Duration::from_secs(10));

        assert_eq!(record.status_code, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(record.message, REJECTION_MESSAGE);
        assert_eq!(record.retry_after_secs, 10);
        assert_eq!(record.remote_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(record.path, "/api/v1/users");
        assert!(record.correlation_id.is_none());
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(9_001)), 10);
        assert_eq!(retry_after_secs(Duration::from_secs(12)), 12);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
    }

    #[test]
    fn test_notify_builds_json_429() {
        let record = record(Duration::from_secs(10)).with_correlation_id("abc123");
        let response = RejectionNotifier::new().notify(&record);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[RETRY_AFTER], "10");
        assert_eq!(response.headers()[CORRELATION_ID_HEADER.clone()], "abc123");

        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "error": "Too many requests. Please try again later.",
                "retryAfter": 10
            })
        );
    }

    #[test]
    fn test_notify_without_correlation_id() {
        let response = RejectionNotifier::new().notify(&record(Duration::from_secs(3)));
        assert!(response.headers().get(CORRELATION_ID_HEADER.clone()).is_none());
    }
}
