//! Request identity and partition key resolution.

use std::fmt;

/// The fields of an inbound request the admission layer consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// Whether the authentication layer vouched for the caller
    pub is_authenticated: bool,
    /// Stable subject identifier of an authenticated caller
    pub principal_id: Option<String>,
    /// Caller network address
    pub remote_address: Option<String>,
    /// Request path, used for route policy selection and diagnostics
    pub path: String,
}

/// A key that scopes a limiter's counters.
///
/// Variants are distinct even when their payloads are equal strings, so an
/// authenticated caller never shares counters with an anonymous caller from
/// the same address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    /// The single partition shared by all callers
    Global,
    /// An authenticated caller's subject identifier
    Principal(String),
    /// An unauthenticated caller's network address
    Address(String),
    /// Neither identity nor address known
    Anonymous,
}

impl PartitionKey {
    /// Resolve the per-caller key for a request.
    ///
    /// Authenticated callers are keyed by subject; an authenticated request
    /// without a subject falls through to [`PartitionKey::Anonymous`], not to
    /// its address. Unauthenticated callers are keyed by address when known.
    pub fn resolve(request: &RequestDescriptor) -> Self {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let identity = if request.is_authenticated {
            non_empty(&request.principal_id).map(PartitionKey::Principal)
        } else {
            non_empty(&request.remote_address).map(PartitionKey::Address)
        };

        identity.unwrap_or(PartitionKey::Anonymous)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Global => f.write_str("GlobalLimit"),
            PartitionKey::Principal(id) => write!(f, "user:{}", id),
            PartitionKey::Address(addr) => write!(f, "ip:{}", addr),
            PartitionKey::Anonymous => f.write_str("anonymous"),
        }
    }
}
