//! Typed admission policies.
//!
//! The raw [`AdmissionConfig`] is validated once at startup into a
//! [`PolicySet`]: every named policy is bound to an algorithm and its
//! parameters, and route prefixes are bound to policy names. Nothing in the
//! request path looks policies up by string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::{AdmissionConfig, LimiterConfig, QueueMode};
use crate::error::{GatehouseError, Result};

/// The closed set of admission policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyName {
    /// Named fixed-window policy for selected endpoints
    #[serde(rename = "fixed")]
    Fixed,
    /// Per-caller token bucket
    #[serde(rename = "PerUserRateLimit", alias = "per_user_rate_limit")]
    PerUserRateLimit,
    /// Process-wide ceiling shared by every caller
    #[serde(rename = "GlobalLimit", alias = "global_limit")]
    GlobalLimit,
}

impl PolicyName {
    pub const ALL: [PolicyName; 3] = [
        PolicyName::Fixed,
        PolicyName::PerUserRateLimit,
        PolicyName::GlobalLimit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyName::Fixed => "fixed",
            PolicyName::PerUserRateLimit => "PerUserRateLimit",
            PolicyName::GlobalLimit => "GlobalLimit",
        }
    }

    /// The algorithm a policy is bound to, as spelled in configuration.
    pub fn algorithm(&self) -> &'static str {
        match self {
            PolicyName::Fixed | PolicyName::GlobalLimit => "fixed_window",
            PolicyName::PerUserRateLimit => "token_bucket",
        }
    }
}

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a fixed-window counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindowOptions {
    pub permit_limit: u32,
    pub window: Duration,
    pub queue_limit: u32,
}

/// Parameters of a token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketOptions {
    pub token_limit: u32,
    pub tokens_per_period: u32,
    pub replenish_period: Duration,
    pub queue_limit: u32,
}

/// A validated algorithm binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterOptions {
    FixedWindow(FixedWindowOptions),
    TokenBucket(TokenBucketOptions),
}

impl LimiterOptions {
    pub fn queue_limit(&self) -> u32 {
        match self {
            LimiterOptions::FixedWindow(o) => o.queue_limit,
            LimiterOptions::TokenBucket(o) => o.queue_limit,
        }
    }

    /// The longest interval between two capacity-release events.
    pub fn period(&self) -> Duration {
        match self {
            LimiterOptions::FixedWindow(o) => o.window,
            LimiterOptions::TokenBucket(o) => o.replenish_period,
        }
    }

    fn without_queue(self) -> Self {
        match self {
            LimiterOptions::FixedWindow(o) => LimiterOptions::FixedWindow(FixedWindowOptions {
                queue_limit: 0,
                ..o
            }),
            LimiterOptions::TokenBucket(o) => LimiterOptions::TokenBucket(TokenBucketOptions {
                queue_limit: 0,
                ..o
            }),
        }
    }

    fn from_config(name: PolicyName, config: &LimiterConfig) -> Result<Self> {
        let invalid = |field: &str| {
            GatehouseError::Config(format!("policy '{}': {} must be positive", name, field))
        };

        let configured = match config {
            LimiterConfig::FixedWindow { .. } => "fixed_window",
            LimiterConfig::TokenBucket { .. } => "token_bucket",
        };
        if configured != name.algorithm() {
            return Err(GatehouseError::Config(format!(
                "policy '{}' must use algorithm '{}', not '{}'",
                name,
                name.algorithm(),
                configured
            )));
        }

        match *config {
            LimiterConfig::FixedWindow {
                permit_limit,
                window_secs,
                queue_limit,
            } => {
                if permit_limit == 0 {
                    return Err(invalid("permit_limit"));
                }
                if window_secs == 0 {
                    return Err(invalid("window_secs"));
                }
                Ok(LimiterOptions::FixedWindow(FixedWindowOptions {
                    permit_limit,
                    window: Duration::from_secs(window_secs),
                    queue_limit,
                }))
            }
            LimiterConfig::TokenBucket {
                token_limit,
                tokens_per_period,
                replenish_period_secs,
                queue_limit,
            } => {
                if token_limit == 0 {
                    return Err(invalid("token_limit"));
                }
                if tokens_per_period == 0 {
                    return Err(invalid("tokens_per_period"));
                }
                if replenish_period_secs == 0 {
                    return Err(invalid("replenish_period_secs"));
                }
                Ok(LimiterOptions::TokenBucket(TokenBucketOptions {
                    token_limit,
                    tokens_per_period,
                    replenish_period: Duration::from_secs(replenish_period_secs),
                    queue_limit,
                }))
            }
        }
    }
}

/// A path prefix bound to a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteBinding {
    pub prefix: String,
    pub policy: Option<PolicyName>,
}

/// Immutable, validated policy configuration.
#[derive(Debug, Clone)]
pub struct PolicySet {
    fixed: LimiterOptions,
    per_user: LimiterOptions,
    global: LimiterOptions,
    routes: Vec<RouteBinding>,
    default_policy: Option<PolicyName>,
}

impl PolicySet {
    /// Validate the raw admission configuration.
    ///
    /// Fails with [`GatehouseError::Config`] on any non-positive limit or
    /// period, or on a route bound to the global policy.
    pub fn from_config(config: &AdmissionConfig) -> Result<Self> {
        let policies = &config.policies;
        let mut fixed = LimiterOptions::from_config(PolicyName::Fixed, &policies.fixed)?;
        let mut per_user =
            LimiterOptions::from_config(PolicyName::PerUserRateLimit, &policies.per_user_rate_limit)?;
        let mut global = LimiterOptions::from_config(PolicyName::GlobalLimit, &policies.global_limit)?;

        if config.queue_mode == QueueMode::Reject {
            fixed = fixed.without_queue();
            per_user = per_user.without_queue();
            global = global.without_queue();
        }

        let mut routes = Vec::with_capacity(config.routes.len());
        for route in &config.routes {
            if !route.prefix.starts_with('/') {
                return Err(GatehouseError::Config(format!(
                    "route prefix '{}' must start with '/'",
                    route.prefix
                )));
            }
            if route.policy == Some(PolicyName::GlobalLimit) {
                return Err(GatehouseError::Config(format!(
                    "route '{}' cannot bind GlobalLimit; it applies to every request",
                    route.prefix
                )));
            }
            routes.push(RouteBinding {
                prefix: route.prefix.clone(),
                policy: route.policy,
            });
        }

        if config.default_policy == Some(PolicyName::GlobalLimit) {
            return Err(GatehouseError::Config(
                "default_policy cannot be GlobalLimit".to_string(),
            ));
        }

        Ok(Self {
            fixed,
            per_user,
            global,
            routes,
            default_policy: config.default_policy,
        })
    }

    /// Parameters bound to a policy.
    pub fn options(&self, name: PolicyName) -> &LimiterOptions {
        match name {
            PolicyName::Fixed => &self.fixed,
            PolicyName::PerUserRateLimit => &self.per_user,
            PolicyName::GlobalLimit => &self.global,
        }
    }

    /// Per-caller policy for a request path: the first matching route, else
    /// the default policy.
    pub fn policy_for_path(&self, path: &str) -> Option<PolicyName> {
        self.routes
            .iter()
            .find(|r| path.starts_with(&r.prefix))
            .map_or(self.default_policy, |r| r.policy)
    }

    pub fn routes(&self) -> &[RouteBinding] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;

    #[test]
    fn test_default_policy_set() {
        let set = PolicySet::from_config(&AdmissionConfig::default()).unwrap();

        assert_eq!(
            *set.options(PolicyName::Fixed),
            LimiterOptions::FixedWindow(FixedWindowOptions {
                permit_limit: 4,
                window: Duration::from_secs(12),
                queue_limit: 2,
            })
        );
        assert_eq!(
            *set.options(PolicyName::PerUserRateLimit),
            LimiterOptions::TokenBucket(TokenBucketOptions {
                token_limit: 20,
                tokens_per_period: 5,
                replenish_period: Duration::from_secs(10),
                queue_limit: 5,
            })
        );
        assert_eq!(set.options(PolicyName::GlobalLimit).period(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_permit_limit_is_invalid() {
        let mut config = AdmissionConfig::default();
        config.policies.fixed = LimiterConfig::FixedWindow {
            permit_limit: 0,
            window_secs: 12,
            queue_limit: 2,
        };

        let err = PolicySet::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("permit_limit"));
    }

    #[test]
    fn test_zero_replenish_period_is_invalid() {
        let mut config = AdmissionConfig::default();
        config.policies.per_user_rate_limit = LimiterConfig::TokenBucket {
            token_limit: 20,
            tokens_per_period: 5,
            replenish_period_secs: 0,
            queue_limit: 5,
        };

        let err = PolicySet::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("replenish_period_secs"));
    }

    #[test]
    fn test_reject_mode_disables_queues() {
        let config = AdmissionConfig {
            queue_mode: QueueMode::Reject,
            ..AdmissionConfig::default()
        };
        let set = PolicySet::from_config(&config).unwrap();

        for name in PolicyName::ALL {
            assert_eq!(set.options(name).queue_limit(), 0, "{name}");
        }
    }

    #[test]
    fn test_route_matching() {
        let config = AdmissionConfig {
            routes: vec![
                RouteConfig {
                    prefix: "/api/v1/roles".to_string(),
                    policy: Some(PolicyName::Fixed),
                },
                RouteConfig {
                    prefix: "/health".to_string(),
                    policy: None,
                },
            ],
            ..AdmissionConfig::default()
        };
        let set = PolicySet::from_config(&config).unwrap();

        assert_eq!(set.policy_for_path("/api/v1/roles/5"), Some(PolicyName::Fixed));
        assert_eq!(set.policy_for_path("/health"), None);
        assert_eq!(
            set.policy_for_path("/api/v1/users"),
            Some(PolicyName::PerUserRateLimit)
        );
    }

    #[test]
    fn test_route_cannot_bind_global() {
        let config = AdmissionConfig {
            routes: vec![RouteConfig {
                prefix: "/api".to_string(),
                policy: Some(PolicyName::GlobalLimit),
            }],
            ..AdmissionConfig::default()
        };
        assert!(PolicySet::from_config(&config).is_err());
    }

    #[test]
    fn test_policy_algorithm_is_fixed() {
        let mut config = AdmissionConfig::default();
        config.policies.global_limit = LimiterConfig::TokenBucket {
            token_limit: 100,
            tokens_per_period: 10,
            replenish_period_secs: 60,
            queue_limit: 10,
        };
        let err = PolicySet::from_config(&config).unwrap_err();
        assert!(matches!(err, GatehouseError::Config(_)));
        assert!(err.to_string().contains("GlobalLimit"));

        let mut config = AdmissionConfig::default();
        config.policies.per_user_rate_limit = LimiterConfig::FixedWindow {
            permit_limit: 20,
            window_secs: 10,
            queue_limit: 5,
        };
        assert!(PolicySet::from_config(&config).is_err());
    }

    #[test]
    fn test_policy_name_serde() {
        let name: PolicyName = serde_yaml::from_str("PerUserRateLimit").unwrap();
        assert_eq!(name, PolicyName::PerUserRateLimit);
        let name: PolicyName = serde_yaml::from_str("fixed").unwrap();
        assert_eq!(name, PolicyName::Fixed);
        assert_eq!(PolicyName::GlobalLimit.to_string(), "GlobalLimit");
    }
}
