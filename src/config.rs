//! Configuration management for Gatehouse.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::admission::PolicyName;
use crate::error::{GatehouseError, Result};

/// Prefix for environment variable overrides, e.g.
/// `GATEHOUSE__SERVER__LISTEN_ADDR=0.0.0.0:8080`.
const ENV_PREFIX: &str = "GATEHOUSE";

/// Main configuration for the Gatehouse service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatehouseConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission control configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Upstream `host:port` that admitted requests are forwarded to.
    /// When unset, admitted requests are answered locally.
    #[serde(default)]
    pub upstream: Option<String>,

    /// Header carrying the authenticated subject, set by the auth layer in front of us
    #[serde(default = "default_principal_header")]
    pub principal_header: String,

    /// Use the first `x-forwarded-for` hop as the caller address
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream: None,
            principal_header: default_principal_header(),
            trust_forwarded_for: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_principal_header() -> String {
    "x-authenticated-user".to_string()
}

/// How a `Queued` decision is honoured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    /// Queued requests wait (bounded) for a release.
    #[default]
    Wait,
    /// Queues are disabled; anything over capacity is rejected.
    Reject,
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Queueing behaviour for all policies
    #[serde(default)]
    pub queue_mode: QueueMode,

    /// Policy parameters
    #[serde(default)]
    pub policies: PoliciesConfig,

    /// Path prefixes bound to named policies, matched in declaration order
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Policy applied to paths that match no route
    #[serde(default = "default_policy")]
    pub default_policy: Option<PolicyName>,

    /// Idle time after which an unused limiter entry may be evicted
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How often the eviction sweep runs (0 disables it)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            queue_mode: QueueMode::default(),
            policies: PoliciesConfig::default(),
            routes: Vec::new(),
            default_policy: default_policy(),
            idle_timeout_secs: default_idle_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

fn default_policy() -> Option<PolicyName> {
    Some(PolicyName::PerUserRateLimit)
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    60
}

/// Parameters for every named policy.
///
/// Field names are snake_case because the `config` crate lowercases map keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoliciesConfig {
    #[serde(default = "default_fixed")]
    pub fixed: LimiterConfig,

    #[serde(default = "default_per_user")]
    pub per_user_rate_limit: LimiterConfig,

    #[serde(default = "default_global")]
    pub global_limit: LimiterConfig,
}

impl Default for PoliciesConfig {
    fn default() -> Self {
        Self {
            fixed: default_fixed(),
            per_user_rate_limit: default_per_user(),
            global_limit: default_global(),
        }
    }
}

fn default_fixed() -> LimiterConfig {
    LimiterConfig::FixedWindow {
        permit_limit: 4,
        window_secs: 12,
        queue_limit: 2,
    }
}

fn default_per_user() -> LimiterConfig {
    LimiterConfig::TokenBucket {
        token_limit: 20,
        tokens_per_period: 5,
        replenish_period_secs: 10,
        queue_limit: 5,
    }
}

fn default_global() -> LimiterConfig {
    LimiterConfig::FixedWindow {
        permit_limit: 100,
        window_secs: 60,
        queue_limit: 10,
    }
}

/// Raw limiter parameters as they appear in the configuration file.
///
/// Validated into [`LimiterOptions`](crate::admission::LimiterOptions) by
/// [`PolicySet::from_config`](crate::admission::PolicySet::from_config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterConfig {
    FixedWindow {
        permit_limit: u32,
        window_secs: u64,
        #[serde(default)]
        queue_limit: u32,
    },
    TokenBucket {
        token_limit: u32,
        tokens_per_period: u32,
        replenish_period_secs: u64,
        #[serde(default)]
        queue_limit: u32,
    },
}

/// Binds a path prefix to a named policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Path prefix, e.g. `/api/v1/roles`
    pub prefix: String,
    /// Policy to apply; `None` means only the global ceiling applies
    #[serde(default)]
    pub policy: Option<PolicyName>,
}

/// Logging output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatehouseConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `GATEHOUSE__*` environment overrides.
    ///
    /// Both layers merge over the full default tree, so a single field such
    /// as `GATEHOUSE__ADMISSION__POLICIES__FIXED__PERMIT_LIMIT` can be
    /// overridden on its own.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&GatehouseConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<GatehouseConfig>()?;

        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatehouseError::Config(format!("Failed to parse configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy_table() {
        let config = GatehouseConfig::default();
        let policies = &config.admission.policies;

        assert_eq!(
            policies.fixed,
            LimiterConfig::FixedWindow {
                permit_limit: 4,
                window_secs: 12,
                queue_limit: 2
            }
        );
        assert_eq!(
            policies.per_user_rate_limit,
            LimiterConfig::TokenBucket {
                token_limit: 20,
                tokens_per_period: 5,
                replenish_period_secs: 10,
                queue_limit: 5
            }
        );
        assert_eq!(
            policies.global_limit,
            LimiterConfig::FixedWindow {
                permit_limit: 100,
                window_secs: 60,
                queue_limit: 10
            }
        );
        assert_eq!(config.admission.default_policy, Some(PolicyName::PerUserRateLimit));
        assert_eq!(config.admission.queue_mode, QueueMode::Wait);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = GatehouseConfig::from_yaml("{}").unwrap();
        assert_eq!(config.server.listen_addr, default_listen_addr());
        assert_eq!(config.server.principal_header, "x-authenticated-user");
        assert!(config.admission.routes.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
server:
  listen_addr: 0.0.0.0:9000
  upstream: 127.0.0.1:5000
  trust_forwarded_for: true
admission:
  queue_mode: reject
  default_policy: fixed
  routes:
    - prefix: /api/v1/roles
      policy: PerUserRateLimit
    - prefix: /health
  policies:
    global_limit:
      algorithm: fixed_window
      permit_limit: 500
      window_secs: 30
logging:
  level: debug
  format: json
"#;
        let config = GatehouseConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.server.upstream.as_deref(), Some("127.0.0.1:5000"));
        assert!(config.server.trust_forwarded_for);
        assert_eq!(config.admission.queue_mode, QueueMode::Reject);
        assert_eq!(config.admission.default_policy, Some(PolicyName::Fixed));
        assert_eq!(
            config.admission.routes,
            vec![
                RouteConfig {
                    prefix: "/api/v1/roles".to_string(),
                    policy: Some(PolicyName::PerUserRateLimit),
                },
                RouteConfig {
                    prefix: "/health".to_string(),
                    policy: None,
                },
            ]
        );
        assert_eq!(
            config.admission.policies.global_limit,
            LimiterConfig::FixedWindow {
                permit_limit: 500,
                window_secs: 30,
                queue_limit: 0
            }
        );
        // Untouched policies keep their defaults
        assert_eq!(config.admission.policies.fixed, default_fixed());
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let yaml = r#"
admission:
  policies:
    fixed:
      algorithm: sliding_log
      permit_limit: 4
"#;
        let err = GatehouseConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, GatehouseError::Config(_)));
    }

    #[test]
    fn test_negative_limit_is_rejected() {
        let yaml = r#"
admission:
  policies:
    fixed:
      algorithm: fixed_window
      permit_limit: -1
      window_secs: 12
"#;
        assert!(GatehouseConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = GatehouseConfig::load(None).unwrap();
        assert_eq!(config.admission.idle_timeout_secs, 300);
        assert_eq!(config.admission.policies.per_user_rate_limit, default_per_user());
        assert_eq!(config.server.listen_addr, default_listen_addr());
    }

    #[test]
    fn test_env_overrides_single_policy_field() {
        std::env::set_var("GATEHOUSE__ADMISSION__POLICIES__GLOBAL_LIMIT__PERMIT_LIMIT", "500");
        let loaded = GatehouseConfig::load(None);
        std::env::remove_var("GATEHOUSE__ADMISSION__POLICIES__GLOBAL_LIMIT__PERMIT_LIMIT");

        let config = loaded.unwrap();
        assert_eq!(
            config.admission.policies.global_limit,
            LimiterConfig::FixedWindow {
                permit_limit: 500,
                window_secs: 60,
                queue_limit: 10
            }
        );
        assert_eq!(config.admission.policies.fixed, default_fixed());
    }
}
