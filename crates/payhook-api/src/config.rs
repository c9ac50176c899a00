//! Configuration types for the HTTP service

use crate::errors::ConfigError;
use payhook_core::{DispatcherConfig, WebhookSecurityConfig};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Webhook intake settings
    pub webhooks: WebhookConfig,

    /// Validation gates and processing
    pub security: WebhookSecurityConfig,

    /// Operator endpoints
    pub admin: AdminConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Check the configuration before the service starts
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an unusable server or webhook setting, or
    /// when the security configuration fails its own validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid {
                message: "server.port must be greater than 0".to_string(),
            });
        }

        if self.server.max_body_size == 0 {
            return Err(ConfigError::Invalid {
                message: "server.max_body_size must be greater than 0".to_string(),
            });
        }

        let path = &self.webhooks.endpoint_path;
        if !path.starts_with('/') || path.starts_with("/admin") {
            return Err(ConfigError::Invalid {
                message: format!(
                    "webhooks.endpoint_path '{}' must start with '/' and not be under /admin",
                    path
                ),
            });
        }

        self.security.validate()?;
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum webhook body size in bytes
    pub max_body_size: usize,

    /// Refuse deliveries whose `X-Forwarded-Proto` is not `https`
    pub require_https: bool,

    /// Take the source address from the first `X-Forwarded-For` entry
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_size: 1024 * 1024, // 1MB
            require_https: false,
            trust_forwarded_for: false,
        }
    }
}

/// Webhook intake configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Webhook endpoint path
    pub endpoint_path: String,

    /// Deliveries that may wait for a worker
    pub queue_capacity: usize,

    /// Concurrent pipeline workers
    pub worker_count: usize,
}

impl WebhookConfig {
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            queue_capacity: self.queue_capacity,
            workers: self.worker_count,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            endpoint_path: "/webhooks/payments".to_string(),
            queue_capacity: 1024,
            worker_count: 4,
        }
    }
}

/// Operator endpoint configuration
#[derive(Clone, Deserialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    /// Value expected in `X-Internal-Api-Key`. Absent disables the admin surface.
    pub api_key: Option<String>,
}

impl AdminConfig {
    /// Configured key, if non-empty
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }
}

impl fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Serialize for AdminConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("AdminConfig", 1)?;
        state.serialize_field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))?;
        state.end()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
