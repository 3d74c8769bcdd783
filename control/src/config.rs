//! Configuration for the ingress controller
//!
//! Values come from an optional JSON file (`INGRESS_CONFIG`) overlaid with
//! `INGRESS_*` environment variables, and are validated before the core
//! sees them.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Annotation that opts an Ingress out of routing (value is ignored)
pub const DEFAULT_OPT_OUT_ANNOTATION: &str = "ingress-control.io/disable";

/// Controller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Explicit kubeconfig path (None = in-cluster or default inference)
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace to watch (None = all namespaces)
    #[serde(default)]
    pub namespace: Option<String>,

    /// Upstream dial target for routable hosts (e.g. "ingress-nginx:80")
    #[serde(default)]
    pub ingress_addr: String,

    /// Annotation key whose presence excludes an Ingress
    #[serde(default = "default_opt_out_annotation")]
    pub opt_out_annotation: String,

    /// Plain HTTP listener
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// HTTPS listener using managed certificates (disabled when None)
    #[serde(default)]
    pub tls_bind_addr: Option<String>,

    /// Prometheus metrics listener (disabled when None)
    #[serde(default)]
    pub metrics_addr: Option<String>,

    /// Delay before restarting a failed Ingress watch
    #[serde(default = "default_watch_retry")]
    pub watch_retry_secs: u64,

    /// Upstream request timeout
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,
}

fn default_opt_out_annotation() -> String {
    DEFAULT_OPT_OUT_ANNOTATION.to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_watch_retry() -> u64 {
    5
}

fn default_upstream_timeout() -> u64 {
    30
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            namespace: None,
            ingress_addr: String::new(),
            opt_out_annotation: default_opt_out_annotation(),
            bind_addr: default_bind_addr(),
            tls_bind_addr: None,
            metrics_addr: None,
            watch_retry_secs: default_watch_retry(),
            upstream_timeout_secs: default_upstream_timeout(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup (environment, test maps)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("INGRESS_CONFIG") {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        if let Some(val) = lookup("INGRESS_KUBECONFIG") {
            config.kubeconfig = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("INGRESS_NAMESPACE") {
            config.namespace = Some(val);
        }
        if let Some(val) = lookup("INGRESS_ADDR") {
            config.ingress_addr = val;
        }
        if let Some(val) = lookup("INGRESS_OPT_OUT_ANNOTATION") {
            config.opt_out_annotation = val;
        }
        if let Some(val) = lookup("INGRESS_BIND_ADDR") {
            config.bind_addr = val;
        }
        if let Some(val) = lookup("INGRESS_TLS_BIND_ADDR") {
            config.tls_bind_addr = Some(val);
        }
        if let Some(val) = lookup("INGRESS_METRICS_ADDR") {
            config.metrics_addr = Some(val);
        }
        if let Some(val) = lookup("INGRESS_WATCH_RETRY_SECS") {
            config.watch_retry_secs = parse_secs("INGRESS_WATCH_RETRY_SECS", &val)?;
        }
        if let Some(val) = lookup("INGRESS_UPSTREAM_TIMEOUT_SECS") {
            config.upstream_timeout_secs = parse_secs("INGRESS_UPSTREAM_TIMEOUT_SECS", &val)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Reject configurations the core cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingress_addr.trim().is_empty() {
            return Err(ConfigError::MissingIngressAddr);
        }
        if self.opt_out_annotation.trim().is_empty() {
            return Err(ConfigError::EmptyOptOutAnnotation);
        }
        if self.upstream_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "upstream_timeout_secs".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn watch_retry(&self) -> Duration {
        Duration::from_secs(self.watch_retry_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}
