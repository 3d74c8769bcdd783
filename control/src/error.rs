use std::time::Duration;
use thiserror::Error;

/// Control plane errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("Ingress watch failed: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),

    #[error("Ingress watch stream ended")]
    WatchClosed,
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("ingress_addr not defined (set INGRESS_ADDR)")]
    MissingIngressAddr,

    #[error("opt-out annotation key cannot be empty")]
    EmptyOptOutAnnotation,

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// An Ingress object that cannot be turned into routing facts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Ingress has no metadata.name")]
    MissingName,
}

/// Certificate provisioning errors (never fatal to routing)
#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("Failed to issue certificate: {0}")]
    Issue(#[from] rcgen::Error),

    #[error("Invalid certificate material: {0}")]
    InvalidMaterial(String),

    #[error("Certificate task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Upstream forwarding errors (mapped to 502/504 by the server)
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Invalid upstream URI: {0}")]
    InvalidUri(#[from] hyper::http::uri::InvalidUri),

    #[error("Failed to build upstream request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("Upstream did not respond within {0:?}")]
    Timeout(Duration),
}
