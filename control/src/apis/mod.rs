//! Kubernetes API integrations
//!
//! This module contains the Ingress watcher and the controller metrics.

pub mod ingress;
pub mod metrics;
