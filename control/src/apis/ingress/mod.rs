//! Ingress support (networking.k8s.io/v1)
//!
//! - normalizer: Ingress snapshot → routing facts
//! - synchronizer: reference-counted hostname table
//! - watcher: kube-rs watch loop feeding the synchronizer

pub mod normalizer;
pub mod synchronizer;
pub mod watcher;

pub use normalizer::{IngressFacts, Normalizer, ResourceEvent, ResourceId, RouteChange};
pub use synchronizer::{RouteSink, SyncOutcome, Synchronizer};
pub use watcher::IngressWatcher;
