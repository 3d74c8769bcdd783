//! Ingress route controller library
//!
//! Keeps a table of routable hostnames in step with the Ingress resources
//! in a cluster, and serves a reverse proxy gated on that table.

pub mod apis;
pub mod config;
pub mod error;
pub mod proxy;

pub use apis::ingress::{
    IngressWatcher, Normalizer, ResourceEvent, ResourceId, RouteChange, RouteSink, SyncOutcome,
    Synchronizer,
};
pub use config::ControllerConfig;
pub use error::ControlError;
pub use proxy::router::{DataPlane, HostRoutes};
