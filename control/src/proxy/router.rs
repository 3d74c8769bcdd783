//! Host router - answers "is this hostname routable" on the request path
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                            HostRoutes                              │
//! ├────────────────────────────────────────────────────────────────────┤
//! │  ArcSwap<HashSet<String>>                                          │
//! │                                                                    │
//! │  readers:  load() ─► contains(host)        (no lock, never blocks) │
//! │  writer:   clone ─► insert/remove ─► store (copy-on-write)         │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every reader sees a complete snapshot: either before or after a given
//! mutation, never in between.
//!
//! Each publish copies the whole set, so a cold start with N hostnames
//! costs O(N²) copying. Steady-state events touch a handful of hostnames and
//! a relist of known resources publishes nothing, so the read path is what
//! this structure optimizes for.

use crate::apis::ingress::RouteSink;
use crate::proxy::certificates::CertificateDispatcher;
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Concurrently readable set of routable hostnames
///
/// Cloning shares the same underlying table.
#[derive(Clone)]
pub struct HostRoutes {
    inner: Arc<ArcSwap<HashSet<String>>>,
}

impl Default for HostRoutes {
    fn default() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(HashSet::new())),
        }
    }
}

impl HostRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hot path: one atomic load and a hash lookup
    #[inline]
    pub fn is_routable(&self, hostname: &str) -> bool {
        self.inner.load().contains(hostname)
    }

    /// Publish a hostname; returns `true` if it was not already routable
    pub fn insert(&self, hostname: &str) -> bool {
        let previous = self.inner.rcu(|current| {
            let mut next = HashSet::clone(current);
            next.insert(hostname.to_string());
            next
        });
        !previous.contains(hostname)
    }

    /// Withdraw a hostname; returns `true` if it was routable
    pub fn remove(&self, hostname: &str) -> bool {
        let previous = self.inner.rcu(|current| {
            let mut next = HashSet::clone(current);
            next.remove(hostname);
            next
        });
        previous.contains(hostname)
    }

    /// Immutable view of the table at one point in time
    pub fn snapshot(&self) -> Arc<HashSet<String>> {
        self.inner.load_full()
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RouteSink for HostRoutes {
    fn add_route(&self, hostname: &str) {
        if !self.insert(hostname) {
            debug!(route = %hostname, "Route already published");
        }
    }

    fn remove_route(&self, hostname: &str) {
        if !self.remove(hostname) {
            debug!(route = %hostname, "Route was not published");
        }
    }
}

impl fmt::Debug for HostRoutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRoutes")
            .field("routes", &self.len())
            .finish()
    }
}

impl fmt::Display for HostRoutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        let mut hosts: Vec<&str> = snapshot.iter().map(String::as_str).collect();
        hosts.sort_unstable();

        match hosts.len() {
            0 => write!(f, "HostRoutes: empty"),
            n if n <= 3 => write!(f, "HostRoutes: {} route(s) [{}]", n, hosts.join(", ")),
            n => write!(
                f,
                "HostRoutes: {} route(s) [{}, ...]",
                n,
                hosts[..3].join(", ")
            ),
        }
    }
}

/// Mutation side of the data plane
///
/// Publishes routes for readers and asks for a certificate for every newly
/// routable hostname. The certificate request is queued, never awaited, so
/// the event sequence is not held up by issuance.
#[derive(Debug, Clone)]
pub struct DataPlane {
    routes: HostRoutes,
    certificates: CertificateDispatcher,
}

impl DataPlane {
    pub fn new(routes: HostRoutes, certificates: CertificateDispatcher) -> Self {
        Self {
            routes,
            certificates,
        }
    }

}

impl RouteSink for DataPlane {
    fn add_route(&self, hostname: &str) {
        self.certificates.request(hostname);
        self.routes.add_route(hostname);
        info!(route = %hostname, "Route added");
    }

    fn remove_route(&self, hostname: &str) {
        self.routes.remove_route(hostname);
        info!(route = %hostname, "Route removed");
    }
}
