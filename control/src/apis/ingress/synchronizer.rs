//! Route table synchronizer
//!
//! Owns the authoritative hostname table and decides when a hostname
//! becomes routable or stops being routable.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Synchronizer                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  owners: ResourceId → [host]      entries: host → RouteEntry     │
//! │  (what each Ingress declares)     (how many Ingresses declare it)│
//! │                                                                  │
//! │  count 0→1  ──► sink.add_route(host)                             │
//! │  count 1→0  ──► sink.remove_route(host)                          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The synchronizer runs on one event sequence and holds no locks. The
//! per-host reference count is the only state shared between resources, so
//! events for different resources commute.

use super::normalizer::{ResourceId, RouteChange};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error};

/// Mutation entry points of the data plane
///
/// Called synchronously from the event sequence; implementations must not
/// block on I/O.
pub trait RouteSink {
    fn add_route(&self, hostname: &str);
    fn remove_route(&self, hostname: &str);
}

impl<T: RouteSink + ?Sized> RouteSink for Arc<T> {
    fn add_route(&self, hostname: &str) {
        (**self).add_route(hostname)
    }

    fn remove_route(&self, hostname: &str) {
        (**self).remove_route(hostname)
    }
}

/// Per-hostname state; present in the table iff `count > 0`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RouteEntry {
    count: usize,
}

/// Hostnames whose routable status changed during one operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SyncOutcome {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    fn merge(&mut self, other: SyncOutcome) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
    }
}

/// Reference-counted hostname table driving a [`RouteSink`]
pub struct Synchronizer<S: RouteSink> {
    sink: S,
    entries: HashMap<String, RouteEntry>,
    owners: HashMap<ResourceId, Vec<String>>,
    /// Resources (re)declared since `begin_resync`, when a resync is running
    resync_seen: Option<HashSet<ResourceId>>,
}

impl<S: RouteSink> Synchronizer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            entries: HashMap::new(),
            owners: HashMap::new(),
            resync_seen: None,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Apply a normalized change
    pub fn apply(&mut self, change: RouteChange) -> SyncOutcome {
        match change {
            RouteChange::Add { id, hostnames } => self.apply_add(id, hostnames),
            RouteChange::Update { id, hostnames } => self.apply_update(id, hostnames),
            RouteChange::Remove { id } => self.apply_remove(&id),
        }
    }

    /// Record `id` as declaring `hostnames`
    ///
    /// A repeated Add for a known resource is reconciled against what it
    /// already owns, so replays never count a hostname twice.
    pub fn apply_add(&mut self, id: ResourceId, hostnames: Vec<String>) -> SyncOutcome {
        self.mark_seen(&id);

        if self.owners.contains_key(&id) {
            return self.reconcile(id, hostnames);
        }

        let hostnames = dedup(hostnames);
        let mut outcome = SyncOutcome::default();
        for host in &hostnames {
            self.increment(host, &mut outcome);
        }
        debug!(resource = %id, hosts = hostnames.len(), "Ingress added");
        self.owners.insert(id, hostnames);
        outcome
    }

    /// Replace what a known resource declares; unknown resources are ignored
    pub fn apply_update(&mut self, id: ResourceId, hostnames: Vec<String>) -> SyncOutcome {
        if !self.owners.contains_key(&id) {
            debug!(resource = %id, "Update for unknown Ingress, ignoring");
            return SyncOutcome::default();
        }
        self.mark_seen(&id);
        self.reconcile(id, hostnames)
    }

    /// Drop everything `id` declares; unknown resources are ignored
    pub fn apply_remove(&mut self, id: &ResourceId) -> SyncOutcome {
        let Some(owned) = self.owners.remove(id) else {
            debug!(resource = %id, "Remove for unknown Ingress, ignoring");
            return SyncOutcome::default();
        };

        let mut outcome = SyncOutcome::default();
        for host in &owned {
            self.decrement(host, &mut outcome);
        }
        debug!(resource = %id, hosts = owned.len(), "Ingress removed");
        outcome
    }

    /// Start tracking which resources a full relist declares
    ///
    /// Published routes are left untouched until `finish_resync`.
    pub fn begin_resync(&mut self) {
        self.resync_seen = Some(HashSet::new());
    }

    /// Remove every known resource the relist did not declare
    pub fn finish_resync(&mut self) -> SyncOutcome {
        let Some(seen) = self.resync_seen.take() else {
            return SyncOutcome::default();
        };

        let stale: Vec<ResourceId> = self
            .owners
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();

        let mut outcome = SyncOutcome::default();
        for id in &stale {
            debug!(resource = %id, "Ingress missing from relist, removing");
            outcome.merge(self.apply_remove(id));
        }
        outcome
    }

    pub fn is_resyncing(&self) -> bool {
        self.resync_seen.is_some()
    }

    pub fn is_routable(&self, hostname: &str) -> bool {
        self.entries.contains_key(hostname)
    }

    /// Number of resources currently declaring `hostname`
    pub fn ref_count(&self, hostname: &str) -> usize {
        self.entries.get(hostname).map_or(0, |entry| entry.count)
    }

    pub fn owned_hosts(&self, id: &ResourceId) -> Option<&[String]> {
        self.owners.get(id).map(Vec::as_slice)
    }

    /// Number of routable hostnames
    pub fn host_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of resources with a recorded declaration
    pub fn resource_count(&self) -> usize {
        self.owners.len()
    }

    /// Routable hostnames, sorted
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.entries.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    /// Move a known resource to a new hostname set, touching only the
    /// hostnames that leave or enter it
    fn reconcile(&mut self, id: ResourceId, hostnames: Vec<String>) -> SyncOutcome {
        let new = dedup(hostnames);
        let old = self.owners.remove(&id).unwrap_or_default();

        let old_set: HashSet<&str> = old.iter().map(String::as_str).collect();
        let new_set: HashSet<&str> = new.iter().map(String::as_str).collect();

        let mut outcome = SyncOutcome::default();
        for host in old.iter().filter(|host| !new_set.contains(host.as_str())) {
            self.decrement(host, &mut outcome);
        }
        for host in new.iter().filter(|host| !old_set.contains(host.as_str())) {
            self.increment(host, &mut outcome);
        }

        if !outcome.is_empty() {
            debug!(
                resource = %id,
                added = outcome.added.len(),
                removed = outcome.removed.len(),
                "Ingress hosts changed"
            );
        }
        self.owners.insert(id, new);
        outcome
    }

    fn increment(&mut self, host: &str, outcome: &mut SyncOutcome) {
        let entry = self
            .entries
            .entry(host.to_string())
            .or_insert(RouteEntry { count: 0 });
        entry.count += 1;
        if entry.count == 1 {
            self.sink.add_route(host);
            outcome.added.push(host.to_string());
        }
    }

    fn decrement(&mut self, host: &str, outcome: &mut SyncOutcome) {
        let Some(entry) = self.entries.get_mut(host) else {
            // Owners and entries disagree; never wrap below zero
            error!(host = %host, "Route count underflow, ignoring remove");
            return;
        };
        entry.count -= 1;
        if entry.count == 0 {
            self.entries.remove(host);
            self.sink.remove_route(host);
            outcome.removed.push(host.to_string());
        }
    }

    fn mark_seen(&mut self, id: &ResourceId) {
        if let Some(seen) = self.resync_seen.as_mut() {
            seen.insert(id.clone());
        }
    }
}

fn dedup(hostnames: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(hostnames.len());
    hostnames
        .into_iter()
        .filter(|host| seen.insert(host.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Add(String),
        Remove(String),
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: RefCell<Vec<Call>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<Call> {
            self.calls.borrow_mut().drain(..).collect()
        }
    }

    impl RouteSink for RecordingSink {
        fn add_route(&self, hostname: &str) {
            self.calls.borrow_mut().push(Call::Add(hostname.to_string()));
        }

        fn remove_route(&self, hostname: &str) {
            self.calls
                .borrow_mut()
                .push(Call::Remove(hostname.to_string()));
        }
    }

    fn id(name: &str) -> ResourceId {
        ResourceId::new("default", name)
    }

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|h| h.to_string()).collect()
    }

    fn add(h: &str) -> Call {
        Call::Add(h.to_string())
    }

    fn remove(h: &str) -> Call {
        Call::Remove(h.to_string())
    }

    #[test]
    fn test_add_fires_once_per_new_host() {
        let mut sync = Synchronizer::new(RecordingSink::default());
        let outcome = sync.apply_add(id("a"), hosts(&["x.test", "y.test"]));

        assert_eq!(outcome.added, hosts(&["x.test", "y.test"]));
        assert_eq!(sync.sink().take(), vec![add("x.test"), add("y.test")]);
        assert!(sync.is_routable("x.test"));
        assert_eq!(sync.ref_count("x.test"), 1);
    }

    #[test]
    fn test_duplicate_add_is_idempotent() {
        let mut sync = Synchronizer::new(RecordingSink::default());
        sync.apply_add(id("a"), hosts(&["x.test"]));
        sync.sink().take();

        let outcome = sync.apply_add(id("a"), hosts(&["x.test"]));

        assert!(outcome.is_empty());
        assert!(sync.sink().take().is_empty());
        assert_eq!(sync.ref_count("x.test"), 1);
    }

    #[test]
    fn test_replayed_add_with_new_hosts_reconciles() {
        let mut sync = Synchronizer::new(RecordingSink::default());
        sync.apply_add(id("a"), hosts(&["x.test", "y.test"]));
        sync.sink().take();

        sync.apply_add(id("a"), hosts(&["y.test", "z.test"]));

        assert_eq!(sync.sink().take(), vec![remove("x.test"), add("z.test")]);
        assert_eq!(sync.ref_count("y.test"), 1);
    }

    #[test]
    fn test_shared_host_is_reference_counted() {
        let mut sync = Synchronizer::new(RecordingSink::default());
        sync.apply_add(id("a"), hosts(&["x.test"]));
        sync.apply_add(id("b"), hosts(&["x.test", "y.test"]));
        assert_eq!(sync.sink().take(), vec![add("x.test"), add("y.test")]);
        assert_eq!(sync.ref_count("x.test"), 2);

        sync.apply_remove(&id("a"));
        assert!(sync.sink().take().is_empty());
        assert!(sync.is_routable("x.test"));
        assert!(sync.is_routable("y.test"));

        sync.apply_remove(&id("b"));
        assert_eq!(sync.sink().take(), vec![remove("x.test"), remove("y.test")]);
        assert_eq!(sync.host_count(), 0);
        assert_eq!(sync.resource_count(), 0);
    }

    #[test]
    fn test_update_has_no_flicker() {
        let mut sync = Synchronizer::new(RecordingSink::default());
        sync.apply_add(id("a"), hosts(&["a.test", "b.test"]));
        sync.sink().take();

        let outcome = sync.apply_update(id("a"), hosts(&["b.test", "c.test"]));

        assert_eq!(sync.sink().take(), vec![remove("a.test"), add("c.test")]);
        assert_eq!(outcome.added, hosts(&["c.test"]));
        assert_eq!(outcome.removed, hosts(&["a.test"]));
        assert_eq!(sync.ref_count("b.test"), 1);
    }

    #[test]
    fn test_update_to_shared_host_keeps_it() {
        let mut sync = Synchronizer::new(RecordingSink::default());
        sync.apply_add(id("a"), hosts(&["x.test"]));
        sync.apply_add(id("b"), hosts(&["x.test"]));
        sync.sink().take();

        sync.apply_update(id("a"), hosts(&[]));

        assert!(sync.sink().take().is_empty());
        assert_eq!(sync.ref_count("x.test"), 1);
        assert_eq!(sync.owned_hosts(&id("a")), Some(&[][..]));
    }

    #[test]
    fn test_unknown_remove_and_update_are_noops() {
        let mut sync = Synchronizer::new(RecordingSink::default());
        sync.apply_add(id("a"), hosts(&["x.test"]));
        sync.sink().take();

        assert!(sync.apply_remove(&id("ghost")).is_empty());
        assert!(sync.apply_update(id("ghost"), hosts(&["x.test"])).is_empty());

        assert!(sync.sink().take().is_empty());
        assert_eq!(sync.ref_count("x.test"), 1);
        assert!(sync.owned_hosts(&id("ghost")).is_none());
    }

    #[test]
    fn test_double_remove_does_not_underflow() {
        let mut sync = Synchronizer::new(RecordingSink::default());
        sync.apply_add(id("a"), hosts(&["x.test"]));
        sync.apply_add(id("b"), hosts(&["x.test"]));

        sync.apply_remove(&id("a"));
        sync.apply_remove(&id("a"));

        assert_eq!(sync.ref_count("x.test"), 1);
        assert!(sync.is_routable("x.test"));
    }

    #[test]
    fn test_empty_hosts_is_valid() {
        let mut sync = Synchronizer::new(RecordingSink::default());
        let outcome = sync.apply_add(id("a"), vec![]);

        assert!(outcome.is_empty());
        assert_eq!(sync.resource_count(), 1);

        sync.apply_update(id("a"), hosts(&["x.test"]));
        assert_eq!(sync.sink().take(), vec![add("x.test")]);
    }

    #[test]
    fn test_duplicate_hosts_in_one_resource_count_once() {
        let mut sync = Synchronizer::new(RecordingSink::default());
        sync.apply_add(id("a"), hosts(&["x.test", "x.test"]));
        assert_eq!(sync.ref_count("x.test"), 1);

        sync.apply_remove(&id("a"));
        assert!(!sync.is_routable("x.test"));
    }

    #[test]
    fn test_hostnames_are_case_sensitive() {
        let mut sync = Synchronizer::new(RecordingSink::default());
        sync.apply_add(id("a"), hosts(&["X.test"]));
        assert!(sync.is_routable("X.test"));
        assert!(!sync.is_routable("x.test"));
    }

    #[test]
    fn test_apply_dispatches_changes() {
        let mut sync = Synchronizer::new(RecordingSink::default());
        sync.apply(RouteChange::Add {
            id: id("a"),
            hostnames: hosts(&["x.test"]),
        });
        sync.apply(RouteChange::Update {
            id: id("a"),
            hostnames: hosts(&["y.test"]),
        });
        sync.apply(RouteChange::Remove { id: id("a") });

        assert_eq!(
            sync.sink().take(),
            vec![add("x.test"), remove("x.test"), add("y.test"), remove("y.test")]
        );
    }

    #[test]
    fn test_resync_removes_only_stale_resources() {
        let mut sync = Synchronizer::new(RecordingSink::default());
        sync.apply_add(id("a"), hosts(&["x.test"]));
        sync.apply_add(id("b"), hosts(&["x.test", "y.test"]));
        sync.apply_add(id("c"), hosts(&["z.test"]));
        sync.sink().take();

        sync.begin_resync();
        assert!(sync.is_resyncing());
        sync.apply_add(id("a"), hosts(&["x.test"]));
        sync.apply_add(id("c"), hosts(&["z.test"]));

        // Nothing withdrawn until the relist completes
        assert!(sync.sink().take().is_empty());
        assert!(sync.is_routable("y.test"));

        let outcome = sync.finish_resync();

        assert_eq!(outcome.removed, hosts(&["y.test"]));
        assert_eq!(sync.sink().take(), vec![remove("y.test")]);
        assert!(sync.is_routable("x.test"));
        assert!(!sync.is_resyncing());
    }

    #[test]
    fn test_finish_without_begin_is_noop() {
        let mut sync = Synchronizer::new(RecordingSink::default());
        sync.apply_add(id("a"), hosts(&["x.test"]));
        assert!(sync.finish_resync().is_empty());
        assert!(sync.is_routable("x.test"));
    }
}
