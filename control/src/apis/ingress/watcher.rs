//! Ingress watcher
//!
//! Watches Ingress resources and feeds them, one event at a time, through
//! the normalizer into the synchronizer.
//!
//! ## Failure model
//!
//! A watch error ends [`IngressWatcher::run`] and is handed back to the
//! owner, which decides when to restart. The synchronizer (and therefore
//! every published route) survives the restart. The restarted watch begins
//! with a full relist, bracketed by `Init`/`InitDone`, which is reconciled
//! through `begin_resync`/`finish_resync` instead of clearing the table.

use super::normalizer::{Normalizer, ResourceEvent};
use super::synchronizer::{RouteSink, SyncOutcome, Synchronizer};
use crate::apis::metrics::{record_ingress_event, record_route_changes};
use crate::config::ControllerConfig;
use crate::error::ControlError;
use futures::StreamExt;
use k8s_openapi::api::networking::v1::Ingress;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::watcher;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{api::Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Build a Kubernetes client from an explicit kubeconfig or the environment
pub async fn build_client(config: &ControllerConfig) -> Result<Client, ControlError> {
    match &config.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            let client_config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await?;
            Ok(Client::try_from(client_config)?)
        }
        None => Ok(Client::try_default().await?),
    }
}

/// Ingress watch loop
pub struct IngressWatcher {
    client: Client,
    namespace: Option<String>,
    normalizer: Normalizer,
}

impl IngressWatcher {
    pub fn new(client: Client, namespace: Option<String>, normalizer: Normalizer) -> Self {
        Self {
            client,
            namespace,
            normalizer,
        }
    }

    fn api(&self) -> Api<Ingress> {
        match &self.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }

    /// Process watch events until cancelled or the watch fails
    ///
    /// Returns `Ok(())` only on cancellation.
    pub async fn run<S: RouteSink>(
        &self,
        sync: &mut Synchronizer<S>,
        cancel: &CancellationToken,
    ) -> Result<(), ControlError> {
        let stream = watcher(self.api(), WatcherConfig::default());
        futures::pin_mut!(stream);

        info!(
            namespace = self.namespace.as_deref().unwrap_or("*"),
            "Starting Ingress watcher"
        );

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Ingress watcher cancelled");
                    return Ok(());
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => handle_watch_event(&self.normalizer, sync, event),
                Some(Err(e)) => return Err(ControlError::Watch(e)),
                None => return Err(ControlError::WatchClosed),
            }
        }
    }
}

/// Apply one kube-rs watcher event
///
/// `Apply` carries no previous snapshot; it is fed as an Add, which the
/// synchronizer reconciles against what the resource already owns.
pub fn handle_watch_event<S: RouteSink>(
    normalizer: &Normalizer,
    sync: &mut Synchronizer<S>,
    event: watcher::Event<Ingress>,
) {
    match event {
        watcher::Event::Init => {
            debug!("Ingress relist started");
            sync.begin_resync();
        }
        watcher::Event::InitApply(ingress) | watcher::Event::Apply(ingress) => {
            apply_event(normalizer, sync, ResourceEvent::Added(ingress));
        }
        watcher::Event::Delete(ingress) => {
            apply_event(normalizer, sync, ResourceEvent::Deleted(ingress));
        }
        watcher::Event::InitDone => {
            let outcome = sync.finish_resync();
            record_route_changes(outcome.added.len(), outcome.removed.len(), sync.host_count());
            info!(
                routes = sync.host_count(),
                ingresses = sync.resource_count(),
                stale_removed = outcome.removed.len(),
                "Ingress watcher initial sync complete"
            );
        }
    }
}

/// Normalize and apply one resource event
///
/// Malformed objects are logged and skipped; they never stop the sequence.
pub fn apply_event<S: RouteSink>(
    normalizer: &Normalizer,
    sync: &mut Synchronizer<S>,
    event: ResourceEvent<Ingress>,
) -> Option<SyncOutcome> {
    let kind = event.kind();
    match normalizer.normalize(&event) {
        Ok(change) => {
            let resource = change.id().clone();
            let outcome = sync.apply(change);
            record_ingress_event(kind, "applied");
            record_route_changes(outcome.added.len(), outcome.removed.len(), sync.host_count());
            if !outcome.is_empty() {
                info!(
                    resource = %resource,
                    event = kind,
                    added = ?outcome.added,
                    removed = ?outcome.removed,
                    "Route table updated"
                );
            }
            Some(outcome)
        }
        Err(e) => {
            warn!(event = kind, error = %e, "Skipping malformed Ingress");
            record_ingress_event(kind, "skipped");
            None
        }
    }
}
