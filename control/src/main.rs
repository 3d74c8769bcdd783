use anyhow::{Context, Result};
use ingress_control::apis::ingress::watcher::build_client;
use ingress_control::apis::metrics::record_watch_restart;
use ingress_control::proxy::certificates::{CertificateDispatcher, SelfSignedCertificates};
use ingress_control::proxy::forwarder::Forwarder;
use ingress_control::proxy::server::{serve_metrics, ProxyServer};
use ingress_control::proxy::tls::SniCertificateStore;
use ingress_control::{
    ControllerConfig, DataPlane, HostRoutes, IngressWatcher, Normalizer, Synchronizer,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Ingress route controller
///
/// Watches Ingress resources, keeps the routable host table current, and
/// proxies requests for routable hosts to the configured upstream.
#[tokio::main]
async fn main() -> Result<()> {
    // Needed by both the Kubernetes client and the TLS listener
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ControllerConfig::from_env().context("Invalid configuration")?;
    info!(
        ingress_addr = %config.ingress_addr,
        namespace = config.namespace.as_deref().unwrap_or("*"),
        opt_out_annotation = %config.opt_out_annotation,
        "Starting ingress controller"
    );

    let cancel = CancellationToken::new();
    let routes = HostRoutes::new();
    let certificate_store = SniCertificateStore::new();

    let manager = Arc::new(SelfSignedCertificates::new(certificate_store.clone()));
    let (dispatcher, dispatcher_handle) = CertificateDispatcher::spawn(manager, cancel.clone());
    let mut sync = Synchronizer::new(DataPlane::new(routes.clone(), dispatcher));

    let server = Arc::new(ProxyServer::new(
        routes.clone(),
        Forwarder::new(config.ingress_addr.clone(), config.upstream_timeout()),
    ));
    let mut listener_handles = vec![];

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    listener_handles.push(tokio::spawn(
        Arc::clone(&server).serve(listener, cancel.clone()),
    ));

    if let Some(tls_addr) = &config.tls_bind_addr {
        let listener = TcpListener::bind(tls_addr)
            .await
            .with_context(|| format!("Failed to bind {}", tls_addr))?;
        let acceptor = TlsAcceptor::from(certificate_store.to_server_config());
        listener_handles.push(tokio::spawn(Arc::clone(&server).serve_tls(
            listener,
            acceptor,
            cancel.clone(),
        )));
    }

    if let Some(metrics_addr) = &config.metrics_addr {
        let listener = TcpListener::bind(metrics_addr)
            .await
            .with_context(|| format!("Failed to bind {}", metrics_addr))?;
        listener_handles.push(tokio::spawn(serve_metrics(listener, cancel.clone())));
    }

    let client = build_client(&config)
        .await
        .context("Failed to create Kubernetes client")?;
    let watcher = IngressWatcher::new(
        client,
        config.namespace.clone(),
        Normalizer::new(config.opt_out_annotation.clone()),
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        shutdown.cancel();
    });

    // The route table outlives each watch; a restart relists and reconciles
    loop {
        match watcher.run(&mut sync, &cancel).await {
            Ok(()) => break,
            Err(e) => {
                record_watch_restart();
                warn!(
                    error = %e,
                    retry_in = ?config.watch_retry(),
                    routes = sync.host_count(),
                    "Ingress watch failed, keeping current routes"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(config.watch_retry()) => {}
                }
            }
        }
    }

    info!("Shutting down");
    cancel.cancel();
    for handle in listener_handles {
        let _ = handle.await;
    }
    let _ = dispatcher_handle.await;

    Ok(())
}
