//! Certificate provisioning for routable hostnames
//!
//! Routability and certificates are independent: a hostname becomes
//! routable whether or not its certificate request succeeds, and a failed
//! request is only logged. Retry policy belongs to the manager.

use crate::apis::metrics::record_certificate_request;
use crate::error::CertificateError;
use crate::proxy::tls::{SniCertificateStore, TlsCertificate};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Ensures a certificate exists for a hostname
#[async_trait]
pub trait CertificateManager: Send + Sync {
    async fn ensure_certificate(&self, hostname: &str) -> Result<(), CertificateError>;
}

/// Issues a self-signed certificate per hostname into an SNI store
#[derive(Debug, Clone, Default)]
pub struct SelfSignedCertificates {
    store: SniCertificateStore,
}

impl SelfSignedCertificates {
    pub fn new(store: SniCertificateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SniCertificateStore {
        &self.store
    }
}

#[async_trait]
impl CertificateManager for SelfSignedCertificates {
    async fn ensure_certificate(&self, hostname: &str) -> Result<(), CertificateError> {
        if self.store.has_cert(hostname) {
            debug!(hostname = %hostname, "Certificate already present");
            return Ok(());
        }

        // Key generation is CPU-bound
        let host = hostname.to_string();
        let cert = tokio::task::spawn_blocking(move || issue_self_signed(&host)).await??;
        self.store.insert(hostname, &cert)?;

        info!(hostname = %hostname, "Issued self-signed certificate");
        Ok(())
    }
}

fn issue_self_signed(hostname: &str) -> Result<TlsCertificate, CertificateError> {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec![hostname.to_string()])?;
    TlsCertificate::from_pem(cert.pem().as_bytes(), key_pair.serialize_pem().as_bytes())
}

/// Fire-and-forget queue in front of a [`CertificateManager`]
///
/// `request` never blocks. Calls run concurrently on a background task and
/// are abandoned when the cancellation token fires.
#[derive(Debug, Clone)]
pub struct CertificateDispatcher {
    tx: mpsc::UnboundedSender<String>,
}

impl CertificateDispatcher {
    /// Start the dispatcher task
    pub fn spawn(
        manager: Arc<dyn CertificateManager>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_dispatcher(manager, rx, cancel));
        (Self { tx }, handle)
    }

    /// Queue a certificate request for `hostname`
    pub fn request(&self, hostname: &str) {
        if self.tx.send(hostname.to_string()).is_err() {
            debug!(hostname = %hostname, "Certificate dispatcher stopped, dropping request");
        }
    }
}

async fn run_dispatcher(
    manager: Arc<dyn CertificateManager>,
    mut rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    let mut in_flight: JoinSet<(String, Result<(), CertificateError>)> = JoinSet::new();
    let mut accepting = true;

    loop {
        if !accepting && in_flight.is_empty() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                let abandoned = in_flight.len();
                in_flight.abort_all();
                for _ in 0..abandoned {
                    record_certificate_request("abandoned");
                }
                if abandoned > 0 {
                    info!(abandoned, "Certificate dispatcher cancelled");
                }
                break;
            }
            next = rx.recv(), if accepting => match next {
                Some(hostname) => {
                    let manager = Arc::clone(&manager);
                    in_flight.spawn(async move {
                        let result = manager.ensure_certificate(&hostname).await;
                        (hostname, result)
                    });
                }
                None => accepting = false,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                handle_result(joined);
            }
        }
    }
}

fn handle_result(joined: Result<(String, Result<(), CertificateError>), JoinError>) {
    match joined {
        Ok((hostname, Ok(()))) => {
            debug!(hostname = %hostname, "Certificate ensured");
            record_certificate_request("success");
        }
        Ok((hostname, Err(e))) => {
            warn!(hostname = %hostname, error = %e, "manage certificate failed");
            record_certificate_request("failure");
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => {
            warn!(error = %e, "Certificate task panicked");
            record_certificate_request("failure");
        }
    }
}
