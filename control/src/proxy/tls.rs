//! TLS termination with rustls and SNI support
//!
//! Certificates are held per hostname and picked by SNI at handshake time.
//! Inserting a certificate for a hostname that already has one replaces it;
//! connections already established keep the old one.

use crate::error::CertificateError;
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use std::collections::HashMap;
use std::io::BufReader;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Read lock with poison recovery
///
/// A panic while holding the lock leaves the map itself intact.
#[inline]
fn safe_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned in TLS module, recovering");
        poisoned.into_inner()
    })
}

#[inline]
fn safe_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned in TLS module, recovering");
        poisoned.into_inner()
    })
}

/// PEM certificate chain and private key
#[derive(Clone)]
pub struct TlsCertificate {
    pub cert_chain: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl TlsCertificate {
    /// Load certificate and private key from PEM bytes (validated)
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, CertificateError> {
        let certificate = Self {
            cert_chain: cert_pem.to_vec(),
            private_key: key_pem.to_vec(),
        };
        certificate.to_certified_key()?;
        Ok(certificate)
    }

    /// Parse into a rustls signing key with its chain
    pub fn to_certified_key(&self) -> Result<CertifiedKey, CertificateError> {
        let mut cert_reader = BufReader::new(&self.cert_chain[..]);
        let chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CertificateError::InvalidMaterial(e.to_string()))?;
        if chain.is_empty() {
            return Err(CertificateError::InvalidMaterial(
                "No certificate found".to_string(),
            ));
        }

        let mut key_reader = BufReader::new(&self.private_key[..]);
        let key = private_key(&mut key_reader)
            .map_err(|e| CertificateError::InvalidMaterial(e.to_string()))?
            .ok_or_else(|| CertificateError::InvalidMaterial("No private key found".to_string()))?;

        let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)
            .map_err(|e| CertificateError::InvalidMaterial(e.to_string()))?;

        Ok(CertifiedKey::new(chain, signing_key))
    }
}

/// SNI-keyed certificate store
///
/// Cloning shares the same store, so the certificate manager can write
/// while the TLS listener resolves.
#[derive(Debug, Clone, Default)]
pub struct SniCertificateStore {
    certs: Arc<RwLock<HashMap<String, Arc<CertifiedKey>>>>,
}

impl SniCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the certificate for a hostname
    pub fn insert(&self, hostname: &str, cert: &TlsCertificate) -> Result<(), CertificateError> {
        let certified_key = Arc::new(cert.to_certified_key()?);
        let mut certs = safe_write(&self.certs);
        certs.insert(hostname.to_string(), certified_key);
        debug!(hostname = %hostname, total = certs.len(), "Certificate stored");
        Ok(())
    }

    pub fn has_cert(&self, hostname: &str) -> bool {
        safe_read(&self.certs).contains_key(hostname)
    }

    pub fn len(&self) -> usize {
        safe_read(&self.certs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exact match first, then a `*.` wildcard for the parent domain
    pub fn lookup(&self, server_name: &str) -> Option<Arc<CertifiedKey>> {
        let certs = safe_read(&self.certs);
        if let Some(key) = certs.get(server_name) {
            return Some(Arc::clone(key));
        }
        let (_, parent) = server_name.split_once('.')?;
        certs.get(&format!("*.{}", parent)).cloned()
    }

    /// Build a rustls ServerConfig that resolves through this store
    pub fn to_server_config(&self) -> Arc<ServerConfig> {
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(self.clone()));
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Arc::new(config)
    }
}

impl ResolvesServerCert for SniCertificateStore {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name()?;
        let resolved = self.lookup(server_name);
        if resolved.is_none() {
            debug!(server_name = %server_name, "No certificate for SNI name");
        }
        resolved
    }
}
