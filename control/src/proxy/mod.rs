//! Data plane: route table, certificates, and the host-gated proxy

pub mod certificates;
pub mod forwarder;
pub mod router;
pub mod server;
pub mod tls;
