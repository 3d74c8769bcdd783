//! Controller metrics
//!
//! Prometheus counters and gauges for the route table, the Ingress watch,
//! certificate requests, and host lookups on the serving path.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    /// Controller metrics registry
    pub static ref CONTROLLER_METRICS_REGISTRY: Registry = Registry::new();

    /// Hostnames currently routable
    static ref ROUTABLE_HOSTS: IntGauge = {
        let gauge = IntGauge::new(
            "ingress_routes_routable",
            "Number of hostnames currently routable",
        )
        .expect("Failed to create gauge");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(gauge.clone()))
            .expect("Failed to register gauge");
        gauge
    };

    /// Routable status transitions
    static ref ROUTE_CHANGES_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "ingress_route_changes_total",
            "Total number of hostnames added to or removed from the route table",
        );
        let counter = IntCounterVec::new(opts, &["op"]).expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Ingress watch events by kind and result
    static ref INGRESS_EVENTS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "ingress_events_total",
            "Total number of Ingress watch events processed",
        );
        let counter =
            IntCounterVec::new(opts, &["kind", "result"]).expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Certificate provisioning attempts
    static ref CERTIFICATE_REQUESTS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "ingress_certificate_requests_total",
            "Total number of certificate provisioning requests",
        );
        let counter = IntCounterVec::new(opts, &["result"]).expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Watch restarts after transport failures
    static ref WATCH_RESTARTS_TOTAL: IntCounter = {
        let counter = IntCounter::new(
            "ingress_watch_restarts_total",
            "Total number of Ingress watch restarts after a failure",
        )
        .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Serving path host lookups
    static ref HOST_LOOKUPS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "ingress_host_lookups_total",
            "Total number of request host lookups",
        );
        let counter = IntCounterVec::new(opts, &["result"]).expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Pre-resolved children so the request path skips the label lookup
    static ref HOST_LOOKUP_HITS: IntCounter = HOST_LOOKUPS_TOTAL.with_label_values(&["hit"]);
    static ref HOST_LOOKUP_MISSES: IntCounter = HOST_LOOKUPS_TOTAL.with_label_values(&["miss"]);
}

/// Record a processed Ingress event ("applied" or "skipped")
pub fn record_ingress_event(kind: &str, result: &str) {
    INGRESS_EVENTS_TOTAL.with_label_values(&[kind, result]).inc();
}

/// Record route table transitions and the resulting table size
pub fn record_route_changes(added: usize, removed: usize, routable: usize) {
    if added > 0 {
        ROUTE_CHANGES_TOTAL
            .with_label_values(&["add"])
            .inc_by(added as u64);
    }
    if removed > 0 {
        ROUTE_CHANGES_TOTAL
            .with_label_values(&["remove"])
            .inc_by(removed as u64);
    }
    ROUTABLE_HOSTS.set(routable as i64);
}

/// Record a certificate request outcome ("success", "failure", "abandoned")
pub fn record_certificate_request(result: &str) {
    CERTIFICATE_REQUESTS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_watch_restart() {
    WATCH_RESTARTS_TOTAL.inc();
}

/// Record a serving path lookup
#[inline]
pub fn record_host_lookup(hit: bool) {
    if hit {
        HOST_LOOKUP_HITS.inc();
    } else {
        HOST_LOOKUP_MISSES.inc();
    }
}

#[cfg(test)]
pub(crate) fn certificate_request_count(result: &str) -> u64 {
    CERTIFICATE_REQUESTS_TOTAL.with_label_values(&[result]).get()
}

#[cfg(test)]
pub(crate) fn host_lookup_count(hit: bool) -> u64 {
    let result = if hit { "hit" } else { "miss" };
    HOST_LOOKUPS_TOTAL.with_label_values(&[result]).get()
}

/// Gather controller metrics
pub fn gather_controller_metrics() -> Result<String, String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = CONTROLLER_METRICS_REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert to UTF-8: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_changes_are_exported() {
        record_route_changes(2, 1, 5);

        let output = gather_controller_metrics().expect("Should gather metrics");
        assert!(output.contains("ingress_route_changes_total"));
        assert!(output.contains("op=\"add\""));
        assert!(output.contains("ingress_routes_routable"));
    }

    #[test]
    fn test_event_and_certificate_counters_are_exported() {
        record_ingress_event("add", "applied");
        record_certificate_request("failure");
        record_watch_restart();
        record_host_lookup(false);

        let output = gather_controller_metrics().expect("Should gather metrics");
        assert!(output.contains("ingress_events_total"));
        assert!(output.contains("kind=\"add\""));
        assert!(output.contains("ingress_certificate_requests_total"));
        assert!(output.contains("ingress_watch_restarts_total"));
        assert!(output.contains("ingress_host_lookups_total"));
    }

    #[test]
    fn test_host_lookups_count_hits_and_misses() {
        let hits = host_lookup_count(true);
        let misses = host_lookup_count(false);

        record_host_lookup(true);
        record_host_lookup(true);
        record_host_lookup(false);

        assert!(host_lookup_count(true) >= hits + 2);
        assert!(host_lookup_count(false) >= misses + 1);
        let output = gather_controller_metrics().expect("Should gather metrics");
        assert!(output.contains("ingress_host_lookups_total{result=\"hit\"}"));
    }
}
