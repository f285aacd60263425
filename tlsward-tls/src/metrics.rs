//! Prometheus Metrics for Tlsward
//!
//! Counters for issuance attempts, handshake certificate selection and
//! HTTP-01 challenge lookups.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::LazyLock;

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Issuance attempts by outcome
pub static ISSUANCE_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("tlsward_issuance_total", "Certificate issuance attempts by outcome"),
        &["outcome"]
    ).expect("metric can be created")
});

/// Handshake certificate selections by result
pub static SELECTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("tlsward_selections_total", "SNI certificate selections by result"),
        &["result"]
    ).expect("metric can be created")
});

/// HTTP-01 challenge lookups
pub static CHALLENGE_LOOKUPS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("tlsward_challenge_lookups_total", "HTTP-01 challenge token lookups"),
        &["result"]
    ).expect("metric can be created")
});

/// Initialize metrics
pub fn init() {
    // Already-registered errors are fine if init runs twice
    let _ = REGISTRY.register(Box::new(ISSUANCE_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SELECTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CHALLENGE_LOOKUPS_TOTAL.clone()));
}

/// Gather metrics in Prometheus text format
pub fn gather() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("⚠️ Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_registered_counters() {
        init();
        ISSUANCE_TOTAL.with_label_values(&["issued"]).inc();

        let text = gather();
        assert!(text.contains("tlsward_issuance_total"));
    }
}
