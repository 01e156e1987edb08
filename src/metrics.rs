use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    pub bytes_scanned: IntCounter,
    pub occurrences_emitted: IntCounter,
    pub slices_dispatched: IntCounter,
    pub proposals_rejected: IntCounter,
    pub miner_faults: IntCounter,
    registry: Arc<Registry>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help)).expect("metric names are valid identifiers")
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let bytes_scanned = counter("bytes_scanned", "Stream bytes consumed by the engine");
        let occurrences_emitted =
            counter("occurrences_emitted", "Occurrences returned to callers");
        let slices_dispatched = counter("slices_dispatched", "Slices handed to workers");
        let proposals_rejected = counter(
            "proposals_rejected",
            "Miner proposals dropped for falling outside their view",
        );
        let miner_faults = counter("miner_faults", "Miner invocations that failed or panicked");

        registry.register(Box::new(bytes_scanned.clone())).ok();
        registry.register(Box::new(occurrences_emitted.clone())).ok();
        registry.register(Box::new(slices_dispatched.clone())).ok();
        registry.register(Box::new(proposals_rejected.clone())).ok();
        registry.register(Box::new(miner_faults.clone())).ok();

        Metrics {
            bytes_scanned,
            occurrences_emitted,
            slices_dispatched,
            proposals_rejected,
            miner_faults,
            registry: Arc::new(registry),
        }
    }

    pub fn gather(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
