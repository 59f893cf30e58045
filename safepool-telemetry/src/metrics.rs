//! ## safepool-telemetry::metrics
//! **Prometheus counters, gauges and a request-size histogram**

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub allocations: IntCounter,
    pub failed_allocations: IntCounter,
    pub frees: IntCounter,
    pub rejected_frees: IntCounter,
    pub lwm_free_bytes: IntGauge,
    pub largest_free_bytes: IntGauge,
    pub alloc_request_bytes: Histogram,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let allocations = IntCounter::new("safepool_alloc_total", "Successful allocations")?;
        let failed_allocations =
            IntCounter::new("safepool_alloc_failed_total", "Allocations returning None")?;
        let frees = IntCounter::new("safepool_free_total", "Accepted frees")?;
        let rejected_frees = IntCounter::new(
            "safepool_free_rejected_total",
            "Frees declined for pointers outside the pool",
        )?;
        let lwm_free_bytes =
            IntGauge::new("safepool_lwm_free_bytes", "Low-water mark of free bytes")?;
        let largest_free_bytes =
            IntGauge::new("safepool_largest_free_bytes", "Size of the largest free block")?;
        let alloc_request_bytes = Histogram::with_opts(
            HistogramOpts::new("safepool_alloc_request_bytes", "Requested allocation sizes")
                .buckets(prometheus::exponential_buckets(16.0, 4.0, 8)?),
        )?;

        registry.register(Box::new(allocations.clone()))?;
        registry.register(Box::new(failed_allocations.clone()))?;
        registry.register(Box::new(frees.clone()))?;
        registry.register(Box::new(rejected_frees.clone()))?;
        registry.register(Box::new(lwm_free_bytes.clone()))?;
        registry.register(Box::new(largest_free_bytes.clone()))?;
        registry.register(Box::new(alloc_request_bytes.clone()))?;

        Ok(Self {
            registry,
            allocations,
            failed_allocations,
            frees,
            rejected_frees,
            lwm_free_bytes,
            largest_free_bytes,
            alloc_request_bytes,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    #[inline]
    pub fn record_alloc(&self, size: usize, succeeded: bool) {
        self.alloc_request_bytes.observe(size as f64);
        if succeeded {
            self.allocations.inc();
        } else {
            self.failed_allocations.inc();
        }
    }

    #[inline]
    pub fn record_free(&self, accepted: bool) {
        if accepted {
            self.frees.inc();
        } else {
            self.rejected_frees.inc();
        }
    }

    pub fn observe_pool(&self, lwm_free_bytes: usize, largest_free_bytes: usize) {
        self.lwm_free_bytes.set(to_gauge(lwm_free_bytes));
        self.largest_free_bytes.set(to_gauge(largest_free_bytes));
    }
}

fn to_gauge(bytes: usize) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}
