use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_cycles_total: IntCounterVec,
    pub offers_total: IntCounterVec,
    pub active_dispatch_loops: IntGauge,
    pub offer_response_seconds: HistogramVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_cycles_total = IntCounterVec::new(
            Opts::new("dispatch_cycles_total", "Finished dispatch loops by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_cycles_total metric");

        let offers_total = IntCounterVec::new(
            Opts::new("offers_total", "Courier offers by lifecycle event"),
            &["outcome"],
        )
        .expect("valid offers_total metric");

        let active_dispatch_loops =
            IntGauge::new("active_dispatch_loops", "Dispatch loops currently running")
                .expect("valid active_dispatch_loops metric");

        let offer_response_seconds = HistogramVec::new(
            HistogramOpts::new(
                "offer_response_seconds",
                "Time from offer to courier response or timeout",
            )
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 20.0]),
            &["outcome"],
        )
        .expect("valid offer_response_seconds metric");

        registry
            .register(Box::new(dispatch_cycles_total.clone()))
            .expect("register dispatch_cycles_total");
        registry
            .register(Box::new(offers_total.clone()))
            .expect("register offers_total");
        registry
            .register(Box::new(active_dispatch_loops.clone()))
            .expect("register active_dispatch_loops");
        registry
            .register(Box::new(offer_response_seconds.clone()))
            .expect("register offer_response_seconds");

        Self {
            registry,
            dispatch_cycles_total,
            offers_total,
            active_dispatch_loops,
            offer_response_seconds,
        }
    }

    pub fn offer(&self, outcome: &str) {
        self.offers_total.with_label_values(&[outcome]).inc();
    }

    pub fn offer_answered(&self, outcome: &str, seconds: f64) {
        self.offer(outcome);
        self.offer_response_seconds
            .with_label_values(&[outcome])
            .observe(seconds.max(0.0));
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
