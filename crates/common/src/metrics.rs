use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Prometheus instruments of the product consistency layer.
///
/// Registered against an explicit [`Registry`] and handed to each component,
/// so tests can build an isolated set without touching process-wide state.
/// Cloning is cheap: every instrument is reference counted.
#[derive(Clone)]
pub struct ProductMetrics {
    mutations: IntCounterVec,
    cache_requests: IntCounterVec,
    cache_errors: IntCounterVec,
    events_published: IntCounterVec,
    events_pending: IntCounter,
    events_consumed: IntCounterVec,
    dead_letters: IntCounterVec,
    store_duration: HistogramVec,
}

impl ProductMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let mutations = IntCounterVec::new(
            Opts::new("product_mutations_total", "Total number of product mutations"),
            &["operation", "outcome"],
        )?;
        let cache_requests = IntCounterVec::new(
            Opts::new("product_cache_requests_total", "Total number of cache lookups"),
            &["status"],
        )?;
        let cache_errors = IntCounterVec::new(
            Opts::new(
                "product_cache_errors_total",
                "Cache operations that failed and were swallowed",
            ),
            &["operation"],
        )?;
        let events_published = IntCounterVec::new(
            Opts::new("product_events_published_total", "Total number of publish attempts"),
            &["event_type", "status"],
        )?;
        let events_pending = IntCounter::new(
            "product_events_pending_total",
            "Committed mutations whose event could not be published",
        )?;
        let events_consumed = IntCounterVec::new(
            Opts::new("product_events_consumed_total", "Total number of consumed events"),
            &["event_type", "status"],
        )?;
        let dead_letters = IntCounterVec::new(
            Opts::new("product_dead_letters_total", "Events routed to the dead-letter sink"),
            &["topic"],
        )?;
        let store_duration = HistogramVec::new(
            HistogramOpts::new(
                "product_store_duration_seconds",
                "Store gateway call duration in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["operation"],
        )?;

        registry.register(Box::new(mutations.clone()))?;
        registry.register(Box::new(cache_requests.clone()))?;
        registry.register(Box::new(cache_errors.clone()))?;
        registry.register(Box::new(events_published.clone()))?;
        registry.register(Box::new(events_pending.clone()))?;
        registry.register(Box::new(events_consumed.clone()))?;
        registry.register(Box::new(dead_letters.clone()))?;
        registry.register(Box::new(store_duration.clone()))?;

        Ok(Self {
            mutations,
            cache_requests,
            cache_errors,
            events_published,
            events_pending,
            events_consumed,
            dead_letters,
            store_duration,
        })
    }

    /// Instruments bound to a private registry nobody scrapes
    pub fn unregistered() -> Self {
        match Self::register(&Registry::new()) {
            Ok(metrics) => metrics,
            // A fresh registry cannot hold duplicate names
            Err(e) => unreachable!("fresh registry rejected metrics: {}", e),
        }
    }

    pub fn record_mutation(&self, operation: &str, outcome: &str) {
        self.mutations.with_label_values(&[operation, outcome]).inc();
    }

    pub fn record_cache_request(&self, hit: bool) {
        let status = if hit { "hit" } else { "miss" };
        self.cache_requests.with_label_values(&[status]).inc();
    }

    pub fn record_cache_error(&self, operation: &str) {
        self.cache_errors.with_label_values(&[operation]).inc();
    }

    pub fn record_publish(&self, event_type: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.events_published
            .with_label_values(&[event_type, status])
            .inc();
    }

    pub fn record_event_pending(&self) {
        self.events_pending.inc();
    }

    pub fn record_consumed(&self, event_type: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.events_consumed
            .with_label_values(&[event_type, status])
            .inc();
    }

    pub fn record_dead_letter(&self, topic: &str) {
        self.dead_letters.with_label_values(&[topic]).inc();
    }

    pub fn observe_store_call(&self, operation: &str, duration_secs: f64) {
        self.store_duration
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn events_pending(&self) -> u64 {
        self.events_pending.get()
    }

    pub fn mutations(&self, operation: &str, outcome: &str) -> u64 {
        self.mutations.with_label_values(&[operation, outcome]).get()
    }

    pub fn dead_letters(&self, topic: &str) -> u64 {
        self.dead_letters.with_label_values(&[topic]).get()
    }
}

/// Render every metric of `registry` in Prometheus text format
pub fn gather_metrics(registry: &Registry) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
