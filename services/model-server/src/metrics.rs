use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Request-path metrics kept in a per-server registry.
pub struct ServerMetrics {
    registry: Registry,
    pub requests: IntCounterVec,
    pub latency: Histogram,
    pub rows: IntCounter,
}

impl ServerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let requests = IntCounterVec::new(
            Opts::new("model_server_predict_requests_total", "Predict requests by outcome"),
            &["outcome"],
        )?;
        let latency = Histogram::with_opts(HistogramOpts::new(
            "model_server_predict_latency_seconds",
            "Time spent answering a predict request",
        ))?;
        let rows = IntCounter::new("model_server_rows_predicted_total", "Rows answered with a prediction")?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(rows.clone()))?;
        Ok(Self { registry, requests, latency, rows })
    }

    pub fn render(&self) -> prometheus::Result<Vec<u8>> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(buf)
    }
}
