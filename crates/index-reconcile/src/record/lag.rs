//! Pipeline lag observations.
//!
//! Records written by the pipeline carry millisecond timestamps for each hop.
//! The normalizer hands the derived lags to a [`LagSink`]; the CLI uses the
//! Prometheus-backed sink so the last observed values can be exported.

use crate::error::Result;
use prometheus::{Encoder, Gauge, Registry, TextEncoder};

/// Receives lag observations, in milliseconds.
pub trait LagSink: Send + Sync {
    /// Debezium source read to index write.
    fn observe_total_record_lag(&self, lag_ms: f64);

    /// Debezium source read to Debezium write.
    fn observe_debezium_lag(&self, lag_ms: f64);

    /// Core read to core write.
    fn observe_core_lag(&self, lag_ms: f64);
}

/// Discards all observations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLagSink;

impl LagSink for NoopLagSink {
    fn observe_total_record_lag(&self, _lag_ms: f64) {}
    fn observe_debezium_lag(&self, _lag_ms: f64) {}
    fn observe_core_lag(&self, _lag_ms: f64) {}
}

/// Lag gauges in a dedicated Prometheus registry.
#[derive(Clone)]
pub struct PrometheusLagSink {
    registry: Registry,
    total_record_lag: Gauge,
    debezium_lag: Gauge,
    core_lag: Gauge,
}

impl std::fmt::Debug for PrometheusLagSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusLagSink")
            .field("total_record_lag", &self.total_record_lag.get())
            .field("debezium_lag", &self.debezium_lag.get())
            .field("core_lag", &self.core_lag.get())
            .finish()
    }
}

impl PrometheusLagSink {
    /// Create the gauges and register them in a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let total_record_lag = Gauge::new(
            "xjoin_total_record_lag",
            "The number of milliseconds between debezium reading a record and elasticsearch indexing the record.",
        )?;
        let debezium_lag = Gauge::new(
            "xjoin_debezium_lag",
            "The number of milliseconds between debezium reading a record from the database and writing the record to the source topic.",
        )?;
        let core_lag = Gauge::new(
            "xjoin_core_lag",
            "The number of milliseconds between xjoin-core reading from the source topic and writing to the sink topic.",
        )?;

        registry.register(Box::new(total_record_lag.clone()))?;
        registry.register(Box::new(debezium_lag.clone()))?;
        registry.register(Box::new(core_lag.clone()))?;

        Ok(Self {
            registry,
            total_record_lag,
            debezium_lag,
            core_lag,
        })
    }

    /// Gather the gauges and encode them in Prometheus text format.
    pub fn gather_and_encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl LagSink for PrometheusLagSink {
    fn observe_total_record_lag(&self, lag_ms: f64) {
        self.total_record_lag.set(lag_ms);
    }

    fn observe_debezium_lag(&self, lag_ms: f64) {
        self.debezium_lag.set(lag_ms);
    }

    fn observe_core_lag(&self, lag_ms: f64) {
        self.core_lag.set(lag_ms);
    }
}

/// Hop timestamps found on one record.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct LagTimestamps {
    pub dbz_source_ms: Option<f64>,
    pub dbz_ms: Option<f64>,
    pub core_read_ms: Option<f64>,
    pub core_write_ms: Option<f64>,
    pub es_write_ms: Option<f64>,
}

impl LagTimestamps {
    /// Report every lag whose two ends are present.
    pub fn report(&self, sink: &dyn LagSink) {
        if let (Some(es_write), Some(dbz_source)) = (self.es_write_ms, self.dbz_source_ms) {
            sink.observe_total_record_lag(es_write - dbz_source);
        }
        if let (Some(dbz), Some(dbz_source)) = (self.dbz_ms, self.dbz_source_ms) {
            sink.observe_debezium_lag(dbz - dbz_source);
        }
        if let (Some(core_write), Some(core_read)) = (self.core_write_ms, self.core_read_ms) {
            sink.observe_core_lag(core_write - core_read);
        }
    }
}
