//! Prometheus export for the service metrics.
//!
//! Implements `tstorage_observe::Meter` on top of a prometheus-client registry.

use parking_lot::Mutex;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter as PromCounter;
use prometheus_client::metrics::family::{Family, MetricConstructor};
use prometheus_client::metrics::gauge::Gauge as PromGauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram as PromHistogram};
use prometheus_client::registry::Registry;
use std::collections::HashMap;
use tstorage_observe::{Counter, Gauge, Histogram, Meter};

type Labels = Vec<(String, String)>;

/// Bucket bounds a histogram family is created with.
///
/// Empty bounds fall back to a millisecond latency layout: 0.25ms .. ~2s.
#[derive(Debug, Clone)]
struct Buckets(&'static [f64]);

impl MetricConstructor<PromHistogram> for Buckets {
    fn new_metric(&self) -> PromHistogram {
        if self.0.is_empty() {
            PromHistogram::new(exponential_buckets(0.25, 2.0, 14))
        } else {
            PromHistogram::new(self.0.iter().copied())
        }
    }
}

fn help(name: &str) -> &'static str {
    match name {
        "tstorage_rows_inserted" => "Rows accepted by InsertRow and InsertRows",
        "tstorage_insert_errors" => "Rows rejected by InsertRow and InsertRows",
        "tstorage_points_selected" => "Data points streamed back by Select",
        "tstorage_select_errors" => "Select calls that failed",
        "tstorage_select_latency_ms" => "Time spent reading a Select range from storage",
        "tstorage_active_streams" => "Streaming calls currently open",
        _ => "tstorage metric",
    }
}

#[derive(Default)]
struct Inner {
    registry: Registry,
    counters: HashMap<&'static str, Family<Labels, PromCounter>>,
    gauges: HashMap<&'static str, Family<Labels, PromGauge>>,
    histograms: HashMap<&'static str, Family<Labels, PromHistogram, Buckets>>,
}

/// Prometheus metrics collector.
///
/// A family is registered the first time its name is requested; later requests for
/// the same name share it.
#[derive(Default)]
pub struct PrometheusMeter {
    inner: Mutex<Inner>,
}

impl PrometheusMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let inner = self.inner.lock();
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &inner.registry) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

fn to_labels(labels: &'static [(&'static str, &'static str)]) -> Labels {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

struct PrometheusCounter(PromCounter);

impl Counter for PrometheusCounter {
    fn inc(&self, v: u64) {
        self.0.inc_by(v);
    }
}

struct PrometheusGauge(PromGauge);

impl Gauge for PrometheusGauge {
    fn set(&self, v: i64) {
        self.0.set(v);
    }
}

struct PrometheusHistogram(PromHistogram);

impl Histogram for PrometheusHistogram {
    fn observe(&self, v: f64) {
        self.0.observe(v);
    }
}

impl Meter for PrometheusMeter {
    fn counter(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter> {
        let mut inner = self.inner.lock();
        let Inner {
            registry, counters, ..
        } = &mut *inner;
        let family = counters.entry(name).or_insert_with(|| {
            let family = Family::<Labels, PromCounter>::default();
            registry.register(name, help(name), family.clone());
            family
        });
        let metric = family.get_or_create(&to_labels(labels)).clone();
        Box::new(PrometheusCounter(metric))
    }

    fn gauge(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge> {
        let mut inner = self.inner.lock();
        let Inner {
            registry, gauges, ..
        } = &mut *inner;
        let family = gauges.entry(name).or_insert_with(|| {
            let family = Family::<Labels, PromGauge>::default();
            registry.register(name, help(name), family.clone());
            family
        });
        let metric = family.get_or_create(&to_labels(labels)).clone();
        Box::new(PrometheusGauge(metric))
    }

    /// The first request for a name fixes its bucket bounds.
    fn histo(
        &self,
        name: &'static str,
        buckets: &'static [f64],
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram> {
        let mut inner = self.inner.lock();
        let Inner {
            registry,
            histograms,
            ..
        } = &mut *inner;
        let family = histograms.entry(name).or_insert_with(|| {
            let family = Family::new_with_constructor(Buckets(buckets));
            registry.register(name, help(name), family.clone());
            family
        });
        let metric = family.get_or_create(&to_labels(labels)).clone();
        Box::new(PrometheusHistogram(metric))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_with_labels() {
        let meter = PrometheusMeter::new();
        let counter = meter.counter("tstorage_rows_inserted", &[("rpc", "insert_rows")]);
        counter.inc(5);
        counter.inc(3);

        let output = meter.export();
        assert!(output.contains("# HELP tstorage_rows_inserted Rows accepted"));
        assert!(output.contains("tstorage_rows_inserted_total{rpc=\"insert_rows\"} 8"));
    }

    #[test]
    fn test_same_name_shares_family() {
        let meter = PrometheusMeter::new();
        meter.counter("tstorage_insert_errors", &[]).inc(1);
        meter.counter("tstorage_insert_errors", &[]).inc(1);

        let output = meter.export();
        assert!(output.contains("tstorage_insert_errors_total 2"));
    }

    #[test]
    fn test_gauge() {
        let meter = PrometheusMeter::new();
        meter.gauge("tstorage_active_streams", &[]).set(42);

        assert!(meter.export().contains("tstorage_active_streams 42"));
    }

    #[test]
    fn test_histogram() {
        let meter = PrometheusMeter::new();
        let histo = meter.histo("tstorage_select_latency_ms", &[5.0, 50.0], &[]);
        histo.observe(1.5);
        histo.observe(20.0);

        let output = meter.export();
        assert!(output.contains("tstorage_select_latency_ms_count 2"));
        assert!(output.contains("tstorage_select_latency_ms_bucket{le=\"5.0\"} 1"));
        assert!(output.contains("tstorage_select_latency_ms_bucket{le=\"50.0\"} 2"));
        assert!(!output.contains("le=\"0.25\""));
    }

    #[test]
    fn test_histogram_without_buckets_uses_latency_layout() {
        let meter = PrometheusMeter::new();
        meter.histo("tstorage_select_latency_ms", &[], &[]).observe(0.1);

        let output = meter.export();
        assert!(output.contains("tstorage_select_latency_ms_bucket{le=\"0.25\"} 1"));
    }
}
