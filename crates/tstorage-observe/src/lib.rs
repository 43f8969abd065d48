//! tstorage-observe: metric traits the RPC layer records through.
//!
//! Nothing here knows about an exporter. The server app plugs in Prometheus;
//! tests and embedders use [`NoopMeter`].

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

pub trait Counter: Send + Sync {
    fn inc(&self, v: u64);
}

pub trait Gauge: Send + Sync {
    fn set(&self, v: i64);
}

pub trait Histogram: Send + Sync {
    fn observe(&self, v: f64);

    /// Record the milliseconds elapsed since `started`.
    fn observe_since_ms(&self, started: Instant) {
        self.observe(started.elapsed().as_secs_f64() * 1000.0);
    }
}

/// Source of named metric handles.
///
/// Handles are requested once, up front, and kept; asking twice for the same name
/// must return handles that feed the same series.
pub trait Meter: Send + Sync + 'static {
    fn counter(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter>;
    fn gauge(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge>;
    fn histo(
        &self,
        name: &'static str,
        buckets: &'static [f64],
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram>;
}

/// Gauge counting things that are currently open, such as streaming calls.
///
/// [`Occupancy::enter`] bumps the gauge and hands back a guard; dropping the guard
/// brings it back down, however the holder exits. The count and the gauge are
/// updated under one lock so the exported value never lags a later change.
pub struct Occupancy {
    gauge: Box<dyn Gauge>,
    current: Mutex<i64>,
}

impl Occupancy {
    pub fn new(gauge: Box<dyn Gauge>) -> Self {
        Self {
            gauge,
            current: Mutex::new(0),
        }
    }

    pub fn enter(self: &Arc<Self>) -> OccupancyGuard {
        self.shift(1);
        OccupancyGuard {
            occupancy: self.clone(),
        }
    }

    pub fn current(&self) -> i64 {
        *self.current.lock()
    }

    fn shift(&self, delta: i64) {
        let mut current = self.current.lock();
        *current += delta;
        self.gauge.set(*current);
    }
}

#[must_use = "the gauge drops back as soon as the guard is dropped"]
pub struct OccupancyGuard {
    occupancy: Arc<Occupancy>,
}

impl Drop for OccupancyGuard {
    fn drop(&mut self) {
        self.occupancy.shift(-1);
    }
}

/// A do-nothing meter for tests and callers who don't export metrics.
#[derive(Clone, Default)]
pub struct NoopMeter;

struct Noop;

impl Counter for Noop {
    fn inc(&self, _v: u64) {}
}

impl Gauge for Noop {
    fn set(&self, _v: i64) {}
}

impl Histogram for Noop {
    fn observe(&self, _v: f64) {}
}

impl Meter for NoopMeter {
    fn counter(&self, _: &'static str, _: &'static [(&'static str, &'static str)]) -> Box<dyn Counter> {
        Box::new(Noop)
    }

    fn gauge(&self, _: &'static str, _: &'static [(&'static str, &'static str)]) -> Box<dyn Gauge> {
        Box::new(Noop)
    }

    fn histo(
        &self,
        _: &'static str,
        _: &'static [f64],
        _: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram> {
        Box::new(Noop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingGauge(Arc<Mutex<Vec<i64>>>);

    impl Gauge for RecordingGauge {
        fn set(&self, v: i64) {
            self.0.lock().push(v);
        }
    }

    #[test]
    fn test_occupancy_tracks_guards() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let occupancy = Arc::new(Occupancy::new(Box::new(RecordingGauge(seen.clone()))));

        let a = occupancy.enter();
        let b = occupancy.enter();
        assert_eq!(occupancy.current(), 2);

        drop(a);
        assert_eq!(occupancy.current(), 1);
        drop(b);
        assert_eq!(occupancy.current(), 0);

        assert_eq!(*seen.lock(), vec![1, 2, 1, 0]);
    }

    #[test]
    fn test_occupancy_gauge_settles_under_contention() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let occupancy = Arc::new(Occupancy::new(Box::new(RecordingGauge(seen.clone()))));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let occupancy = occupancy.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let _guard = occupancy.enter();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(occupancy.current(), 0);
        let seen = seen.lock();
        assert_eq!(seen.len(), 8 * 500 * 2);
        assert_eq!(seen.last(), Some(&0));
        assert!(seen.iter().all(|v| (0..=8).contains(v)));
    }

    #[test]
    fn test_noop_meter() {
        let meter = NoopMeter;
        meter.counter("c", &[]).inc(1);
        meter.gauge("g", &[]).set(1);
        meter.histo("h", &[1.0], &[]).observe_since_ms(Instant::now());
    }
}
