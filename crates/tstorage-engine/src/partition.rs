//! In-memory partition covering a fixed timestamp window.

use crate::row::{DataPoint, SeriesKey};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Points of every series whose timestamps fall in `[min_timestamp, max_timestamp)`.
pub(crate) struct Partition {
    min_timestamp: i64,
    max_timestamp: i64,
    series: RwLock<HashMap<SeriesKey, Vec<DataPoint>>>,
}

impl Partition {
    pub fn new(min_timestamp: i64, width: i64) -> Self {
        Self {
            min_timestamp,
            max_timestamp: min_timestamp.saturating_add(width),
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn min_timestamp(&self) -> i64 {
        self.min_timestamp
    }

    pub fn max_timestamp(&self) -> i64 {
        self.max_timestamp
    }

    /// Insert a point, keeping the series ordered by timestamp.
    ///
    /// Points with equal timestamps keep their insertion order.
    pub fn insert(&self, key: &SeriesKey, point: DataPoint) {
        let mut series = self.series.write();
        let points = series.entry(key.clone()).or_default();

        match points.last() {
            Some(last) if last.timestamp > point.timestamp => {
                let idx = points.partition_point(|p| p.timestamp <= point.timestamp);
                points.insert(idx, point);
            }
            _ => points.push(point),
        }
    }

    /// Points of `key` in `[start, end)`.
    pub fn select(&self, key: &SeriesKey, start: i64, end: i64) -> Vec<DataPoint> {
        let series = self.series.read();
        let Some(points) = series.get(key) else {
            return Vec::new();
        };

        let lo = points.partition_point(|p| p.timestamp < start);
        let hi = points.partition_point(|p| p.timestamp < end);
        if lo >= hi {
            return Vec::new();
        }
        points[lo..hi].to_vec()
    }

    pub fn num_points(&self) -> usize {
        self.series.read().values().map(Vec::len).sum()
    }

    /// Copy out every series for flushing.
    pub fn snapshot(&self) -> Vec<(SeriesKey, Vec<DataPoint>)> {
        self.series
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
