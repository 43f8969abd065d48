//! Rows, labels and data points as the engine stores them.

use serde::{Deserialize, Serialize};

/// A name/value pair attached to a series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A single sample. `timestamp` is in the storage's configured precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub value: f64,
    pub timestamp: i64,
}

/// One insert unit: a data point for the series `metric` + `labels`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub metric: String,
    pub labels: Vec<Label>,
    pub data_point: DataPoint,
}

/// Identity of a series: metric plus its normalized label set.
///
/// Labels are sorted by name and those with an empty name or value are dropped,
/// so `[b=2, a=1]` and `[a=1, b=2]` address the same series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct SeriesKey {
    pub metric: String,
    pub labels: Vec<Label>,
}

impl SeriesKey {
    pub fn new(metric: &str, labels: &[Label]) -> Self {
        let mut labels: Vec<Label> = labels
            .iter()
            .filter(|l| !l.name.is_empty() && !l.value.is_empty())
            .cloned()
            .collect();
        labels.sort();
        Self {
            metric: metric.to_string(),
            labels,
        }
    }
}
