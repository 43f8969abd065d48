//! The storage handle shared by every caller.

use crate::disk;
use crate::error::{Error, Result};
use crate::options::StorageOptions;
use crate::partition::Partition;
use crate::row::{DataPoint, Label, Row, SeriesKey};
use crate::writers::WriterSlots;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Time-series storage.
///
/// Safe for concurrent use: all methods take `&self`. Share it behind an `Arc`.
pub struct Storage {
    options: StorageOptions,
    partition_width: i64,
    /// Partitions keyed by their minimum timestamp.
    partitions: RwLock<BTreeMap<i64, Arc<Partition>>>,
    writers: WriterSlots,
    closed: AtomicBool,
}

impl Storage {
    /// Open a storage instance, loading any partitions flushed under the data path.
    pub fn open(options: StorageOptions) -> Result<Self> {
        options.validate()?;

        let storage = Self {
            partition_width: options.partition_width(),
            writers: WriterSlots::new(options.max_writers),
            partitions: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
            options,
        };

        if let Some(dir) = &storage.options.data_path {
            std::fs::create_dir_all(dir)?;
            let loaded = disk::load(dir, storage.options.precision)?;
            let mut points = 0;
            for (key, series) in loaded {
                points += series.len();
                for point in series {
                    storage.partition_for(point.timestamp).insert(&key, point);
                }
            }
            tracing::info!(
                "Opened storage at {} ({} points, {} partitions)",
                dir.display(),
                points,
                storage.partitions.read().len()
            );
        } else {
            tracing::info!("Opened in-memory storage");
        }

        Ok(storage)
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Insert a batch of rows.
    ///
    /// The whole batch is validated before anything is written. Waits up to the
    /// configured write timeout for a writer slot.
    pub fn insert_rows(&self, rows: &[Row]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        for row in rows {
            if row.metric.is_empty() {
                return Err(Error::InvalidRow("metric must be set".to_string()));
            }
        }

        let _slot = self.writers.acquire(self.options.write_timeout)?;

        // close() may have started while we waited for the slot
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        for row in rows {
            let key = SeriesKey::new(&row.metric, &row.labels);
            self.partition_for(row.data_point.timestamp)
                .insert(&key, row.data_point);
        }

        Ok(())
    }

    /// Points of the series `metric` + `labels` with `start <= timestamp < end`,
    /// ascending by timestamp.
    ///
    /// Labels must match the series' label set exactly. An empty result is not an error.
    pub fn select(
        &self,
        metric: &str,
        labels: &[Label],
        start: i64,
        end: i64,
    ) -> Result<Vec<DataPoint>> {
        if metric.is_empty() {
            return Err(Error::InvalidRow("metric must be set".to_string()));
        }
        if start >= end {
            return Ok(Vec::new());
        }

        let key = SeriesKey::new(metric, labels);
        let first = self.partition_start(start);

        let partitions: Vec<Arc<Partition>> = self
            .partitions
            .read()
            .range(first..end)
            .map(|(_, p)| p.clone())
            .collect();

        let mut points = Vec::new();
        for partition in partitions {
            points.extend(partition.select(&key, start, end));
        }
        Ok(points)
    }

    /// Flush to the data path and refuse further inserts.
    ///
    /// Waits for in-progress inserts to finish first. Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Storage already closed");
            return Ok(());
        }

        self.writers.wait_idle();

        let Some(dir) = &self.options.data_path else {
            tracing::info!("Closed in-memory storage");
            return Ok(());
        };

        let partitions: Vec<Arc<Partition>> = self.partitions.read().values().cloned().collect();
        let points = disk::flush(dir, self.options.precision, &partitions)?;
        tracing::info!(
            "Flushed {} points in {} partitions to {}",
            points,
            partitions.len(),
            dir.display()
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Total number of stored points.
    pub fn num_points(&self) -> usize {
        self.partitions.read().values().map(|p| p.num_points()).sum()
    }

    /// Start of the partition holding `timestamp`.
    ///
    /// The lowest partition is clamped to `i64::MIN`; it still covers every timestamp
    /// below `i64::MIN + width`.
    fn partition_start(&self, timestamp: i64) -> i64 {
        timestamp
            .div_euclid(self.partition_width)
            .checked_mul(self.partition_width)
            .unwrap_or(i64::MIN)
    }

    fn partition_for(&self, timestamp: i64) -> Arc<Partition> {
        let start = self.partition_start(timestamp);

        if let Some(p) = self.partitions.read().get(&start) {
            return p.clone();
        }

        self.partitions
            .write()
            .entry(start)
            .or_insert_with(|| Arc::new(Partition::new(start, self.partition_width)))
            .clone()
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if !self.is_closed() {
            tracing::warn!("Storage dropped without close(); unflushed data is lost");
        }
    }
}
