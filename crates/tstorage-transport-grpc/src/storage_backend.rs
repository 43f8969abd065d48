//! Storage backend trait the service is written against.

use std::sync::Arc;
use tstorage_engine::{DataPoint, Error, Label, Row, Storage, TimestampPrecision};

/// Backend interface for time-series operations.
///
/// Implementations must be safe for concurrent use; the service adds no locking.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Insert a batch of rows.
    async fn insert_rows(&self, rows: Vec<Row>) -> Result<(), Error>;

    /// Points of one series in `[start, end)`, ascending by timestamp.
    async fn select(
        &self,
        metric: String,
        labels: Vec<Label>,
        start: i64,
        end: i64,
    ) -> Result<Vec<DataPoint>, Error>;

    /// Flush and release resources.
    async fn close(&self) -> Result<(), Error>;

    /// Unit of the integer timestamps this backend stores.
    fn precision(&self) -> TimestampPrecision;
}

/// Adapter running [`Storage`] calls on the blocking pool.
///
/// Inserts may wait up to the engine's write timeout for a writer slot, so they
/// must not run on a runtime worker.
pub struct EngineBackend {
    storage: Arc<Storage>,
}

impl EngineBackend {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(format!("storage task failed: {}", e)))
}

#[async_trait::async_trait]
impl StorageBackend for EngineBackend {
    async fn insert_rows(&self, rows: Vec<Row>) -> Result<(), Error> {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || storage.insert_rows(&rows))
            .await
            .map_err(join_error)?
    }

    async fn select(
        &self,
        metric: String,
        labels: Vec<Label>,
        start: i64,
        end: i64,
    ) -> Result<Vec<DataPoint>, Error> {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || storage.select(&metric, &labels, start, end))
            .await
            .map_err(join_error)?
    }

    async fn close(&self) -> Result<(), Error> {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || storage.close())
            .await
            .map_err(join_error)?
    }

    fn precision(&self) -> TimestampPrecision {
        self.storage.options().precision
    }
}

/// In-memory backend for service tests. Rows whose metric starts with `fail` are rejected.
#[cfg(test)]
pub struct MockStorageBackend {
    rows: parking_lot::Mutex<Vec<Row>>,
}

#[cfg(test)]
impl MockStorageBackend {
    pub fn new() -> Self {
        Self {
            rows: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().clone()
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl StorageBackend for MockStorageBackend {
    async fn insert_rows(&self, rows: Vec<Row>) -> Result<(), Error> {
        if rows.iter().any(|r| r.metric.starts_with("fail")) {
            return Err(Error::InvalidRow("rejected by mock".to_string()));
        }
        self.rows.lock().extend(rows);
        Ok(())
    }

    async fn select(
        &self,
        metric: String,
        labels: Vec<Label>,
        start: i64,
        end: i64,
    ) -> Result<Vec<DataPoint>, Error> {
        if metric.starts_with("fail") {
            return Err(Error::Io(std::io::Error::other("select exploded")));
        }
        let mut points: Vec<DataPoint> = self
            .rows
            .lock()
            .iter()
            .filter(|r| r.metric == metric && r.labels == labels)
            .map(|r| r.data_point)
            .filter(|p| p.timestamp >= start && p.timestamp < end)
            .collect();
        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }

    fn precision(&self) -> TimestampPrecision {
        TimestampPrecision::Seconds
    }
}
