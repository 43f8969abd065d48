//! tstorage-engine: time-partitioned storage for labeled numeric samples.
//!
//! Rows are grouped into fixed-width partitions by timestamp and, inside a partition,
//! into series identified by metric name plus label set. The engine exposes three
//! operations that the RPC layer relies on:
//!
//! - [`Storage::insert_rows`]: batch insert, safe for concurrent callers
//! - [`Storage::select`]: half-open range query over one series
//! - [`Storage::close`]: flush to the data path and refuse further writes
//!
//! When a data path is configured, `close` writes every partition to disk and the next
//! [`Storage::open`] on the same path loads them back.

pub mod error;
pub mod options;
pub mod row;

mod disk;
mod partition;
mod storage;
mod writers;

pub use error::{Error, Result};
pub use options::{StorageOptions, TimestampPrecision};
pub use row::{DataPoint, Label, Row};
pub use storage::Storage;
