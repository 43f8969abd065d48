use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Unit of every integer timestamp stored by the engine.
///
/// Configured once per storage instance; callers convert their own clocks into it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampPrecision {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    #[default]
    Seconds,
}

impl TimestampPrecision {
    /// Number of timestamp units in one second.
    pub fn units_per_second(self) -> i64 {
        match self {
            TimestampPrecision::Nanoseconds => 1_000_000_000,
            TimestampPrecision::Microseconds => 1_000_000,
            TimestampPrecision::Milliseconds => 1_000,
            TimestampPrecision::Seconds => 1,
        }
    }

    /// Number of nanoseconds in one timestamp unit.
    pub fn nanos_per_unit(self) -> i64 {
        1_000_000_000 / self.units_per_second()
    }

    /// Short name as accepted on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            TimestampPrecision::Nanoseconds => "ns",
            TimestampPrecision::Microseconds => "us",
            TimestampPrecision::Milliseconds => "ms",
            TimestampPrecision::Seconds => "s",
        }
    }

    /// Express a duration in this precision's units, saturating at `i64::MAX`.
    pub fn duration_to_units(self, duration: Duration) -> i64 {
        let units = duration.as_nanos() / self.nanos_per_unit() as u128;
        i64::try_from(units).unwrap_or(i64::MAX)
    }
}

impl FromStr for TimestampPrecision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ns" => Ok(TimestampPrecision::Nanoseconds),
            "us" => Ok(TimestampPrecision::Microseconds),
            "ms" => Ok(TimestampPrecision::Milliseconds),
            "s" => Ok(TimestampPrecision::Seconds),
            other => Err(Error::Config(format!(
                "timestamp precision must be one of ns, us, ms or s (got {:?})",
                other
            ))),
        }
    }
}

impl fmt::Display for TimestampPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Directory partitions are flushed to on close. `None` keeps everything in memory.
    pub data_path: Option<PathBuf>,

    /// Unit of stored timestamps (default: seconds)
    pub precision: TimestampPrecision,

    /// Timestamp width of a single partition (default: 1 hour)
    pub partition_duration: Duration,

    /// How long an insert waits for a writer slot before failing (default: 30s)
    pub write_timeout: Duration,

    /// Maximum number of concurrent insert batches (default: available parallelism)
    pub max_writers: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            data_path: None,
            precision: TimestampPrecision::default(),
            partition_duration: Duration::from_secs(60 * 60),
            write_timeout: Duration::from_secs(30),
            max_writers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl StorageOptions {
    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    pub fn with_precision(mut self, precision: TimestampPrecision) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_partition_duration(mut self, duration: Duration) -> Self {
        self.partition_duration = duration;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_max_writers(mut self, max_writers: usize) -> Self {
        self.max_writers = max_writers;
        self
    }

    /// Partition width in timestamp units.
    pub fn partition_width(&self) -> i64 {
        self.precision.duration_to_units(self.partition_duration)
    }

    pub fn validate(&self) -> Result<()> {
        if self.partition_width() < 1 {
            return Err(Error::Config(format!(
                "partition duration {:?} is shorter than one {} unit",
                self.partition_duration, self.precision
            )));
        }
        if self.write_timeout.is_zero() {
            return Err(Error::Config("write timeout must be > 0".to_string()));
        }
        if self.max_writers == 0 {
            return Err(Error::Config("max_writers must be > 0".to_string()));
        }
        Ok(())
    }
}
