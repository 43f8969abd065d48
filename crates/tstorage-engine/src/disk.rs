//! Partition files under the data path.
//!
//! Layout: one directory per partition, `p-<min>-<max>/data.json`, holding every
//! series of that partition. Directories are rewritten as a whole on each flush.

use crate::error::{Error, Result};
use crate::options::TimestampPrecision;
use crate::partition::Partition;
use crate::row::{DataPoint, Label, SeriesKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

const PARTITION_PREFIX: &str = "p-";
const DATA_FILE: &str = "data.json";

#[derive(Debug, Serialize, Deserialize)]
struct PartitionFile {
    precision: TimestampPrecision,
    min_timestamp: i64,
    max_timestamp: i64,
    series: Vec<SeriesFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SeriesFile {
    metric: String,
    labels: Vec<Label>,
    points: Vec<DataPoint>,
}

/// Write every non-empty partition to `dir` and drop partition directories
/// that no longer correspond to one.
pub(crate) fn flush(
    dir: &Path,
    precision: TimestampPrecision,
    partitions: &[Arc<Partition>],
) -> Result<usize> {
    fs::create_dir_all(dir)?;

    let mut written = HashSet::new();
    let mut points = 0;

    for partition in partitions {
        let series = partition.snapshot();
        if series.is_empty() {
            continue;
        }

        let name = format!(
            "{}{}-{}",
            PARTITION_PREFIX,
            partition.min_timestamp(),
            partition.max_timestamp()
        );
        let partition_dir = dir.join(&name);
        fs::create_dir_all(&partition_dir)?;

        let file = PartitionFile {
            precision,
            min_timestamp: partition.min_timestamp(),
            max_timestamp: partition.max_timestamp(),
            series: series
                .into_iter()
                .map(|(key, pts)| {
                    points += pts.len();
                    SeriesFile {
                        metric: key.metric,
                        labels: key.labels,
                        points: pts,
                    }
                })
                .collect(),
        };

        let bytes = serde_json::to_vec(&file).map_err(std::io::Error::from)?;
        let tmp = partition_dir.join(format!("{}.tmp", DATA_FILE));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, partition_dir.join(DATA_FILE))?;

        written.insert(name);
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(PARTITION_PREFIX) && entry.path().is_dir() && !written.contains(&name)
        {
            tracing::debug!("Removing stale partition directory {}", name);
            fs::remove_dir_all(entry.path())?;
        }
    }

    Ok(points)
}

/// Read back every partition under `dir`.
///
/// Returns the series found, ready to be re-inserted with the current partition width.
pub(crate) fn load(
    dir: &Path,
    precision: TimestampPrecision,
) -> Result<Vec<(SeriesKey, Vec<DataPoint>)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(PARTITION_PREFIX) || !entry.path().is_dir() {
            continue;
        }

        let path = entry.path().join(DATA_FILE);
        if !path.exists() {
            tracing::warn!("Partition directory {} has no {}, skipping", name, DATA_FILE);
            continue;
        }

        let bytes = fs::read(&path)?;
        let file: PartitionFile = serde_json::from_slice(&bytes).map_err(|e| Error::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        if file.precision != precision {
            return Err(Error::Config(format!(
                "partition {} was written with precision {}, storage opened with {}",
                name, file.precision, precision
            )));
        }

        for series in file.series {
            out.push((SeriesKey::new(&series.metric, &series.labels), series.points));
        }
    }

    Ok(out)
}
