//! Conversion between wire messages and engine types.
//!
//! Wire timestamps are `google.protobuf.Timestamp`; the engine stores integers in its
//! configured precision. With second precision the engine value is exactly `seconds`.

use crate::proto;
use prost_types::Timestamp;
use tonic::Status;
use tstorage_engine::{DataPoint, Error as EngineError, Label, Row, TimestampPrecision};

/// A decoded `Filter`, ready for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub metric: String,
    pub labels: Vec<Label>,
    pub start: i64,
    pub end: i64,
}

/// Convert a wire timestamp into engine units, truncating sub-unit nanos.
#[allow(clippy::result_large_err)]
pub fn to_engine_timestamp(ts: &Timestamp, precision: TimestampPrecision) -> Result<i64, Status> {
    let mut ts = ts.clone();
    ts.normalize();

    // Widened so a negative `seconds` with positive `nanos` can still land on i64::MIN
    let units = i128::from(ts.seconds) * i128::from(precision.units_per_second())
        + i128::from(i64::from(ts.nanos) / precision.nanos_per_unit());

    i64::try_from(units).map_err(|_| {
        Status::invalid_argument(format!(
            "Timestamp {}s is out of range for {} precision",
            ts.seconds, precision
        ))
    })
}

/// Convert an engine timestamp back into a wire timestamp.
pub fn to_wire_timestamp(timestamp: i64, precision: TimestampPrecision) -> Timestamp {
    let units = precision.units_per_second();
    Timestamp {
        seconds: timestamp.div_euclid(units),
        nanos: (timestamp.rem_euclid(units) * precision.nanos_per_unit()) as i32,
    }
}

pub fn to_labels(labels: Vec<proto::Label>) -> Vec<Label> {
    labels
        .into_iter()
        .map(|l| Label {
            name: l.name,
            value: l.value,
        })
        .collect()
}

/// Translate one datum into one engine row.
#[allow(clippy::result_large_err)]
pub fn to_row(datum: proto::TimeSeriesDatum, precision: TimestampPrecision) -> Result<Row, Status> {
    if datum.metric.is_empty() {
        return Err(Status::invalid_argument("Metric cannot be empty"));
    }
    let ts = datum
        .timestamp
        .as_ref()
        .ok_or_else(|| Status::invalid_argument("Timestamp is required"))?;

    Ok(Row {
        metric: datum.metric,
        labels: to_labels(datum.labels),
        data_point: DataPoint {
            value: datum.value,
            timestamp: to_engine_timestamp(ts, precision)?,
        },
    })
}

/// Translate a filter into an engine query. The range is passed through unchecked.
#[allow(clippy::result_large_err)]
pub fn to_query(filter: proto::Filter, precision: TimestampPrecision) -> Result<Query, Status> {
    if filter.metric.is_empty() {
        return Err(Status::invalid_argument("Metric cannot be empty"));
    }
    let start = filter
        .start
        .as_ref()
        .ok_or_else(|| Status::invalid_argument("Filter start is required"))?;
    let end = filter
        .end
        .as_ref()
        .ok_or_else(|| Status::invalid_argument("Filter end is required"))?;

    Ok(Query {
        start: to_engine_timestamp(start, precision)?,
        end: to_engine_timestamp(end, precision)?,
        metric: filter.metric,
        labels: to_labels(filter.labels),
    })
}

pub fn to_wire_point(point: DataPoint, precision: TimestampPrecision) -> proto::DataPoint {
    proto::DataPoint {
        value: point.value,
        timestamp: Some(to_wire_timestamp(point.timestamp, precision)),
    }
}

/// Map an engine failure onto an RPC status, keeping the engine's message.
pub fn engine_status(err: &EngineError) -> Status {
    match err {
        EngineError::InvalidRow(_) => Status::invalid_argument(err.to_string()),
        EngineError::WriteTimeout(_) => Status::deadline_exceeded(err.to_string()),
        EngineError::Closed => Status::unavailable(err.to_string()),
        _ => Status::internal(err.to_string()),
    }
}
