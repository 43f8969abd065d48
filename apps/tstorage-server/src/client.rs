//! Thin gRPC client used by the CLI subcommands.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tstorage_engine::{DataPoint, TimestampPrecision};
use tstorage_transport_grpc::convert::{to_engine_timestamp, to_wire_timestamp};
use tstorage_transport_grpc::proto::{
    t_storage_client::TStorageClient, Filter, HelloRequest, InsertAck, Label, TimeSeriesDatum,
};

/// Label attached by the CLI when the user gives none.
pub const DEFAULT_LABEL: (&str, &str) = ("Source", "Command");

/// Client for a running tstorage server.
///
/// Timestamps are plain integers in `precision` units, the same units the server stores.
pub struct Client {
    inner: TStorageClient<Channel>,
    precision: TimestampPrecision,
}

impl Client {
    /// Connect to `addr` (`host:port` or a full `http://` URI).
    pub async fn connect(
        addr: &str,
        precision: TimestampPrecision,
        timeout: Duration,
    ) -> Result<Self> {
        let uri = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{}", addr)
        };

        let channel = Endpoint::from_shared(uri.clone())
            .with_context(|| format!("invalid server address {:?}", addr))?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect()
            .await
            .with_context(|| format!("did not connect to {}", uri))?;

        Ok(Self {
            inner: TStorageClient::new(channel),
            precision,
        })
    }

    pub async fn hello(&mut self, name: &str) -> Result<String> {
        let reply = self
            .inner
            .say_hello(HelloRequest {
                name: name.to_string(),
            })
            .await
            .context("could not greet")?;
        Ok(reply.into_inner().message)
    }

    pub async fn insert_row(&mut self, datum: TimeSeriesDatum) -> Result<InsertAck> {
        let ack = self.inner.insert_row(datum).await.context("could not add")?;
        Ok(ack.into_inner())
    }

    /// Send every datum over a single InsertRows stream.
    pub async fn insert_rows(&mut self, data: Vec<TimeSeriesDatum>) -> Result<InsertAck> {
        let ack = self
            .inner
            .insert_rows(tokio_stream::iter(data))
            .await
            .context("could not stream rows")?;
        Ok(ack.into_inner())
    }

    /// Collect every point in `[start, end)` for the series.
    pub async fn select(
        &mut self,
        metric: &str,
        labels: Vec<Label>,
        start: i64,
        end: i64,
    ) -> Result<Vec<DataPoint>> {
        let filter = Filter {
            labels,
            metric: metric.to_string(),
            start: Some(to_wire_timestamp(start, self.precision)),
            end: Some(to_wire_timestamp(end, self.precision)),
        };

        let mut stream = self
            .inner
            .select(filter)
            .await
            .context("could not select")?
            .into_inner();

        let mut points = Vec::new();
        while let Some(point) = stream.message().await.context("error with stream")? {
            let ts = point
                .timestamp
                .ok_or_else(|| anyhow!("server sent a data point without a timestamp"))?;
            points.push(DataPoint {
                value: point.value,
                timestamp: to_engine_timestamp(&ts, self.precision)
                    .map_err(|status| anyhow!(status.message().to_string()))?,
            });
        }
        Ok(points)
    }

    /// Build a wire datum from CLI-style arguments.
    pub fn datum(&self, metric: &str, labels: Vec<Label>, value: f64, timestamp: i64) -> TimeSeriesDatum {
        TimeSeriesDatum {
            labels,
            metric: metric.to_string(),
            value,
            timestamp: Some(to_wire_timestamp(timestamp, self.precision)),
        }
    }
}

/// Parse a `name=value` label argument.
pub fn parse_label(s: &str) -> Result<Label> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("label {:?} is not in name=value form", s))?;
    if name.is_empty() {
        return Err(anyhow!("label {:?} has an empty name", s));
    }
    Ok(Label {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// `count` timestamps one unit apart, starting at `start`.
pub fn consecutive_timestamps(start: i64, count: u32) -> Result<Vec<i64>> {
    (0..i64::from(count))
        .map(|i| {
            start
                .checked_add(i)
                .ok_or_else(|| anyhow!("timestamp {} + {} overflows", start, i))
        })
        .collect()
}

/// The given labels, or the default `Source=Command` label when there are none.
pub fn labels_or_default(labels: Vec<Label>) -> Vec<Label> {
    if labels.is_empty() {
        vec![Label {
            name: DEFAULT_LABEL.0.to_string(),
            value: DEFAULT_LABEL.1.to_string(),
        }]
    } else {
        labels
    }
}
