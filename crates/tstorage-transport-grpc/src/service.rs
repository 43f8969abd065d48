//! TStorage service implementation.
//!
//! Translates each RPC into calls on a [`StorageBackend`] and streams results back.

use crate::convert;
use crate::proto::{self, t_storage_server::TStorage};
use crate::storage_backend::StorageBackend;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tstorage_engine::TimestampPrecision;
use tstorage_observe::{Counter, Histogram, Meter, Occupancy};

/// Points buffered between the select producer and the wire. Keeping it at one
/// makes every send wait for the caller to take the previous point.
const SELECT_STREAM_BUFFER: usize = 1;

const LATENCY_BUCKETS_MS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0];

struct ServiceMetrics {
    rows_inserted: Box<dyn Counter>,
    insert_errors: Box<dyn Counter>,
    points_selected: Box<dyn Counter>,
    select_errors: Box<dyn Counter>,
    select_latency_ms: Box<dyn Histogram>,
    active_streams: Arc<Occupancy>,
}

impl ServiceMetrics {
    fn new(meter: &dyn Meter) -> Self {
        Self {
            rows_inserted: meter.counter("tstorage_rows_inserted", &[]),
            insert_errors: meter.counter("tstorage_insert_errors", &[]),
            points_selected: meter.counter("tstorage_points_selected", &[]),
            select_errors: meter.counter("tstorage_select_errors", &[]),
            select_latency_ms: meter.histo("tstorage_select_latency_ms", LATENCY_BUCKETS_MS, &[]),
            active_streams: Arc::new(Occupancy::new(
                meter.gauge("tstorage_active_streams", &[]),
            )),
        }
    }
}

/// TStorage service implementation.
///
/// Holds one backend handle for the life of the server; no state is kept between calls.
pub struct TStorageService {
    backend: Arc<dyn StorageBackend>,
    precision: TimestampPrecision,
    metrics: Arc<ServiceMetrics>,
}

impl TStorageService {
    /// Create a new service.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_meter(backend, Arc::new(tstorage_observe::NoopMeter))
    }

    /// Create a new service with metrics.
    pub fn with_meter(backend: Arc<dyn StorageBackend>, meter: Arc<dyn Meter>) -> Self {
        Self {
            precision: backend.precision(),
            backend,
            metrics: Arc::new(ServiceMetrics::new(meter.as_ref())),
        }
    }

    /// Translate and insert a single datum as a one-row batch.
    async fn insert_one(&self, datum: proto::TimeSeriesDatum) -> Result<(), Status> {
        let result = match convert::to_row(datum, self.precision) {
            Ok(row) => self
                .backend
                .insert_rows(vec![row])
                .await
                .map_err(|e| convert::engine_status(&e)),
            Err(status) => Err(status),
        };

        match &result {
            Ok(()) => self.metrics.rows_inserted.inc(1),
            Err(_) => self.metrics.insert_errors.inc(1),
        }
        result
    }
}

#[tonic::async_trait]
impl TStorage for TStorageService {
    async fn say_hello(
        &self,
        request: Request<proto::HelloRequest>,
    ) -> Result<Response<proto::HelloReply>, Status> {
        let req = request.into_inner();
        tracing::debug!("SayHello from {:?}", req.name);

        Ok(Response::new(proto::HelloReply {
            message: format!("Hello {}", req.name),
        }))
    }

    async fn insert_row(
        &self,
        request: Request<proto::TimeSeriesDatum>,
    ) -> Result<Response<proto::InsertAck>, Status> {
        let datum = request.into_inner();
        tracing::debug!(
            "InsertRow: metric={}, labels={}",
            datum.metric,
            datum.labels.len()
        );

        self.insert_one(datum).await.inspect_err(|status| {
            tracing::debug!("InsertRow failed: {}", status.message());
        })?;

        Ok(Response::new(proto::InsertAck {
            rows_inserted: 1,
            message: String::new(),
        }))
    }

    async fn insert_rows(
        &self,
        request: Request<Streaming<proto::TimeSeriesDatum>>,
    ) -> Result<Response<proto::InsertAck>, Status> {
        let mut stream = request.into_inner();
        let _guard = self.metrics.active_streams.enter();

        let mut received: u64 = 0;
        let mut failed: u64 = 0;
        let mut first_error: Option<Status> = None;

        // Rows are applied one at a time, in receive order. A failed row does not stop
        // the stream, but it does fail the call once the client is done sending.
        loop {
            let datum = match stream.message().await {
                Ok(Some(datum)) => datum,
                Ok(None) => break,
                Err(status) => {
                    tracing::warn!(
                        "InsertRows stream aborted after {} rows: {}",
                        received,
                        status
                    );
                    return Err(status);
                }
            };
            received += 1;

            if let Err(status) = self.insert_one(datum).await {
                failed += 1;
                tracing::debug!("InsertRows row {} failed: {}", received, status.message());
                first_error.get_or_insert(status);
            }
        }

        if let Some(first) = first_error {
            tracing::warn!("InsertRows finished with {} of {} rows failed", failed, received);
            return Err(Status::new(
                first.code(),
                format!(
                    "{} of {} rows failed; first error: {}",
                    failed,
                    received,
                    first.message()
                ),
            ));
        }

        tracing::debug!("InsertRows finished: {} rows", received);
        Ok(Response::new(proto::InsertAck {
            rows_inserted: received,
            message: format!("inserted {} rows", received),
        }))
    }

    type SelectStream = ReceiverStream<Result<proto::DataPoint, Status>>;

    async fn select(
        &self,
        request: Request<proto::Filter>,
    ) -> Result<Response<Self::SelectStream>, Status> {
        let query = convert::to_query(request.into_inner(), self.precision).inspect_err(|_| {
            self.metrics.select_errors.inc(1);
        })?;

        tracing::debug!(
            "Select: metric={}, labels={}, range=[{}, {})",
            query.metric,
            query.labels.len(),
            query.start,
            query.end
        );

        let started = Instant::now();
        let points = self
            .backend
            .select(query.metric, query.labels, query.start, query.end)
            .await
            .map_err(|e| {
                self.metrics.select_errors.inc(1);
                tracing::warn!("Select failed: {}", e);
                convert::engine_status(&e)
            })?;
        self.metrics.select_latency_ms.observe_since_ms(started);

        let (tx, rx) = tokio::sync::mpsc::channel(SELECT_STREAM_BUFFER);
        let precision = self.precision;
        let metrics = self.metrics.clone();
        let guard = metrics.active_streams.enter();

        tokio::spawn(async move {
            let _guard = guard;
            let total = points.len();
            let mut sent: u64 = 0;

            for point in points {
                if tx
                    .send(Ok(convert::to_wire_point(point, precision)))
                    .await
                    .is_err()
                {
                    tracing::debug!("Select receiver went away after {} of {} points", sent, total);
                    break;
                }
                sent += 1;
            }

            metrics.points_selected.inc(sent);
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
