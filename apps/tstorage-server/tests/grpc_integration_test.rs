//! gRPC integration tests for tstorage-server.
//!
//! Runs a real server on an ephemeral port and talks to it with the generated client.

use prost_types::Timestamp;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tonic::transport::Channel;
use tonic::Code;
use tstorage_engine::{DataPoint, Error, Label as EngineLabel, Row, TimestampPrecision};
use tstorage_server::config::ServerConfig;
use tstorage_server::server::Server;
use tstorage_transport_grpc::proto::{
    t_storage_client::TStorageClient, Filter, HelloRequest, Label, TimeSeriesDatum,
};
use tstorage_transport_grpc::{GrpcServer, StorageBackend};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init()
        .ok();
}

async fn start_server(temp_dir: &TempDir) -> (Server, TStorageClient<Channel>) {
    init_tracing();

    let config = ServerConfig {
        port: 0,
        host: "127.0.0.1".to_string(),
        data_path: temp_dir.path().join("tsdb"),
        ..ServerConfig::default()
    };

    let mut server = Server::new(config).expect("Failed to create server");
    let addr = server.start().await.expect("Failed to start server");
    let client = connect(addr).await;
    (server, client)
}

async fn connect(addr: SocketAddr) -> TStorageClient<Channel> {
    TStorageClient::connect(format!("http://{}", addr))
        .await
        .expect("Failed to connect to gRPC server")
}

fn ts(seconds: i64) -> Option<Timestamp> {
    Some(Timestamp { seconds, nanos: 0 })
}

fn label(name: &str, value: &str) -> Label {
    Label {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn datum(metric: &str, labels: Vec<Label>, value: f64, seconds: i64) -> TimeSeriesDatum {
    TimeSeriesDatum {
        labels,
        metric: metric.to_string(),
        value,
        timestamp: ts(seconds),
    }
}

fn filter(metric: &str, labels: Vec<Label>, start: i64, end: i64) -> Filter {
    Filter {
        labels,
        metric: metric.to_string(),
        start: ts(start),
        end: ts(end),
    }
}

async fn select_all(client: &mut TStorageClient<Channel>, filter: Filter) -> Vec<(f64, i64)> {
    let mut stream = client
        .select(filter)
        .await
        .expect("Select failed")
        .into_inner();

    let mut points = Vec::new();
    while let Some(point) = stream.message().await.expect("Select stream failed") {
        let seconds = point.timestamp.map(|t| t.seconds).unwrap_or_default();
        points.push((point.value, seconds));
    }
    points
}

#[tokio::test(flavor = "multi_thread")]
async fn test_insert_row_then_select() {
    let temp_dir = TempDir::new().unwrap();
    let (mut server, mut client) = start_server(&temp_dir).await;

    let ack = client
        .insert_row(datum("cpu", vec![label("host", "a")], 42.0, 1000))
        .await
        .expect("InsertRow failed")
        .into_inner();
    assert_eq!(ack.rows_inserted, 1);

    let points = select_all(&mut client, filter("cpu", vec![label("host", "a")], 900, 1100)).await;
    assert_eq!(points, vec![(42.0, 1000)]);

    drop(client);
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_say_hello() {
    let temp_dir = TempDir::new().unwrap();
    let (mut server, mut client) = start_server(&temp_dir).await;

    let reply = client
        .say_hello(HelloRequest {
            name: "Frank".to_string(),
        })
        .await
        .expect("SayHello failed")
        .into_inner();
    assert_eq!(reply.message, "Hello Frank");

    drop(client);
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_insert_rows_stream() {
    let temp_dir = TempDir::new().unwrap();
    let (mut server, mut client) = start_server(&temp_dir).await;

    let n = 500;
    let data: Vec<_> = (0..n)
        .map(|i| datum("mem", vec![label("host", "b")], i as f64, 10_000 + i))
        .collect();

    let ack = client
        .insert_rows(tokio_stream::iter(data))
        .await
        .expect("InsertRows failed")
        .into_inner();
    assert_eq!(ack.rows_inserted, n as u64);

    let points = select_all(&mut client, filter("mem", vec![label("host", "b")], 0, 20_000)).await;
    assert_eq!(points.len(), n as usize);
    assert!(points.windows(2).all(|w| w[0].1 < w[1].1));
    assert_eq!(points[0], (0.0, 10_000));

    drop(client);
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_insert_rows_empty_stream() {
    let temp_dir = TempDir::new().unwrap();
    let (mut server, mut client) = start_server(&temp_dir).await;

    let ack = client
        .insert_rows(tokio_stream::iter(Vec::<TimeSeriesDatum>::new()))
        .await
        .expect("InsertRows failed")
        .into_inner();
    assert_eq!(ack.rows_inserted, 0);

    drop(client);
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_insert_rows_reports_failed_rows() {
    let temp_dir = TempDir::new().unwrap();
    let (mut server, mut client) = start_server(&temp_dir).await;

    let data = vec![
        datum("disk", vec![], 1.0, 100),
        datum("", vec![], 2.0, 101),
        datum("disk", vec![], 3.0, 102),
    ];

    let status = client
        .insert_rows(tokio_stream::iter(data))
        .await
        .expect_err("InsertRows should fail");
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(
        status.message().contains("1 of 3 rows failed"),
        "unexpected message: {}",
        status.message()
    );

    // The rows around the bad one were still applied.
    let points = select_all(&mut client, filter("disk", vec![], 0, 1000)).await;
    assert_eq!(points, vec![(1.0, 100), (3.0, 102)]);

    drop(client);
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_select_empty_and_inverted_ranges() {
    let temp_dir = TempDir::new().unwrap();
    let (mut server, mut client) = start_server(&temp_dir).await;

    client
        .insert_row(datum("cpu", vec![], 1.0, 500))
        .await
        .expect("InsertRow failed");

    assert!(select_all(&mut client, filter("cpu", vec![], 600, 400)).await.is_empty());
    assert!(select_all(&mut client, filter("cpu", vec![], 500, 500)).await.is_empty());
    assert!(select_all(&mut client, filter("cpu", vec![], 501, 900)).await.is_empty());
    assert!(select_all(&mut client, filter("unknown", vec![], 0, 900)).await.is_empty());

    drop(client);
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_label_filtering() {
    let temp_dir = TempDir::new().unwrap();
    let (mut server, mut client) = start_server(&temp_dir).await;

    client
        .insert_row(datum("cpu", vec![label("host", "a")], 1.0, 1000))
        .await
        .unwrap();
    client
        .insert_row(datum("cpu", vec![label("host", "b")], 2.0, 1000))
        .await
        .unwrap();

    let a = select_all(&mut client, filter("cpu", vec![label("host", "a")], 0, 2000)).await;
    let b = select_all(&mut client, filter("cpu", vec![label("host", "b")], 0, 2000)).await;
    assert_eq!(a, vec![(1.0, 1000)]);
    assert_eq!(b, vec![(2.0, 1000)]);

    drop(client);
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_inserts() {
    let temp_dir = TempDir::new().unwrap();
    let (mut server, client) = start_server(&temp_dir).await;

    let m = 64;
    let mut handles = Vec::new();
    for i in 0..m {
        let mut client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .insert_row(datum("load", vec![label("host", "c")], i as f64, 5000 + i))
                .await
                .map(|r| r.into_inner().rows_inserted)
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().expect("InsertRow failed"), 1);
    }

    let mut client = client;
    let points = select_all(&mut client, filter("load", vec![label("host", "c")], 0, 10_000)).await;
    assert_eq!(points.len(), m as usize);

    drop(client);
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_timestamp_is_invalid_argument() {
    let temp_dir = TempDir::new().unwrap();
    let (mut server, mut client) = start_server(&temp_dir).await;

    let status = client
        .insert_row(TimeSeriesDatum {
            labels: vec![],
            metric: "cpu".to_string(),
            value: 1.0,
            timestamp: None,
        })
        .await
        .expect_err("InsertRow should fail");
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = client
        .select(Filter {
            labels: vec![],
            metric: "cpu".to_string(),
            start: ts(0),
            end: None,
        })
        .await
        .expect_err("Select should fail");
    assert_eq!(status.code(), Code::InvalidArgument);

    drop(client);
    server.shutdown().await.unwrap();
}

/// Backend whose inserts always time out waiting for a writer.
struct SaturatedBackend;

#[async_trait::async_trait]
impl StorageBackend for SaturatedBackend {
    async fn insert_rows(&self, _rows: Vec<Row>) -> Result<(), Error> {
        Err(Error::WriteTimeout(Duration::from_secs(30)))
    }

    async fn select(
        &self,
        _metric: String,
        _labels: Vec<EngineLabel>,
        _start: i64,
        _end: i64,
    ) -> Result<Vec<DataPoint>, Error> {
        Err(Error::Closed)
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }

    fn precision(&self) -> TimestampPrecision {
        TimestampPrecision::Seconds
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_backend_errors_map_to_status_codes() {
    init_tracing();

    let backend: Arc<dyn StorageBackend> = Arc::new(SaturatedBackend);
    let mut grpc = GrpcServer::with_backend("127.0.0.1:0".parse().unwrap(), backend);
    let addr = grpc.start().await.expect("Failed to start gRPC server");
    let mut client = connect(addr).await;

    let status = client
        .insert_row(datum("cpu", vec![], 1.0, 1))
        .await
        .expect_err("InsertRow should fail");
    assert_eq!(status.code(), Code::DeadlineExceeded);

    let status = match client.select(filter("cpu", vec![], 0, 10)).await {
        Err(status) => status,
        Ok(response) => response
            .into_inner()
            .message()
            .await
            .expect_err("Select stream should fail"),
    };
    assert_eq!(status.code(), Code::Unavailable);

    drop(client);
    grpc.shutdown().await.unwrap();
}
