use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tstorage_engine::TimestampPrecision;
use tstorage_server::client::{consecutive_timestamps, labels_or_default, parse_label, Client};
use tstorage_server::config::ServerConfig;
use tstorage_server::server::{shutdown_signal, Server};

/// Time-series data storage over gRPC
#[derive(Parser, Debug)]
#[command(name = "tstorage-server", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gRPC server
    Serve(ServeArgs),

    /// Send a hello message to check the server is running
    Hello {
        #[command(flatten)]
        conn: ConnArgs,

        /// The name to send the server
        #[arg(short, long, default_value = "Anonymous")]
        name: String,
    },

    /// Insert a single datum
    InsertRow {
        #[command(flatten)]
        conn: ConnArgs,

        #[command(flatten)]
        datum: DatumArgs,
    },

    /// Insert data using the streaming RPC
    InsertRows {
        #[command(flatten)]
        conn: ConnArgs,

        #[command(flatten)]
        datum: DatumArgs,

        /// Number of rows to send, with consecutive timestamps
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },

    /// List the data points of a series in [start, end)
    Select {
        #[command(flatten)]
        conn: ConnArgs,

        /// The metric to filter by
        #[arg(short, long)]
        metric: String,

        /// Series labels as name=value (repeatable)
        #[arg(short, long = "label")]
        labels: Vec<String>,

        /// Start of the range (inclusive)
        #[arg(short, long, allow_hyphen_values = true)]
        start: i64,

        /// End of the range (exclusive)
        #[arg(short, long, allow_hyphen_values = true)]
        end: i64,
    },

    /// Print the version number
    Version,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// YAML configuration file; when given, the flags below are ignored
    #[arg(short, long, env = "TSTORAGE_CONFIG")]
    config: Option<PathBuf>,

    /// The port to run this server on
    #[arg(short, long, env = "TSTORAGE_PORT", default_value_t = 50051)]
    port: u16,

    /// The interface to listen on
    #[arg(long, env = "TSTORAGE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// The location to save the database files to
    #[arg(short, long, env = "TSTORAGE_DATA_PATH", default_value = "./tsdb")]
    data_path: PathBuf,

    /// The precision of timestamps: ns, us, ms or s
    #[arg(short, long, env = "TSTORAGE_TIMESTAMP_PRECISION", default_value = "s")]
    timestamp_precision: String,

    /// The timestamp range, in hours, covered by one partition
    #[arg(short = 'b', long, env = "TSTORAGE_PARTITION_DURATION_HOURS", default_value_t = 1)]
    partition_duration_hours: u64,

    /// Seconds an insert may wait for a free writer
    #[arg(short, long, env = "TSTORAGE_WRITE_TIMEOUT_SECS", default_value_t = 30)]
    write_timeout_secs: u64,

    /// Optional address for the /health and /metrics endpoints
    #[arg(long, env = "TSTORAGE_HTTP_ADDR")]
    http_addr: Option<String>,
}

impl ServeArgs {
    fn into_config(self) -> Result<ServerConfig> {
        if let Some(path) = self.config {
            tracing::info!("Loading configuration from: {}", path.display());
            let path = path.to_string_lossy();
            return ServerConfig::load_from_file(&path)
                .with_context(|| format!("failed to load {}", path));
        }

        Ok(ServerConfig {
            port: self.port,
            host: self.host,
            data_path: self.data_path,
            timestamp_precision: self.timestamp_precision,
            partition_duration_hours: self.partition_duration_hours,
            write_timeout_secs: self.write_timeout_secs,
            http_addr: self.http_addr,
        })
    }
}

#[derive(Args, Debug)]
struct ConnArgs {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// The port of our server
    #[arg(short, long, default_value_t = 50051)]
    port: u16,

    /// Units of the timestamps given on the command line
    #[arg(long, default_value = "s")]
    precision: String,

    /// Per-call timeout in seconds
    #[arg(long, default_value_t = 1)]
    timeout_secs: u64,
}

impl ConnArgs {
    async fn connect(&self) -> Result<Client> {
        let precision: TimestampPrecision = self.precision.parse()?;
        Client::connect(
            &format!("{}:{}", self.host, self.port),
            precision,
            Duration::from_secs(self.timeout_secs),
        )
        .await
    }
}

#[derive(Args, Debug)]
struct DatumArgs {
    /// The metric to attach to the datum
    #[arg(short, long)]
    metric: String,

    /// The value to attach to the datum
    #[arg(short, long, allow_hyphen_values = true)]
    value: f64,

    /// The timestamp to attach to the datum
    #[arg(short, long, allow_hyphen_values = true)]
    timestamp: i64,

    /// Labels as name=value (repeatable); defaults to Source=Command
    #[arg(short, long = "label")]
    labels: Vec<String>,
}

fn parse_labels(labels: &[String]) -> Result<Vec<tstorage_transport_grpc::proto::Label>> {
    let labels = labels
        .iter()
        .map(|s| parse_label(s))
        .collect::<Result<Vec<_>>>()?;
    Ok(labels_or_default(labels))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            let config = args.into_config()?;
            let server = Server::new(config)?;
            server.run_until(shutdown_signal()).await?;
            tracing::info!("Shutdown complete");
        }
        Command::Hello { conn, name } => {
            let mut client = conn.connect().await?;
            let message = client.hello(&name).await?;
            tracing::info!("Server Response: {}", message);
        }
        Command::InsertRow { conn, datum } => {
            let mut client = conn.connect().await?;
            let labels = parse_labels(&datum.labels)?;
            let row = client.datum(&datum.metric, labels, datum.value, datum.timestamp);
            client.insert_row(row).await?;
            tracing::info!("Successfully inserted");
        }
        Command::InsertRows { conn, datum, count } => {
            let mut client = conn.connect().await?;
            let labels = parse_labels(&datum.labels)?;
            let rows = consecutive_timestamps(datum.timestamp, count)?
                .into_iter()
                .map(|timestamp| client.datum(&datum.metric, labels.clone(), datum.value, timestamp))
                .collect();
            let ack = client.insert_rows(rows).await?;
            tracing::info!(
                "Server Response: rows_inserted={} {}",
                ack.rows_inserted,
                ack.message
            );
        }
        Command::Select {
            conn,
            metric,
            labels,
            start,
            end,
        } => {
            let mut client = conn.connect().await?;
            let labels = parse_labels(&labels)?;
            let points = client.select(&metric, labels, start, end).await?;
            for point in &points {
                println!("{}\t{}", point.timestamp, point.value);
            }
            tracing::info!("Selected {} data points", points.len());
        }
        Command::Version => {
            println!("tstorage-server v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
