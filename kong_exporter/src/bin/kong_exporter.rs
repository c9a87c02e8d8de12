//! Binary entry point for the kong-exporter.
//!
//! Parses flags, probes the upstream status endpoint and serves Prometheus
//! metrics over HTTP until interrupted.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, header};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use kong_exporter::client::StatusClient;
use kong_exporter::collector::KongCollector;
use kong_exporter::config::Config;
use kong_exporter::retry;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::runtime::Builder;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

/// Fixed delay between startup construction attempts.
const STARTUP_RETRY_DELAY: Duration = Duration::from_secs(7);

const LANDING_PAGE: &[u8] = b"<html>\
<head><title>Kong Exporter</title></head>\
<body>\
<h1>Kong Exporter</h1>\
<p><a href='/metrics'>Metrics</a></p>\
</body>\
</html>";

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("could not create Kong client: {0}")]
    Client(#[from] kong_exporter::client::Error),
    #[error("could not build HTTP client: {0}")]
    Config(#[from] kong_exporter::config::Error),
    #[error("could not build collector: {0}")]
    Collector(#[from] kong_exporter::collector::Error),
    #[error("could not register collector: {0}")]
    Registry(#[from] prometheus::Error),
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Args {
    /// address to listen on for web interface and telemetry
    #[clap(long, default_value = "0.0.0.0:9001")]
    listen_addr: SocketAddr,
    /// path under which to expose metrics
    #[clap(long, default_value = "/metrics")]
    telemetry_path: String,
    /// URI for scraping Kong status
    #[clap(long, default_value = "http://127.0.0.1:8001/status")]
    scrape_uri: String,
    /// prefix applied to every exposed metric name
    #[clap(long, default_value = "kong")]
    namespace: String,
    /// upper bound, in seconds, on one status fetch
    #[clap(long, default_value_t = 7)]
    scrape_timeout_seconds: u64,
    /// skip TLS certificate verification for the status endpoint
    #[clap(long)]
    insecure_skip_tls_verify: bool,
    /// additional startup fetch attempts before giving up
    #[clap(long, default_value_t = 0)]
    startup_retries: u32,
}

async fn handle_request(
    registry: Registry,
    telemetry_path: &str,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, http::Error> {
    if req.uri().path() != telemetry_path {
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html")
            .body(Full::new(Bytes::from_static(LANDING_PAGE)));
    }

    // Gathering drives the collector, which performs blocking network I/O
    // against the status endpoint.
    let encoded = tokio::task::spawn_blocking(move || {
        let families = registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map(|()| (buffer, encoder.format_type().to_string()))
    })
    .await;

    match encoded {
        Ok(Ok((buffer, content_type))) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .body(Full::new(Bytes::from(buffer))),
        Ok(Err(err)) => {
            error!("failed to encode metrics: {err}");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::new()))
        }
        Err(err) => {
            error!("metrics gather task failed: {err}");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::new()))
        }
    }
}

async fn serve<F>(
    listener: TcpListener,
    telemetry_path: String,
    registry: Registry,
    shutdown: F,
) -> Result<(), Error>
where
    F: Future<Output = ()>,
{
    let telemetry_path: Arc<str> = Arc::from(telemetry_path);
    let mut connections: JoinSet<()> = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            conn = listener.accept() => {
                let (stream, _addr) = match conn {
                    Ok(conn) => conn,
                    Err(err) => {
                        // Accept failures are transient; keep serving.
                        warn!("failed to accept connection: {err}");
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let registry = registry.clone();
                let telemetry_path = Arc::clone(&telemetry_path);

                connections.spawn(async move {
                    let service = service_fn(move |req| {
                        let registry = registry.clone();
                        let telemetry_path = Arc::clone(&telemetry_path);
                        async move { handle_request(registry, &telemetry_path, req).await }
                    });

                    if let Err(err) = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection: {err:?}");
                    }
                });
            }
            Some(_res) = connections.join_next(), if !connections.is_empty() => {}
            () = &mut shutdown => {
                info!("shutdown signal received");
                // Let in-flight responses finish before returning.
                while connections.join_next().await.is_some() {}
                return Ok(());
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to install shutdown signal handler: {err}");
        // No handler means no signal will ever arrive; park rather than
        // shut down a healthy exporter.
        std::future::pending::<()>().await;
    }
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let args = Args::parse();
    let version = env!("CARGO_PKG_VERSION");
    info!("Starting kong-exporter {version}.");

    let config = Config {
        status_uri: args.scrape_uri,
        namespace: args.namespace,
        scrape_timeout_seconds: args.scrape_timeout_seconds,
        verify_tls: !args.insecure_skip_tls_verify,
    };

    let http_client = config.build_http_client()?;
    let client = retry::with_retries(args.startup_retries, STARTUP_RETRY_DELAY, || {
        StatusClient::connect(http_client.clone(), config.status_uri.clone())
    })
    .map_err(|err| {
        error!("could not create Kong client: {err}");
        err
    })?;

    let registry = Registry::new();
    registry.register(Box::new(KongCollector::new(client, &config.namespace)?))?;

    let runtime = Builder::new_multi_thread().enable_io().enable_time().build()?;
    runtime.block_on(async {
        let listener = TcpListener::bind(args.listen_addr).await?;
        info!(
            "Serving metrics on http://{listen_addr}{telemetry_path}",
            listen_addr = args.listen_addr,
            telemetry_path = args.telemetry_path,
        );
        serve(listener, args.telemetry_path, registry, shutdown_signal()).await
    })
}
