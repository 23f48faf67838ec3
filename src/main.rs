//! Local Volume Operator
//!
//! Runs the LocalStorageClass controller, the volume provisioning API, or
//! both, next to health and metrics endpoints.
//!
//! ```text
//!   LocalStorageClass ──watch──▶ controller ──▶ StorageClass
//!                                    ▲
//!   LVMVolumeGroup ────watch─────────┘
//!
//!   POST /v1/volumes ──▶ placement ──▶ LVMLogicalVolume ──poll──▶ Created
//! ```

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use local_volume_operator::{
    parse_quantity, ApiServer, ApiServerConfig, ControllerConfig, KubeCluster, Metrics,
    ProvisionerConfig, TokioClock, VolumeProvisioner,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Which parts of the operator this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Component {
    Controller,
    Provisioner,
    All,
}

/// Local Volume Operator - LVM storage classes and volume provisioning
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Components to run
    #[arg(long, env = "COMPONENT", value_enum, default_value = "all")]
    component: Component,

    /// Provisioning API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Controller requeue interval in seconds
    #[arg(long, env = "REQUEUE_INTERVAL", default_value = "10")]
    requeue_interval_secs: u64,

    /// Server-side watch timeout in seconds
    #[arg(long, env = "WATCH_TIMEOUT", default_value = "25")]
    watch_timeout_secs: u32,

    /// Logical volume status poll interval in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "500")]
    poll_interval_ms: u64,

    /// Deadline for a logical volume to converge, in seconds
    #[arg(long, env = "CONVERGENCE_TIMEOUT", default_value = "300")]
    convergence_timeout_secs: u64,

    /// Size tolerance for convergence checks
    #[arg(long, env = "RESIZE_DELTA", default_value = "32Mi")]
    resize_delta: String,
}

impl Args {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            requeue_interval: Duration::from_secs(self.requeue_interval_secs),
            watch_timeout_secs: self.watch_timeout_secs,
        }
    }

    fn provisioner_config(&self) -> anyhow::Result<ProvisionerConfig> {
        Ok(ProvisionerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            convergence_timeout: Duration::from_secs(self.convergence_timeout_secs),
            resize_delta: parse_quantity(&self.resize_delta)
                .with_context(|| format!("invalid resize delta {:?}", self.resize_delta))?,
        })
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting Local Volume Operator");
    info!("  Version: {}", local_volume_operator::VERSION);
    info!("  Component: {:?}", args.component);

    let controller_config = args.controller_config();
    let provisioner_config = args.provisioner_config()?;
    let api_addr: SocketAddr = args
        .api_addr
        .parse()
        .with_context(|| format!("invalid API address {:?}", args.api_addr))?;
    let health_addr: SocketAddr = args
        .health_addr
        .parse()
        .with_context(|| format!("invalid health address {:?}", args.health_addr))?;
    let metrics_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .with_context(|| format!("invalid metrics address {:?}", args.metrics_addr))?;

    let metrics = Metrics::new()?;

    // Start health server
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let exported = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, exported).await {
            error!("Metrics server error: {}", e);
        }
    });

    let client = kube::Client::try_default()
        .await
        .context("unable to create Kubernetes client")?;

    match args.component {
        Component::Controller => {
            local_volume_operator::controller::runner::run(client, controller_config, metrics)
                .await?;
        }
        Component::Provisioner => {
            run_provisioner(client, api_addr, provisioner_config, metrics).await?;
        }
        Component::All => {
            tokio::try_join!(
                local_volume_operator::controller::runner::run(
                    client.clone(),
                    controller_config,
                    metrics.clone(),
                ),
                run_provisioner(client, api_addr, provisioner_config, metrics),
            )?;
        }
    }

    info!("Operator shutdown complete");
    Ok(())
}

/// Serve the provisioning API until SIGINT
async fn run_provisioner(
    client: kube::Client,
    addr: SocketAddr,
    config: ProvisionerConfig,
    metrics: Arc<Metrics>,
) -> local_volume_operator::Result<()> {
    let cluster = Arc::new(KubeCluster::new(client));
    let provisioner = Arc::new(VolumeProvisioner::new(
        cluster.clone(),
        cluster,
        Arc::new(TokioClock),
        metrics,
        config,
    ));

    info!("  Poll interval: {:?}", provisioner.config().poll_interval);
    info!("  Convergence timeout: {:?}", provisioner.config().convergence_timeout);

    let server = ApiServer::new(ApiServerConfig { rest_addr: addr }, provisioner);
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    server.run().await
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("tower=warn".parse()?)
        .add_directive("axum=info".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

fn plain(status: hyper::StatusCode, body: impl Into<hyper::Body>) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: SocketAddr) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => plain(StatusCode::OK, "ok"),
                _ => plain(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .context("health server")?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok((content_type, buffer)) => {
                                let mut response = plain(StatusCode::OK, buffer);
                                if let Ok(value) = HeaderValue::from_str(&content_type) {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => plain(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                        },
                        _ => plain(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .context("metrics server")?;

    Ok(())
}
