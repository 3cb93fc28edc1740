//! sprintcache service
//!
//! Runs the two-tier cache as a sidecar process: connects the shared tier,
//! runs the optimizer loop, and serves health and metrics endpoints.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        sprintcache                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Optimizer   │───▶│ CacheManager │───▶│ Shared tier  │       │
//! │  │    loop      │    │ (local tier) │    │   (Redis)    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │          /healthz /readyz            /metrics                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sprintcache::cache::{CacheConfig, CacheManager, LocalTierConfig, SharedTierConfig};
use sprintcache::error::{CacheError, Result};
use sprintcache::optimizer::{CacheOptimizer, OptimizerConfig};
use sprintcache::telemetry::{CacheTelemetry, REGISTRY};

// =============================================================================
// CLI Arguments
// =============================================================================

/// sprintcache - two-tier cache for sprint and report data
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Shared tier URL (redis://host:port/db); unset runs an in-process shared tier
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Maximum entries held by the local tier
    #[arg(long, env = "L1_MAX_ENTRIES", default_value = "10000")]
    l1_max_entries: usize,

    /// TTL for writes that do not name one, in seconds
    #[arg(long, env = "DEFAULT_TTL_SECONDS", default_value = "3600")]
    default_ttl_seconds: u64,

    /// Keys requested per SCAN page during pattern deletes
    #[arg(long, env = "SCAN_PAGE_SIZE", default_value = "100")]
    scan_page_size: usize,

    /// Optimizer period in seconds (0 disables the optimizer)
    #[arg(long, env = "OPTIMIZE_INTERVAL_SECONDS", default_value = "300")]
    optimize_interval_seconds: u64,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn cache_config(&self) -> Result<CacheConfig> {
        if self.l1_max_entries == 0 {
            return Err(CacheError::Config("l1-max-entries must be positive".into()));
        }

        Ok(CacheConfig {
            local: LocalTierConfig {
                max_entries: self.l1_max_entries,
                ..Default::default()
            },
            shared: SharedTierConfig {
                redis_url: self.redis_url.clone(),
                scan_page_size: self.scan_page_size,
                ..Default::default()
            },
            default_ttl: Duration::from_secs(self.default_ttl_seconds),
            ..Default::default()
        })
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting sprintcache");
    info!("  Local tier max entries: {}", args.l1_max_entries);
    info!("  Default TTL: {}s", args.default_ttl_seconds);
    info!(
        "  Shared tier: {}",
        if args.redis_url.is_some() { "redis" } else { "in-process" }
    );

    let cache = Arc::new(CacheManager::connect(args.cache_config()?).await?);
    let telemetry = CacheTelemetry::new(&REGISTRY)?;
    let shutdown = CancellationToken::new();

    // Optimizer loop
    if args.optimize_interval_seconds > 0 {
        let optimizer = Arc::new(CacheOptimizer::new(
            cache.clone(),
            OptimizerConfig {
                interval: Duration::from_secs(args.optimize_interval_seconds),
                ..Default::default()
            },
        ));
        tokio::spawn(optimizer.run(shutdown.clone()));
    } else {
        info!("Optimizer disabled");
    }

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_cache = cache.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_cache).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_cache = cache.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_cache, telemetry).await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    cache.shutdown();

    info!("sprintcache shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "redis=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

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
}

// =============================================================================
// HTTP helpers
// =============================================================================

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn not_found() -> Response<Full<Bytes>> {
    respond(StatusCode::NOT_FOUND, "text/plain", "not found")
}

async fn bind(addr: &str, name: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| CacheError::Config(format!("Invalid {name} address: {e}")))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| CacheError::Internal(format!("Failed to bind {name}: {e}")))?;

    info!("{} listening on {}", name, addr);
    Ok(listener)
}

// =============================================================================
// Health Server
// =============================================================================

async fn health_handler(
    req: Request<Incoming>,
    cache: Arc<CacheManager>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/healthz" | "/livez" => respond(StatusCode::OK, "text/plain", "ok"),
        "/readyz" => {
            let report = cache.health_check().await;
            let status = if report.status.is_operational() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            match serde_json::to_vec(&report) {
                Ok(body) => respond(status, "application/json", body),
                Err(e) => respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    format!("failed to encode health report: {e}"),
                ),
            }
        }
        _ => not_found(),
    };
    Ok(response)
}

async fn run_health_server(addr: &str, cache: Arc<CacheManager>) -> Result<()> {
    let listener = bind(addr, "Health server").await?;

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| CacheError::Internal(format!("Health server accept error: {e}")))?;

        let io = TokioIo::new(stream);
        let cache = cache.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| health_handler(req, cache.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn metrics_handler(
    req: Request<Incoming>,
    cache: Arc<CacheManager>,
    telemetry: CacheTelemetry,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => {
            telemetry.observe(&cache.stats());
            match telemetry.encode() {
                Ok(body) => respond(StatusCode::OK, telemetry.content_type(), body),
                Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string()),
            }
        }
        "/stats" => match serde_json::to_vec(&cache.info().await) {
            Ok(body) => respond(StatusCode::OK, "application/json", body),
            Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string()),
        },
        _ => not_found(),
    };
    Ok(response)
}

async fn run_metrics_server(addr: &str, cache: Arc<CacheManager>, telemetry: CacheTelemetry) -> Result<()> {
    let listener = bind(addr, "Metrics server").await?;

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| CacheError::Internal(format!("Metrics server accept error: {e}")))?;

        let io = TokioIo::new(stream);
        let cache = cache.clone();
        let telemetry = telemetry.clone();

        tokio::spawn(async move {
            let service =
                service_fn(move |req| metrics_handler(req, cache.clone(), telemetry.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
