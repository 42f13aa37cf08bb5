use anyhow::{Context, Result, bail};
use axum::{Router, routing::get};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use terminal_bridge::{ClientCache, SessionOrchestrator};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod cluster;
mod config;
mod exec;
mod handlers;
mod metrics;
mod websocket_session;

use crate::cluster::KubeClientFactory;
use crate::config::{CliOverrides, FileConfig, RelayConfig, load_config};
use crate::exec::KubeExecBackend;
use crate::metrics::RelayMetrics;

/// How long cancelled sessions get to send their close frame.
const FORCED_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) type Relay = SessionOrchestrator<KubeClientFactory, KubeExecBackend>;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "shell-relay")]
#[command(about = "Relay browser terminal sessions to shells in Kubernetes containers")]
struct Cli {
    /// Port to serve terminal sessions on
    #[arg(long)]
    insecure_port: Option<u16>,

    /// Address to bind to
    #[arg(long)]
    insecure_bind_address: Option<String>,

    /// Path to a kubeconfig file (skips every other config source)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Kubernetes API server URL, overriding the kubeconfig
    #[arg(long)]
    master: Option<String>,

    /// TOML configuration file
    #[arg(long, env = "SHELL_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub relay: Arc<Relay>,
    /// Relay metrics for observability
    pub metrics: Arc<RelayMetrics>,
    /// In-flight sessions; closed when shutdown begins
    pub sessions: TaskTracker,
    /// Cancelled once the shutdown grace period runs out
    pub session_shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: &RelayConfig, factory: KubeClientFactory) -> Self {
        let cache = Arc::new(ClientCache::new(factory));
        Self {
            relay: Arc::new(SessionOrchestrator::new(
                cache,
                KubeExecBackend,
                config.session.clone(),
            )),
            metrics: Arc::new(RelayMetrics::new()),
            sessions: TaskTracker::new(),
            session_shutdown: CancellationToken::new(),
        }
    }
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/terminal", get(handlers::terminal_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // kube's TLS stack needs a process-wide rustls provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        bail!("Failed to install TLS crypto provider: {:?}", e);
    }

    // Setup logging
    let default_directive = if cli.debug {
        "shell_relay=debug,terminal_bridge=debug,tower_http=debug,info"
    } else {
        "shell_relay=info,terminal_bridge=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config = Arc::new(resolve_config(cli)?);
    run_server(config).await
}

fn resolve_config(cli: Cli) -> Result<RelayConfig> {
    if let Some(path) = &cli.config {
        if !path.is_file() {
            bail!("Config file not found: {}", path.display());
        }
    }

    let mut fc: FileConfig = load_config(cli.config.as_deref())
        .extract()
        .context("Failed to load configuration")?;
    CliOverrides {
        bind_address: cli.insecure_bind_address,
        port: cli.insecure_port,
        kubeconfig: cli.kubeconfig,
        master: cli.master,
    }
    .apply(&mut fc);

    RelayConfig::from_file(&fc)
}

async fn run_server(config: Arc<RelayConfig>) -> Result<()> {
    info!("Starting shell relay");

    let state = AppState::new(&config, KubeClientFactory::new(config.kube.clone()));
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Shell relay listening on http://{}", actual_addr);
    info!("Endpoints:");
    info!("  GET /api/terminal  - WebSocket terminal session");
    info!("  GET /health        - Relay health");
    info!("  GET /health/live   - Liveness probe");
    info!("  GET /metrics       - Session metrics");

    let stop = CancellationToken::new();
    tokio::spawn({
        let stop = stop.clone();
        async move {
            shutdown_signal().await;
            stop.cancel();
        }
    });

    // Upgraded sessions outlive their HTTP connection, so they drain
    // alongside the listener rather than after it.
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(stop.clone().cancelled_owned())
        .into_future();
    let drain = async {
        stop.cancelled().await;
        drain_sessions(&state, config.shutdown_grace).await;
    };
    let (server_result, ()) = tokio::join!(server, drain);

    info!("Shutdown complete");
    server_result.context("Server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Received shutdown signal, draining sessions...");
}

/// Stop admitting sessions, give the running ones `grace` to finish, then
/// close the rest.
async fn drain_sessions(state: &AppState, grace: Duration) {
    state.sessions.close();
    let active = state.sessions.len();
    if active == 0 {
        return;
    }

    info!("Waiting up to {:?} for {} session(s) to finish", grace, active);
    if tokio::time::timeout(grace, state.sessions.wait()).await.is_ok() {
        return;
    }

    warn!(
        remaining = state.sessions.len(),
        "Grace period elapsed, closing remaining sessions"
    );
    state.session_shutdown.cancel();
    if tokio::time::timeout(FORCED_CLOSE_TIMEOUT, state.sessions.wait())
        .await
        .is_err()
    {
        warn!(
            remaining = state.sessions.len(),
            "Sessions did not close in time"
        );
    }
}
