use anyhow::{Context, Result};
use docker_executor::config::{DispatchConfig, LogFormat};
use docker_executor::engine::{bollard_client::BollardEngineClient, EngineClient};
use docker_executor::store::{InMemorySharedStore, SharedStore};
use docker_executor::{admin, build_executor};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _basic_tracing = init_tracing_basic();

    info!("Starting docker-executor dispatch subsystem v{}", env!("CARGO_PKG_VERSION"));

    let config = DispatchConfig::load().context("failed to load configuration")?;
    config.validate().context("configuration validation failed")?;

    drop(_basic_tracing);
    init_tracing_from_config(&config);

    info!(farms = config.farms.len(), "configuration loaded");

    let store: Arc<dyn SharedStore> = InMemorySharedStore::shared();

    let executor = Arc::new(
        build_executor(&config, store.clone(), |host, port| {
            Ok(Arc::new(BollardEngineClient::connect(host, port)?) as Arc<dyn EngineClient>)
        })
        .context("failed to build executor")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reap_executor = executor.clone();
    let reap_interval = Duration::from_secs(config.reap_interval_secs);
    tokio::spawn(reap_executor.run_reap_loop(reap_interval, shutdown_rx));

    let admin_state = admin::AdminState {
        executor: executor.clone(),
    };

    let app = admin::router(admin_state).layer(
        ServiceBuilder::new().layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        )),
    );

    let addr: SocketAddr = config.server.bind_address.parse().context("invalid bind_address")?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind admin server")?;

    info!("admin surface listening on http://{addr}");
    info!("  - blacklist:  POST|PUT|DELETE /docker-executor/blacklist");
    info!("  - health:     GET /health");
    info!("  - readiness:  GET /ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("admin server error")?;

    let _ = shutdown_tx.send(true);
    info!("docker-executor shut down gracefully");
    Ok(())
}

fn init_tracing_basic() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,docker_executor=debug"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_default(subscriber)
}

fn init_tracing_from_config(config: &DispatchConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            let layer = fmt::layer().json().with_target(true).with_thread_ids(true);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
