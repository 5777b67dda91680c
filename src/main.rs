use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use modelbalancer::backends::BackendClient;
use modelbalancer::balancer::Balancer;
use modelbalancer::config::Config;
use modelbalancer::logging;
use modelbalancer::metrics;
use modelbalancer::refresh;
use modelbalancer::registry::ModelSource;
use modelbalancer::server::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "modelbalancer")]
#[command(about = "Balance inference requests across the models loaded on one LM Studio backend")]
struct Args {
    /// Configuration file path (optional; missing file means defaults)
    #[arg(long, default_value = "modelbalancer.toml")]
    config: String,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Backend base URL, e.g. http://localhost:1234
    #[arg(long)]
    backend_url: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// JSON Lines log file for routing decisions
    #[arg(long)]
    log_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // defaults < file < environment < command line
    let (mut config, file_note) = match Config::load(&args.config) {
        Ok(config) => (config, None),
        Err(e) => (
            Config::default(),
            Some(format!(
                "Could not load config file '{}': {}. Using defaults.",
                args.config, e
            )),
        ),
    };
    let env_warnings = config.apply_process_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(url) = args.backend_url {
        config.backend_url = url;
    }
    if args.verbose {
        config.log_level = "debug".to_string();
    }
    if args.log_file.is_some() {
        config.log_file = args.log_file;
    }

    logging::init_tracing(&config.log_level);
    if let Some(note) = file_note {
        info!("{}", note);
    }
    for warning in &env_warnings {
        warn!("{}", warning);
    }
    config.validate()?;

    let metrics_handle = match metrics::init() {
        Ok(handle) => {
            info!("Prometheus metrics initialized at /metrics endpoint");
            Some(handle)
        }
        Err(e) => {
            info!("Failed to initialize Prometheus metrics: {}", e);
            None
        }
    };

    let balancer = Arc::new(Balancer::new());
    let backend = BackendClient::new(&config)?;
    let source: Arc<dyn ModelSource> = Arc::new(backend.clone());

    // The first listing completes before any request is accepted
    let initial = balancer.refresh(source.as_ref()).await;
    if initial.loaded == 0 {
        warn!("No loaded models found; requests naming a model will be rejected until one is loaded");
    }

    let refresher = refresh::spawn_model_refresher(
        Arc::clone(&balancer),
        source,
        config.refresh_interval(),
    );

    if let Some(path) = &config.log_file {
        info!("Routing log enabled: {}", path);
    }

    let port = config.port;
    let backend_url = config.backend_base().to_string();
    let state = AppState::new(config, balancer, backend)?.with_metrics(metrics_handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Load balancer server running on port {}", port);
    info!("Proxying requests to {}", backend_url);

    let result = server::serve(listener, state, shutdown_signal()).await;
    refresher.abort();
    if let Err(e) = &result {
        error!("Server error: {}", e);
    }
    info!("Shut down");
    result?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
