use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use healthproxy_select::{config::Config, load_config, Engine};
use schemars::schema_for;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "selectord",
    version,
    about = "Standalone driver for the blockchain-aware upstream selection engine"
)]
struct Cli {
    /// Path to config file (json|yaml). Falls back to $CONFIG_PATH or ./config/config.json
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Print JSON schema for the config and exit
    #[arg(long)]
    print_schema: bool,
    /// Bind address for the /health introspection endpoint. Unset disables it.
    #[arg(long, env = "SELECTOR_HTTP_ADDR")]
    http_addr: Option<SocketAddr>,
}

fn init_logging(cfg: &Config) {
    let env_filter = if let Some(level) = &cfg.monitoring.log_level {
        EnvFilter::new(level)
    } else if let Ok(level) = std::env::var("RUST_LOG") {
        EnvFilter::new(level)
    } else {
        EnvFilter::new("info")
    };
    let subscriber = tracing_subscriber::fmt().with_env_filter(env_filter).finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set global subscriber");
}

async fn health_handler(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    let snapshot = engine.health_snapshot();
    let status = if snapshot.healthy_enough(engine.config().failure_handling.min_healthy_nodes) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_schema {
        let schema = schema_for!(Config);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let config_path = cli
        .config
        .or_else(|| std::env::var_os("CONFIG_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./config/config.json"));

    let cfg: Config = load_config(&config_path)?;
    init_logging(&cfg);
    info!(?config_path, "loaded configuration");

    let mut engine = Engine::provision(cfg)?;
    engine.validate()?;
    let engine = Arc::new(engine);

    if let Some(addr) = cli.http_addr {
        let path = engine.config().monitoring.health_endpoint_path.clone();
        let app = Router::new().route(&path, get(health_handler)).with_state(Arc::clone(&engine));
        info!(%addr, path = %path, "serving health introspection endpoint");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tokio::select! {
            res = axum::serve(listener, app) => {
                if let Err(e) = res {
                    tracing::error!(error = %e, "introspection server exited");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
            }
        }
    } else {
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
    }

    Ok(())
}
