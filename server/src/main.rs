use anyhow::Result;
use axum::Router;
use bookgrid_core::config::Config;
use clap::Parser;
use server::build_app;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Model artifact directory (defaults to BOOKGRID_MODEL_DIR)
    #[arg(long)]
    models: Option<PathBuf>,
    /// Posting store directory (defaults to BOOKGRID_STORE_DIR)
    #[arg(long)]
    store: Option<PathBuf>,
    /// Default minimum number of similar documents per query
    #[arg(long)]
    min_count: Option<usize>,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(m) = args.models {
        config.model_dir = m;
    }
    if let Some(s) = args.store {
        config.store_dir = s;
    }
    if let Some(n) = args.min_count {
        config.min_count = n;
    }
    let app: Router = build_app(config)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
