use anyhow::Result;
use axum::Router;
use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, EnvFilter};
use linkrec_server::{build_app, open_engine, spawn_auto_index};
use tokio::net::TcpListener;

#[derive(Parser)]
struct Args {
    /// Index database directory
    #[arg(long, default_value = "./linkrec-db")]
    db: String,
    /// Content export to index (JSON/JSONL file or directory)
    #[arg(long)]
    content: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Batch size used when auto_index is enabled
    #[arg(long, default_value_t = 25)]
    batch_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let engine = open_engine(&args.db, &args.content)?;
    if engine.settings()?.auto_index {
        tracing::info!(batch_size = args.batch_size, "auto_index enabled, indexing in background");
        spawn_auto_index(engine.clone(), args.batch_size.max(1));
    }
    let app: Router = build_app(engine);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
