//! Static file server for the generated-at page
//!
//! Run with: cargo run --features cli --bin generated-at-serve -- -d www -p 8080

use anyhow::Context;
use clap::Parser;
use generated_at::serve::{self, Args, Server};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,generated_at=debug"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    let config = serve::load(&args).context("failed to load configuration")?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    info!(
        origin = %config.origin,
        port = config.port,
        max_connections = config.max_connections,
        request_timeout_ms = config.request_timeout_ms,
        "Configuration loaded"
    );

    let server = Server::bind(config).await.context("failed to start server")?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}
