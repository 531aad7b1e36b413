//! fileflix server binary.
//!
//! Loads `fileflix.toml` (or defaults), binds the listener, and serves until
//! the process is interrupted or the inactivity monitor fires.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fileflix::server::{Config, Server};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,fileflix=debug")),
        )
        .init();

    let config = Config::load_or_default("fileflix.toml")?;
    info!(
        port = config.port,
        upload_dir = %config.upload_dir.display(),
        database = %config.database_path.display(),
        "starting fileflix server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let server = Server::bind(config).await?;
    let ctx = server.context();

    tokio::select! {
        res = server.run() => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, initiating graceful shutdown");
            ctx.activity.note("initiating graceful shutdown");
            ctx.shutdown_all().await;
            ctx.activity.note("server shutdown complete");
        }
    }

    Ok(())
}
