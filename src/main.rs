use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use ttls::cli::Cli;
use ttls::config::ConfigValidator;
use ttls::tls::PemCredentials;
use ttls::TunnelService;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG 优先，否则按 -v 次数选择级别
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("ttls v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.app_config()?;
    config
        .tunnel
        .validate()
        .context("Configuration validation failed")?;
    ConfigValidator::validate_tls_files(&config.tunnel, &config.tls)?;

    let credentials = PemCredentials::new(&config.tls);
    let endpoint = config.tunnel.bind_endpoint();
    let service = TunnelService::bind(config.tunnel, &credentials)
        .await
        .with_context(|| format!("Failed to start tunnel on {}", endpoint))?;
    let service = Arc::new(service);

    let runner = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.run().await })
    };
    tokio::pin!(runner);

    tokio::select! {
        result = &mut runner => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Tunnel stopped with error: {}", e),
                Err(e) => error!("Tunnel task failed: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    service.stop().await;
    info!("Shutdown complete");

    Ok(())
}
