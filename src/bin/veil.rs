//! Veil tunnel daemon
//!
//! One entry point for both halves of the tunnel: `server_mode` in the
//! configuration selects whether this process runs the browser-facing
//! local endpoint, the outbound remote endpoint, or both.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use veil_tunnel::cipher;
use veil_tunnel::config::{Config, LoggingConfig};
use veil_tunnel::server::{LocalEndpoint, RemoteEndpoint, Shutdown};

/// Veil Tunnel - obfuscated two-hop TCP proxy
#[derive(Parser, Debug)]
#[command(name = "veil")]
#[command(about = "Veil Tunnel - obfuscated two-hop TCP proxy")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(default_value = "config.json")]
    config: String,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config).context("Failed to load configuration")?;
    init_logging(&config.logging, args.log_level.as_deref())?;

    info!("veil tunnel v{}", veil_tunnel::VERSION);
    info!("server mode: {:?}", config.server_mode);

    let cipher = cipher::load_or_fallback(
        &config.encryption.library_path,
        &config.encryption.key,
        config.tunnel.xor_key,
    );
    info!("cipher: {} v{}", cipher.name(), cipher.version());

    let config = Arc::new(config);
    let shutdown = Shutdown::new();
    spawn_signal_task(shutdown.clone());

    // Bind before spawning so a bad address is a startup error, not a
    // background failure.
    let mut endpoints = Vec::new();

    if config.server_mode.runs_remote() {
        let remote = RemoteEndpoint::bind(Arc::clone(&config), cipher.clone(), shutdown.signal())
            .await
            .context("Failed to start remote endpoint")?;
        endpoints.push(tokio::spawn(remote.run()));
    }

    if config.server_mode.runs_local() {
        let local = LocalEndpoint::bind(Arc::clone(&config), cipher.clone(), shutdown.signal())
            .await
            .context("Failed to start local endpoint")?;
        endpoints.push(tokio::spawn(local.run()));
    }

    for endpoint in endpoints {
        match endpoint.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("endpoint error: {}", e),
            Err(e) => error!("endpoint task panicked: {}", e),
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Flip the shutdown flag on SIGINT or SIGTERM.
fn spawn_signal_task(shutdown: Shutdown) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    error!("failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    shutdown.trigger();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        info!("shutdown signal received");
        shutdown.trigger();
    });
}

/// Initialize the subscriber from config, honoring a CLI override.
fn init_logging(config: &LoggingConfig, override_level: Option<&str>) -> Result<()> {
    let level = override_level.unwrap_or(&config.level);
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &config.file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to open log file: {}", path))?;
            let builder = builder.with_writer(Arc::new(file)).with_ansi(false);
            match config.format.as_str() {
                "json" => builder.json().init(),
                "compact" => builder.compact().init(),
                _ => builder.init(),
            }
        }
        None => match config.format.as_str() {
            "json" => builder.json().init(),
            "compact" => builder.compact().init(),
            _ => builder.init(),
        },
    }

    Ok(())
}
