use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::ServiceConfig;
use turnstile::http::{default_routes, HttpServer};
use turnstile::ratelimit::{RateLimitConfig, RateLimiter};

/// Multi-dimensional HTTP rate limiter.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Service configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Rate limit rules file, overrides `rate_limiting.rules_path`
    #[arg(short, long)]
    rules: Option<String>,

    /// Listen address, overrides `server.listen_addr`
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Turnstile Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ServiceConfig::load(args.config.as_deref())?;
    if let Some(rules) = args.rules {
        config.rate_limiting.rules_path = Some(rules);
    }
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    let rules = match &config.rate_limiting.rules_path {
        Some(path) => RateLimitConfig::from_file(path)?,
        None => {
            warn!("No rules file configured, requests will not be limited");
            RateLimitConfig::new()
        }
    };

    // Initialize the rate limiter
    let rate_limiter = Arc::new(RateLimiter::new(rules)?);
    rate_limiter.start_cleanup(
        config.rate_limiting.cleanup_interval(),
        config.rate_limiting.sweep_threshold,
    )?;
    info!("Rate limiter initialized");

    if let Some(path) = config.rate_limiting.rules_path.clone() {
        spawn_rules_reloader(Arc::clone(&rate_limiter), path);
    }

    let server = HttpServer::new(config.server.listen_addr, Arc::clone(&rate_limiter));

    // Run the server with graceful shutdown on Ctrl+C
    server
        .serve_with_shutdown(default_routes(), shutdown_signal())
        .await?;

    rate_limiter.stop();
    info!(stats = ?rate_limiter.stats(), "Turnstile Rate Limiting Service stopped");
    Ok(())
}

/// Re-read the rules file on SIGHUP.
#[cfg(unix)]
fn spawn_rules_reloader(rate_limiter: Arc<RateLimiter>, path: String) {
    use tracing::error;

    tokio::spawn(async move {
        let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                error!(error = %e, "Failed to install SIGHUP handler, rules reload disabled");
                return;
            }
        };

        while hangup.recv().await.is_some() {
            info!(path = %path, "Received SIGHUP, reloading rate limit rules");
            let result = RateLimitConfig::from_file(&path)
                .and_then(|rules| rate_limiter.update_config(rules));
            if let Err(e) = result {
                // The previously installed rules stay active
                error!(path = %path, error = %e, "Failed to reload rate limit rules");
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_rules_reloader(_rate_limiter: Arc<RateLimiter>, _path: String) {}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
