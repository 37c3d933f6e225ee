//! tcp-proxy
//!
//! ```text
//!   client ──▶ listen port ──▶ sniff (optional) ──▶ relay ──▶ destination
//!                                   │
//!                                   ▼
//!                             aggregator ──▶ notificator (Slack / log)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;

use tcp_proxy::config::{self, AppConfig, ObservabilityConfig};
use tcp_proxy::lifecycle::signals::wait_for_shutdown_signal;
use tcp_proxy::notify::{notifier_from_config, ErrorDetail, Notificator};
use tcp_proxy::observability::{logging, metrics};
use tcp_proxy::proxy::ProxyOrchestrator;

const SERVICE_NAME: &str = "tcp-proxy";

#[derive(Parser)]
#[command(name = "tcp-proxy")]
#[command(about = "Transparent TCP relay with HTTP/h2c traffic notifications", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "configs/tcp-proxy.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            let _ = logging::init_logging(&ObservabilityConfig::default());
            tracing::error!(path = %cli.config.display(), error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        instances = config.proxy_list.len(),
        "tcp-proxy starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let notifier = notifier_from_config(&config)?;
    let mut orchestrator = ProxyOrchestrator::from_config(&config, Arc::clone(&notifier));

    let started_at = Utc::now();
    if let Err(e) = orchestrator.start().await {
        let finished_at = Utc::now();
        if let Err(notify_err) = notifier
            .send_task_error_message(
                SERVICE_NAME,
                started_at,
                finished_at,
                "Failed to start proxy instances",
                &[ErrorDetail::from_error(&e)],
            )
            .await
        {
            tracing::error!(error = %notify_err, "Failed to report startup failure");
        }
        return Err(e.into());
    }

    announce_started(notifier.as_ref(), &config).await;

    let signal = wait_for_shutdown_signal().await?;
    tracing::info!(signal, "Shutdown signal received");

    orchestrator.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn announce_started(notifier: &dyn Notificator, config: &AppConfig) {
    let lines: Vec<String> = config
        .proxy_list
        .iter()
        .map(|p| format!("`{}` → `{}`", p.listen_target(), p.destination()))
        .collect();

    if let Err(e) = notifier
        .send_info_message(&format!("{SERVICE_NAME} started"), &lines)
        .await
    {
        tracing::error!(error = %e, "Failed to send startup notification");
    }
}
