//! Bridge Relayer - bidirectional deposit relay between two EVM chains
//!
//! Watches the bridge contract on each chain for `Deposit` events and mirrors
//! every deposit addressed to the other chain as a `receiveFromOtherChain`
//! call, at most once per deposit nonce.

use anyhow::{anyhow, Context, Result};
use ethers::signers::Signer;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

mod abi;
mod chain;
mod config;
mod error;
mod events;
mod metrics;
mod relay;
mod state;
#[cfg(test)]
mod test_utils;
mod tx;

use abi::BridgeAbi;
use chain::{ChainProvider, LedgerClient};
use config::{ChainConfig, RelayerConfig, Settings};
use metrics::MetricsServer;
use relay::{Endpoint, RelayDirection};
use tx::TransactionRelayer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Bridge Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Variables from .env fill in whatever the environment leaves unset
    match config::load_env_file(Path::new(".env")) {
        Ok(true) => info!("Loaded environment from .env"),
        Ok(false) => {}
        Err(e) => warn!("Ignoring .env: {:#}", e),
    }

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} and {}",
        settings.chains.a.name, settings.chains.b.name
    );

    let abi = Arc::new(
        BridgeAbi::load(&settings.relayer.abi_path).context("Failed to load bridge ABI")?,
    );

    let private_key = settings.wallet.private_key()?;
    let wallet = TransactionRelayer::load_wallet(&private_key)?;
    info!("Relaying from account {:?}", wallet.address());

    // Connect both chains before relaying in either direction
    let a = endpoint(&settings.chains.a, &settings.relayer).await?;
    let b = endpoint(&settings.chains.b, &settings.relayer).await?;

    let a_to_b = RelayDirection::connect(
        a.clone(),
        b.clone(),
        abi.clone(),
        wallet.clone(),
        &settings.relayer,
    )
    .await?;
    let b_to_a = RelayDirection::connect(b, a, abi, wallet, &settings.relayer).await?;

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start both relay directions
    let mut directions = JoinSet::new();
    for direction in [a_to_b, b_to_a] {
        let span = info_span!("relay", direction = %direction.label());
        let label = direction.label().to_string();
        directions.spawn(async move { (label, direction.run().await) }.instrument(span));
    }

    info!("Bridge Relayer is running");

    // A direction only returns once its subscription is beyond recovery
    let result = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping...");
            Ok(())
        }
        Some(joined) = directions.join_next() => match joined {
            Ok((label, Ok(()))) => Err(anyhow!("Relay {} stopped unexpectedly", label)),
            Ok((label, Err(e))) => {
                error!("Relay {} failed: {}", label, e);
                Err(anyhow!("Relay {} failed: {}", label, e))
            }
            Err(e) => Err(anyhow!("Relay task panicked: {}", e)),
        },
    };

    // Abort background tasks
    directions.abort_all();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Bridge Relayer stopped");
    result
}

async fn endpoint(chain: &ChainConfig, relayer: &RelayerConfig) -> Result<Endpoint> {
    let bridge = chain.bridge_address()?;
    let provider = ChainProvider::connect(chain, relayer).await?;
    let name = provider.name().to_string();
    let client: Arc<dyn LedgerClient> = Arc::new(provider);
    Ok(Endpoint::new(name, client, bridge))
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,bridge_relayer=debug,ethers_providers=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
