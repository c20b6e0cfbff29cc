//! Application wiring
//!
//! Builds the registry, seeds the broadcasters, and spawns the background
//! tasks: per-chain block trackers, balance monitors and listeners, the
//! processor pool, and the query API. A single watch channel propagates
//! shutdown to everything.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::api;
use crate::attestation::{AttestationClient, IrisClient};
use crate::chain::ethereum::Ethereum;
use crate::chain::noble::Noble;
use crate::chain::{ChainAdapter, Registry};
use crate::config::{ChainConfig, Config};
use crate::error::Result;
use crate::processor::{processing_queue, Processor};
use crate::sequence::SequenceMap;
use crate::state::StateStore;

/// Shared handles threaded through workers and the query API
#[derive(Clone)]
pub struct AppState {
    pub store: StateStore,
    pub sequence_map: Arc<SequenceMap>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            store: StateStore::new(),
            sequence_map: Arc::new(SequenceMap::new()),
            config: Arc::new(config),
        }
    }
}

/// Runs the relayer until ctrl-c. Startup errors (duplicate domain,
/// unreachable RPC) propagate out and exit the process nonzero.
pub async fn run(config: Config) -> Result<()> {
    let app = AppState::new(config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut registry = Registry::new();
    for (name, chain_config) in &app.config.chains {
        let adapter: Arc<dyn ChainAdapter> = match chain_config {
            ChainConfig::Evm(cfg) => Arc::new(Ethereum::connect(name, cfg).await?),
            ChainConfig::Noble(cfg) => Arc::new(Noble::connect(name, cfg)?),
        };
        info!(chain = %name, domain = %adapter.domain(), "chain configured");
        registry.register(adapter)?;
    }
    let registry = Arc::new(registry);

    for chain in registry.chains() {
        chain.initialize_broadcaster(&app.sequence_map).await?;
    }

    let (queue_tx, queue_rx) = processing_queue();
    let mut tasks = Vec::new();

    for chain in registry.chains() {
        tasks.push(tokio::spawn(
            chain.clone().track_latest_block(shutdown_rx.clone()),
        ));
        tasks.push(tokio::spawn(
            chain.clone().monitor_wallet_balance(shutdown_rx.clone()),
        ));
        tasks.push(tokio::spawn(
            chain
                .clone()
                .start_listener(queue_tx.clone(), shutdown_rx.clone()),
        ));
    }

    let attester: Arc<dyn AttestationClient> =
        Arc::new(IrisClient::new(&app.config.circle.attestation_base_url));
    let processor = Arc::new(
        Processor::builder()
            .store(app.store.clone())
            .registry(registry.clone())
            .attester(attester)
            .sequence_map(app.sequence_map.clone())
            .enabled_routes(app.config.enabled_routes.clone())
            .queue(queue_tx.clone())
            .build(),
    );
    for _ in 0..app.config.processor_worker_count {
        tasks.push(tokio::spawn(
            processor.clone().run(queue_rx.clone(), shutdown_rx.clone()),
        ));
    }

    if app.config.api.enabled {
        let store = app.store.clone();
        let api_config = app.config.api.clone();
        let api_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = api::serve(store, api_config, api_shutdown).await {
                error!(error = %err, "query api terminated");
            }
        }));
    }

    info!(
        chains = registry.len(),
        workers = app.config.processor_worker_count,
        "relayer started"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    // no graceful drain: in-flight work is re-observed on the next start via
    // the lookback window
    tokio::time::sleep(Duration::from_secs(1)).await;
    for task in tasks {
        task.abort();
    }

    Ok(())
}
