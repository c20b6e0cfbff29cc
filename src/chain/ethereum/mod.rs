//! EVM chain adapter
//!
//! Connects three providers — plain HTTP for height and balance queries, a
//! websocket for the log subscription and historical queries, and a
//! wallet-backed provider for broadcasting — and implements the listener and
//! broadcaster described in the module docs of [`listener`] and [`broadcast`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_network::EthereumWallet;
use alloy_primitives::{Address, FixedBytes};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::chain::ChainAdapter;
use crate::config::EvmConfig;
use crate::error::{RelayerError, Result};
use crate::protocol::Domain;
use crate::sequence::SequenceMap;
use crate::state::{MessageState, TxState};

mod broadcast;
mod contracts;
mod listener;

const BLOCK_POLL_INTERVAL: Duration = Duration::from_secs(30);
const BALANCE_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct Ethereum {
    name: String,
    domain: Domain,
    rpc_provider: DynProvider,
    ws_provider: DynProvider,
    wallet_provider: DynProvider,
    signer_address: Address,
    message_transmitter: Address,
    minter_address: Address,
    lookback_period: u64,
    broadcast_retries: u32,
    metrics_denom: String,
    metrics_exponent: u32,
    /// First block the next listener epoch observes; 0 means the chain tip
    start_block: AtomicU64,
    last_flushed_block: AtomicU64,
    latest_block: AtomicU64,
}

impl Ethereum {
    /// Connects all three providers. Fails when an endpoint is unreachable
    /// or the signer key does not parse.
    pub async fn connect(name: &str, config: &EvmConfig) -> Result<Self> {
        let signer: PrivateKeySigner = config
            .signer_key
            .parse()
            .map_err(|err| RelayerError::Config(format!("invalid signer key for {name}: {err}")))?;
        let signer_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let rpc_provider = ProviderBuilder::new()
            .connect(&config.rpc_url)
            .await?
            .erased();
        let ws_provider = ProviderBuilder::new()
            .connect(&config.ws_url)
            .await?
            .erased();
        let wallet_provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect(&config.rpc_url)
            .await?
            .erased();

        Ok(Self {
            name: name.to_owned(),
            domain: Domain(config.domain),
            rpc_provider,
            ws_provider,
            wallet_provider,
            signer_address,
            message_transmitter: config.message_transmitter,
            minter_address: config.minter_address,
            lookback_period: config.lookback_period,
            broadcast_retries: config.broadcast_retries,
            metrics_denom: config.metrics_denom.clone(),
            metrics_exponent: config.metrics_exponent,
            start_block: AtomicU64::new(config.start_block.unwrap_or(0)),
            last_flushed_block: AtomicU64::new(0),
            latest_block: AtomicU64::new(0),
        })
    }

    fn start_block(&self) -> u64 {
        self.start_block.load(Ordering::Relaxed)
    }

    fn set_start_block(&self, height: u64) {
        self.start_block.store(height, Ordering::Relaxed);
    }

    fn last_flushed_block(&self) -> u64 {
        self.last_flushed_block.load(Ordering::Relaxed)
    }

    fn set_last_flushed_block(&self, height: u64) {
        self.last_flushed_block.store(height, Ordering::Relaxed);
    }
}

#[async_trait]
impl ChainAdapter for Ethereum {
    fn name(&self) -> &str {
        &self.name
    }

    fn domain(&self) -> Domain {
        self.domain
    }

    async fn initialize_broadcaster(&self, sequence_map: &SequenceMap) -> Result<()> {
        let nonce = self
            .wallet_provider
            .get_transaction_count(self.signer_address)
            .pending()
            .await?;
        sequence_map.put(self.domain, nonce).await;
        info!(
            chain = %self.name,
            domain = %self.domain,
            nonce,
            "broadcaster sequence seeded"
        );
        Ok(())
    }

    async fn start_listener(
        self: Arc<Self>,
        queue: mpsc::Sender<TxState>,
        shutdown: watch::Receiver<bool>,
    ) {
        listener::run(self, queue, shutdown).await;
    }

    async fn broadcast(&self, msgs: &[MessageState], sequence_map: &SequenceMap) -> Result<()> {
        broadcast::broadcast(self, msgs, sequence_map).await
    }

    fn is_destination_caller(&self, caller: &FixedBytes<32>) -> bool {
        if caller == &FixedBytes::<32>::ZERO {
            return true;
        }
        caller == &self.minter_address.into_word()
    }

    fn latest_block(&self) -> u64 {
        self.latest_block.load(Ordering::Relaxed)
    }

    fn set_latest_block(&self, height: u64) {
        self.latest_block.store(height, Ordering::Relaxed);
    }

    async fn track_latest_block(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut poll = tokio::time::interval(BLOCK_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = poll.tick() => {
                    match self.rpc_provider.get_block_number().await {
                        Ok(height) => self.set_latest_block(height),
                        Err(err) => debug!(
                            chain = %self.name,
                            error = %err,
                            "error getting latest block height, will retry"
                        ),
                    }
                }
            }
        }
    }

    async fn monitor_wallet_balance(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut poll = tokio::time::interval(BALANCE_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = poll.tick() => {
                    match self.rpc_provider.get_balance(self.minter_address).await {
                        Ok(balance) => {
                            let scaled = balance.to_string().parse::<f64>().unwrap_or(0.0)
                                / 10f64.powi(self.metrics_exponent as i32);
                            info!(
                                chain = %self.name,
                                account = %self.minter_address,
                                denom = %self.metrics_denom,
                                balance = scaled,
                                "wallet balance"
                            );
                        }
                        Err(err) => debug!(
                            chain = %self.name,
                            error = %err,
                            "error querying wallet balance, will retry"
                        ),
                    }
                }
            }
        }
    }
}
