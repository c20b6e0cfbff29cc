//! Noble chain adapter
//!
//! Noble is the Cosmos app-chain hosting the CCTP module. Listening scans
//! block transaction results for `circle.cctp.v1.MessageSent` events;
//! broadcasting signs a single multi-message transaction per batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::FixedBytes;
use async_trait::async_trait;
use cosmrs::crypto::secp256k1::SigningKey;
use cosmrs::AccountId;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::chain::ChainAdapter;
use crate::config::NobleConfig;
use crate::error::{RelayerError, Result};
use crate::protocol::Domain;
use crate::sequence::SequenceMap;
use crate::state::{MessageState, TxState};

mod broadcast;
mod listener;
mod rpc;

use rpc::NobleRpc;

const BALANCE_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct Noble {
    name: String,
    domain: Domain,
    rpc: NobleRpc,
    chain_id: String,
    signer_key: SigningKey,
    signer_address: AccountId,
    /// Raw 20-byte form of the minter address, for destination-caller checks
    minter_bytes: Vec<u8>,
    account_number: AtomicU64,
    gas_limit: u64,
    fee_amount: u128,
    denom: String,
    lookback_period: u64,
    block_poll: Duration,
    broadcast_retries: u32,
    metrics_denom: String,
    metrics_exponent: u32,
    start_block: AtomicU64,
    latest_block: AtomicU64,
}

impl Noble {
    pub fn connect(name: &str, config: &NobleConfig) -> Result<Self> {
        let key_bytes =
            alloy_primitives::hex::decode(config.signer_key.trim_start_matches("0x"))?;
        let signer_key = SigningKey::from_slice(&key_bytes).map_err(|err| {
            RelayerError::Config(format!("invalid signer key for {name}: {err}"))
        })?;
        let signer_address = signer_key
            .public_key()
            .account_id(&config.address_prefix)
            .map_err(|err| RelayerError::Config(format!("unable to derive address: {err}")))?;
        let minter_bytes = signer_address.to_bytes();

        Ok(Self {
            name: name.to_owned(),
            domain: Domain(config.domain),
            rpc: NobleRpc::new(&config.rpc_url, &config.api_url),
            chain_id: config.chain_id.clone(),
            signer_key,
            signer_address,
            minter_bytes,
            account_number: AtomicU64::new(0),
            gas_limit: config.gas_limit,
            fee_amount: config.fee_amount,
            denom: config.denom.clone(),
            lookback_period: config.lookback_period,
            block_poll: Duration::from_secs(config.block_poll_secs),
            broadcast_retries: config.broadcast_retries,
            metrics_denom: config.metrics_denom.clone(),
            metrics_exponent: config.metrics_exponent,
            start_block: AtomicU64::new(config.start_block.unwrap_or(0)),
            latest_block: AtomicU64::new(0),
        })
    }

    fn start_block(&self) -> u64 {
        self.start_block.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChainAdapter for Noble {
    fn name(&self) -> &str {
        &self.name
    }

    fn domain(&self) -> Domain {
        self.domain
    }

    async fn initialize_broadcaster(&self, sequence_map: &SequenceMap) -> Result<()> {
        let account = self.rpc.account(&self.signer_address.to_string()).await?;
        self.account_number
            .store(account.account_number, Ordering::Relaxed);
        sequence_map.put(self.domain, account.sequence).await;
        info!(
            chain = %self.name,
            domain = %self.domain,
            account_number = account.account_number,
            sequence = account.sequence,
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
        // callers are 32 bytes with the 20-byte account left-padded
        let Some(offset) = caller.len().checked_sub(self.minter_bytes.len()) else {
            return false;
        };
        caller[..offset].iter().all(|b| *b == 0) && caller[offset..] == self.minter_bytes[..]
    }

    fn latest_block(&self) -> u64 {
        self.latest_block.load(Ordering::Relaxed)
    }

    fn set_latest_block(&self, height: u64) {
        self.latest_block.store(height, Ordering::Relaxed);
    }

    async fn track_latest_block(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut poll = tokio::time::interval(self.block_poll);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = poll.tick() => {
                    match self.rpc.latest_height().await {
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
        let address = self.signer_address.to_string();
        let mut poll = tokio::time::interval(BALANCE_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = poll.tick() => {
                    match self.rpc.balance(&address, &self.denom).await {
                        Ok(balance) => {
                            let scaled =
                                balance as f64 / 10f64.powi(self.metrics_exponent as i32);
                            info!(
                                chain = %self.name,
                                account = %address,
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
