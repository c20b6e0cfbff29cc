//! Chain adapters
//!
//! Every configured network sits behind the [`ChainAdapter`] capability set:
//! listening for `MessageSent` events, broadcasting attested messages, and a
//! little introspection. Two kinds are built in — EVM chains and Noble.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::FixedBytes;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::{RelayerError, Result};
use crate::protocol::Domain;
use crate::sequence::SequenceMap;
use crate::state::{MessageState, TxState};

pub mod ethereum;
pub mod noble;

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn domain(&self) -> Domain;

    /// Seeds the per-domain sequence from the chain's current account state.
    /// An unreachable RPC here is fatal to startup.
    async fn initialize_broadcaster(&self, sequence_map: &SequenceMap) -> Result<()>;

    /// Emits [`TxState`]s to the processing queue until shutdown. Transient
    /// transport failures are recovered internally.
    async fn start_listener(
        self: Arc<Self>,
        queue: mpsc::Sender<TxState>,
        shutdown: watch::Receiver<bool>,
    );

    /// Submits one batched send for the supplied messages, all destined for
    /// this chain. Partial success returns an aggregate error; delivered
    /// messages are protected from double-send by the chain's nonce checks.
    async fn broadcast(&self, msgs: &[MessageState], sequence_map: &SequenceMap) -> Result<()>;

    /// Whether this chain's minter is authorized as the message's destination
    /// caller. An all-zero caller is permissionless.
    fn is_destination_caller(&self, caller: &FixedBytes<32>) -> bool;

    /// Cached chain height, maintained by [`ChainAdapter::track_latest_block`]
    fn latest_block(&self) -> u64;

    fn set_latest_block(&self, height: u64);

    /// Background poll keeping [`ChainAdapter::latest_block`] fresh
    async fn track_latest_block(self: Arc<Self>, shutdown: watch::Receiver<bool>);

    /// Periodically observes the minter's balance and surfaces it as a
    /// structured log event in the configured denom
    async fn monitor_wallet_balance(self: Arc<Self>, shutdown: watch::Receiver<bool>);
}

/// Map from domain to its chain adapter, built once at startup
#[derive(Default)]
pub struct Registry {
    chains: HashMap<Domain, Arc<dyn ChainAdapter>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter; a second adapter for the same domain is a fatal
    /// configuration error.
    pub fn register(&mut self, chain: Arc<dyn ChainAdapter>) -> Result<()> {
        let domain = chain.domain();
        if let Some(existing) = self.chains.get(&domain) {
            return Err(RelayerError::DuplicateDomain {
                domain,
                chain: existing.name().to_owned(),
            });
        }
        self.chains.insert(domain, chain);
        Ok(())
    }

    pub fn get(&self, domain: Domain) -> Option<&Arc<dyn ChainAdapter>> {
        self.chains.get(&domain)
    }

    pub fn chains(&self) -> impl Iterator<Item = &Arc<dyn ChainAdapter>> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChain;

    #[test]
    fn test_register_duplicate_domain_fails() {
        let mut registry = Registry::new();
        registry
            .register(Arc::new(MockChain::new("noble", Domain::NOBLE)))
            .unwrap();

        let result = registry.register(Arc::new(MockChain::new("noble-2", Domain::NOBLE)));
        assert!(matches!(
            result,
            Err(RelayerError::DuplicateDomain { domain, .. }) if domain == Domain::NOBLE
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_by_domain() {
        let mut registry = Registry::new();
        registry
            .register(Arc::new(MockChain::new("ethereum", Domain::ETHEREUM)))
            .unwrap();

        assert!(registry.get(Domain::ETHEREUM).is_some());
        assert!(registry.get(Domain::NOBLE).is_none());
    }
}
