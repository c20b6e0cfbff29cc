//! Test fakes for the processing pipeline
//!
//! Fake implementations of the attestation client and the chain adapter so
//! integration tests can drive the processor through attestation
//! progressions, filter decisions and broadcast failures without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::FixedBytes;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::attestation::{AttestationClient, AttestationResponse};
use crate::chain::ChainAdapter;
use crate::error::{RelayerError, Result};
use crate::protocol::Domain;
use crate::sequence::SequenceMap;
use crate::state::{MessageState, TxState};

// ============================================================================
// Fake attestation client
// ============================================================================

/// Scripted attestation responses keyed by lookup id.
///
/// Each call consumes the next entry in the sequence; the last entry repeats
/// once the script runs out. `None` entries simulate transport failures.
#[derive(Clone, Debug, Default)]
pub struct FakeAttestationClient {
    responses: Arc<Mutex<HashMap<String, Vec<Option<AttestationResponse>>>>>,
    call_counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl FakeAttestationClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a sequence of responses for one lookup id
    pub fn add_response_sequence(
        &self,
        lookup_id: impl Into<String>,
        responses: Vec<Option<AttestationResponse>>,
    ) {
        self.responses
            .lock()
            .unwrap()
            .insert(lookup_id.into(), responses);
    }

    /// Scripts an immediately-complete attestation
    pub fn add_complete(&self, lookup_id: impl Into<String>, response: AttestationResponse) {
        self.add_response_sequence(lookup_id, vec![Some(response)]);
    }

    /// How many times this lookup id was polled
    pub fn call_count(&self, lookup_id: &str) -> usize {
        self.call_counts
            .lock()
            .unwrap()
            .get(lookup_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl AttestationClient for FakeAttestationClient {
    async fn check_attestation(
        &self,
        lookup_id: &str,
        _source_tx_hash: &str,
        _source_domain: Domain,
        _dest_domain: Domain,
    ) -> Option<AttestationResponse> {
        let index = {
            let mut counts = self.call_counts.lock().unwrap();
            let count = counts.entry(lookup_id.to_owned()).or_insert(0);
            let index = *count;
            *count += 1;
            index
        };

        let responses = self.responses.lock().unwrap();
        let script = responses.get(lookup_id)?;
        script
            .get(index)
            .or_else(|| script.last())
            .cloned()
            .flatten()
    }
}

// ============================================================================
// Mock chain adapter
// ============================================================================

/// A chain adapter that records broadcasts and plays back scripted outcomes.
///
/// With no script, every broadcast succeeds. Push error reasons to make the
/// next calls fail in order.
pub struct MockChain {
    name: String,
    domain: Domain,
    valid_caller: FixedBytes<32>,
    scripted_failures: Mutex<VecDeque<String>>,
    broadcasts: Mutex<Vec<Vec<MessageState>>>,
    latest_block: AtomicU64,
}

impl MockChain {
    pub fn new(name: impl Into<String>, domain: Domain) -> Self {
        Self {
            name: name.into(),
            domain,
            valid_caller: FixedBytes::ZERO,
            scripted_failures: Mutex::new(VecDeque::new()),
            broadcasts: Mutex::new(Vec::new()),
            latest_block: AtomicU64::new(0),
        }
    }

    /// Requires destination callers to match `caller` exactly (the all-zero
    /// caller stays permissionless, as on real chains)
    pub fn with_valid_caller(mut self, caller: FixedBytes<32>) -> Self {
        self.valid_caller = caller;
        self
    }

    /// Makes the next broadcast call fail with `reason`
    pub fn push_broadcast_failure(&self, reason: impl Into<String>) {
        self.scripted_failures.lock().unwrap().push_back(reason.into());
    }

    /// Every batch passed to broadcast, in call order
    pub fn broadcasts(&self) -> Vec<Vec<MessageState>> {
        self.broadcasts.lock().unwrap().clone()
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().unwrap().len()
    }
}

#[async_trait]
impl ChainAdapter for MockChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn domain(&self) -> Domain {
        self.domain
    }

    async fn initialize_broadcaster(&self, sequence_map: &SequenceMap) -> Result<()> {
        sequence_map.put(self.domain, 0).await;
        Ok(())
    }

    async fn start_listener(
        self: Arc<Self>,
        _queue: mpsc::Sender<TxState>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let _ = shutdown.changed().await;
    }

    async fn broadcast(&self, msgs: &[MessageState], sequence_map: &SequenceMap) -> Result<()> {
        let entry = sequence_map.entry(self.domain);
        let mut sequence = entry.lock().await;

        self.broadcasts.lock().unwrap().push(msgs.to_vec());
        if let Some(reason) = self.scripted_failures.lock().unwrap().pop_front() {
            return Err(RelayerError::Broadcast { reason });
        }
        *sequence += msgs.len() as u64;
        Ok(())
    }

    fn is_destination_caller(&self, caller: &FixedBytes<32>) -> bool {
        if caller == &FixedBytes::<32>::ZERO {
            return true;
        }
        caller == &self.valid_caller
    }

    fn latest_block(&self) -> u64 {
        self.latest_block.load(Ordering::Relaxed)
    }

    fn set_latest_block(&self, height: u64) {
        self.latest_block.store(height, Ordering::Relaxed);
    }

    async fn track_latest_block(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let _ = shutdown.changed().await;
    }

    async fn monitor_wallet_balance(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let _ = shutdown.changed().await;
    }
}
