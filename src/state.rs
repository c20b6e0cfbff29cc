//! Message lifecycle state and the in-memory state store
//!
//! Each observed `MessageSent` event becomes a [`MessageState`] that advances
//! through a small state machine. All messages parsed from one source
//! transaction are grouped into a [`TxState`], and the [`StateStore`] maps
//! source transaction hashes to their aggregate state for the lifetime of the
//! process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use alloy_primitives::{hex, keccak256, Bytes, FixedBytes};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{RelayerError, Result};
use crate::protocol::{Domain, Message, MessageType};

/// Processing status of a single message
///
/// Permitted transitions:
/// Created -> {Pending, Filtered, Attested}; Pending -> {Attested, Filtered};
/// Attested -> Complete. Filtered and Complete are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Created,
    Pending,
    Filtered,
    Attested,
    Complete,
}

impl Status {
    /// Whether this status ends processing for the message
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Filtered | Status::Complete)
    }

    /// Whether a transition from `self` to `next` is permitted
    pub fn can_advance_to(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Created, Status::Pending)
                | (Status::Created, Status::Filtered)
                | (Status::Created, Status::Attested)
                | (Status::Pending, Status::Attested)
                | (Status::Pending, Status::Filtered)
                | (Status::Attested, Status::Complete)
        )
    }
}

/// A parsed message together with its processing state
#[derive(Debug, Clone, Serialize)]
pub struct MessageState {
    /// Hex-encoded keccak-256 of the raw message bytes; the handle the
    /// attestation service looks messages up by
    pub iris_lookup_id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Bytes>,
    pub source_domain: Domain,
    pub dest_domain: Domain,
    pub nonce: u64,
    pub source_tx_hash: String,
    pub destination_caller: FixedBytes<32>,
    pub msg_sent_bytes: Bytes,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl MessageState {
    /// Builds a `MessageState` from raw `MessageSent` bytes observed in
    /// `source_tx_hash`. The lookup id is derived here and never changes.
    pub fn from_raw(source_tx_hash: &str, raw: &[u8]) -> Result<Self> {
        let message = Message::decode(raw)?;
        let now = Utc::now();

        Ok(Self {
            iris_lookup_id: hex::encode(keccak256(raw)),
            kind: MessageType::classify(&message.body),
            status: Status::Created,
            attestation: None,
            source_domain: message.source_domain,
            dest_domain: message.destination_domain,
            nonce: message.nonce,
            source_tx_hash: source_tx_hash.to_owned(),
            destination_caller: message.destination_caller,
            msg_sent_bytes: Bytes::copy_from_slice(raw),
            created: now,
            updated: now,
        })
    }
}

/// All messages observed for one source transaction, in parse order
#[derive(Debug, Clone, Serialize)]
pub struct TxState {
    pub tx_hash: String,
    pub msgs: Vec<MessageState>,
}

impl TxState {
    pub fn new(tx_hash: impl Into<String>, msgs: Vec<MessageState>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            msgs,
        }
    }

    /// Wraps a single message into its own transaction state
    pub fn for_message(msg: MessageState) -> Self {
        Self {
            tx_hash: msg.source_tx_hash.clone(),
            msgs: vec![msg],
        }
    }

    /// Whether every message is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.msgs.iter().all(|msg| msg.status.is_terminal())
    }
}

/// Concurrent map from source transaction hash to [`TxState`]
///
/// One mutex guards the whole map; every critical section is a lookup plus an
/// assignment, so contention between the listeners, the processor workers and
/// the query API stays negligible.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    inner: Arc<Mutex<HashMap<String, TxState>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TxState>> {
        self.inner.lock().expect("state store lock poisoned")
    }

    /// Inserts the transaction if it has not been seen before.
    ///
    /// Returns `true` when this was the first sighting. Replays (backfill,
    /// flush, requeue) keep the original entry and its timestamps.
    pub fn load_or_insert(&self, tx: &TxState) -> bool {
        let mut map = self.lock();
        if map.contains_key(&tx.tx_hash) {
            return false;
        }
        map.insert(tx.tx_hash.clone(), tx.clone());
        true
    }

    /// Clones out the current state for a transaction
    pub fn get(&self, tx_hash: &str) -> Option<TxState> {
        self.lock().get(tx_hash).cloned()
    }

    /// Advances one message's status, enforcing the transition graph
    pub fn advance(&self, tx_hash: &str, lookup_id: &str, next: Status) -> Result<()> {
        self.with_message(tx_hash, lookup_id, |msg| {
            if !msg.status.can_advance_to(next) {
                return Err(RelayerError::IllegalTransition {
                    from: msg.status,
                    to: next,
                });
            }
            msg.status = next;
            msg.updated = Utc::now();
            Ok(())
        })
    }

    /// Marks a message attested and stores the attestation blob
    pub fn set_attested(&self, tx_hash: &str, lookup_id: &str, attestation: Bytes) -> Result<()> {
        self.with_message(tx_hash, lookup_id, |msg| {
            if !msg.status.can_advance_to(Status::Attested) {
                return Err(RelayerError::IllegalTransition {
                    from: msg.status,
                    to: Status::Attested,
                });
            }
            msg.status = Status::Attested;
            msg.attestation = Some(attestation);
            msg.updated = Utc::now();
            Ok(())
        })
    }

    /// Number of tracked transactions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn with_message(
        &self,
        tx_hash: &str,
        lookup_id: &str,
        f: impl FnOnce(&mut MessageState) -> Result<()>,
    ) -> Result<()> {
        let mut map = self.lock();
        let msg = map
            .get_mut(tx_hash)
            .and_then(|tx| {
                tx.msgs
                    .iter_mut()
                    .find(|msg| msg.iris_lookup_id == lookup_id)
            })
            .ok_or_else(|| RelayerError::UnknownMessage {
                tx_hash: tx_hash.to_owned(),
                lookup_id: lookup_id.to_owned(),
            })?;
        f(msg)
    }
}
