//! Processing pipeline
//!
//! Workers drain the processing queue and advance each transaction's
//! messages through the state machine: filter checks first, then attestation
//! polling, then a batched broadcast per destination domain. Anything that
//! is not finished puts the transaction back on the queue; a worker never
//! exits on an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::attestation::{AttestationClient, AttestationStatus};
use crate::chain::Registry;
use crate::protocol::Domain;
use crate::sequence::SequenceMap;
use crate::state::{MessageState, StateStore, Status, TxState};

/// Backpressure bound on the listener -> processor channel
pub const PROCESSING_QUEUE_CAPACITY: usize = 10_000;

/// How long a worker waits before re-checking a still-pending attestation.
/// Throttles the worker that sleeps, not its peers.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Workers share one receiver behind a lock
pub type QueueReceiver = Arc<Mutex<mpsc::Receiver<TxState>>>;

#[derive(Builder)]
pub struct Processor {
    store: StateStore,
    registry: Arc<Registry>,
    attester: Arc<dyn AttestationClient>,
    sequence_map: Arc<SequenceMap>,
    enabled_routes: HashMap<Domain, Vec<Domain>>,
    queue: mpsc::Sender<TxState>,
    #[builder(default = DEFAULT_RETRY_DELAY)]
    retry_delay: Duration,
}

impl Processor {
    /// Worker loop: drains the queue until shutdown
    pub async fn run(self: Arc<Self>, receiver: QueueReceiver, mut shutdown: watch::Receiver<bool>) {
        loop {
            let tx = {
                let mut rx = receiver.lock().await;
                tokio::select! {
                    _ = shutdown.changed() => return,
                    tx = rx.recv() => match tx {
                        Some(tx) => tx,
                        None => return,
                    },
                }
            };
            if let Some(requeued) = self.process(tx).await {
                if self.queue.send(requeued).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Runs one pass over a transaction's messages. Returns the state to put
    /// back on the queue when any message still needs work.
    pub async fn process(&self, tx: TxState) -> Option<TxState> {
        if self.store.load_or_insert(&tx) {
            debug!(
                tx_hash = %tx.tx_hash,
                messages = tx.msgs.len(),
                "tracking new transaction"
            );
        }

        let snapshot = self.store.get(&tx.tx_hash)?;

        let mut broadcast_msgs: HashMap<Domain, Vec<MessageState>> = HashMap::new();
        let mut requeue = false;

        for msg in &snapshot.msgs {
            match msg.status {
                Status::Complete | Status::Filtered => continue,
                // a previous broadcast attempt failed; rejoin the batch
                Status::Attested => {
                    broadcast_msgs
                        .entry(msg.dest_domain)
                        .or_default()
                        .push(msg.clone());
                    continue;
                }
                Status::Created | Status::Pending => {}
            }

            if self.route_disabled(msg) || self.invalid_destination_caller(msg) {
                if let Err(err) =
                    self.store
                        .advance(&tx.tx_hash, &msg.iris_lookup_id, Status::Filtered)
                {
                    error!(error = %err, "unable to mark message filtered");
                }
                continue;
            }

            match self
                .attester
                .check_attestation(
                    &msg.iris_lookup_id,
                    &msg.source_tx_hash,
                    msg.source_domain,
                    msg.dest_domain,
                )
                .await
            {
                Some(response) => match response.status {
                    AttestationStatus::Complete => match response.attestation {
                        Some(attestation) => {
                            match self.store.set_attested(
                                &tx.tx_hash,
                                &msg.iris_lookup_id,
                                attestation.clone(),
                            ) {
                                Ok(()) => {
                                    debug!(
                                        lookup_id = %msg.iris_lookup_id,
                                        "attestation complete"
                                    );
                                    let mut attested = msg.clone();
                                    attested.status = Status::Attested;
                                    attested.attestation = Some(attestation);
                                    broadcast_msgs
                                        .entry(msg.dest_domain)
                                        .or_default()
                                        .push(attested);
                                }
                                Err(err) => {
                                    error!(error = %err, "unable to mark message attested")
                                }
                            }
                        }
                        None => {
                            debug!(
                                lookup_id = %msg.iris_lookup_id,
                                "attestation complete without payload, retrying"
                            );
                            requeue = true;
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    },
                    AttestationStatus::Pending | AttestationStatus::PendingConfirmations => {
                        if msg.status == Status::Created {
                            if let Err(err) =
                                self.store
                                    .advance(&tx.tx_hash, &msg.iris_lookup_id, Status::Pending)
                            {
                                error!(error = %err, "unable to mark message pending");
                            }
                        }
                        debug!(
                            lookup_id = %msg.iris_lookup_id,
                            "attestation still pending confirmations, retrying"
                        );
                        requeue = true;
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    AttestationStatus::Failed => {
                        warn!(
                            lookup_id = %msg.iris_lookup_id,
                            "attestation reported failed, retrying"
                        );
                        requeue = true;
                        tokio::time::sleep(self.retry_delay).await;
                    }
                },
                None => {
                    debug!(
                        lookup_id = %msg.iris_lookup_id,
                        "attestation still processing, retrying"
                    );
                    requeue = true;
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }

        for (domain, msgs) in broadcast_msgs {
            let Some(chain) = self.registry.get(domain) else {
                error!(%domain, "no chain registered for domain");
                continue;
            };
            match chain.broadcast(&msgs, &self.sequence_map).await {
                Ok(()) => {
                    for msg in &msgs {
                        if let Err(err) =
                            self.store
                                .advance(&tx.tx_hash, &msg.iris_lookup_id, Status::Complete)
                        {
                            error!(error = %err, "unable to mark message complete");
                        }
                    }
                    info!(
                        chain = chain.name(),
                        %domain,
                        transfers = msgs.len(),
                        "relayed messages"
                    );
                }
                Err(err) => {
                    error!(
                        chain = chain.name(),
                        %domain,
                        transfers = msgs.len(),
                        error = %err,
                        "unable to mint one or more transfers"
                    );
                    requeue = true;
                }
            }
        }

        if requeue {
            self.store.get(&tx.tx_hash)
        } else {
            None
        }
    }

    fn route_disabled(&self, msg: &MessageState) -> bool {
        let enabled = self
            .enabled_routes
            .get(&msg.source_domain)
            .is_some_and(|dests| dests.contains(&msg.dest_domain));
        if !enabled {
            info!(
                tx_hash = %msg.source_tx_hash,
                source = %msg.source_domain,
                dest = %msg.dest_domain,
                "filtered: relaying on this route is not enabled"
            );
        }
        !enabled
    }

    fn invalid_destination_caller(&self, msg: &MessageState) -> bool {
        let Some(chain) = self.registry.get(msg.dest_domain) else {
            error!(domain = %msg.dest_domain, "no chain registered for domain");
            return true;
        };
        if chain.is_destination_caller(&msg.destination_caller) {
            return false;
        }
        info!(
            tx_hash = %msg.source_tx_hash,
            source = %msg.source_domain,
            dest = %msg.dest_domain,
            caller = %msg.destination_caller,
            "filtered: invalid destination caller"
        );
        true
    }
}

/// Convenience for wiring the bounded queue
pub fn processing_queue() -> (mpsc::Sender<TxState>, QueueReceiver) {
    let (tx, rx) = mpsc::channel(PROCESSING_QUEUE_CAPACITY);
    (tx, Arc::new(Mutex::new(rx)))
}

