//! EVM broadcaster
//!
//! Holds the domain's sequence lock for the whole invocation so transaction
//! nonces are assigned in submission order, and submits one `receiveMessage`
//! per attested message as a serialized burst. Messages whose nonce the
//! destination already consumed are skipped as delivered, which makes retry
//! passes after partial failures safe.

use std::time::Duration;

use alloy_primitives::{keccak256, B256, U256};
use alloy_provider::Provider;
use tracing::{debug, info, warn};

use super::contracts::MessageTransmitter;
use super::Ethereum;
use crate::chain::ChainAdapter;
use crate::error::{RelayerError, Result};
use crate::sequence::SequenceMap;
use crate::state::MessageState;

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Key into the MessageTransmitter `usedNonces` mapping:
/// keccak256(source domain BE ‖ nonce BE)
fn used_nonce_key(source_domain: u32, nonce: u64) -> B256 {
    let mut buf = [0u8; 12];
    buf[..4].copy_from_slice(&source_domain.to_be_bytes());
    buf[4..].copy_from_slice(&nonce.to_be_bytes());
    keccak256(buf)
}

pub(super) async fn broadcast(
    chain: &Ethereum,
    msgs: &[MessageState],
    sequence_map: &SequenceMap,
) -> Result<()> {
    let entry = sequence_map.entry(chain.domain());
    let mut sequence = entry.lock().await;

    let transmitter =
        MessageTransmitter::new(chain.message_transmitter, chain.wallet_provider.clone());

    let mut failures: Vec<String> = Vec::new();
    for msg in msgs {
        let Some(attestation) = &msg.attestation else {
            failures.push(format!("message {} has no attestation", msg.iris_lookup_id));
            continue;
        };

        let key = used_nonce_key(msg.source_domain.as_u32(), msg.nonce);
        match transmitter.usedNonces(key).call().await {
            Ok(used) if used != U256::ZERO => {
                info!(
                    chain = chain.name(),
                    nonce = msg.nonce,
                    source_domain = %msg.source_domain,
                    "nonce already received on destination, skipping"
                );
                continue;
            }
            Ok(_) => {}
            Err(err) => debug!(
                chain = chain.name(),
                error = %err,
                "used-nonce lookup failed, attempting broadcast anyway"
            ),
        }

        let mut attempt = 1u32;
        loop {
            let result = transmitter
                .receiveMessage(msg.msg_sent_bytes.clone(), attestation.clone())
                .nonce(*sequence)
                .send()
                .await;

            match result {
                Ok(pending_tx) => {
                    info!(
                        chain = chain.name(),
                        tx_hash = %pending_tx.tx_hash(),
                        nonce = msg.nonce,
                        account_nonce = *sequence,
                        "broadcasted receive message"
                    );
                    *sequence += 1;
                    break;
                }
                Err(err) => {
                    let reason = err.to_string();
                    if reason.contains("nonce") {
                        warn!(
                            chain = chain.name(),
                            error = %reason,
                            "stale account nonce, re-reading from chain"
                        );
                        match chain
                            .wallet_provider
                            .get_transaction_count(chain.signer_address)
                            .pending()
                            .await
                        {
                            Ok(fresh) => *sequence = fresh,
                            Err(err) => debug!(
                                chain = chain.name(),
                                error = %err,
                                "unable to refresh account nonce"
                            ),
                        }
                    }
                    if attempt >= chain.broadcast_retries {
                        failures.push(format!("message {}: {reason}", msg.iris_lookup_id));
                        break;
                    }
                    attempt += 1;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(RelayerError::Broadcast {
            reason: failures.join("; "),
        })
    }
}
