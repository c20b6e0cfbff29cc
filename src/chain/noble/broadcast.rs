//! Noble broadcaster
//!
//! Cosmos transactions batch natively, so all attested messages for one
//! invocation are packed into a single transaction as `MsgReceiveMessage`s
//! and signed with the account sequence from the sequence map. A sequence
//! mismatch re-reads the account; a nonce the CCTP module already consumed
//! counts as delivered.

use std::sync::atomic::Ordering;
use std::time::Duration;

use cosmrs::tx::{Body, Fee, SignDoc, SignerInfo};
use cosmrs::{Any, Coin};
use prost::Message as _;
use tracing::{debug, info, warn};

use super::Noble;
use crate::chain::ChainAdapter;
use crate::error::{RelayerError, Result};
use crate::sequence::SequenceMap;
use crate::state::MessageState;

const RETRY_DELAY: Duration = Duration::from_secs(1);

const MSG_RECEIVE_MESSAGE_TYPE_URL: &str = "/circle.cctp.v1.MsgReceiveMessage";

/// circle.cctp.v1.MsgReceiveMessage
#[derive(Clone, PartialEq, prost::Message)]
struct MsgReceiveMessage {
    #[prost(string, tag = "1")]
    from: String,
    #[prost(bytes = "vec", tag = "2")]
    message: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    attestation: Vec<u8>,
}

pub(super) async fn broadcast(
    chain: &Noble,
    msgs: &[MessageState],
    sequence_map: &SequenceMap,
) -> Result<()> {
    let entry = sequence_map.entry(chain.domain());
    let mut sequence = entry.lock().await;

    let from = chain.signer_address.to_string();
    let mut any_msgs = Vec::with_capacity(msgs.len());
    for msg in msgs {
        let Some(attestation) = &msg.attestation else {
            return Err(RelayerError::Broadcast {
                reason: format!("message {} has no attestation", msg.iris_lookup_id),
            });
        };
        let receive = MsgReceiveMessage {
            from: from.clone(),
            message: msg.msg_sent_bytes.to_vec(),
            attestation: attestation.to_vec(),
        };
        any_msgs.push(Any {
            type_url: MSG_RECEIVE_MESSAGE_TYPE_URL.to_owned(),
            value: receive.encode_to_vec(),
        });
    }

    let mut attempt = 1u32;
    loop {
        let tx_bytes = sign_tx(chain, &any_msgs, *sequence)?;
        match chain.rpc.broadcast_tx_sync(&tx_bytes).await {
            Ok(result) if result.code == 0 => {
                info!(
                    chain = chain.name(),
                    tx_hash = %result.hash,
                    messages = msgs.len(),
                    sequence = *sequence,
                    "broadcasted receive messages"
                );
                *sequence += 1;
                return Ok(());
            }
            Ok(result) if result.log.contains("nonce already used") => {
                info!(
                    chain = chain.name(),
                    log = %result.log,
                    "nonces already received on destination, skipping"
                );
                return Ok(());
            }
            Ok(result) if result.log.contains("account sequence mismatch") => {
                warn!(
                    chain = chain.name(),
                    log = %result.log,
                    "stale account sequence, re-reading from chain"
                );
                match chain.rpc.account(&from).await {
                    Ok(account) => {
                        chain
                            .account_number
                            .store(account.account_number, Ordering::Relaxed);
                        *sequence = account.sequence;
                    }
                    Err(err) => debug!(
                        chain = chain.name(),
                        error = %err,
                        "unable to refresh account sequence"
                    ),
                }
                if attempt >= chain.broadcast_retries {
                    return Err(RelayerError::Broadcast { reason: result.log });
                }
            }
            Ok(result) => {
                if attempt >= chain.broadcast_retries {
                    return Err(RelayerError::Broadcast {
                        reason: format!("code {}: {}", result.code, result.log),
                    });
                }
                warn!(
                    chain = chain.name(),
                    code = result.code,
                    log = %result.log,
                    attempt,
                    "broadcast rejected, retrying"
                );
            }
            Err(err) => {
                if attempt >= chain.broadcast_retries {
                    return Err(err);
                }
                warn!(
                    chain = chain.name(),
                    error = %err,
                    attempt,
                    "broadcast request failed, retrying"
                );
            }
        }
        attempt += 1;
        tokio::time::sleep(RETRY_DELAY).await;
    }
}

fn sign_tx(chain: &Noble, msgs: &[Any], sequence: u64) -> Result<Vec<u8>> {
    let body = Body::new(msgs.to_vec(), "", 0u32);

    let denom = chain
        .denom
        .parse()
        .map_err(|_| RelayerError::Signing {
            reason: format!("invalid fee denom {}", chain.denom),
        })?;
    let fee = Fee::from_amount_and_gas(
        Coin {
            denom,
            amount: chain.fee_amount,
        },
        chain.gas_limit.saturating_mul(msgs.len() as u64),
    );

    let signer_info = SignerInfo::single_direct(Some(chain.signer_key.public_key()), sequence);
    let auth_info = signer_info.auth_info(fee);

    let chain_id: cosmrs::tendermint::chain::Id =
        chain.chain_id.parse().map_err(|err| RelayerError::Signing {
            reason: format!("invalid chain id {}: {err}", chain.chain_id),
        })?;
    let account_number = chain.account_number.load(Ordering::Relaxed);

    let sign_doc = SignDoc::new(&body, &auth_info, &chain_id, account_number)
        .map_err(|err| RelayerError::Signing {
            reason: err.to_string(),
        })?;
    let raw = sign_doc.sign(&chain.signer_key).map_err(|err| RelayerError::Signing {
        reason: err.to_string(),
    })?;
    raw.to_bytes().map_err(|err| RelayerError::Signing {
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    #[test]
    fn test_msg_receive_message_proto_roundtrip() {
        let msg = MsgReceiveMessage {
            from: "noble1qqqsyqcyq5rqwzqfpg9scrgwpugpzysnrujsuw".to_owned(),
            message: vec![1, 2, 3],
            attestation: vec![4, 5, 6],
        };
        let encoded = msg.encode_to_vec();
        let decoded = MsgReceiveMessage::decode(encoded.as_slice()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_msg_receive_message_field_tags() {
        // wire layout: tag 1 string, tag 2 bytes, tag 3 bytes
        let msg = MsgReceiveMessage {
            from: "a".to_owned(),
            message: vec![0xbb],
            attestation: vec![0xcc],
        };
        let encoded = msg.encode_to_vec();
        assert_eq!(
            encoded,
            vec![
                0x0a, 0x01, b'a', // field 1, length-delimited
                0x12, 0x01, 0xbb, // field 2
                0x1a, 0x01, 0xcc, // field 3
            ]
        );
    }
}
