//! Noble listener
//!
//! Noble blocks are final, so the listener scans transaction results height
//! by height: an initial catch-up over the lookback window behind the start
//! block, then a sequential poll that follows the cached chain tip. Every
//! `circle.cctp.v1.MessageSent` event in a successful transaction yields one
//! message state; all messages of a transaction travel together.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::rpc::TxResult;
use super::Noble;
use crate::chain::ChainAdapter;
use crate::error::{RelayerError, Result};
use crate::state::{MessageState, TxState};

const MESSAGE_SENT_EVENT: &str = "circle.cctp.v1.MessageSent";
const TIP_RETRY_DELAY: Duration = Duration::from_secs(1);

pub(super) async fn run(
    chain: Arc<Noble>,
    queue: mpsc::Sender<TxState>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(chain = chain.name(), "starting listener");

    // anchor the catch-up window at the chain tip
    let latest = loop {
        if *shutdown.borrow() {
            return;
        }
        match chain.rpc.latest_height().await {
            Ok(height) => break height,
            Err(err) => {
                warn!(chain = chain.name(), error = %err, "unable to query chain tip");
                tokio::time::sleep(TIP_RETRY_DELAY).await;
            }
        }
    };
    chain.set_latest_block(latest);

    let start = match chain.start_block() {
        0 => latest,
        configured => configured,
    };
    let mut next = start.saturating_sub(chain.lookback_period).max(1);
    info!(
        chain = chain.name(),
        from = next,
        to = latest,
        lookback = chain.lookback_period,
        "catching up history"
    );

    let mut poll = tokio::time::interval(chain.block_poll);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = poll.tick() => {
                let tip = chain.latest_block();
                while next <= tip {
                    match process_block(&chain, &queue, next).await {
                        Ok(()) => next += 1,
                        Err(err) => {
                            warn!(
                                chain = chain.name(),
                                height = next,
                                error = %err,
                                "block scan failed, will retry"
                            );
                            break;
                        }
                    }
                }
            }
        }
    }
}

async fn process_block(chain: &Noble, queue: &mpsc::Sender<TxState>, height: u64) -> Result<()> {
    let txs = chain.rpc.block_txs(height).await?;
    for tx in txs {
        match tx_to_message_states(&tx) {
            Ok(msgs) if msgs.is_empty() => {}
            Ok(msgs) => {
                info!(
                    chain = chain.name(),
                    height,
                    tx_hash = %tx.hash,
                    messages = msgs.len(),
                    "new messages"
                );
                if queue.send(TxState::new(tx.hash.clone(), msgs)).await.is_err() {
                    return Ok(());
                }
            }
            // a broken transaction does not taint the rest of the block
            Err(err) => error!(
                chain = chain.name(),
                height,
                tx_hash = %tx.hash,
                error = %err,
                "unable to parse cctp message"
            ),
        }
    }
    debug!(chain = chain.name(), height, "block scanned");
    Ok(())
}

/// Extracts message states from one transaction's events.
///
/// Failed transactions (non-zero code) carry no effects and yield nothing.
/// A `MessageSent` event whose attributes all fail to decode fails the whole
/// transaction.
pub(super) fn tx_to_message_states(tx: &TxResult) -> Result<Vec<MessageState>> {
    if tx.tx_result.code != 0 {
        return Ok(Vec::new());
    }

    let mut states = Vec::new();
    for event in &tx.tx_result.events {
        if event.kind != MESSAGE_SENT_EVENT {
            continue;
        }

        let mut parsed = false;
        let mut parse_errs: Vec<String> = Vec::new();
        for attr in &event.attributes {
            if attr.key != "message" {
                continue;
            }
            // attribute values arrive JSON-quoted around the base64 payload
            let encoded = attr.value.trim_matches('"');
            let raw = match BASE64.decode(encoded) {
                Ok(raw) => raw,
                Err(err) => {
                    parse_errs.push(format!("failed to decode message: {err}"));
                    continue;
                }
            };
            match MessageState::from_raw(&tx.hash, &raw) {
                Ok(state) => {
                    parsed = true;
                    states.push(state);
                }
                Err(err) => parse_errs.push(format!("failed to parse message: {err}")),
            }
        }

        if !parsed {
            return Err(RelayerError::MalformedMessage {
                reason: format!(
                    "unable to parse cctp message in tx {}: {}",
                    tx.hash,
                    parse_errs.join("; ")
                ),
            });
        }
    }

    Ok(states)
}
