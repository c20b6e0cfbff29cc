//! EVM listener
//!
//! Three event sources are reconciled into the processing queue without gaps
//! or duplicates:
//!
//! 1. the main websocket log subscription, starting at the chain tip,
//! 2. a one-shot historical backfill covering the lookback window behind the
//!    configured start block (or the tip), and
//! 3. a periodic flush that re-scans recent history as a safety net for
//!    silently dropped websocket events.
//!
//! When the subscription ends, the epoch's stop signal cancels the consumer
//! and the flush, the start block is rewound to the last flushed height, and
//! the whole startup sequence runs again with a fresh signal.

use std::sync::Arc;
use std::time::Duration;

use alloy_provider::Provider;
use alloy_rpc_types::{Filter, Log};
use alloy_sol_types::SolEvent;
use futures_util::stream::Stream;
use futures_util::{FutureExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::contracts::MessageTransmitter::MessageSent;
use super::Ethereum;
use crate::chain::ChainAdapter;
use crate::error::{RelayerError, Result};
use crate::state::{MessageState, TxState};

/// Some websocket endpoints only allow small history queries
const HISTORY_CHUNK_SIZE: u64 = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5 * 60);
const QUERY_RETRY_DELAY: Duration = Duration::from_secs(1);
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

enum EpochEnd {
    Shutdown,
    StreamLost,
}

pub(super) async fn run(
    chain: Arc<Ethereum>,
    queue: mpsc::Sender<TxState>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        match run_epoch(&chain, &queue, &mut shutdown).await {
            EpochEnd::Shutdown => return,
            EpochEnd::StreamLost => {
                warn!(chain = chain.name(), "websocket disconnected, reconnecting");
                chain.set_start_block(chain.last_flushed_block());
                tokio::time::sleep(RESUBSCRIBE_DELAY).await;
            }
        }
    }
}

/// One listener epoch: subscribe, backfill, flush, and wait for either the
/// stream to lapse or shutdown.
async fn run_epoch(
    chain: &Arc<Ethereum>,
    queue: &mpsc::Sender<TxState>,
    shutdown: &mut watch::Receiver<bool>,
) -> EpochEnd {
    info!(chain = chain.name(), "starting listener");

    // subscribe before backfilling so no event falls between the two
    let mut attempt = 1u32;
    let subscription = loop {
        if *shutdown.borrow() {
            return EpochEnd::Shutdown;
        }
        let latest = match chain.ws_provider.get_block_number().await {
            Ok(height) => height,
            Err(err) => {
                warn!(chain = chain.name(), attempt, error = %err, "unable to query chain tip");
                attempt += 1;
                tokio::time::sleep(QUERY_RETRY_DELAY).await;
                continue;
            }
        };
        chain.set_latest_block(latest);

        let filter = subscription_filter(chain).from_block(latest);
        match chain.ws_provider.subscribe_logs(&filter).await {
            Ok(subscription) => break subscription,
            Err(err) => {
                warn!(chain = chain.name(), attempt, error = %err, "unable to subscribe to logs");
                attempt += 1;
                tokio::time::sleep(QUERY_RETRY_DELAY).await;
            }
        }
    };

    // one-shot broadcast: closing the channel wakes the consumer and the
    // flush together; a fresh signal is allocated each epoch
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut consumer = tokio::spawn(consume_stream(
        chain.clone(),
        subscription.into_stream(),
        queue.clone(),
        stop_rx.clone(),
    ));

    let latest = chain.latest_block();
    let start = match chain.start_block() {
        0 => latest,
        configured => configured,
    };
    let from = start.saturating_sub(chain.lookback_period);
    info!(
        chain = chain.name(),
        from,
        to = latest,
        lookback = chain.lookback_period,
        "backfilling history"
    );
    backfill(chain, queue, from, latest).await;
    info!(chain = chain.name(), "finished backfilling history");

    // anchor the first flush window at the tip rather than genesis
    if chain.last_flushed_block() == 0 {
        chain.set_last_flushed_block(latest);
    }

    let flusher = tokio::spawn(flush_loop(chain.clone(), queue.clone(), stop_rx));

    tokio::select! {
        _ = shutdown.changed() => {
            let _ = stop_tx.send(true);
            consumer.abort();
            flusher.abort();
            EpochEnd::Shutdown
        }
        _ = &mut consumer => {
            let _ = stop_tx.send(true);
            let _ = flusher.await;
            EpochEnd::StreamLost
        }
    }
}

fn subscription_filter(chain: &Ethereum) -> Filter {
    Filter::new()
        .address(chain.message_transmitter)
        .event_signature(MessageSent::SIGNATURE_HASH)
}

/// Consumes the live stream, grouping consecutive events that share a source
/// transaction hash into one [`TxState`]. A group is flushed when a different
/// hash arrives or the stream goes idle. Returns when the subscription lapses.
async fn consume_stream(
    chain: Arc<Ethereum>,
    mut stream: impl Stream<Item = Log> + Unpin,
    queue: mpsc::Sender<TxState>,
    mut stop: watch::Receiver<bool>,
) {
    debug!(chain = chain.name(), "consuming incoming messages");
    let mut pending: Option<TxState> = None;
    loop {
        tokio::select! {
            _ = stop.changed() => {
                debug!(chain = chain.name(), "stopped consuming stream");
                return;
            }
            next = stream.next() => {
                let Some(log) = next else {
                    if let Some(tx) = pending.take() {
                        let _ = queue.send(tx).await;
                    }
                    return;
                };
                absorb(&chain, log, &mut pending, &queue).await;

                // drain whatever the subscription already buffered, then
                // treat the stream as idle and flush the open group
                while let Some(Some(log)) = stream.next().now_or_never() {
                    absorb(&chain, log, &mut pending, &queue).await;
                }
                if let Some(tx) = pending.take() {
                    let _ = queue.send(tx).await;
                }
            }
        }
    }
}

async fn absorb(
    chain: &Ethereum,
    log: Log,
    pending: &mut Option<TxState>,
    queue: &mpsc::Sender<TxState>,
) {
    let msg = match parse_log(&log) {
        Ok(msg) => msg,
        Err(err) => {
            error!(
                chain = chain.name(),
                error = %err,
                "unable to parse stream log into a message, skipping"
            );
            return;
        }
    };
    info!(
        chain = chain.name(),
        source_domain = %msg.source_domain,
        tx_hash = %msg.source_tx_hash,
        "new stream message"
    );

    match pending.take() {
        None => *pending = Some(TxState::for_message(msg)),
        Some(mut tx) if tx.tx_hash == msg.source_tx_hash => {
            tx.msgs.push(msg);
            *pending = Some(tx);
        }
        Some(tx) => {
            let _ = queue.send(tx).await;
            *pending = Some(TxState::for_message(msg));
        }
    }
}

fn parse_log(log: &Log) -> Result<MessageState> {
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| RelayerError::MalformedMessage {
            reason: "log has no transaction hash".into(),
        })?;
    let decoded = MessageSent::abi_decode_data(&log.data().data)?;
    MessageState::from_raw(&tx_hash.to_string(), &decoded.0)
}

/// Splits `[start, end]` into inclusive chunks of at most `chunk` blocks.
/// Consecutive chunks share a boundary block; the resulting duplicate logs
/// are absorbed by the state store.
pub(super) fn chunk_ranges(start: u64, end: u64, chunk: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    let mut cursor = start;
    while cursor < end {
        ranges.push((cursor, end.min(cursor + chunk)));
        cursor += chunk;
    }
    ranges
}

/// Queries history in chunks and forwards the parsed logs to the queue,
/// grouped by source transaction hash. A transaction's logs always sit in one
/// block, so per-chunk grouping is complete. Chunk queries retry until they
/// succeed.
async fn backfill(chain: &Ethereum, queue: &mpsc::Sender<TxState>, start: u64, end: u64) {
    for (from, to) in chunk_ranges(start, end, HISTORY_CHUNK_SIZE) {
        debug!(chain = chain.name(), from, to, "querying history chunk");
        let filter = subscription_filter(chain).from_block(from).to_block(to);

        let mut attempt = 1u32;
        let logs = loop {
            match chain.ws_provider.get_logs(&filter).await {
                Ok(logs) => break logs,
                Err(err) => {
                    warn!(
                        chain = chain.name(),
                        from,
                        to,
                        attempt,
                        error = %err,
                        "unable to query history chunk"
                    );
                    attempt += 1;
                    tokio::time::sleep(QUERY_RETRY_DELAY).await;
                }
            }
        };

        let mut pending: Option<TxState> = None;
        for log in logs {
            let msg = match parse_log(&log) {
                Ok(msg) => msg,
                Err(err) => {
                    error!(
                        chain = chain.name(),
                        error = %err,
                        "unable to parse history log into a message, skipping"
                    );
                    continue;
                }
            };
            info!(
                chain = chain.name(),
                source_domain = %msg.source_domain,
                tx_hash = %msg.source_tx_hash,
                "new historical message"
            );
            match pending.take() {
                None => pending = Some(TxState::for_message(msg)),
                Some(mut tx) if tx.tx_hash == msg.source_tx_hash => {
                    tx.msgs.push(msg);
                    pending = Some(tx);
                }
                Some(tx) => {
                    if queue.send(tx).await.is_err() {
                        return;
                    }
                    pending = Some(TxState::for_message(msg));
                }
            }
        }
        if let Some(tx) = pending {
            if queue.send(tx).await.is_err() {
                return;
            }
        }
    }
}

/// Every five minutes, re-scans `[last_flushed - lookback, latest]` and
/// advances the flush cursor. Stops when the epoch's signal fires.
async fn flush_loop(
    chain: Arc<Ethereum>,
    queue: mpsc::Sender<TxState>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => {
                debug!(
                    chain = chain.name(),
                    "flush stopped, will restart once the stream is re-established"
                );
                return;
            }
            _ = tokio::time::sleep(FLUSH_INTERVAL) => {
                let latest = chain.latest_block();
                let start = chain.last_flushed_block().saturating_sub(chain.lookback_period);
                info!(chain = chain.name(), from = start, to = latest, "flush started");
                backfill(&chain, &queue, start, latest).await;
                chain.set_last_flushed_block(latest);
                info!(chain = chain.name(), "flush complete");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_ranges_exact_multiple() {
        assert_eq!(
            chunk_ranges(0, 200, 100),
            vec![(0, 100), (100, 200)]
        );
    }

    #[test]
    fn test_chunk_ranges_remainder() {
        assert_eq!(
            chunk_ranges(0, 250, 100),
            vec![(0, 100), (100, 200), (200, 250)]
        );
    }

    #[test]
    fn test_chunk_ranges_small_window() {
        assert_eq!(chunk_ranges(10, 15, 100), vec![(10, 15)]);
    }

    #[test]
    fn test_chunk_ranges_empty_window() {
        assert!(chunk_ranges(100, 100, 100).is_empty());
        assert!(chunk_ranges(200, 100, 100).is_empty());
    }

    #[test]
    fn test_chunk_ranges_cover_flush_window() {
        // a flush re-scan of [last_flushed - lookback, latest] must cover
        // every block in the window exactly once per chunk boundary
        let last_flushed = 1_000u64;
        let lookback = 150u64;
        let latest = 1_300u64;
        let ranges = chunk_ranges(last_flushed - lookback, latest, 100);

        assert_eq!(ranges.first().map(|r| r.0), Some(850));
        assert_eq!(ranges.last().map(|r| r.1), Some(1_300));
        for window in ranges.windows(2) {
            assert_eq!(window[0].1, window[1].0);
        }
    }
}
