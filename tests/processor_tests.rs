//! Integration tests for the processing pipeline
//!
//! Driven entirely through the fakes in `cctp_relayer::testing`: a scripted
//! attestation client and mock chain adapters stand in for Iris and the
//! destination chains, while the state store, sequence map and processor are
//! the real thing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Bytes, FixedBytes, U256};
use tokio::sync::mpsc;

use cctp_relayer::testing::{FakeAttestationClient, MockChain};
use cctp_relayer::{
    AttestationResponse, AttestationStatus, BurnMessage, Domain, Message, MessageState, Processor,
    Registry, SequenceMap, StateStore, Status, TxState,
};

const NOBLE_MINTER: [u8; 32] = [2u8; 32];

fn burn_body() -> Bytes {
    BurnMessage {
        version: 0,
        burn_token: FixedBytes::from([9u8; 32]),
        mint_recipient: FixedBytes::from([8u8; 32]),
        amount: U256::from(1_000_000u64),
        message_sender: FixedBytes::from([7u8; 32]),
    }
    .encode()
}

fn raw_message(dest: Domain, nonce: u64, caller: [u8; 32]) -> Bytes {
    Message {
        version: 0,
        source_domain: Domain::ETHEREUM,
        destination_domain: dest,
        nonce,
        sender: FixedBytes::from([1u8; 32]),
        recipient: FixedBytes::from([2u8; 32]),
        destination_caller: FixedBytes::from(caller),
        body: burn_body(),
    }
    .encode()
}

fn tx_state(tx_hash: &str, raws: &[Bytes]) -> TxState {
    let msgs: Vec<MessageState> = raws
        .iter()
        .map(|raw| MessageState::from_raw(tx_hash, raw).unwrap())
        .collect();
    TxState::new(tx_hash, msgs)
}

fn complete_response(blob: &[u8]) -> AttestationResponse {
    AttestationResponse {
        status: AttestationStatus::Complete,
        attestation: Some(Bytes::copy_from_slice(blob)),
    }
}

fn pending_response() -> AttestationResponse {
    AttestationResponse {
        status: AttestationStatus::PendingConfirmations,
        attestation: None,
    }
}

struct Harness {
    processor: Processor,
    store: StateStore,
    attester: FakeAttestationClient,
    noble: Arc<MockChain>,
    #[allow(dead_code)]
    queue_rx: mpsc::Receiver<TxState>,
}

fn harness(routes: HashMap<Domain, Vec<Domain>>) -> Harness {
    let store = StateStore::new();
    let attester = FakeAttestationClient::new();
    let noble = Arc::new(
        MockChain::new("noble", Domain::NOBLE).with_valid_caller(FixedBytes::from(NOBLE_MINTER)),
    );

    let mut registry = Registry::new();
    registry.register(noble.clone()).unwrap();
    registry
        .register(Arc::new(MockChain::new("extra", Domain(5))))
        .unwrap();

    let (queue_tx, queue_rx) = mpsc::channel(64);
    let processor = Processor::builder()
        .store(store.clone())
        .registry(Arc::new(registry))
        .attester(Arc::new(attester.clone()))
        .sequence_map(Arc::new(SequenceMap::new()))
        .enabled_routes(routes)
        .queue(queue_tx)
        .retry_delay(Duration::from_millis(1))
        .build();

    Harness {
        processor,
        store,
        attester,
        noble,
        queue_rx,
    }
}

fn default_routes() -> HashMap<Domain, Vec<Domain>> {
    HashMap::from([(Domain::ETHEREUM, vec![Domain::NOBLE])])
}

fn status_of(store: &StateStore, tx_hash: &str, index: usize) -> Status {
    store.get(tx_hash).unwrap().msgs[index].status
}

#[tokio::test]
async fn happy_path_evm_to_noble() {
    let h = harness(default_routes());
    let tx = tx_state("0xhappy", &[raw_message(Domain::NOBLE, 42, NOBLE_MINTER)]);
    let lookup_id = tx.msgs[0].iris_lookup_id.clone();

    h.attester.add_response_sequence(
        lookup_id.clone(),
        vec![Some(pending_response()), Some(complete_response(&[0xab]))],
    );

    // first pass: pending confirmations moves the message to Pending
    let requeued = h.processor.process(tx).await.expect("should requeue");
    assert_eq!(status_of(&h.store, "0xhappy", 0), Status::Pending);
    assert_eq!(h.noble.broadcast_count(), 0);

    // second pass: attestation completes, one broadcast, terminal Complete
    let done = h.processor.process(requeued).await;
    assert!(done.is_none());
    assert_eq!(status_of(&h.store, "0xhappy", 0), Status::Complete);
    assert_eq!(h.noble.broadcast_count(), 1);

    let stored = h.store.get("0xhappy").unwrap();
    assert_eq!(stored.msgs[0].attestation, Some(Bytes::from(vec![0xab])));
    assert!(stored.is_terminal());
}

#[tokio::test]
async fn multi_message_tx_completes_across_passes() {
    let h = harness(default_routes());
    let tx = tx_state(
        "0xmulti",
        &[
            raw_message(Domain::NOBLE, 1, NOBLE_MINTER),
            raw_message(Domain::NOBLE, 2, NOBLE_MINTER),
        ],
    );
    let first_id = tx.msgs[0].iris_lookup_id.clone();
    let second_id = tx.msgs[1].iris_lookup_id.clone();

    // only the first message is attested on the first pass
    h.attester.add_complete(first_id, complete_response(&[0x01]));
    h.attester.add_response_sequence(
        second_id,
        vec![Some(pending_response()), Some(complete_response(&[0x02]))],
    );

    let requeued = h.processor.process(tx).await.expect("should requeue");
    assert_eq!(status_of(&h.store, "0xmulti", 0), Status::Complete);
    assert_eq!(status_of(&h.store, "0xmulti", 1), Status::Pending);

    let done = h.processor.process(requeued).await;
    assert!(done.is_none());
    assert_eq!(status_of(&h.store, "0xmulti", 0), Status::Complete);
    assert_eq!(status_of(&h.store, "0xmulti", 1), Status::Complete);

    // one broadcast per pass, each carrying the newly attested message
    let broadcasts = h.noble.broadcasts();
    assert_eq!(broadcasts.len(), 2);
    assert_eq!(broadcasts[0].len(), 1);
    assert_eq!(broadcasts[1].len(), 1);
    assert_eq!(broadcasts[0][0].nonce, 1);
    assert_eq!(broadcasts[1][0].nonce, 2);
}

#[tokio::test]
async fn disabled_route_is_filtered_without_attestation() {
    let h = harness(default_routes());
    // destination domain 5 is registered but not routed
    let tx = tx_state("0xroute", &[raw_message(Domain(5), 7, [0u8; 32])]);
    let lookup_id = tx.msgs[0].iris_lookup_id.clone();

    let done = h.processor.process(tx).await;
    assert!(done.is_none());
    assert_eq!(status_of(&h.store, "0xroute", 0), Status::Filtered);
    assert_eq!(h.attester.call_count(&lookup_id), 0);
    assert_eq!(h.noble.broadcast_count(), 0);
}

#[tokio::test]
async fn wrong_destination_caller_is_filtered() {
    let h = harness(default_routes());
    let tx = tx_state("0xcaller", &[raw_message(Domain::NOBLE, 9, [0x11u8; 32])]);
    let lookup_id = tx.msgs[0].iris_lookup_id.clone();

    let done = h.processor.process(tx).await;
    assert!(done.is_none());
    assert_eq!(status_of(&h.store, "0xcaller", 0), Status::Filtered);
    assert_eq!(h.attester.call_count(&lookup_id), 0);
}

#[tokio::test]
async fn zero_caller_is_permissionless() {
    let h = harness(default_routes());
    let tx = tx_state("0xzero", &[raw_message(Domain::NOBLE, 10, [0u8; 32])]);
    let lookup_id = tx.msgs[0].iris_lookup_id.clone();
    h.attester.add_complete(lookup_id, complete_response(&[0xcd]));

    let done = h.processor.process(tx).await;
    assert!(done.is_none());
    assert_eq!(status_of(&h.store, "0xzero", 0), Status::Complete);
}

#[tokio::test]
async fn broadcast_failure_then_success() {
    let h = harness(default_routes());
    let tx = tx_state("0xretry", &[raw_message(Domain::NOBLE, 11, NOBLE_MINTER)]);
    let lookup_id = tx.msgs[0].iris_lookup_id.clone();
    h.attester.add_complete(lookup_id, complete_response(&[0xee]));
    h.noble.push_broadcast_failure("destination rejected");

    // first pass: attested, broadcast fails, status stays Attested
    let requeued = h.processor.process(tx).await.expect("should requeue");
    assert_eq!(status_of(&h.store, "0xretry", 0), Status::Attested);
    assert_eq!(h.noble.broadcast_count(), 1);

    // second pass: the attested message rejoins the batch and completes
    let done = h.processor.process(requeued).await;
    assert!(done.is_none());
    assert_eq!(status_of(&h.store, "0xretry", 0), Status::Complete);
    assert_eq!(h.noble.broadcast_count(), 2);
}

#[tokio::test]
async fn replay_preserves_first_observation() {
    let h = harness(default_routes());
    let tx = tx_state("0xreplay", &[raw_message(Domain::NOBLE, 12, NOBLE_MINTER)]);
    let lookup_id = tx.msgs[0].iris_lookup_id.clone();
    h.attester.add_complete(lookup_id, complete_response(&[0x42]));

    assert!(h.processor.process(tx.clone()).await.is_none());
    let first = h.store.get("0xreplay").unwrap();
    assert_eq!(first.msgs[0].status, Status::Complete);

    // the flush re-observes the same transaction; nothing regresses and no
    // second broadcast happens
    assert!(h.processor.process(tx).await.is_none());
    let second = h.store.get("0xreplay").unwrap();
    assert_eq!(second.msgs[0].status, Status::Complete);
    assert_eq!(second.msgs[0].created, first.msgs[0].created);
    assert_eq!(h.noble.broadcast_count(), 1);
}

#[tokio::test]
async fn transport_failure_requeues() {
    let h = harness(default_routes());
    let tx = tx_state("0xnil", &[raw_message(Domain::NOBLE, 13, NOBLE_MINTER)]);
    let lookup_id = tx.msgs[0].iris_lookup_id.clone();
    // no script: every poll returns None, as on a transport error

    let requeued = h.processor.process(tx).await;
    assert!(requeued.is_some());
    assert_eq!(status_of(&h.store, "0xnil", 0), Status::Created);
    assert_eq!(h.attester.call_count(&lookup_id), 1);
}

#[tokio::test]
async fn unknown_destination_domain_is_filtered() {
    let h = harness(HashMap::from([(Domain::ETHEREUM, vec![Domain(9)])]));
    // route is enabled but no chain is registered for domain 9
    let tx = tx_state("0xnochain", &[raw_message(Domain(9), 14, [0u8; 32])]);

    let done = h.processor.process(tx).await;
    assert!(done.is_none());
    assert_eq!(status_of(&h.store, "0xnochain", 0), Status::Filtered);
}

#[tokio::test]
async fn worker_drains_queue_until_shutdown() {
    let h = harness(default_routes());
    let tx = tx_state("0xworker", &[raw_message(Domain::NOBLE, 15, NOBLE_MINTER)]);
    let lookup_id = tx.msgs[0].iris_lookup_id.clone();
    h.attester.add_complete(lookup_id, complete_response(&[0x55]));

    let (work_tx, work_rx) = mpsc::channel(8);
    let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let processor = Arc::new(h.processor);
    let worker = tokio::spawn(processor.clone().run(work_rx, shutdown_rx));

    work_tx.send(tx).await.unwrap();

    // wait for the worker to finish the transaction
    for _ in 0..100 {
        if h.store
            .get("0xworker")
            .is_some_and(|tx| tx.is_terminal())
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status_of(&h.store, "0xworker", 0), Status::Complete);

    shutdown_tx.send(true).unwrap();
    worker.await.unwrap();
}
