//! End-to-end flow: engine -> simulated coordinator -> raw logs -> listener -> engine.

use alloy_primitives::Address;
use crossbeam_channel::unbounded;
use packmint_chain::{
    encode_fulfilled, DispatchOutcome, FulfillmentListener, LedgerCall, LedgerOutbox,
    ListenerConfig, SimulatedCoordinator,
};
use packmint_engine::{
    DistributionEngine, DistributionError, EngineConfig, ItemDefinition, MemoryLedger, Rarity,
    RequestStatus,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn coordinator_address() -> Address {
    Address::repeat_byte(0xC0)
}

fn buyer() -> Address {
    Address::repeat_byte(0x11)
}

fn config() -> EngineConfig {
    EngineConfig::new(5, 50, coordinator_address())
        .with_item(ItemDefinition::new(1, "Squire", Rarity::Common))
        .with_item(ItemDefinition::new(10, "Knight", Rarity::Uncommon))
        .with_item(ItemDefinition::new(20, "Paladin", Rarity::Rare))
        .with_item(ItemDefinition::new(30, "Archmage", Rarity::Mythical).with_max_issuance(2))
        .with_item(ItemDefinition::new(40, "Crown #1", Rarity::Serialized).with_max_issuance(1))
}

fn simulated_engine(
    seed: u64,
) -> (
    DistributionEngine<Arc<SimulatedCoordinator>, MemoryLedger>,
    Arc<SimulatedCoordinator>,
) {
    let simulator = Arc::new(SimulatedCoordinator::new(coordinator_address(), seed));
    let engine =
        DistributionEngine::from_config(&config(), Arc::clone(&simulator), MemoryLedger::new())
            .unwrap();
    (engine, simulator)
}

#[test]
fn test_logs_flow_into_fulfilled_packs() {
    let (engine, simulator) = simulated_engine(11);
    let listener = FulfillmentListener::new(ListenerConfig::new(coordinator_address()));

    for _ in 0..10 {
        engine.open_pack(buyer()).unwrap();
    }
    assert_eq!(simulator.pending(), 10);

    let mut log_index = 0;
    while let Some((topics, data)) = simulator.emit_next_log() {
        listener.process_raw_log(&topics, &data, 1, log_index).unwrap();
        log_index += 1;
    }

    let report = listener.dispatch(&engine);

    assert_eq!(report.openings.len(), 10);
    assert!(report.rejected.is_empty());
    assert_eq!(engine.pending_requests(), 0);
    assert_eq!(engine.gateway().total_of(buyer()), 50);
    assert!(engine.item(30).unwrap().supply.current <= 2);
    assert!(engine.item(40).unwrap().supply.current <= 1);
    assert!(engine
        .requests_of(buyer())
        .iter()
        .all(|request| request.status == RequestStatus::Fulfilled));
}

#[test]
fn test_redelivered_log_counts_as_duplicate() {
    let (engine, simulator) = simulated_engine(3);
    let listener = FulfillmentListener::new(ListenerConfig::new(coordinator_address()));
    engine.open_pack(buyer()).unwrap();

    let fulfilled = simulator.fulfill_next().unwrap();
    let (topics, data) = encode_fulfilled(fulfilled.request_id, &fulfilled.words);
    listener.process_raw_log(&topics, &data, 7, 0).unwrap();
    listener.process_raw_log(&topics, &data, 7, 0).unwrap();

    let report = listener.dispatch(&engine);

    assert_eq!(report.openings.len(), 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(listener.stats().duplicates.load(Ordering::Relaxed), 1);
    assert_eq!(engine.gateway().total_of(buyer()), 5);
}

#[test]
fn test_listener_with_wrong_address_is_refused() {
    let (engine, simulator) = simulated_engine(5);
    let spoofer = Address::repeat_byte(0x66);
    let listener = FulfillmentListener::new(ListenerConfig::new(spoofer));
    let id = engine.open_pack(buyer()).unwrap();

    listener.inject(simulator.fulfill_next().unwrap()).unwrap();
    let report = listener.dispatch(&engine);

    assert_eq!(report.rejected.len(), 1);
    assert_eq!(
        report.rejected[0].1,
        DistributionError::Unauthorized { caller: spoofer }
    );
    assert_eq!(engine.request(id).unwrap().status, RequestStatus::Pending);
    assert_eq!(engine.gateway().total_supply(), 0);
}

#[test]
fn test_offline_coordinator_returns_emission() {
    let (engine, simulator) = simulated_engine(9);
    simulator.set_offline(true);

    assert!(matches!(
        engine.open_pack(buyer()),
        Err(DistributionError::RandomnessUnavailable(_))
    ));
    assert_eq!(engine.total_emission(), 0);
}

#[test]
fn test_run_loop_streams_outcomes() {
    let (engine, simulator) = simulated_engine(21);
    let listener = FulfillmentListener::new(ListenerConfig::new(coordinator_address()));
    let (outcome_tx, outcome_rx) = unbounded();
    for _ in 0..2 {
        engine.open_pack(buyer()).unwrap();
    }

    std::thread::scope(|scope| {
        let runner = scope.spawn(|| listener.run(&engine, &outcome_tx));
        while !listener.is_running() {
            std::thread::yield_now();
        }

        let first = simulator.fulfill_next().unwrap();
        listener.inject(first).unwrap();
        assert!(matches!(
            outcome_rx.recv().unwrap(),
            DispatchOutcome::Fulfilled(opening) if opening.slots.len() == 5
        ));

        // A short callback is refused but the request stays open.
        let second = simulator.fulfill_next().unwrap();
        let mut short = second.clone();
        short.words.truncate(2);
        listener.inject(short).unwrap();
        let DispatchOutcome::Rejected(refused, error) = outcome_rx.recv().unwrap() else {
            panic!("short callback was not rejected");
        };
        assert!(matches!(error, DistributionError::RandomnessLengthMismatch { .. }));
        assert_eq!(
            engine.request(refused.request_id).unwrap().status,
            RequestStatus::Pending
        );

        // Redelivered while the loop is still running.
        listener.inject(second.clone()).unwrap();
        assert!(matches!(outcome_rx.recv().unwrap(), DispatchOutcome::Fulfilled(_)));
        listener.inject(second).unwrap();
        assert!(matches!(outcome_rx.recv().unwrap(), DispatchOutcome::Duplicate(_)));

        listener.stop();
        runner.join().unwrap();
    });

    assert!(outcome_rx.try_recv().is_err());
    assert_eq!(engine.pending_requests(), 0);
    let stats = listener.stats();
    assert_eq!(stats.accepted.load(Ordering::Relaxed), 2);
    assert_eq!(stats.rejected.load(Ordering::Relaxed), 1);
    assert_eq!(stats.duplicates.load(Ordering::Relaxed), 1);
}

#[test]
fn test_engine_mints_into_ledger_outbox() {
    let simulator = Arc::new(SimulatedCoordinator::new(coordinator_address(), 1));
    let engine =
        DistributionEngine::from_config(&config(), Arc::clone(&simulator), LedgerOutbox::new(64))
            .unwrap();

    let id = engine.open_pack(buyer()).unwrap();
    let fulfilled = simulator.fulfill(id).unwrap();
    engine
        .fulfill(coordinator_address(), id, &fulfilled.words)
        .unwrap();

    let calls = engine.gateway().drain();
    assert_eq!(calls.len(), 5);
    assert!(calls
        .iter()
        .all(|call| matches!(call, LedgerCall::Mint { to, amount: 1, .. } if *to == buyer())));
}
