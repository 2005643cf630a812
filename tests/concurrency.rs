//! Concurrent mutation tests.

use custody_ledger::{
    BusinessStep, ChainId, ChainStatus, CreateChainInput, Disposition, ErrorKind, EventType,
    Ledger, LedgerError, MergeRequest, ProductType, Quantity, RecordEventInput, SplitRequest,
    Unit,
};
use std::sync::{Arc, Barrier};
use std::thread;

fn kg(n: i64) -> Quantity {
    Quantity::whole(n)
}

fn create(ledger: &Ledger, code: &str, total: i64) -> ChainId {
    ledger
        .create_chain(CreateChainInput::new(code, ProductType::Ffb, kg(total), Unit::Kilogram))
        .unwrap()
        .id
}

#[test]
fn test_concurrent_splits_never_overdraw() {
    let ledger = Arc::new(Ledger::in_memory());
    let source = create(&ledger, "FFB-1", 1000);

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut taken = Vec::new();
                loop {
                    match ledger.split(source, SplitRequest::new([kg(30)])) {
                        Ok(children) => taken.push(children[0].id),
                        Err(LedgerError::InsufficientQuantity { .. }) => break,
                        Err(e) if e.is_retryable() => continue,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                taken
            })
        })
        .collect();

    let children: Vec<ChainId> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    // 33 splits of 30 kg fit into 1000 kg
    assert_eq!(children.len(), 33);
    let source_chain = ledger.get_chain(source).unwrap();
    assert_eq!(source_chain.remaining_quantity, kg(10));
    assert_eq!(source_chain.child_chain_ids.len(), 33);

    let mut codes: Vec<_> = children
        .iter()
        .map(|id| ledger.get_chain(*id).unwrap().chain_code.clone())
        .collect();
    codes.sort();
    codes.dedup();
    assert_eq!(codes.len(), 33);

    let report = ledger.validate_mass_balance(source).unwrap();
    assert!(report.is_valid, "{:?}", report.discrepancies);
    assert_eq!(report.total_output, kg(1000));
}

#[test]
fn test_overlapping_merges_claim_each_source_once() {
    let ledger = Arc::new(Ledger::in_memory());
    let ids: Vec<_> = (0..6).map(|i| create(&ledger, &format!("FFB-{}", i), 100)).collect();

    // Every pair of neighbours races for a shared chain
    let barrier = Arc::new(Barrier::new(ids.len()));
    let handles: Vec<_> = (0..ids.len())
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            let pair = vec![ids[i], ids[(i + 1) % ids.len()]];
            thread::spawn(move || {
                barrier.wait();
                ledger.merge(MergeRequest::new(pair, "MILL-1"))
            })
        })
        .collect();

    let mut merged = Vec::new();
    for handle in handles {
        match handle.join().unwrap() {
            Ok(chain) => merged.push(chain),
            Err(e) => assert!(
                matches!(e.kind(), ErrorKind::InvalidEvent | ErrorKind::InsufficientQuantity | ErrorKind::ConcurrencyConflict),
                "unexpected error: {}",
                e
            ),
        }
    }

    assert!(!merged.is_empty());
    let consumed: usize = merged.iter().map(|c| c.parent_chain_ids.len()).sum();
    let merged_sources = ids
        .iter()
        .filter(|id| ledger.get_chain(**id).unwrap().status == ChainStatus::Merged)
        .count();
    assert_eq!(consumed, merged_sources);

    for chain in &merged {
        assert_eq!(chain.total_quantity, kg(200));
        let report = ledger.validate_mass_balance(chain.id).unwrap();
        assert!(report.is_valid, "{:?}", report.discrepancies);
    }
}

#[test]
fn test_readers_see_consistent_snapshots() {
    let ledger = Arc::new(Ledger::in_memory());
    let source = create(&ledger, "FFB-1", 500);

    let writer = {
        let ledger = Arc::clone(&ledger);
        thread::spawn(move || {
            for _ in 0..50 {
                ledger
                    .record_event(
                        RecordEventInput::new(source, EventType::Processing, BusinessStep::Processing, Disposition::Active)
                            .with_quantity(kg(-10)),
                    )
                    .unwrap();
            }
        })
    };

    let reader = {
        let ledger = Arc::clone(&ledger);
        thread::spawn(move || {
            for _ in 0..200 {
                let chain = ledger.get_chain(source).unwrap();
                let events: Vec<_> = ledger.list_events(source).unwrap().collect();
                assert!(chain.remaining_quantity >= Quantity::ZERO);
                assert!(chain.remaining_quantity <= chain.total_quantity);
                assert!(events.len() >= 1);
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();

    let chain = ledger.get_chain(source).unwrap();
    assert_eq!(chain.remaining_quantity, Quantity::ZERO);
    assert_eq!(chain.status, ChainStatus::Consumed);
    assert_eq!(chain.event_count, 51);
}

#[test]
fn test_concurrent_creation_with_same_code() {
    let ledger = Arc::new(Ledger::in_memory());
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ledger.create_chain(CreateChainInput::new("LOT-1", ProductType::Ffb, kg(10), Unit::Kilogram))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.into_iter().filter_map(|r| r.err()) {
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    assert_eq!(ledger.stats().chain_count, 1);
}
