//! Durability tests: replay, torn tails and corruption.

use custody_ledger::{
    BusinessStep, ChainStatus, CreateChainInput, Disposition, EventType, Ledger, LedgerConfig,
    LedgerError, MergeRequest, OutputSpec, ProductType, Quantity, RecordEventInput, SplitRequest,
    Unit,
};
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

fn kg(n: i64) -> Quantity {
    Quantity::whole(n)
}

/// Surface recovery warnings with `RUST_LOG=custody_ledger=debug`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn open(dir: &TempDir) -> Ledger {
    Ledger::open(LedgerConfig::durable(dir.path().join("ledger"))).unwrap()
}

/// Populate a ledger with every kind of mutation.
fn populate(ledger: &Ledger) {
    let a = ledger
        .create_chain(CreateChainInput::new("FFB-A", ProductType::Ffb, kg(600), Unit::Kilogram).from_plot("PLOT-A"))
        .unwrap();
    let b = ledger
        .create_chain(CreateChainInput::new("FFB-B", ProductType::Ffb, kg(400), Unit::Kilogram))
        .unwrap();
    let merged = ledger.merge(MergeRequest::new(vec![a.id, b.id], "MILL-1")).unwrap();
    ledger
        .record_event(
            RecordEventInput::new(merged.id, EventType::Transformation, BusinessStep::Processing, Disposition::Active)
                .with_quantity(kg(-1000))
                .with_output(OutputSpec::new(ProductType::Cpo, kg(200)))
                .with_notes("line 2"),
        )
        .unwrap();
    let cpo = ledger.descendants(merged.id).unwrap().remove(0);
    ledger.split(cpo.id, SplitRequest::new([kg(120), kg(30)])).unwrap();
}

#[test]
fn test_reopen_replays_identical_state() {
    init_tracing();
    let dir = TempDir::new().unwrap();

    let (chains, events, digest) = {
        let ledger = open(&dir);
        populate(&ledger);
        let chains: Vec<_> = ledger.list_chains().iter().map(|c| (**c).clone()).collect();
        let events: Vec<_> = chains
            .iter()
            .flat_map(|c| ledger.list_events(c.id).unwrap().map(|e| (*e.unwrap()).clone()))
            .collect();
        let digest = ledger.custody_digest(chains[0].id).unwrap();
        (chains, events, digest)
    };

    let ledger = open(&dir);
    let reopened: Vec<_> = ledger.list_chains().iter().map(|c| (**c).clone()).collect();
    assert_eq!(reopened, chains);

    let replayed: Vec<_> = reopened
        .iter()
        .flat_map(|c| ledger.list_events(c.id).unwrap().map(|e| (*e.unwrap()).clone()))
        .collect();
    assert_eq!(replayed, events);
    assert_eq!(ledger.custody_digest(reopened[0].id).unwrap(), digest);

    let report = ledger.validate_mass_balance(reopened[0].id).unwrap();
    assert!(report.is_valid, "{:?}", report.discrepancies);
    assert_eq!(report.total_input, kg(1000));
}

#[test]
fn test_writes_continue_after_reopen() {
    let dir = TempDir::new().unwrap();
    let first_id = {
        let ledger = open(&dir);
        ledger
            .create_chain(CreateChainInput::new("CPO-1", ProductType::Cpo, kg(100), Unit::Kilogram))
            .unwrap()
            .id
    };

    let ledger = open(&dir);
    let second = ledger
        .create_chain(CreateChainInput::new("CPO-2", ProductType::Cpo, kg(50), Unit::Kilogram))
        .unwrap();
    assert!(second.id > first_id);

    // Codes survive the restart
    let err = ledger
        .create_chain(CreateChainInput::new("CPO-1", ProductType::Cpo, kg(1), Unit::Kilogram))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let merged = ledger
        .merge(MergeRequest::new(vec![first_id, second.id], "TANK-1"))
        .unwrap();
    assert_eq!(merged.total_quantity, kg(150));
    let events = ledger.stats().event_count;
    drop(ledger);

    let ledger = open(&dir);
    assert_eq!(ledger.stats().event_count, events);
    assert_eq!(ledger.get_chain(first_id).unwrap().status, ChainStatus::Merged);
}

#[test]
fn test_torn_tail_is_truncated() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let chain_id = {
        let ledger = open(&dir);
        let chain = ledger
            .create_chain(CreateChainInput::new("FFB-1", ProductType::Ffb, kg(100), Unit::Kilogram))
            .unwrap();
        ledger.split(chain.id, SplitRequest::new([kg(10)])).unwrap();
        chain.id
    };

    // Simulate a crash in the middle of writing the next batch
    let log_path = dir.path().join("ledger").join("events.log");
    let intact_len = std::fs::metadata(&log_path).unwrap().len();
    {
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(b"BAT\0\xff\x00\x00\x00partial").unwrap();
    }

    let ledger = open(&dir);
    assert_eq!(std::fs::metadata(&log_path).unwrap().len(), intact_len);
    assert_eq!(ledger.get_chain(chain_id).unwrap().remaining_quantity, kg(90));
    assert_eq!(ledger.stats().event_count, 3);

    ledger.split(chain_id, SplitRequest::new([kg(90)])).unwrap();
    drop(ledger);
    let ledger = open(&dir);
    assert_eq!(ledger.get_chain(chain_id).unwrap().status, ChainStatus::Split);
}

#[test]
fn test_foreign_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger");
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(path.join("events.log"), b"this is not a custody log").unwrap();

    let result = Ledger::open(LedgerConfig::durable(&path));
    assert!(matches!(result, Err(LedgerError::InvalidFormat(_))));
}

#[test]
fn test_lock_released_on_drop() {
    let dir = TempDir::new().unwrap();
    let ledger = open(&dir);
    assert!(matches!(
        Ledger::open(LedgerConfig::durable(dir.path().join("ledger"))),
        Err(LedgerError::Locked)
    ));
    drop(ledger);
    open(&dir);
}
