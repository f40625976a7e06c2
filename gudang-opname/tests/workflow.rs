use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use gudang_core::{LocationCode, ProductId, StockKey};
use gudang_ledger::{
    Inclusion, LedgerEntry, LedgerError, LedgerQuery, LedgerRepository, MemoryLedgerRepository,
    SourceKind, SqliteLedgerRepository,
};
use gudang_opname::{
    Conflict, DraftLine, LocationResolver, MemoryOpnameRepository, MovementRequest, OpnameDraft,
    OpnameError, OpnameService, OpnameStatus, ProductResolver, ResolveError,
    SqliteOpnameRepository,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

struct FixtureCatalog {
    products: HashMap<&'static str, u64>,
    locations: HashSet<&'static str>,
}

impl FixtureCatalog {
    fn new() -> Self {
        Self {
            products: HashMap::from([("Rice", 1), ("Sugar", 2), ("Flour", 3)]),
            locations: HashSet::from(["WH1", "WH2"]),
        }
    }
}

impl ProductResolver for FixtureCatalog {
    fn resolve_product(&self, name_or_id: &str) -> Result<ProductId, ResolveError> {
        if let Ok(raw) = name_or_id.parse::<u64>() {
            if self.products.values().any(|&id| id == raw) {
                return Ok(ProductId::new(raw));
            }
        }
        self.products
            .get(name_or_id)
            .map(|&id| ProductId::new(id))
            .ok_or_else(|| ResolveError::UnknownProduct(name_or_id.to_string()))
    }
}

impl LocationResolver for FixtureCatalog {
    fn resolve_location(&self, code_or_name: &str) -> Result<LocationCode, ResolveError> {
        self.locations
            .contains(code_or_name)
            .then(|| LocationCode::new(code_or_name))
            .ok_or_else(|| ResolveError::UnknownLocation(code_or_name.to_string()))
    }
}

fn service_over(ledger: Arc<dyn LedgerRepository>) -> OpnameService {
    let catalog = Arc::new(FixtureCatalog::new());
    OpnameService::new(
        ledger,
        Arc::new(MemoryOpnameRepository::new()),
        catalog.clone(),
        catalog,
    )
}

fn memory_service() -> (OpnameService, Arc<MemoryLedgerRepository>) {
    let ledger = Arc::new(MemoryLedgerRepository::new());
    (service_over(ledger.clone()), ledger)
}

fn jan(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, day, 9, 0, 0).unwrap()
}

fn movement(product: &str, day: u32, delta: Decimal, reference: &str) -> MovementRequest {
    MovementRequest {
        product: product.into(),
        location: "WH1".into(),
        timestamp: jan(day),
        delta,
        kind: if delta.is_sign_negative() {
            SourceKind::SalesIssue
        } else {
            SourceKind::PurchaseReceipt
        },
        reference: reference.into(),
    }
}

fn count_draft(product: &str, day: u32, physical: Decimal) -> OpnameDraft {
    OpnameDraft {
        location: "WH1".into(),
        timestamp: jan(day),
        responsible_party: "siti".into(),
        notes: None,
        lines: vec![DraftLine {
            product: product.into(),
            physical_stock: physical,
            unit: "kg".into(),
            notes: None,
        }],
    }
}

fn rice_key() -> StockKey {
    StockKey::new(ProductId::new(1), LocationCode::new("WH1"))
}

fn full_history(ledger: &dyn LedgerRepository, key: StockKey) -> Vec<LedgerEntry> {
    ledger
        .scan_from(key, DateTime::<Utc>::MIN_UTC, Inclusion::Inclusive)
        .unwrap()
}

fn assert_balances_chain(entries: &[LedgerEntry]) {
    let mut previous = Decimal::ZERO;
    for entry in entries {
        assert_eq!(
            entry.running_balance,
            previous + entry.delta(),
            "running balance broken at {}",
            entry.id
        );
        previous = entry.running_balance;
    }
}

#[test]
fn submit_validates_and_snapshots_current_stock() {
    let (service, _ledger) = memory_service();
    service
        .record_movement(movement("Rice", 1, dec!(100), "po-1"))
        .unwrap();

    let empty = OpnameDraft {
        lines: Vec::new(),
        ..count_draft("Rice", 3, dec!(0))
    };
    assert!(matches!(
        service.submit(empty),
        Err(OpnameError::Validation(_))
    ));
    assert!(matches!(
        service.submit(count_draft("Gold", 3, dec!(1))),
        Err(OpnameError::ProductNotFound(_))
    ));
    let mut wrong_location = count_draft("Rice", 3, dec!(1));
    wrong_location.location = "WH9".into();
    assert!(matches!(
        service.submit(wrong_location),
        Err(OpnameError::LocationNotFound(_))
    ));
    assert!(matches!(
        service.submit(count_draft("Rice", 3, dec!(-4))),
        Err(OpnameError::Validation(_))
    ));

    let id = service.submit(count_draft("Rice", 3, dec!(120))).unwrap();
    let stored = service.get(id).unwrap();
    assert_eq!(stored.status, OpnameStatus::Pending);
    assert_eq!(stored.lines[0].system_stock, dec!(100));
    assert_eq!(stored.lines[0].difference(), dec!(20));
}

// The worked example: 100 in on Jan 1, 50 in on Jan 5, a count of 120 on
// Jan 3 must leave Jan 5 at 170, not 150.
#[test]
fn backdated_count_rebuilds_later_balances() {
    let (service, ledger) = memory_service();
    service
        .record_movement(movement("Rice", 1, dec!(100), "po-1"))
        .unwrap();
    service
        .record_movement(movement("Rice", 5, dec!(50), "po-2"))
        .unwrap();

    let id = service.submit(count_draft("Rice", 3, dec!(120))).unwrap();
    let outcome = service.approve(id).unwrap();
    assert_eq!(outcome.adjustments, 1);
    assert!(outcome.warnings.is_empty());

    let entries = full_history(ledger.as_ref(), rice_key());
    assert_eq!(entries.len(), 3);
    assert_balances_chain(&entries);
    assert_eq!(entries[1].source_kind, SourceKind::Opname);
    assert_eq!(entries[1].running_balance, dec!(120));
    assert_eq!(entries[2].running_balance, dec!(170));

    // history before the count is locked by the approval, later entries not
    assert!(entries[0].locked);
    assert_eq!(entries[0].locked_by, Some(id));
    assert!(!entries[1].locked);
    assert!(!entries[2].locked);
}

// Shrinkage variant: 10 at t1, +30 at t3, counted down to 5 at t2.
#[test]
fn backdated_shortage_is_subtracted_downstream() {
    let (service, ledger) = memory_service();
    service
        .record_movement(movement("Rice", 10, dec!(10), "po-1"))
        .unwrap();
    service
        .record_movement(movement("Rice", 30, dec!(30), "po-2"))
        .unwrap();

    let id = service.submit(count_draft("Rice", 20, dec!(5))).unwrap();
    service.approve(id).unwrap();

    let entries = full_history(ledger.as_ref(), rice_key());
    assert_balances_chain(&entries);
    let balances: Vec<Decimal> = entries.iter().map(|entry| entry.running_balance).collect();
    assert_eq!(balances, vec![dec!(10), dec!(5), dec!(35)]);
    assert_eq!(entries[1].quantity_out, dec!(5));
}

#[test]
fn double_approval_conflicts_without_duplicate_entries() {
    let (service, ledger) = memory_service();
    service
        .record_movement(movement("Rice", 1, dec!(100), "po-1"))
        .unwrap();
    let id = service.submit(count_draft("Rice", 3, dec!(90))).unwrap();
    service.approve(id).unwrap();

    assert!(matches!(
        service.approve(id),
        Err(OpnameError::Conflict(Conflict::AlreadyApproved(_)))
    ));
    let minted = ledger
        .query(LedgerQuery::default().with_source_reference(id.to_string()))
        .unwrap();
    assert_eq!(minted.len(), 1);
}

#[test]
fn revert_round_trip_restores_the_exact_balance_sequence() {
    let (service, ledger) = memory_service();
    service
        .record_movement(movement("Rice", 1, dec!(100), "po-1"))
        .unwrap();
    service
        .record_movement(movement("Rice", 2, dec!(-30), "so-1"))
        .unwrap();
    service
        .record_movement(movement("Rice", 5, dec!(50), "po-2"))
        .unwrap();
    let before: Vec<(Uuid, Decimal)> = full_history(ledger.as_ref(), rice_key())
        .iter()
        .map(|entry| (entry.id, entry.running_balance))
        .collect();

    let id = service.submit(count_draft("Rice", 3, dec!(95))).unwrap();
    service.approve(id).unwrap();
    let outcome = service.revert(id).unwrap();
    assert_eq!(outcome.deleted, 1);
    assert!(outcome.unlocked > 0);

    let after: Vec<(Uuid, Decimal)> = full_history(ledger.as_ref(), rice_key())
        .iter()
        .map(|entry| (entry.id, entry.running_balance))
        .collect();
    assert_eq!(before, after);
    assert!(full_history(ledger.as_ref(), rice_key())
        .iter()
        .all(|entry| !entry.locked && entry.locked_by.is_none()));
    assert_eq!(service.get(id).unwrap().status, OpnameStatus::Pending);

    // reverted opname can be approved again
    service.approve(id).unwrap();
    assert_eq!(service.get(id).unwrap().status, OpnameStatus::Approved);
}

#[test]
fn reverting_an_unapproved_opname_never_touches_state() {
    let (service, ledger) = memory_service();
    service
        .record_movement(movement("Rice", 1, dec!(100), "po-1"))
        .unwrap();
    let id = service.submit(count_draft("Rice", 3, dec!(90))).unwrap();

    assert!(matches!(
        service.revert(id),
        Err(OpnameError::Conflict(Conflict::NotApproved(_)))
    ));
    assert!(matches!(
        service.revert(Uuid::new_v4()),
        Err(OpnameError::OpnameNotFound(_))
    ));
    let entries = full_history(ledger.as_ref(), rice_key());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].running_balance, dec!(100));
    assert_eq!(service.get(id).unwrap().status, OpnameStatus::Pending);
}

/// Ledger wrapper that fails a chosen opname-adjustment append, for
/// exercising the compensation path.
struct FailingLedger {
    inner: MemoryLedgerRepository,
    fail_on_opname_append: usize,
    opname_appends: AtomicUsize,
}

impl FailingLedger {
    fn new(fail_on_opname_append: usize) -> Self {
        Self {
            inner: MemoryLedgerRepository::new(),
            fail_on_opname_append,
            opname_appends: AtomicUsize::new(0),
        }
    }
}

impl LedgerRepository for FailingLedger {
    fn append(&self, entry: LedgerEntry) -> Result<LedgerEntry, LedgerError> {
        if entry.source_kind == SourceKind::Opname {
            let nth = self.opname_appends.fetch_add(1, Ordering::SeqCst) + 1;
            if nth == self.fail_on_opname_append {
                return Err(LedgerError::Storage("injected append failure".into()));
            }
        }
        self.inner.append(entry)
    }

    fn scan_from(
        &self,
        key: StockKey,
        timestamp: DateTime<Utc>,
        inclusion: Inclusion,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.inner.scan_from(key, timestamp, inclusion)
    }

    fn entry_before(
        &self,
        key: StockKey,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        self.inner.entry_before(key, timestamp)
    }

    fn entries_at(
        &self,
        key: StockKey,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.inner.entries_at(key, timestamp)
    }

    fn update_balance(&self, id: Uuid, running_balance: Decimal) -> Result<(), LedgerError> {
        self.inner.update_balance(id, running_balance)
    }

    fn set_locked(
        &self,
        id: Uuid,
        locked: bool,
        lock_ref: Option<Uuid>,
    ) -> Result<(), LedgerError> {
        self.inner.set_locked(id, locked, lock_ref)
    }

    fn delete_by_source(&self, source_reference: &str) -> Result<usize, LedgerError> {
        self.inner.delete_by_source(source_reference)
    }

    fn query(&self, query: LedgerQuery) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.inner.query(query)
    }
}

#[test]
fn failed_line_leaves_the_opname_pending_and_the_ledger_clean() {
    let ledger = Arc::new(FailingLedger::new(2));
    let service = service_over(ledger.clone());
    service
        .record_movement(movement("Rice", 1, dec!(100), "po-1"))
        .unwrap();
    service
        .record_movement(MovementRequest {
            product: "Sugar".into(),
            ..movement("Rice", 1, dec!(40), "po-2")
        })
        .unwrap();

    let mut draft = count_draft("Rice", 3, dec!(90));
    draft.lines.push(DraftLine {
        product: "Sugar".into(),
        physical_stock: dec!(55),
        unit: "kg".into(),
        notes: None,
    });
    let id = service.submit(draft).unwrap();

    assert!(matches!(
        service.approve(id),
        Err(OpnameError::Ledger(LedgerError::Storage(_)))
    ));
    assert_eq!(service.get(id).unwrap().status, OpnameStatus::Pending);
    let minted = ledger
        .query(LedgerQuery::default().with_source_reference(id.to_string()))
        .unwrap();
    assert!(minted.is_empty());

    let rice = full_history(ledger.as_ref(), rice_key());
    assert_eq!(rice.len(), 1);
    assert_eq!(rice[0].running_balance, dec!(100));
    assert!(!rice[0].locked);
    let sugar = full_history(
        ledger.as_ref(),
        StockKey::new(ProductId::new(2), LocationCode::new("WH1")),
    );
    assert_eq!(sugar.len(), 1);
    assert_eq!(sugar[0].running_balance, dec!(40));
}

#[test]
fn earlier_backdated_count_is_rejected_once_history_is_claimed() {
    let (service, ledger) = memory_service();
    service
        .record_movement(movement("Rice", 1, dec!(100), "po-1"))
        .unwrap();
    service
        .record_movement(movement("Rice", 2, dec!(10), "po-2"))
        .unwrap();
    service
        .record_movement(movement("Rice", 5, dec!(20), "po-3"))
        .unwrap();

    let first = service.submit(count_draft("Rice", 3, dec!(105))).unwrap();
    service.approve(first).unwrap();

    // a count before the approved claim would rewrite locked history
    let earlier = service.submit(count_draft("Rice", 2, dec!(101))).unwrap();
    assert!(matches!(
        service.approve(earlier),
        Err(OpnameError::Conflict(Conflict::OverlappingOpname { .. }))
    ));

    // a later count is fine and claims only the unclaimed gap
    let later = service.submit(count_draft("Rice", 6, dec!(130))).unwrap();
    service.approve(later).unwrap();

    let entries = full_history(ledger.as_ref(), rice_key());
    assert_balances_chain(&entries);
    for entry in &entries {
        if entry.timestamp < jan(3) {
            assert_eq!(entry.locked_by, Some(first));
        } else if entry.timestamp < jan(6) {
            assert_eq!(entry.locked_by, Some(later));
        }
    }
}

#[test]
fn matching_count_reconciles_without_an_adjustment() {
    let (service, ledger) = memory_service();
    service
        .record_movement(movement("Rice", 1, dec!(100), "po-1"))
        .unwrap();
    let id = service.submit(count_draft("Rice", 3, dec!(100))).unwrap();
    let outcome = service.approve(id).unwrap();

    assert_eq!(outcome.adjustments, 0);
    assert_eq!(outcome.locked_entries, 0);
    assert_eq!(service.get(id).unwrap().status, OpnameStatus::Approved);
    assert_eq!(full_history(ledger.as_ref(), rice_key()).len(), 1);
}

#[test]
fn negative_balances_warn_but_do_not_block_approval() {
    let (service, _ledger) = memory_service();
    service
        .record_movement(movement("Rice", 1, dec!(10), "po-1"))
        .unwrap();
    service
        .record_movement(movement("Rice", 4, dec!(-8), "so-1"))
        .unwrap();

    let id = service.submit(count_draft("Rice", 2, dec!(0))).unwrap();
    let outcome = service.approve(id).unwrap();
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].balance, dec!(-8));
    assert_eq!(service.get(id).unwrap().status, OpnameStatus::Approved);
}

#[test]
fn movements_cannot_land_inside_claimed_history() {
    let (service, _ledger) = memory_service();
    service
        .record_movement(movement("Rice", 1, dec!(100), "po-1"))
        .unwrap();
    let id = service.submit(count_draft("Rice", 3, dec!(95))).unwrap();
    service.approve(id).unwrap();

    assert!(matches!(
        service.record_movement(movement("Rice", 2, dec!(5), "po-late")),
        Err(OpnameError::Conflict(Conflict::LockedHistory { .. }))
    ));
    service
        .record_movement(movement("Rice", 4, dec!(5), "po-4"))
        .unwrap();
    assert_eq!(
        service.balance("Rice", "WH1", Some(jan(4))).unwrap(),
        dec!(100)
    );
}

#[test]
fn reject_and_delete_only_move_pending_opnames() {
    let (service, _ledger) = memory_service();
    service
        .record_movement(movement("Rice", 1, dec!(100), "po-1"))
        .unwrap();

    let rejected = service.submit(count_draft("Rice", 3, dec!(90))).unwrap();
    service.reject(rejected).unwrap();
    assert_eq!(service.get(rejected).unwrap().status, OpnameStatus::Rejected);
    assert!(matches!(
        service.approve(rejected),
        Err(OpnameError::Conflict(Conflict::NotPending { .. }))
    ));
    assert!(matches!(
        service.reject(rejected),
        Err(OpnameError::Conflict(Conflict::NotPending { .. }))
    ));

    let approved = service.submit(count_draft("Rice", 3, dec!(90))).unwrap();
    service.approve(approved).unwrap();
    assert!(matches!(
        service.delete(approved),
        Err(OpnameError::Conflict(Conflict::NotPending { .. }))
    ));

    let doomed = service.submit(count_draft("Rice", 4, dec!(90))).unwrap();
    service.delete(doomed).unwrap();
    assert!(matches!(
        service.get(doomed),
        Err(OpnameError::OpnameNotFound(_))
    ));
}

#[test]
fn sqlite_backends_run_the_full_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(SqliteLedgerRepository::new(dir.path().join("ledger.db")).unwrap());
    let opnames = Arc::new(SqliteOpnameRepository::new(dir.path().join("opname.db")).unwrap());
    let catalog = Arc::new(FixtureCatalog::new());
    let service = OpnameService::new(ledger.clone(), opnames, catalog.clone(), catalog);

    service
        .record_movement(movement("Rice", 1, dec!(100), "po-1"))
        .unwrap();
    service
        .record_movement(movement("Rice", 5, dec!(50), "po-2"))
        .unwrap();
    let id = service.submit(count_draft("Rice", 3, dec!(120))).unwrap();
    service.approve(id).unwrap();

    let entries = full_history(ledger.as_ref(), rice_key());
    assert_eq!(entries.len(), 3);
    assert_balances_chain(&entries);
    assert_eq!(entries[2].running_balance, dec!(170));
    assert!(entries[0].locked);

    service.revert(id).unwrap();
    let entries = full_history(ledger.as_ref(), rice_key());
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].running_balance, dec!(150));
    assert!(entries.iter().all(|entry| !entry.locked));
}
