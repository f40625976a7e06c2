use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gudang_core::StockKey;
use gudang_ledger::{
    LedgerEntry, LedgerQuery, LedgerRepository, LockManager, NegativeBalance, RecalcOutcome,
    Recalculator, SourceKind,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    Conflict, LocationResolver, Opname, OpnameDraft, OpnameError, OpnameLine, OpnameRepository,
    OpnameResult, OpnameStatus, ProductResolver,
};

/// Result of a successful approval.
#[derive(Clone, Debug)]
pub struct ApprovalOutcome {
    pub opname: Uuid,
    /// Lines that produced an adjustment entry; zero-difference lines are
    /// reconciled without one.
    pub adjustments: usize,
    pub locked_entries: usize,
    pub recalculated: usize,
    /// Soft negative-balance findings; approval still completed.
    pub warnings: Vec<NegativeBalance>,
}

impl ApprovalOutcome {
    fn new(opname: Uuid) -> Self {
        Self {
            opname,
            adjustments: 0,
            locked_entries: 0,
            recalculated: 0,
            warnings: Vec::new(),
        }
    }
}

/// Result of a successful revert.
#[derive(Clone, Copy, Debug)]
pub struct RevertOutcome {
    pub unlocked: usize,
    pub deleted: usize,
}

/// A stock movement from the surrounding application (receipt, issue,
/// transfer, production), possibly backdated.
#[derive(Clone, Debug)]
pub struct MovementRequest {
    pub product: String,
    pub location: String,
    pub timestamp: DateTime<Utc>,
    /// Signed quantity: positive into stock, negative out of it.
    pub delta: Decimal,
    pub kind: SourceKind,
    pub reference: String,
}

/// Result of recording a movement.
#[derive(Clone, Debug)]
pub struct MovementOutcome {
    pub entry: Uuid,
    pub running_balance: Decimal,
    pub warnings: Vec<NegativeBalance>,
}

/// Per-stock-key exclusive sections. Approve and revert hold the stripe for
/// the whole append + lock + recalculate sequence; disjoint keys run in
/// parallel.
#[derive(Default)]
struct StripeMap {
    stripes: Mutex<HashMap<StockKey, Arc<Mutex<()>>>>,
}

impl StripeMap {
    /// Stripes for the given keys. Callers must pass keys already sorted so
    /// acquisition order is globally consistent.
    fn stripes_for(&self, keys: &[StockKey]) -> Vec<Arc<Mutex<()>>> {
        let mut map = self.stripes.lock();
        keys.iter()
            .map(|key| map.entry(*key).or_default().clone())
            .collect()
    }
}

/// The opname state machine: submit, approve, reject, revert, delete, plus
/// movement recording and ledger reads for callers.
///
/// Every operation is request-scoped and synchronous; approve and revert are
/// the only paths that mutate the ledger, and both are idempotent-by-retry
/// through the recalculator and the reference-scoped lock sweep.
pub struct OpnameService {
    ledger: Arc<dyn LedgerRepository>,
    opnames: Arc<dyn OpnameRepository>,
    products: Arc<dyn ProductResolver>,
    locations: Arc<dyn LocationResolver>,
    recalc: Recalculator,
    locks: LockManager,
    stripes: StripeMap,
}

impl OpnameService {
    pub fn new(
        ledger: Arc<dyn LedgerRepository>,
        opnames: Arc<dyn OpnameRepository>,
        products: Arc<dyn ProductResolver>,
        locations: Arc<dyn LocationResolver>,
    ) -> Self {
        let recalc = Recalculator::new(ledger.clone());
        let locks = LockManager::new(ledger.clone());
        Self {
            ledger,
            opnames,
            products,
            locations,
            recalc,
            locks,
            stripes: StripeMap::default(),
        }
    }

    /// Validate and persist a pending opname, snapshotting the current
    /// system stock per line. No ledger mutation.
    pub fn submit(&self, draft: OpnameDraft) -> OpnameResult<Uuid> {
        if draft.lines.is_empty() {
            return Err(OpnameError::Validation(
                "an opname needs at least one counted line".into(),
            ));
        }
        if draft.responsible_party.trim().is_empty() {
            return Err(OpnameError::Validation(
                "responsible party must be named".into(),
            ));
        }
        let location = self.locations.resolve_location(&draft.location)?;
        let now = Utc::now();
        let mut seen = HashSet::new();
        let mut lines = Vec::with_capacity(draft.lines.len());
        for line in &draft.lines {
            if line.physical_stock.is_sign_negative() {
                return Err(OpnameError::Validation(format!(
                    "negative physical count for {}",
                    line.product
                )));
            }
            if line.unit.trim().is_empty() {
                return Err(OpnameError::Validation(format!(
                    "missing unit for {}",
                    line.product
                )));
            }
            let product = self.products.resolve_product(&line.product)?;
            if !seen.insert(product) {
                return Err(OpnameError::Validation(format!(
                    "product {} is counted twice",
                    line.product
                )));
            }
            let system_stock = self
                .ledger
                .balance_as_of(StockKey::new(product, location), now)?;
            lines.push(OpnameLine {
                product,
                system_stock,
                physical_stock: line.physical_stock,
                unit: line.unit.clone(),
                notes: line.notes.clone(),
            });
        }
        let opname = Opname {
            id: Uuid::new_v4(),
            timestamp: draft.timestamp,
            location,
            responsible_party: draft.responsible_party,
            notes: draft.notes,
            status: OpnameStatus::Pending,
            lines,
            created_at: now,
            approved_at: None,
        };
        self.opnames.insert(&opname)?;
        info!(
            opname = %opname.id,
            location = %location,
            lines = opname.lines.len(),
            "opname submitted"
        );
        Ok(opname.id)
    }

    /// Approve a pending opname: per line, mint the adjustment entry at the
    /// opname timestamp, lock prior history, and rebuild later balances.
    /// The status flips to approved only after every line succeeded; a
    /// mid-flight failure is compensated and the opname stays pending.
    pub fn approve(&self, id: Uuid) -> OpnameResult<ApprovalOutcome> {
        let opname = self
            .opnames
            .fetch(id)?
            .ok_or(OpnameError::OpnameNotFound(id))?;
        match opname.status {
            OpnameStatus::Pending => {}
            OpnameStatus::Approved => return Err(Conflict::AlreadyApproved(id).into()),
            OpnameStatus::Rejected => {
                return Err(Conflict::NotPending {
                    id,
                    status: opname.status,
                }
                .into())
            }
        }
        for line in &opname.lines {
            self.products.resolve_product(&line.product.to_string())?;
        }
        self.locations
            .resolve_location(opname.location.as_str())?;

        let keys = opname.keys();
        let stripes = self.stripes.stripes_for(&keys);
        let _guards: Vec<_> = stripes.iter().map(|stripe| stripe.lock()).collect();

        // Guard runs under the stripes, before the first ledger mutation.
        self.check_overlap(&opname)?;

        match self.apply_lines(&opname) {
            Ok(outcome) => {
                self.opnames
                    .set_status(id, OpnameStatus::Approved, Some(Utc::now()))
                    .map_err(|err| {
                        warn!(opname = %id, error = %err, "status flip failed, compensating");
                        self.compensate(&opname);
                        err
                    })?;
                info!(
                    opname = %id,
                    adjustments = outcome.adjustments,
                    locked = outcome.locked_entries,
                    recalculated = outcome.recalculated,
                    "opname approved"
                );
                if !outcome.warnings.is_empty() {
                    warn!(
                        opname = %id,
                        count = outcome.warnings.len(),
                        "approval left negative running balances"
                    );
                }
                Ok(outcome)
            }
            Err(err) => {
                warn!(opname = %id, error = %err, "approval failed part-way, compensating");
                self.compensate(&opname);
                Err(err)
            }
        }
    }

    /// Undo an approval: unlock by reference, delete the minted entries,
    /// and rebuild balances from the nearest surviving anchor. Safe to
    /// re-run.
    pub fn revert(&self, id: Uuid) -> OpnameResult<RevertOutcome> {
        let opname = self
            .opnames
            .fetch(id)?
            .ok_or(OpnameError::OpnameNotFound(id))?;
        if opname.status != OpnameStatus::Approved {
            return Err(Conflict::NotApproved(id).into());
        }
        let keys = opname.keys();
        let stripes = self.stripes.stripes_for(&keys);
        let _guards: Vec<_> = stripes.iter().map(|stripe| stripe.lock()).collect();

        let unlocked = self.locks.unlock(id)?;
        let deleted = self.ledger.delete_by_source(&opname.source_reference())?;
        for key in &keys {
            self.recalculate_without(*key, opname.timestamp)?;
        }
        self.opnames.set_status(id, OpnameStatus::Pending, None)?;
        info!(opname = %id, unlocked, deleted, "opname reverted");
        Ok(RevertOutcome { unlocked, deleted })
    }

    /// Pure status change; only valid from pending.
    pub fn reject(&self, id: Uuid) -> OpnameResult<()> {
        let opname = self
            .opnames
            .fetch(id)?
            .ok_or(OpnameError::OpnameNotFound(id))?;
        match opname.status {
            OpnameStatus::Pending => {
                self.opnames.set_status(id, OpnameStatus::Rejected, None)?;
                info!(opname = %id, "opname rejected");
                Ok(())
            }
            OpnameStatus::Approved => Err(Conflict::AlreadyApproved(id).into()),
            OpnameStatus::Rejected => Err(Conflict::NotPending {
                id,
                status: opname.status,
            }
            .into()),
        }
    }

    /// Remove a pending opname and its lines. Approved opnames must be
    /// reverted first.
    pub fn delete(&self, id: Uuid) -> OpnameResult<()> {
        let opname = self
            .opnames
            .fetch(id)?
            .ok_or(OpnameError::OpnameNotFound(id))?;
        if opname.status != OpnameStatus::Pending {
            return Err(Conflict::NotPending {
                id,
                status: opname.status,
            }
            .into());
        }
        self.opnames.delete(id)?;
        info!(opname = %id, "opname deleted");
        Ok(())
    }

    /// Record an ordinary stock movement, rebuilding balances when it lands
    /// before existing entries. Movements inside history already claimed by
    /// an approved opname are refused.
    pub fn record_movement(&self, request: MovementRequest) -> OpnameResult<MovementOutcome> {
        if request.kind == SourceKind::Opname {
            return Err(OpnameError::Validation(
                "opname adjustments are minted by approval, not recorded directly".into(),
            ));
        }
        if request.delta.is_zero() {
            return Err(OpnameError::Validation("a movement must change stock".into()));
        }
        let product = self.products.resolve_product(&request.product)?;
        let location = self.locations.resolve_location(&request.location)?;
        let key = StockKey::new(product, location);

        let stripes = self.stripes.stripes_for(&[key]);
        let _guards: Vec<_> = stripes.iter().map(|stripe| stripe.lock()).collect();

        for claim in self.opnames.approved_covering(product, location)? {
            if claim.timestamp > request.timestamp {
                return Err(Conflict::LockedHistory {
                    timestamp: request.timestamp,
                    existing: claim.id,
                }
                .into());
            }
        }

        let entry = self.ledger.append(LedgerEntry::from_delta(
            product,
            location,
            request.timestamp,
            request.delta,
            request.kind,
            request.reference,
        ))?;
        let recalc = self.recalculate_without(key, request.timestamp)?;
        let running_balance = self.ledger.balance_as_of(key, request.timestamp)?;
        info!(
            key = %key,
            entry = %entry.id,
            delta = %request.delta,
            kind = %request.kind,
            "movement recorded"
        );
        Ok(MovementOutcome {
            entry: entry.id,
            running_balance,
            warnings: recalc.warnings,
        })
    }

    /// Ledger balance for a product at a location, as of the given time
    /// (defaults to now).
    pub fn balance(
        &self,
        product: &str,
        location: &str,
        as_of: Option<DateTime<Utc>>,
    ) -> OpnameResult<Decimal> {
        let product = self.products.resolve_product(product)?;
        let location = self.locations.resolve_location(location)?;
        let key = StockKey::new(product, location);
        Ok(self
            .ledger
            .balance_as_of(key, as_of.unwrap_or_else(Utc::now))?)
    }

    /// Full stock card for a product at a location, (timestamp, sequence)
    /// ascending.
    pub fn history(&self, product: &str, location: &str) -> OpnameResult<Vec<LedgerEntry>> {
        let product = self.products.resolve_product(product)?;
        let location = self.locations.resolve_location(location)?;
        let key = StockKey::new(product, location);
        Ok(self.ledger.query(LedgerQuery::for_key(key))?)
    }

    pub fn get(&self, id: Uuid) -> OpnameResult<Opname> {
        self.opnames
            .fetch(id)?
            .ok_or(OpnameError::OpnameNotFound(id))
    }

    pub fn list(&self, status: Option<OpnameStatus>) -> OpnameResult<Vec<Opname>> {
        self.opnames.list(status)
    }

    /// Reject approval when an approved opname already claims this history.
    /// Any approved claim at or after the candidate timestamp would have the
    /// candidate's adjustment land inside locked history.
    fn check_overlap(&self, opname: &Opname) -> OpnameResult<()> {
        for key in opname.keys() {
            for claim in self.opnames.approved_covering(key.product, key.location)? {
                if claim.timestamp >= opname.timestamp {
                    return Err(Conflict::OverlappingOpname {
                        key,
                        existing: claim.id,
                        existing_timestamp: claim.timestamp,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    fn apply_lines(&self, opname: &Opname) -> OpnameResult<ApprovalOutcome> {
        let mut outcome = ApprovalOutcome::new(opname.id);
        for line in &opname.lines {
            let key = StockKey::new(line.product, opname.location);
            // The submission-time snapshot is informational only; the
            // authoritative system stock is the ledger at the opname instant.
            let system_stock = self.ledger.balance_as_of(key, opname.timestamp)?;
            let adjustment = line.physical_stock - system_stock;
            if adjustment.is_zero() {
                info!(key = %key, "counted stock matches the ledger, no adjustment");
                continue;
            }
            self.ledger.append(
                LedgerEntry::from_delta(
                    key.product,
                    key.location,
                    opname.timestamp,
                    adjustment,
                    SourceKind::Opname,
                    opname.source_reference(),
                )
                .with_running_balance(line.physical_stock),
            )?;
            outcome.adjustments += 1;
            outcome.locked_entries += self.locks.lock_history(key, opname.timestamp, opname.id)?;
            let recalc = self.recalc.recalculate(key, opname.timestamp)?;
            outcome.recalculated += recalc.updated;
            outcome.warnings.extend(recalc.warnings);
        }
        Ok(outcome)
    }

    /// Compensating sweep for a failed approval; each step is idempotent,
    /// so a partially-applied approval always unwinds to the pre-approval
    /// ledger.
    fn compensate(&self, opname: &Opname) {
        if let Err(err) = self.locks.unlock(opname.id) {
            error!(opname = %opname.id, error = %err, "compensation could not unlock entries");
        }
        if let Err(err) = self.ledger.delete_by_source(&opname.source_reference()) {
            error!(opname = %opname.id, error = %err, "compensation could not delete adjustments");
        }
        for key in opname.keys() {
            if let Err(err) = self.recalculate_without(key, opname.timestamp) {
                error!(
                    opname = %opname.id,
                    key = %key,
                    error = %err,
                    "compensation could not rebuild balances"
                );
            }
        }
    }

    /// Rebuild balances as if nothing existed at `timestamp`: anchor at the
    /// latest surviving entry before it, or replay the whole history.
    fn recalculate_without(
        &self,
        key: StockKey,
        timestamp: DateTime<Utc>,
    ) -> OpnameResult<RecalcOutcome> {
        let anchor = self
            .ledger
            .entry_before(key, timestamp)?
            .map(|entry| entry.timestamp)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Ok(self.recalc.recalculate(key, anchor)?)
    }
}
