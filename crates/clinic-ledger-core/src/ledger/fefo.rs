//! First-Expire-First-Out allocation planning.
//!
//! Planning is pure: it decides how many units to take from which lot without
//! touching storage. [`InventoryLedger`](super::InventoryLedger) applies the
//! plan with per-lot compare-and-swap writes.

use chrono::NaiveDate;

use crate::models::{total_quantity, InventoryLot, LotConsumption};

/// Units to take from one lot.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTake<'l> {
    pub lot: &'l InventoryLot,
    pub taken: i64,
}

impl PlannedTake<'_> {
    /// Units left in the lot after the take.
    pub fn remaining(&self) -> i64 {
        self.lot.quantity - self.taken
    }

    pub fn to_consumption(&self) -> LotConsumption {
        LotConsumption {
            lot_id: self.lot.id.clone(),
            medicine_id: self.lot.medicine_id.clone(),
            dosage_form: self.lot.dosage_form.clone(),
            expiration_date: self.lot.expiration_date,
            taken: self.taken,
            remaining: self.remaining(),
        }
    }
}

/// Allocation decision for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct FefoPlan<'l> {
    pub requested: i64,
    /// Units on non-expired lots when planning
    pub available: i64,
    /// Takes in consumption order
    pub takes: Vec<PlannedTake<'l>>,
}

impl FefoPlan<'_> {
    pub fn consumed(&self) -> i64 {
        self.takes.iter().map(|t| t.taken).sum()
    }

    /// Units that could not be covered.
    pub fn shortfall(&self) -> i64 {
        self.requested - self.consumed()
    }
}

/// Plan a FEFO walk over `lots` for `requested` units.
///
/// Expired lots (expiry before `today`) and empty lots are skipped. Remaining
/// lots are walked soonest-expiring first, ties broken by intake time and ID,
/// taking `min(lot.quantity, remaining)` from each until the request is
/// covered or the lots run out.
pub fn plan(lots: &[InventoryLot], requested: i64, today: NaiveDate) -> FefoPlan<'_> {
    let mut usable: Vec<&InventoryLot> = lots
        .iter()
        .filter(|lot| lot.quantity > 0 && !lot.is_expired(today))
        .collect();
    usable.sort_by(|a, b| {
        a.expiration_date
            .cmp(&b.expiration_date)
            .then_with(|| a.received_at.cmp(&b.received_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    let available = total_quantity(usable.iter().map(|lot| lot.quantity));
    let mut remaining = requested.max(0);
    let mut takes = Vec::new();

    for lot in usable {
        if remaining == 0 {
            break;
        }
        let taken = lot.quantity.min(remaining);
        remaining -= taken;
        takes.push(PlannedTake { lot, taken });
    }

    FefoPlan {
        requested,
        available,
        takes,
    }
}
