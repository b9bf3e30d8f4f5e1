//! Locked tank set for one transaction
//!
//! A `TankBook` is the only way workflows change stock: posting a draft
//! applies the delta to the tank and yields the ledger row in one step, so a
//! stock change without a movement (or the reverse) cannot be produced.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    reversal_deltas, Annulment, EntityType, MovementDraft, NewMovement, StockChange, Tank,
    VoidedMovement,
};

/// Tanks locked by the current transaction plus the movements posted against them
#[derive(Debug, Clone, Default)]
pub struct TankBook {
    tanks: BTreeMap<Uuid, Tank>,
    postings: Vec<NewMovement>,
    touched: BTreeSet<Uuid>,
}

/// Everything a transaction has to write back
#[derive(Debug, Clone)]
pub struct BookChanges {
    /// Tanks whose stock changed
    pub tanks: Vec<Tank>,
    pub postings: Vec<NewMovement>,
}

impl TankBook {
    pub fn new(tanks: impl IntoIterator<Item = Tank>) -> Self {
        Self {
            tanks: tanks.into_iter().map(|t| (t.id, t)).collect(),
            postings: Vec::new(),
            touched: BTreeSet::new(),
        }
    }

    pub fn tank(&self, tank_id: Uuid) -> LedgerResult<&Tank> {
        self.tanks
            .get(&tank_id)
            .ok_or(LedgerError::UnknownTank { tank_id })
    }

    pub fn postings(&self) -> &[NewMovement] {
        &self.postings
    }

    /// Apply a draft's delta and record the resulting movement
    pub fn post(&mut self, draft: MovementDraft) -> LedgerResult<NewMovement> {
        check_sign(&draft)?;
        let tank = self
            .tanks
            .get_mut(&draft.tank_id)
            .ok_or(LedgerError::UnknownTank {
                tank_id: draft.tank_id,
            })?;
        let change = tank.apply_delta(draft.liters)?;

        let movement = into_posting(draft, change.stock_before, change.stock_after);
        self.touched.insert(movement.tank_id);
        self.postings.push(movement.clone());
        Ok(movement)
    }

    /// Apply several drafts against one tank as a single net delta
    ///
    /// Bounds are checked on the combined change only. The rows still chain
    /// their before/after values in draft order.
    pub fn post_net(&mut self, drafts: Vec<MovementDraft>) -> LedgerResult<Vec<NewMovement>> {
        let Some(tank_id) = drafts.first().map(|d| d.tank_id) else {
            return Ok(Vec::new());
        };
        for draft in &drafts {
            if draft.tank_id != tank_id {
                return Err(LedgerError::validation(
                    "tank_id",
                    "Net postings must target a single tank",
                ));
            }
            check_sign(draft)?;
        }

        let net: Decimal = drafts.iter().map(|d| d.liters).sum();
        let tank = self
            .tanks
            .get_mut(&tank_id)
            .ok_or(LedgerError::UnknownTank { tank_id })?;
        let change = tank.apply_delta(net)?;

        let mut running = change.stock_before;
        let movements: Vec<NewMovement> = drafts
            .into_iter()
            .map(|draft| {
                let before = running;
                running += draft.liters;
                into_posting(draft, before, running)
            })
            .collect();

        self.touched.insert(tank_id);
        self.postings.extend(movements.iter().cloned());
        Ok(movements)
    }

    /// Give back what voided movements had contributed, tank by tank
    pub fn reverse(&mut self, voided: &[VoidedMovement]) -> LedgerResult<Vec<StockChange>> {
        let mut changes = Vec::new();
        for (tank_id, delta) in reversal_deltas(voided) {
            let tank = self
                .tanks
                .get_mut(&tank_id)
                .ok_or(LedgerError::UnknownTank { tank_id })?;
            let change = tank.apply_delta(delta).map_err(|err| match err {
                LedgerError::NegativeStock {
                    tank_id,
                    requested,
                    available,
                } => LedgerError::NegativeStockOnReversal {
                    tank_id,
                    requested,
                    available,
                },
                other => other,
            })?;
            self.touched.insert(tank_id);
            changes.push(change);
        }
        Ok(changes)
    }

    pub fn into_changes(self) -> BookChanges {
        let touched = self.touched;
        BookChanges {
            tanks: self
                .tanks
                .into_values()
                .filter(|t| touched.contains(&t.id))
                .collect(),
            postings: self.postings,
        }
    }
}

fn check_sign(draft: &MovementDraft) -> LedgerResult<()> {
    if !draft.movement_type.accepts(draft.liters) {
        return Err(LedgerError::validation(
            "liters",
            format!(
                "{} movement cannot carry {} L",
                draft.movement_type.as_str(),
                draft.liters
            ),
        ));
    }
    Ok(())
}

fn into_posting(draft: MovementDraft, stock_before: Decimal, stock_after: Decimal) -> NewMovement {
    NewMovement {
        movement_type: draft.movement_type,
        origin_ref: draft.origin_ref,
        tank_id: draft.tank_id,
        liters: draft.liters,
        stock_before,
        stock_after,
        reason_code: draft.reason_code,
        note: draft.note,
        actor_id: draft.actor_id,
    }
}

/// Deterministic lock order for a set of tanks: ascending id, no duplicates
pub fn lock_order(tank_ids: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    tank_ids
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Carry out an annulment decision against the book
///
/// Returns the liters given back (positive for intakes, negative for
/// dispatches). A `Reverse` with nothing left to void is reported as
/// `AlreadyVoided`.
pub fn apply_annulment(
    book: &mut TankBook,
    entity: EntityType,
    entity_id: Uuid,
    annulment: Annulment,
    voided: &[VoidedMovement],
) -> LedgerResult<Decimal> {
    match annulment {
        Annulment::Discard => Ok(Decimal::ZERO),
        Annulment::Reverse => {
            if voided.is_empty() {
                return Err(LedgerError::AlreadyVoided {
                    entity,
                    id: entity_id,
                });
            }
            book.reverse(voided)?;
            Ok(voided.iter().map(|v| v.liters).sum())
        }
    }
}
