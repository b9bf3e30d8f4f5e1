//! Movement ledger models
//!
//! Movements are append-only. The only update a row ever sees is the flip from
//! `Active` to `Annulled` when its originating workflow is annulled.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EntityType, ReasonCode};
use crate::error::{LedgerError, LedgerResult};

/// What caused a stock change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Intake,
    Dispatch,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Intake => "intake",
            MovementType::Dispatch => "dispatch",
            MovementType::Adjustment => "adjustment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "intake" => Some(MovementType::Intake),
            "dispatch" => Some(MovementType::Dispatch),
            "adjustment" => Some(MovementType::Adjustment),
            _ => None,
        }
    }

    /// Intakes only add, dispatches only remove, adjustments go either way
    pub fn accepts(&self, liters: Decimal) -> bool {
        match self {
            MovementType::Intake => liters >= Decimal::ZERO,
            MovementType::Dispatch => liters <= Decimal::ZERO,
            MovementType::Adjustment => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementState {
    Active,
    Annulled,
}

impl MovementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementState::Active => "active",
            MovementState::Annulled => "annulled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(MovementState::Active),
            "annulled" => Some(MovementState::Annulled),
            _ => None,
        }
    }
}

/// A persisted ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movement {
    pub id: Uuid,
    pub movement_type: MovementType,
    /// Intake or dispatch that produced the row
    pub origin_ref: Option<Uuid>,
    pub tank_id: Uuid,
    /// Signed: positive adds stock, negative removes it
    pub liters: Decimal,
    pub stock_before: Decimal,
    pub stock_after: Decimal,
    pub state: MovementState,
    pub reason_code: Option<ReasonCode>,
    pub note: Option<String>,
    pub actor_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    pub fn is_active(&self) -> bool {
        self.state == MovementState::Active
    }
}

/// A stock change a workflow wants to record
#[derive(Debug, Clone, PartialEq)]
pub struct MovementDraft {
    pub movement_type: MovementType,
    pub origin_ref: Option<Uuid>,
    pub tank_id: Uuid,
    pub liters: Decimal,
    pub reason_code: Option<ReasonCode>,
    pub note: Option<String>,
    pub actor_id: Uuid,
}

impl MovementDraft {
    pub fn new(
        movement_type: MovementType,
        origin_ref: Uuid,
        tank_id: Uuid,
        liters: Decimal,
        actor_id: Uuid,
    ) -> Self {
        Self {
            movement_type,
            origin_ref: Some(origin_ref),
            tank_id,
            liters,
            reason_code: None,
            note: None,
            actor_id,
        }
    }

    pub fn with_reason(mut self, reason_code: ReasonCode, note: Option<String>) -> Self {
        self.reason_code = Some(reason_code);
        self.note = note;
        self
    }
}

/// A draft whose delta has been applied to the tank, ready to insert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMovement {
    pub movement_type: MovementType,
    pub origin_ref: Option<Uuid>,
    pub tank_id: Uuid,
    pub liters: Decimal,
    pub stock_before: Decimal,
    pub stock_after: Decimal,
    pub reason_code: Option<ReasonCode>,
    pub note: Option<String>,
    pub actor_id: Uuid,
}

impl NewMovement {
    /// Materialize as an active ledger row
    pub fn into_movement(self, id: Uuid, created_at: DateTime<Utc>) -> Movement {
        Movement {
            id,
            movement_type: self.movement_type,
            origin_ref: self.origin_ref,
            tank_id: self.tank_id,
            liters: self.liters,
            stock_before: self.stock_before,
            stock_after: self.stock_after,
            state: MovementState::Active,
            reason_code: self.reason_code,
            note: self.note,
            actor_id: self.actor_id,
            created_at,
        }
    }
}

/// A row flipped to `Annulled`, with the liters it had contributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidedMovement {
    pub id: Uuid,
    pub tank_id: Uuid,
    pub liters: Decimal,
}

/// What annulling a workflow entity has to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Annulment {
    /// Nothing was applied yet, only the state flips
    Discard,
    /// Stock was applied and must be reversed
    Reverse,
}

/// Flip every active movement of `origin_ref` to annulled
pub fn void_movements(
    movements: &mut [Movement],
    entity: EntityType,
    origin_ref: Uuid,
) -> LedgerResult<Vec<VoidedMovement>> {
    let voided: Vec<VoidedMovement> = movements
        .iter_mut()
        .filter(|m| m.origin_ref == Some(origin_ref) && m.is_active())
        .map(|m| {
            m.state = MovementState::Annulled;
            VoidedMovement {
                id: m.id,
                tank_id: m.tank_id,
                liters: m.liters,
            }
        })
        .collect();

    if voided.is_empty() {
        return Err(LedgerError::AlreadyVoided {
            entity,
            id: origin_ref,
        });
    }
    Ok(voided)
}

/// Inverse delta per tank that undoes the voided movements
pub fn reversal_deltas(voided: &[VoidedMovement]) -> BTreeMap<Uuid, Decimal> {
    let mut deltas = BTreeMap::new();
    for movement in voided {
        *deltas.entry(movement.tank_id).or_insert(Decimal::ZERO) -= movement.liters;
    }
    deltas
}

/// Replay active movements in timestamp order from the opening balance
pub fn replay_stock(stock_initial: Decimal, movements: &[Movement]) -> Decimal {
    let mut active: Vec<&Movement> = movements.iter().filter(|m| m.is_active()).collect();
    active.sort_by_key(|m| m.created_at);
    active
        .into_iter()
        .fold(stock_initial, |stock, m| stock + m.liters)
}

/// Outcome of replaying a tank's ledger against its stored stock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub tank_id: Uuid,
    pub stock_initial: Decimal,
    pub replayed_stock: Decimal,
    pub stock_current: Decimal,
    pub active_movements: usize,
    pub consistent: bool,
}

impl ReplayReport {
    pub fn build(
        tank_id: Uuid,
        stock_initial: Decimal,
        stock_current: Decimal,
        movements: &[Movement],
    ) -> Self {
        let replayed_stock = replay_stock(stock_initial, movements);
        Self {
            tank_id,
            stock_initial,
            replayed_stock,
            stock_current,
            active_movements: movements.iter().filter(|m| m.is_active()).count(),
            consistent: replayed_stock == stock_current,
        }
    }
}
