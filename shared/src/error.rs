//! Domain errors raised by the ledger core
//!
//! Every variant carries the tank, detail or entity it refers to so that the
//! presentation layer can point at the offending row.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::EntityType;

/// Errors raised by the tank registry, the movement ledger and the workflows
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Invalid meter reading: start {meter_start}, end {meter_end}")]
    InvalidReading {
        detail_id: Option<Uuid>,
        meter_start: Decimal,
        meter_end: Decimal,
    },

    #[error("Tank {tank_id} capacity exceeded: requested {requested} L, room for {available} L")]
    CapacityExceeded {
        tank_id: Uuid,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Tank {tank_id} would go negative: requested {requested} L, in stock {available} L")]
    NegativeStock {
        tank_id: Uuid,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Reversal on tank {tank_id} blocked: {requested} L to remove, only {available} L in stock")]
    NegativeStockOnReversal {
        tank_id: Uuid,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Invalid PIN for actor {actor_id}")]
    InvalidPin { actor_id: Uuid },

    #[error("Reconciliation of detail {detail_id} requires a reason code")]
    MissingReason { detail_id: Uuid },

    #[error("Detail {detail_id} measured {received} L against {declared} L declared and must be reconciled")]
    ReconciliationRequired {
        detail_id: Uuid,
        declared: Decimal,
        received: Decimal,
        discrepancy: Decimal,
    },

    #[error("Photo evidence is required to complete an external dispatch")]
    MissingEvidence,

    #[error("{entity} is {current}, cannot {attempted}")]
    InvalidState {
        entity: EntityType,
        current: String,
        attempted: &'static str,
    },

    #[error("{entity} {id} is already annulled")]
    AlreadyVoided { entity: EntityType, id: Uuid },

    #[error("Tank {tank_id} is inactive")]
    TankInactive { tank_id: Uuid },

    #[error("Tank {tank_id} not found")]
    UnknownTank { tank_id: Uuid },

    #[error("Intake detail {detail_id} not found")]
    UnknownDetail { detail_id: Uuid },
}

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        LedgerError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation { .. } => "VALIDATION_ERROR",
            LedgerError::InvalidReading { .. } => "INVALID_READING",
            LedgerError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            LedgerError::NegativeStock { .. } => "NEGATIVE_STOCK",
            LedgerError::NegativeStockOnReversal { .. } => "NEGATIVE_STOCK_ON_REVERSAL",
            LedgerError::InvalidPin { .. } => "INVALID_PIN",
            LedgerError::MissingReason { .. } => "MISSING_REASON",
            LedgerError::ReconciliationRequired { .. } => "RECONCILIATION_REQUIRED",
            LedgerError::MissingEvidence => "MISSING_EVIDENCE",
            LedgerError::InvalidState { .. } => "INVALID_STATE",
            LedgerError::AlreadyVoided { .. } => "ALREADY_VOIDED",
            LedgerError::TankInactive { .. } => "TANK_INACTIVE",
            LedgerError::UnknownTank { .. } => "TANK_NOT_FOUND",
            LedgerError::UnknownDetail { .. } => "DETAIL_NOT_FOUND",
        }
    }

    /// Tank the error refers to, if any
    pub fn tank_id(&self) -> Option<Uuid> {
        match self {
            LedgerError::CapacityExceeded { tank_id, .. }
            | LedgerError::NegativeStock { tank_id, .. }
            | LedgerError::NegativeStockOnReversal { tank_id, .. }
            | LedgerError::TankInactive { tank_id }
            | LedgerError::UnknownTank { tank_id } => Some(*tank_id),
            _ => None,
        }
    }

    /// Intake detail the error refers to, if any
    pub fn detail_id(&self) -> Option<Uuid> {
        match self {
            LedgerError::InvalidReading { detail_id, .. } => *detail_id,
            LedgerError::MissingReason { detail_id }
            | LedgerError::ReconciliationRequired { detail_id, .. }
            | LedgerError::UnknownDetail { detail_id } => Some(*detail_id),
            _ => None,
        }
    }

    /// Current state of the entity for state errors
    pub fn current_state(&self) -> Option<&str> {
        match self {
            LedgerError::InvalidState { current, .. } => Some(current.as_str()),
            LedgerError::AlreadyVoided { .. } => Some("annulled"),
            _ => None,
        }
    }
}
