//! Fuel dispatch models and state machine

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Annulment, EntityType};
use crate::error::{LedgerError, LedgerResult};

/// Lifecycle of a dispatch
///
/// `Open -> Completed -> Annulled`, or `Open -> Annulled` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Open,
    Completed,
    Annulled,
}

impl DispatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchState::Open => "open",
            DispatchState::Completed => "completed",
            DispatchState::Annulled => "annulled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(DispatchState::Open),
            "completed" => Some(DispatchState::Completed),
            "annulled" => Some(DispatchState::Annulled),
            _ => None,
        }
    }

    /// State after a successful completion
    pub fn complete(self) -> LedgerResult<DispatchState> {
        match self {
            DispatchState::Open => Ok(DispatchState::Completed),
            DispatchState::Completed | DispatchState::Annulled => Err(LedgerError::InvalidState {
                entity: EntityType::Dispatch,
                current: self.as_str().to_string(),
                attempted: "complete",
            }),
        }
    }

    /// What annulling from this state entails
    pub fn annul(self, dispatch_id: Uuid) -> LedgerResult<Annulment> {
        match self {
            DispatchState::Open => Ok(Annulment::Discard),
            DispatchState::Completed => Ok(Annulment::Reverse),
            DispatchState::Annulled => Err(LedgerError::AlreadyVoided {
                entity: EntityType::Dispatch,
                id: dispatch_id,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientKind {
    Internal,
    External,
}

impl RecipientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientKind::Internal => "internal",
            RecipientKind::External => "external",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "internal" => Some(RecipientKind::Internal),
            "external" => Some(RecipientKind::External),
            _ => None,
        }
    }
}

/// Who receives the fuel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recipient {
    /// Company machinery working on a job
    Internal { machine_ref: String, job_ref: String },
    /// A third-party vehicle
    External {
        driver_name: String,
        driver_document: String,
        plate: String,
    },
}

impl Recipient {
    pub fn kind(&self) -> RecipientKind {
        match self {
            Recipient::Internal { .. } => RecipientKind::Internal,
            Recipient::External { .. } => RecipientKind::External,
        }
    }
}

/// A fuel withdrawal from a tank
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    pub id: Uuid,
    pub business_id: Uuid,
    pub date: NaiveDate,
    pub tank_id: Uuid,
    pub recipient: Recipient,
    pub deliverer_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub meter_start: Decimal,
    pub meter_end: Option<Decimal>,
    /// `meter_start - meter_end`, set on completion
    pub liters: Option<Decimal>,
    pub state: DispatchState,
    pub evidence_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_by: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub annulled_by: Option<Uuid>,
    pub annulled_at: Option<DateTime<Utc>>,
    pub annul_reason: Option<String>,
}

impl Dispatch {
    /// Flip to annulled, recording who did it
    pub fn mark_annulled(&mut self, actor_id: Uuid, reason: Option<String>, now: DateTime<Utc>) {
        self.state = DispatchState::Annulled;
        self.annulled_by = Some(actor_id);
        self.annulled_at = Some(now);
        self.annul_reason = reason;
    }
}

/// Liters drawn between two readings of the tank gauge
pub fn dispatched_liters(meter_start: Decimal, meter_end: Decimal) -> LedgerResult<Decimal> {
    let liters = meter_start - meter_end;
    if liters < Decimal::ZERO {
        return Err(LedgerError::InvalidReading {
            detail_id: None,
            meter_start,
            meter_end,
        });
    }
    Ok(liters)
}
