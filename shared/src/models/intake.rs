//! Supplier intake models and state machine

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Annulment, EntityType};
use crate::error::{LedgerError, LedgerResult};

/// Lifecycle of an intake
///
/// `Pending -> Finalized -> Annulled`, or `Pending -> Annulled` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeState {
    Pending,
    Finalized,
    Annulled,
}

impl IntakeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntakeState::Pending => "pending",
            IntakeState::Finalized => "finalized",
            IntakeState::Annulled => "annulled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(IntakeState::Pending),
            "finalized" => Some(IntakeState::Finalized),
            "annulled" => Some(IntakeState::Annulled),
            _ => None,
        }
    }

    /// State after a successful receipt confirmation
    pub fn confirm(self) -> LedgerResult<IntakeState> {
        match self {
            IntakeState::Pending => Ok(IntakeState::Finalized),
            IntakeState::Finalized | IntakeState::Annulled => Err(LedgerError::InvalidState {
                entity: EntityType::Intake,
                current: self.as_str().to_string(),
                attempted: "confirm",
            }),
        }
    }

    /// What annulling from this state entails
    pub fn annul(self, intake_id: Uuid) -> LedgerResult<Annulment> {
        match self {
            IntakeState::Pending => Ok(Annulment::Discard),
            IntakeState::Finalized => Ok(Annulment::Reverse),
            IntakeState::Annulled => Err(LedgerError::AlreadyVoided {
                entity: EntityType::Intake,
                id: intake_id,
            }),
        }
    }
}

/// Driver who brought the delivery, captured on receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub name: String,
    pub document: String,
    pub plate: String,
}

/// One tank's share of an intake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeDetail {
    pub id: Uuid,
    pub tank_id: Uuid,
    /// Declared by the supplier at creation
    pub liters: Decimal,
    pub meter_start: Option<Decimal>,
    pub meter_end: Option<Decimal>,
    /// `meter_end - meter_start`, set on confirmation
    pub received_liters: Option<Decimal>,
    /// Quantity that actually reached the ledger
    pub posted_liters: Option<Decimal>,
}

/// A supplier fuel delivery across one or more tanks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intake {
    pub id: Uuid,
    pub business_id: Uuid,
    pub date: NaiveDate,
    pub supplier_ref: String,
    pub payment_type_ref: String,
    pub unit_price: Decimal,
    pub total_liters: Decimal,
    pub total_amount: Decimal,
    pub state: IntakeState,
    pub sequence_global: i64,
    pub sequence_daily: i32,
    /// Display number, e.g. "INT-20240315-007"
    pub number: String,
    pub driver: Option<DriverInfo>,
    pub details: Vec<IntakeDetail>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub confirmed_by: Option<Uuid>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub annulled_by: Option<Uuid>,
    pub annulled_at: Option<DateTime<Utc>>,
    pub annul_reason: Option<String>,
}

impl Intake {
    /// Tanks touched by this intake, in lock order
    pub fn tank_ids(&self) -> Vec<Uuid> {
        self.details
            .iter()
            .map(|d| d.tank_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn detail(&self, detail_id: Uuid) -> LedgerResult<&IntakeDetail> {
        self.details
            .iter()
            .find(|d| d.id == detail_id)
            .ok_or(LedgerError::UnknownDetail { detail_id })
    }

    pub fn posted_total(&self) -> Decimal {
        self.details.iter().filter_map(|d| d.posted_liters).sum()
    }

    /// Flip to annulled, recording who did it
    pub fn mark_annulled(&mut self, actor_id: Uuid, reason: Option<String>, now: DateTime<Utc>) {
        self.state = IntakeState::Annulled;
        self.annulled_by = Some(actor_id);
        self.annulled_at = Some(now);
        self.annul_reason = reason;
    }
}

/// Total declared liters and amount for a set of detail quantities
pub fn intake_totals(liters: &[Decimal], unit_price: Decimal) -> (Decimal, Decimal) {
    let total_liters: Decimal = liters.iter().sum();
    let total_amount = (total_liters * unit_price).round_dp(2);
    (total_liters, total_amount)
}

/// Generate an intake display number: INT-YYYYMMDD-NNN
pub fn format_intake_number(date: NaiveDate, sequence_daily: i32) -> String {
    format!("INT-{}-{:03}", date.format("%Y%m%d"), sequence_daily)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_confirm_only_from_pending() {
        assert_eq!(IntakeState::Pending.confirm(), Ok(IntakeState::Finalized));
        assert!(matches!(
            IntakeState::Finalized.confirm(),
            Err(LedgerError::InvalidState { attempted: "confirm", .. })
        ));
        assert!(IntakeState::Annulled.confirm().is_err());
    }

    #[test]
    fn test_annul_paths() {
        let id = Uuid::new_v4();
        assert_eq!(IntakeState::Pending.annul(id), Ok(Annulment::Discard));
        assert_eq!(IntakeState::Finalized.annul(id), Ok(Annulment::Reverse));
        assert_eq!(
            IntakeState::Annulled.annul(id),
            Err(LedgerError::AlreadyVoided {
                entity: EntityType::Intake,
                id
            })
        );
    }

    #[test]
    fn test_intake_totals() {
        let (liters, amount) = intake_totals(&[dec("100"), dec("250.5")], dec("1.234"));
        assert_eq!(liters, dec("350.5"));
        assert_eq!(amount, dec("432.52"));
    }

    #[test]
    fn test_format_intake_number() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(format_intake_number(date, 7), "INT-20240315-007");
    }
}
