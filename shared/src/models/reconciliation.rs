//! Reconciliation models for intake discrepancies

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why measured liters differ from the declared delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    MeterError,
    Evaporation,
    Leak,
    Calibration,
    SupplierDiscrepancy,
    Other,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::MeterError => "meter_error",
            ReasonCode::Evaporation => "evaporation",
            ReasonCode::Leak => "leak",
            ReasonCode::Calibration => "calibration",
            ReasonCode::SupplierDiscrepancy => "supplier_discrepancy",
            ReasonCode::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "meter_error" => Some(ReasonCode::MeterError),
            "evaporation" => Some(ReasonCode::Evaporation),
            "leak" => Some(ReasonCode::Leak),
            "calibration" => Some(ReasonCode::Calibration),
            "supplier_discrepancy" => Some(ReasonCode::SupplierDiscrepancy),
            "other" => Some(ReasonCode::Other),
            _ => None,
        }
    }

    /// `Other` is meaningless without an explanation
    pub fn requires_note(&self) -> bool {
        matches!(self, ReasonCode::Other)
    }
}

/// Authorized correction supplied with a meter reading
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Signed liters added to the measured quantity
    #[serde(default)]
    pub adjustment_liters: Decimal,
    pub reason_code: Option<ReasonCode>,
    pub note: Option<String>,
    /// Supervisor authorizing the correction; defaults to the caller
    pub authorizer_id: Option<Uuid>,
    /// Never echoed back or hashed into request fingerprints
    #[serde(default, skip_serializing)]
    pub pin: Option<String>,
}

/// Signed gap between measured and declared liters
pub fn discrepancy(declared: Decimal, received: Decimal) -> Decimal {
    received - declared
}

/// Whether the gap is larger than the tolerated threshold
pub fn requires_reconciliation(declared: Decimal, received: Decimal, threshold: Decimal) -> bool {
    discrepancy(declared, received).abs() > threshold
}
