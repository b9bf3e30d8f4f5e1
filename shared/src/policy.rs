//! Business policy values for the ledger workflows

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Largest gap between measured and declared liters accepted without reconciliation (0.5 L)
pub const RECONCILIATION_THRESHOLD_LITERS: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// External dispatches need a photo before they can be completed
pub const EXTERNAL_EVIDENCE_REQUIRED: bool = true;

/// Policy knobs handed to the workflows, overridable through configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedgerPolicy {
    pub reconciliation_threshold_liters: Decimal,
    pub external_evidence_required: bool,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            reconciliation_threshold_liters: RECONCILIATION_THRESHOLD_LITERS,
            external_evidence_required: EXTERNAL_EVIDENCE_REQUIRED,
        }
    }
}
