//! API models for the Fuel Inventory Ledger
//!
//! Re-exports the shared domain models and adds response shapes used only by
//! the HTTP layer

pub use shared::models::*;

use serde::Serialize;

/// Result of an annul request
///
/// Annulling an entity that is already annulled changes nothing and reports
/// `already_annulled` instead of failing.
#[derive(Debug, Clone, Serialize)]
pub struct AnnulOutcome<T> {
    #[serde(flatten)]
    pub entity: T,
    pub already_annulled: bool,
}

impl<T> AnnulOutcome<T> {
    pub fn annulled(entity: T) -> Self {
        Self {
            entity,
            already_annulled: false,
        }
    }

    pub fn unchanged(entity: T) -> Self {
        Self {
            entity,
            already_annulled: true,
        }
    }
}
