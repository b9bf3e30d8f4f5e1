//! Pure workflow logic for intakes and dispatches
//!
//! The backend loads and locks the rows a transition needs, hands them to
//! these functions, and persists whatever comes back inside the same
//! database transaction. Any error means the transaction is dropped.

mod book;
mod dispatch;
mod intake;

pub use book::*;
pub use dispatch::*;
pub use intake::*;

use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

/// Checks an operator PIN against its stored credential
pub trait PinVerifier {
    fn verify(&self, actor_id: Uuid, pin: &str) -> bool;
}

/// Fail with `InvalidPin` unless `pin` is present and verifies for `actor_id`
pub fn require_pin(
    pins: &dyn PinVerifier,
    actor_id: Uuid,
    pin: Option<&str>,
) -> LedgerResult<()> {
    match pin {
        Some(pin) if !pin.is_empty() && pins.verify(actor_id, pin) => Ok(()),
        _ => Err(LedgerError::InvalidPin { actor_id }),
    }
}
