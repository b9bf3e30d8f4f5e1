//! Domain models for the Fuel Inventory Ledger

mod audit;
mod dispatch;
mod intake;
mod movement;
mod reconciliation;
mod tank;

pub use audit::*;
pub use dispatch::*;
pub use intake::*;
pub use movement::*;
pub use reconciliation::*;
pub use tank::*;
