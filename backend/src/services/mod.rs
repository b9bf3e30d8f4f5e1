//! Persistence services for the Fuel Inventory Ledger

pub mod access;
pub mod audit;
pub mod dispatch;
pub mod idempotency;
pub mod intake;
pub mod ledger;
pub mod pin;
pub mod tank;

pub use access::OperatorContext;
pub use audit::AuditService;
pub use dispatch::{DispatchFilter, DispatchService};
pub use idempotency::IdempotencyService;
pub use intake::{IntakeFilter, IntakeService};
pub use ledger::LedgerService;
pub use pin::PinService;
pub use tank::TankService;
