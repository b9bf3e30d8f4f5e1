//! Shared domain core for the Fuel Inventory Ledger
//!
//! Holds the tank, movement, intake, dispatch and audit models together with
//! the pure workflow logic that the backend runs inside its database
//! transactions. Nothing in this crate performs I/O.

pub mod error;
pub mod models;
pub mod policy;
pub mod types;
pub mod validation;
pub mod workflow;

pub use error::*;
pub use models::*;
pub use policy::*;
pub use types::*;
pub use validation::*;
pub use workflow::*;
