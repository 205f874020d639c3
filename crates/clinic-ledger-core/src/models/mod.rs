//! Domain models for the clinic ledger.

mod catalog;
mod inventory;
mod patient;
mod transaction;
mod validation;
mod visit;

pub use catalog::*;
pub use inventory::*;
pub use patient::*;
pub use transaction::*;
pub use validation::*;
pub use visit::*;
