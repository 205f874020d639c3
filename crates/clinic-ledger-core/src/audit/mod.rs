//! Tamper-evident hash chain over the dispense ledger.

mod chain;

pub use chain::*;
