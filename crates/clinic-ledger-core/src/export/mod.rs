//! Ledger export (JSON with chain metadata, CSV).

mod ledger;

pub use ledger::*;
