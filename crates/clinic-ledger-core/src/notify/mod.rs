//! Push notification of committed changes.
//!
//! Writers append to the `change_events` outbox inside their own
//! transactions. [`ChangeFeed`] fans committed events out to in-process
//! subscribers; [`ChangeCursor`] lets a consumer apply them exactly once even
//! when a poll and a push deliver the same event.

mod cursor;
mod feed;

pub use cursor::*;
pub use feed::*;
