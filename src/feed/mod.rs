//! Feed module applying remote book events to the local replica.
//!
//! This module handles:
//! - Book event types and JSON-lines decoding
//! - The per-subscription session with its market identity guard
//! - The user's own orders from the separate user-order feed
//! - The async driver and its delayed ownership re-checks

pub mod driver;
pub mod events;
pub mod ownership;
pub mod session;

pub use driver::{pump_lines, BookDriver, SharedSession};
pub use events::{parse_line, read_feed, BookEvent, MarketEvent};
pub use ownership::{OwnedOrders, UserOrderEvent};
pub use session::{Applied, BookSession, BookSummary};
