//! Book feed event types and JSON-lines decoding.

use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::book::{Atoms, MarketId, OrderId, OrderRecord};
use crate::error::{FeedError, ReplicaError};

/// One delta from the remote book, in publish order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookEvent {
    /// Full book state at subscription time.
    Snapshot {
        /// Booked buy orders.
        #[serde(default)]
        bids: Vec<OrderRecord>,
        /// Booked sell orders.
        #[serde(default)]
        asks: Vec<OrderRecord>,
        /// Orders queued in the current epoch.
        #[serde(default)]
        epoch_orders: Vec<OrderRecord>,
    },
    /// New order on the book or in the epoch queue.
    Insert(OrderRecord),
    /// Order left the book.
    Remove {
        /// Order id.
        id: OrderId,
    },
    /// Order partially filled.
    UpdateRemaining {
        /// Order id.
        id: OrderId,
        /// New remaining quantity.
        qty: Atoms,
    },
    /// The engine moved to a new epoch.
    EpochAdvance {
        /// New epoch index.
        epoch: u64,
    },
}

impl BookEvent {
    /// Short name used for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            BookEvent::Snapshot { .. } => "snapshot",
            BookEvent::Insert(_) => "insert",
            BookEvent::Remove { .. } => "remove",
            BookEvent::UpdateRemaining { .. } => "update_remaining",
            BookEvent::EpochAdvance { .. } => "epoch_advance",
        }
    }
}

/// A book event tagged with the market it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketEvent {
    /// Market the event was published for.
    pub market: MarketId,
    /// The event itself.
    pub event: BookEvent,
}

impl MarketEvent {
    /// Tag an event with a market.
    pub fn new(market: impl Into<String>, event: BookEvent) -> Self {
        Self {
            market: MarketId::new(market),
            event,
        }
    }
}

/// Decode one feed line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<MarketEvent>, FeedError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|source| FeedError::Malformed {
            line: line_no,
            source,
        })
}

/// Read a whole JSON-lines feed.
pub fn read_feed(reader: impl BufRead) -> Result<Vec<MarketEvent>, ReplicaError> {
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        if let Some(event) = parse_line(idx + 1, &line?)? {
            events.push(event);
        }
    }
    Ok(events)
}
