//! Order book types and data structures.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Price in quote atoms per base unit. Zero marks a market order.
pub type Rate = u64;

/// Quantity in base-asset atoms.
pub type Atoms = u64;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Bid side, best (highest) rate first.
    #[strum(to_string = "buy", serialize = "bid", serialize = "bids", serialize = "BUY")]
    Buy,
    /// Ask side, best (lowest) rate first.
    #[strum(to_string = "sell", serialize = "ask", serialize = "asks", serialize = "SELL")]
    Sell,
}

impl Side {
    /// Get the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Whether `a` sorts strictly ahead of `b` on this side.
    #[inline]
    pub fn better(&self, a: Rate, b: Rate) -> bool {
        match self {
            Side::Buy => a > b,
            Side::Sell => a < b,
        }
    }
}

/// Opaque order identifier assigned by the matching engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    /// Create a new order id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Market identity (e.g., "dcr_btc").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(pub String);

impl MarketId {
    /// Create a new market id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single order as mirrored from the remote book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Engine-assigned order id.
    pub id: OrderId,
    /// Buy or sell. Never changes for a given order.
    pub side: Side,
    /// Limit rate, or 0 for a market order.
    pub rate: Rate,
    /// Remaining quantity.
    #[serde(rename = "qty")]
    pub quantity_atoms: Atoms,
    /// Epoch index while the order is still provisional.
    #[serde(default)]
    pub epoch: Option<u64>,
}

impl OrderRecord {
    /// Create a booked order.
    pub fn booked(id: impl Into<String>, side: Side, rate: Rate, quantity_atoms: Atoms) -> Self {
        Self {
            id: OrderId::new(id),
            side,
            rate,
            quantity_atoms,
            epoch: None,
        }
    }

    /// Create a provisional order queued in `epoch`.
    pub fn provisional(
        id: impl Into<String>,
        side: Side,
        rate: Rate,
        quantity_atoms: Atoms,
        epoch: u64,
    ) -> Self {
        Self {
            epoch: Some(epoch),
            ..Self::booked(id, side, rate, quantity_atoms)
        }
    }

    /// Whether the order still waits on an epoch to resolve.
    #[inline]
    pub fn is_provisional(&self) -> bool {
        matches!(self.epoch, Some(e) if e > 0)
    }

    /// Whether the order has no fixed rate.
    #[inline]
    pub fn is_market(&self) -> bool {
        self.rate == 0
    }
}

/// Result of walking one side of the book to fill a quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FillEstimate {
    /// Quantity filled (always the requested quantity).
    pub filled: Atoms,
    /// Sum of rate * quantity over the orders touched.
    pub total_cost: u128,
    /// Volume-weighted average rate.
    pub vwap: rust_decimal::Decimal,
    /// Worst rate touched.
    pub worst_rate: Rate,
    /// Best rate available.
    pub best_rate: Rate,
}
