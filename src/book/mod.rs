//! Order book replica module.
//!
//! This module handles:
//! - Order types and data structures
//! - The rate-ordered bid/ask replica and its queries
//! - Epoch boundary filtering
//! - Price-level bins for display and relevance weighting

pub mod bins;
pub mod epoch;
pub mod replica;
pub mod types;

pub use bins::{Bin, PriceLevelAggregator};
pub use epoch::EpochGate;
pub use replica::OrderBookReplica;
pub use types::{Atoms, FillEstimate, MarketId, OrderId, OrderRecord, Rate, Side};
