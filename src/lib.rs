//! Client-side replica of a remote matching engine's order book.
//!
//! The replica is built from a snapshot and kept current by an ordered
//! stream of insert, remove, quantity-update and epoch-advance events for a
//! single market. It answers best-price and representative-order queries
//! and projects both sides into price-level bins.
//!
//! ```text
//! bids (best first)      asks (best first)
//! 100  booked   7        105  booked      2
//! 100  epoch 42 3        106  booked     10
//!  98  booked   5        110  epoch 42    1
//!        ── mid-gap 102.5 ──
//! ```
//!
//! # Modules
//!
//! - [`book`]: Order records, the replica, epoch gate and bins
//! - [`feed`]: Event decoding, per-market session and async driver
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Error types for the outer surfaces
//! - [`metrics`]: Prometheus metrics
//! - [`api`]: HTTP API for health, metrics and book queries
//! - [`utils`]: Utility functions

pub mod api;
pub mod book;
pub mod config;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod utils;

pub use book::{OrderBookReplica, OrderRecord, Side};
pub use config::Config;
pub use error::{ReplicaError, Result};
