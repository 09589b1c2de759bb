//! The local user's own orders, fed by a separate notification stream.
//!
//! That stream is not synchronized with the book feed, so bins are
//! annotated from this set by delayed re-checks rather than inline.

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::book::OrderId;

/// Notification about one of the user's orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserOrderEvent {
    /// The user placed an order that may appear on the book.
    Placed {
        /// Order id.
        id: OrderId,
    },
    /// The order was filled, cancelled or revoked.
    Finished {
        /// Order id.
        id: OrderId,
    },
}

/// Concurrent set of the user's live order ids.
#[derive(Debug, Default)]
pub struct OwnedOrders {
    ids: DashSet<OrderId>,
}

impl OwnedOrders {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a user-order notification.
    pub fn apply(&self, event: UserOrderEvent) {
        match event {
            UserOrderEvent::Placed { id } => {
                trace!(order_id = %id, "Own order placed");
                self.ids.insert(id);
            }
            UserOrderEvent::Finished { id } => {
                trace!(order_id = %id, "Own order finished");
                self.ids.remove(&id);
            }
        }
    }

    /// Whether `id` is one of the user's orders.
    pub fn contains(&self, id: &OrderId) -> bool {
        self.ids.contains(id)
    }

    /// Number of tracked orders.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no orders are tracked.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
