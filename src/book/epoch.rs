//! Epoch boundary filtering.

use tracing::{debug, trace};

use super::replica::OrderBookReplica;
use crate::metrics;

/// Applies engine epoch announcements to a replica exactly once each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochGate {
    last_applied: Option<u64>,
}

impl EpochGate {
    /// Create a gate that has not seen any epoch yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last epoch index applied to the replica.
    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    /// Purge provisional orders that do not belong to `epoch`.
    ///
    /// Must run before any order tagged with `epoch` is applied. Re-announcing
    /// the current epoch, or an older one, leaves the replica untouched.
    /// Returns whether the replica was filtered.
    pub fn advance(&mut self, replica: &mut OrderBookReplica, epoch: u64) -> bool {
        match self.last_applied {
            Some(last) if epoch == last => {
                trace!(epoch, "Epoch already applied");
                return false;
            }
            Some(last) if epoch < last => {
                debug!(epoch, last, "Ignoring epoch older than the last applied");
                metrics::inc_anomalies(metrics::ANOMALY_STALE_EPOCH);
                return false;
            }
            _ => {}
        }

        let dropped = replica.set_epoch(epoch);
        self.last_applied = Some(epoch);
        debug!(epoch, dropped, remaining = replica.count(), "Epoch advanced");
        true
    }

    /// Forget the last applied epoch (new subscription).
    pub fn reset(&mut self) {
        self.last_applied = None;
    }
}
