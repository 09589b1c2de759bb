//! Local mirror of the remote limit order book.
//!
//! Both sides are kept as plain vectors with the best rate at index 0:
//! bids descending, asks ascending. Every mutation goes through
//! [`OrderBookReplica`] so the ordering holds by construction; a cheap
//! self-check after each insert repairs it if it ever does not.

use rust_decimal::Decimal;
use tracing::{debug, instrument, trace, warn};

use super::types::{Atoms, FillEstimate, OrderId, OrderRecord, Rate, Side};
use crate::metrics;

/// Bid and ask sequences for a single market.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBookReplica {
    bids: Vec<OrderRecord>,
    asks: Vec<OrderRecord>,
}

impl OrderBookReplica {
    /// Create an empty replica.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bid side, highest rate first.
    pub fn bids(&self) -> &[OrderRecord] {
        &self.bids
    }

    /// Ask side, lowest rate first.
    pub fn asks(&self) -> &[OrderRecord] {
        &self.asks
    }

    /// Orders on the given side, best rate first.
    pub fn side(&self, side: Side) -> &[OrderRecord] {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut Vec<OrderRecord> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Drop every order on both sides.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// Add an order at its rate-ordered position.
    ///
    /// Zero-quantity orders are ignored: the engine can report a stale
    /// remaining quantity of 0 for an order that was completely filled in
    /// the epoch it was placed. An order whose id is already present
    /// replaces the existing record.
    ///
    /// Returns whether the order was inserted.
    pub fn add(&mut self, order: OrderRecord) -> bool {
        if order.quantity_atoms == 0 {
            debug!(
                order_id = %order.id,
                side = %order.side,
                rate = order.rate,
                "Ignoring zero-quantity order"
            );
            metrics::inc_anomalies(metrics::ANOMALY_ZERO_QUANTITY);
            return false;
        }

        if let Some(previous) = self.take(&order.id) {
            trace!(
                order_id = %order.id,
                previous_epoch = ?previous.epoch,
                epoch = ?order.epoch,
                "Replacing existing order"
            );
        }

        let side = order.side;
        let orders = self.side_mut(side);
        let idx = insertion_index(orders, side, order.rate);
        orders.insert(idx, order);
        self.ensure_sorted(side);
        true
    }

    /// Remove an order by id from whichever side holds it.
    ///
    /// Returns whether an order was found.
    pub fn remove(&mut self, id: &OrderId) -> bool {
        if self.take(id).is_some() {
            return true;
        }
        debug!(order_id = %id, "Remove for unknown order");
        metrics::inc_anomalies(metrics::ANOMALY_UNKNOWN_REMOVE);
        false
    }

    /// Remove and return an order without treating a miss as an anomaly.
    pub(crate) fn take(&mut self, id: &OrderId) -> Option<OrderRecord> {
        for orders in [&mut self.bids, &mut self.asks] {
            if let Some(idx) = orders.iter().position(|o| &o.id == id) {
                return Some(orders.remove(idx));
            }
        }
        None
    }

    /// Overwrite the remaining quantity of an order in place.
    ///
    /// The rate never changes, so the order keeps its position.
    pub fn update_remaining(&mut self, id: &OrderId, quantity: Atoms) -> bool {
        match self.get_mut(id) {
            Some(order) => {
                order.quantity_atoms = quantity;
                true
            }
            None => {
                debug!(order_id = %id, quantity, "Update for unknown order");
                metrics::inc_anomalies(metrics::ANOMALY_UNKNOWN_UPDATE);
                false
            }
        }
    }

    /// Drop provisional orders that belong to any epoch other than `epoch`.
    ///
    /// Booked orders (no epoch, or epoch 0) are always kept. Returns the
    /// number of orders dropped.
    #[instrument(level = "trace", skip(self))]
    pub fn set_epoch(&mut self, epoch: u64) -> usize {
        let before = self.count();
        let keep = |o: &OrderRecord| match o.epoch {
            None | Some(0) => true,
            Some(e) => e == epoch,
        };
        self.bids.retain(keep);
        self.asks.retain(keep);
        before - self.count()
    }

    /// Look up an order by id.
    pub fn get(&self, id: &OrderId) -> Option<&OrderRecord> {
        self.bids.iter().chain(self.asks.iter()).find(|o| &o.id == id)
    }

    fn get_mut(&mut self, id: &OrderId) -> Option<&mut OrderRecord> {
        self.bids
            .iter_mut()
            .chain(self.asks.iter_mut())
            .find(|o| &o.id == id)
    }

    /// Best priced order on a side.
    ///
    /// Market orders (rate 0) sort ahead of every ask but carry no price,
    /// so they never count as best.
    pub fn best_order(&self, side: Side) -> Option<&OrderRecord> {
        self.priced(side).next()
    }

    fn priced(&self, side: Side) -> impl Iterator<Item = &OrderRecord> {
        self.side(side).iter().filter(|o| !o.is_market())
    }

    /// Best rate on a side.
    pub fn best_rate(&self, side: Side) -> Option<Rate> {
        self.best_order(side).map(|o| o.rate)
    }

    /// Largest order on a side, ignoring orders priced more than
    /// `tolerance` away from the best rate in the unfavorable direction.
    ///
    /// A tolerance outside (0, 1] disables the filter. Ties go to the order
    /// closer to the best rate. Market orders are never considered.
    pub fn heaviest_order(&self, side: Side, tolerance: Decimal) -> Option<&OrderRecord> {
        let best = self.best_order(side)?;

        let bound = drift_bound(side, best.rate, tolerance);
        self.priced(side)
            .take_while(|o| match bound {
                Some(bound) => within_bound(side, o.rate, bound),
                None => true,
            })
            .reduce(|heaviest, o| {
                if o.quantity_atoms > heaviest.quantity_atoms {
                    o
                } else {
                    heaviest
                }
            })
    }

    /// Number of orders on both sides.
    pub fn count(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    /// Whether both sides are empty.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Total remaining quantity on a side.
    pub fn total_quantity(&self, side: Side) -> Atoms {
        self.side(side)
            .iter()
            .fold(0, |sum, o| sum.saturating_add(o.quantity_atoms))
    }

    /// Midpoint between the best bid and the best ask.
    pub fn mid_gap(&self) -> Option<Decimal> {
        match (self.best_rate(Side::Buy), self.best_rate(Side::Sell)) {
            (Some(bid), Some(ask)) => Some((Decimal::from(bid) + Decimal::from(ask)) / Decimal::TWO),
            _ => None,
        }
    }

    /// Best ask minus best bid. Negative when the book is inverted.
    pub fn spread(&self) -> Option<i128> {
        match (self.best_rate(Side::Buy), self.best_rate(Side::Sell)) {
            (Some(bid), Some(ask)) => Some(i128::from(ask) - i128::from(bid)),
            _ => None,
        }
    }

    /// Check if the book is inverted (best ask below best bid).
    pub fn is_inverted(&self) -> bool {
        self.spread().is_some_and(|s| s < 0)
    }

    /// Walk `side` from the best rate and estimate filling `quantity`.
    ///
    /// Market orders carry no rate and are skipped. Returns `None` when the
    /// side cannot absorb the full quantity.
    pub fn fill_estimate(&self, side: Side, quantity: Atoms) -> Option<FillEstimate> {
        if quantity == 0 {
            return None;
        }

        let mut priced = self.priced(side).peekable();
        let best_rate = priced.peek()?.rate;

        let mut remaining = quantity;
        let mut total_cost: u128 = 0;
        let mut worst_rate = best_rate;

        for order in priced {
            if remaining == 0 {
                break;
            }
            let fill = remaining.min(order.quantity_atoms);
            total_cost += u128::from(fill) * u128::from(order.rate);
            remaining -= fill;
            worst_rate = order.rate;
        }

        if remaining != 0 {
            return None;
        }

        let cost = Decimal::try_from_i128_with_scale(i128::try_from(total_cost).ok()?, 0).ok()?;
        let vwap = cost.checked_div(Decimal::from(quantity))?;

        Some(FillEstimate {
            filled: quantity,
            total_cost,
            vwap,
            worst_rate,
            best_rate,
        })
    }

    /// Check the rate ordering of a side and repair it if broken.
    fn ensure_sorted(&mut self, side: Side) {
        let orders = self.side_mut(side);
        let sorted = is_sorted(orders, side);
        debug_assert!(sorted, "{side} side out of rate order");
        if sorted {
            return;
        }

        warn!(%side, len = orders.len(), "Side out of rate order, re-sorting");
        metrics::inc_book_resorts();
        orders.sort_by(|a, b| match side {
            Side::Buy => b.rate.cmp(&a.rate),
            Side::Sell => a.rate.cmp(&b.rate),
        });
    }
}

/// Index at which an order at `rate` goes: after every order that is at
/// least as good.
fn insertion_index(orders: &[OrderRecord], side: Side, rate: Rate) -> usize {
    orders
        .iter()
        .position(|o| side.better(rate, o.rate))
        .unwrap_or(orders.len())
}

fn is_sorted(orders: &[OrderRecord], side: Side) -> bool {
    orders.windows(2).all(|w| !side.better(w[1].rate, w[0].rate))
}

/// Worst rate still considered relevant, or `None` if no filtering applies.
pub(crate) fn drift_bound(side: Side, best: Rate, tolerance: Decimal) -> Option<Decimal> {
    if tolerance <= Decimal::ZERO || tolerance > Decimal::ONE || best == 0 {
        return None;
    }
    let best = Decimal::from(best);
    Some(match side {
        Side::Buy => best * (Decimal::ONE - tolerance),
        Side::Sell => best * (Decimal::ONE + tolerance),
    })
}

pub(crate) fn within_bound(side: Side, rate: Rate, bound: Decimal) -> bool {
    let rate = Decimal::from(rate);
    match side {
        Side::Buy => rate >= bound,
        Side::Sell => rate <= bound,
    }
}
