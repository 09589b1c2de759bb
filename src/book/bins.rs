//! Price-level aggregation of the replica into display bins.
//!
//! A bin groups every order sharing a rate and a booked/provisional status.
//! Bins follow the owning side's direction, with booked bins ahead of
//! provisional ones at the same rate and the market-order bin (rate 0)
//! leading its side.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::replica::OrderBookReplica;
use super::types::{Atoms, OrderId, OrderRecord, Rate, Side};
use crate::metrics;

/// Default number of bins kept per side.
pub const DEFAULT_MAX_BINS: usize = 13;

/// Default price divergence beyond which a bin carries no proximity weight.
pub const DEFAULT_MAX_DIVERGENCE: Decimal = dec!(0.10);

/// Orders sharing a rate and provisional status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    /// Shared rate.
    pub rate: Rate,
    /// Whether the orders are still queued in an epoch.
    pub provisional: bool,
    /// Orders in arrival order.
    pub orders: SmallVec<[OrderRecord; 4]>,
    /// Sum of the orders' remaining quantity.
    pub quantity: Atoms,
    /// Whether any order belongs to the local user.
    pub owned: bool,
}

impl Bin {
    fn new(order: OrderRecord) -> Self {
        Self::from_orders(order.rate, order.is_provisional(), SmallVec::from_elem(order, 1))
    }

    fn from_orders(rate: Rate, provisional: bool, orders: SmallVec<[OrderRecord; 4]>) -> Self {
        let mut bin = Self {
            rate,
            provisional,
            orders,
            quantity: 0,
            owned: false,
        };
        bin.recompute();
        bin
    }

    fn key(&self) -> (Rate, bool) {
        (self.rate, self.provisional)
    }

    fn recompute(&mut self) {
        self.quantity = self
            .orders
            .iter()
            .fold(0, |sum: Atoms, o| sum.saturating_add(o.quantity_atoms));
    }

    /// Whether this bin holds market orders.
    pub fn is_market(&self) -> bool {
        self.rate == 0
    }
}

/// Ordering of bin keys on a side.
fn bin_cmp(side: Side, a: (Rate, bool), b: (Rate, bool)) -> Ordering {
    let (a_rate, a_provisional) = a;
    let (b_rate, b_provisional) = b;

    // Market orders lead regardless of direction.
    match (a_rate == 0, b_rate == 0) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    let by_rate = match side {
        Side::Buy => b_rate.cmp(&a_rate),
        Side::Sell => a_rate.cmp(&b_rate),
    };
    by_rate.then(a_provisional.cmp(&b_provisional))
}

/// Best priced rate and heaviest relevant quantity of one side.
#[derive(Debug, Clone, Copy)]
struct RelevanceBasis {
    best: Option<Rate>,
    heaviest: Atoms,
}

/// Bins for both sides of a replica.
///
/// A side is truncated once it holds more price levels than `max_bins`.
/// Incremental patches stay exact only while a side is not truncated;
/// callers rebuild truncated sides from the replica instead.
#[derive(Debug, Clone)]
pub struct PriceLevelAggregator {
    bids: Vec<Bin>,
    asks: Vec<Bin>,
    bids_truncated: bool,
    asks_truncated: bool,
    max_bins: usize,
    max_divergence: Decimal,
}

impl Default for PriceLevelAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BINS, DEFAULT_MAX_DIVERGENCE)
    }
}

impl PriceLevelAggregator {
    /// Create an empty aggregator keeping at most `max_bins` bins per side.
    pub fn new(max_bins: usize, max_divergence: Decimal) -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            bids_truncated: false,
            asks_truncated: false,
            max_bins: max_bins.max(1),
            max_divergence,
        }
    }

    /// Bins on a side, best first.
    pub fn bins(&self, side: Side) -> &[Bin] {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn bins_mut(&mut self, side: Side) -> &mut Vec<Bin> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn truncated_mut(&mut self, side: Side) -> &mut bool {
        match side {
            Side::Buy => &mut self.bids_truncated,
            Side::Sell => &mut self.asks_truncated,
        }
    }

    /// Whether the side has price levels beyond the kept bins.
    pub fn is_truncated(&self, side: Side) -> bool {
        match side {
            Side::Buy => self.bids_truncated,
            Side::Sell => self.asks_truncated,
        }
    }

    /// Drop all bins.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.bids_truncated = false;
        self.asks_truncated = false;
    }

    /// Rebuild both sides from the replica.
    pub fn rebuild(&mut self, replica: &OrderBookReplica) {
        self.rebuild_side(Side::Buy, replica.side(Side::Buy));
        self.rebuild_side(Side::Sell, replica.side(Side::Sell));
    }

    /// Regroup a side's rate-ordered orders into bins.
    ///
    /// Orders at the same rate may arrive with booked and provisional
    /// entries interleaved, so each equal-rate run is split again here.
    pub fn rebuild_side(&mut self, side: Side, orders: &[OrderRecord]) {
        let mut bins = Vec::new();
        for run in orders.chunk_by(|a, b| a.rate == b.rate) {
            let rate = run[0].rate;
            let (booked, provisional): (SmallVec<[OrderRecord; 4]>, SmallVec<[OrderRecord; 4]>) =
                run.iter().cloned().partition(|o| !o.is_provisional());
            if !booked.is_empty() {
                bins.push(Bin::from_orders(rate, false, booked));
            }
            if !provisional.is_empty() {
                bins.push(Bin::from_orders(rate, true, provisional));
            }
        }

        bins.sort_by(|a, b| bin_cmp(side, a.key(), b.key()));
        let truncated = bins.len() > self.max_bins;
        if truncated {
            trace!(%side, total = bins.len(), kept = self.max_bins, "Truncating bins");
            bins.truncate(self.max_bins);
        }
        *self.bins_mut(side) = bins;
        *self.truncated_mut(side) = truncated;
    }

    /// Place an order into its bin, creating the bin if needed.
    ///
    /// A new bin on a full side evicts the tail bin, unless the new bin
    /// would itself be the tail, in which case it is not kept. Either way
    /// the side becomes truncated. Returns whether the order is shown.
    pub fn insert_into(&mut self, side: Side, order: OrderRecord) -> bool {
        debug_assert_eq!(side, order.side);
        let key = (order.rate, order.is_provisional());
        let max_bins = self.max_bins;
        let bins = self.bins_mut(side);

        let idx = match bins.binary_search_by(|b| bin_cmp(side, b.key(), key)) {
            Ok(idx) => {
                let bin = &mut bins[idx];
                bin.orders.push(order);
                bin.recompute();
                return true;
            }
            Err(idx) => idx,
        };

        if bins.len() < max_bins {
            bins.insert(idx, Bin::new(order));
            return true;
        }

        let shown = idx < bins.len();
        if shown {
            if let Some(evicted) = bins.pop() {
                debug!(
                    %side,
                    rate = evicted.rate,
                    provisional = evicted.provisional,
                    "Evicting tail bin"
                );
            }
            bins.insert(idx, Bin::new(order));
        } else {
            debug!(%side, rate = key.0, provisional = key.1, "New bin beyond kept depth");
        }
        metrics::inc_bin_evictions(side);
        *self.truncated_mut(side) = true;
        shown
    }

    /// Remove an order from the bin holding it, dropping the bin if it
    /// empties. Returns whether the order was found.
    pub fn remove_from(&mut self, side: Side, id: &OrderId) -> bool {
        let bins = self.bins_mut(side);
        let found = bins.iter().enumerate().find_map(|(bin_idx, bin)| {
            bin.orders
                .iter()
                .position(|o| &o.id == id)
                .map(|pos| (bin_idx, pos))
        });
        let Some((bin_idx, pos)) = found else {
            return false;
        };

        let bin = &mut bins[bin_idx];
        bin.orders.remove(pos);
        if bin.orders.is_empty() {
            bins.remove(bin_idx);
        } else {
            bin.recompute();
        }
        true
    }

    /// Patch an order's quantity and its bin's aggregate.
    pub fn update_quantity(&mut self, side: Side, id: &OrderId, quantity: Atoms) -> bool {
        for bin in self.bins_mut(side).iter_mut() {
            if let Some(order) = bin.orders.iter_mut().find(|o| &o.id == id) {
                order.quantity_atoms = quantity;
                bin.recompute();
                return true;
            }
        }
        false
    }

    /// Set every bin's ownership marker from `is_owned`.
    ///
    /// Returns whether any marker changed.
    pub fn annotate_ownership(&mut self, is_owned: impl Fn(&OrderId) -> bool) -> bool {
        let mut changed = false;
        for bin in self.bids.iter_mut().chain(self.asks.iter_mut()) {
            let owned = bin.orders.iter().any(|o| is_owned(&o.id));
            if bin.owned != owned {
                bin.owned = owned;
                changed = true;
            }
        }
        changed
    }

    /// Relevance of a bin in [0, 1].
    ///
    /// Averages proximity to the side's best priced rate (zero at or beyond
    /// the divergence cap) with the bin's quantity relative to the heaviest
    /// order within that same cap.
    pub fn relevance_weight(&self, replica: &OrderBookReplica, side: Side, bin: &Bin) -> Decimal {
        self.weight(self.relevance_basis(replica, side), bin)
    }

    /// Relevance weight of every bin on a side, in bin order.
    pub fn relevance_weights(&self, replica: &OrderBookReplica, side: Side) -> Vec<Decimal> {
        let basis = self.relevance_basis(replica, side);
        self.bins(side).iter().map(|bin| self.weight(basis, bin)).collect()
    }

    fn relevance_basis(&self, replica: &OrderBookReplica, side: Side) -> RelevanceBasis {
        RelevanceBasis {
            best: replica.best_rate(side),
            heaviest: replica
                .heaviest_order(side, self.max_divergence)
                .map_or(0, |o| o.quantity_atoms),
        }
    }

    fn weight(&self, basis: RelevanceBasis, bin: &Bin) -> Decimal {
        let proximity = self.proximity(basis.best, bin.rate);
        let size = if basis.heaviest > 0 {
            (Decimal::from(bin.quantity) / Decimal::from(basis.heaviest)).min(Decimal::ONE)
        } else {
            Decimal::ZERO
        };
        (proximity + size) / Decimal::TWO
    }

    fn proximity(&self, best: Option<Rate>, rate: Rate) -> Decimal {
        if rate == 0 {
            return Decimal::ONE;
        }
        let Some(best) = best else {
            return Decimal::ZERO;
        };
        if self.max_divergence <= Decimal::ZERO {
            return if rate == best { Decimal::ONE } else { Decimal::ZERO };
        }

        let best = Decimal::from(best);
        let divergence = (Decimal::from(rate) - best).abs() / best;
        Decimal::ONE - divergence.min(self.max_divergence) / self.max_divergence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use crate::book::MarketId;
    use crate::config::Config;
    use crate::feed::{BookEvent, BookSession, MarketEvent};

    fn keys(bins: &[Bin]) -> Vec<(Rate, bool)> {
        bins.iter().map(Bin::key).collect()
    }

    fn buy(id: &str, rate: Rate, qty: Atoms) -> OrderRecord {
        OrderRecord::booked(id, Side::Buy, rate, qty)
    }

    fn sell(id: &str, rate: Rate, qty: Atoms) -> OrderRecord {
        OrderRecord::booked(id, Side::Sell, rate, qty)
    }

    #[test]
    fn rebuild_splits_booked_before_provisional() {
        let mut replica = OrderBookReplica::new();
        replica.add(OrderRecord::provisional("p1", Side::Buy, 100, 3, 9));
        replica.add(buy("b1", 100, 2));
        replica.add(buy("b2", 100, 5));
        replica.add(buy("b3", 95, 1));

        let mut agg = PriceLevelAggregator::default();
        agg.rebuild(&replica);

        let bins = agg.bins(Side::Buy);
        assert_eq!(keys(bins), vec![(100, false), (100, true), (95, false)]);
        assert_eq!(bins[0].quantity, 7);
        assert_eq!(bins[1].quantity, 3);
        assert!(agg.bins(Side::Sell).is_empty());
    }

    #[test]
    fn market_bin_leads_both_sides() {
        let mut replica = OrderBookReplica::new();
        replica.add(buy("b", 100, 1));
        replica.add(buy("mb", 0, 4));
        replica.add(sell("s", 110, 1));
        replica.add(sell("ms", 0, 4));

        let mut agg = PriceLevelAggregator::default();
        agg.rebuild(&replica);

        assert_eq!(keys(agg.bins(Side::Buy)), vec![(0, false), (100, false)]);
        assert_eq!(keys(agg.bins(Side::Sell)), vec![(0, false), (110, false)]);
        assert!(agg.bins(Side::Buy)[0].is_market());
    }

    #[test]
    fn insert_into_appends_or_creates() {
        let mut agg = PriceLevelAggregator::default();
        agg.insert_into(Side::Sell, sell("a", 50, 2));
        agg.insert_into(Side::Sell, sell("b", 40, 1));
        agg.insert_into(Side::Sell, sell("c", 50, 3));
        agg.insert_into(Side::Sell, OrderRecord::provisional("d", Side::Sell, 40, 1, 2));

        let bins = agg.bins(Side::Sell);
        assert_eq!(keys(bins), vec![(40, false), (40, true), (50, false)]);
        assert_eq!(bins[2].quantity, 5);
        assert_eq!(bins[2].orders.len(), 2);
    }

    #[test]
    fn capacity_evicts_tail() {
        let mut agg = PriceLevelAggregator::new(3, DEFAULT_MAX_DIVERGENCE);
        for (i, rate) in [100, 99, 98].into_iter().enumerate() {
            agg.insert_into(Side::Buy, buy(&i.to_string(), rate, 1));
        }

        // Existing rate: no eviction.
        agg.insert_into(Side::Buy, buy("x", 99, 1));
        assert_eq!(keys(agg.bins(Side::Buy)), vec![(100, false), (99, false), (98, false)]);

        // New better rate: tail goes.
        agg.insert_into(Side::Buy, buy("y", 101, 1));
        assert_eq!(keys(agg.bins(Side::Buy)), vec![(101, false), (100, false), (99, false)]);

        assert!(agg.is_truncated(Side::Buy));

        // New worst rate is the lowest-relevance bin itself.
        assert!(!agg.insert_into(Side::Buy, buy("z", 50, 1)));
        assert_eq!(keys(agg.bins(Side::Buy)), vec![(101, false), (100, false), (99, false)]);
    }

    #[test]
    fn rebuild_tracks_truncation() {
        let mut replica = OrderBookReplica::new();
        for rate in [100, 99, 98] {
            replica.add(buy(&rate.to_string(), rate, 1));
        }

        let mut agg = PriceLevelAggregator::new(3, DEFAULT_MAX_DIVERGENCE);
        agg.rebuild(&replica);
        assert!(!agg.is_truncated(Side::Buy));

        replica.add(buy("97", 97, 1));
        agg.rebuild(&replica);
        assert!(agg.is_truncated(Side::Buy));

        agg.clear();
        assert!(!agg.is_truncated(Side::Buy));
    }

    #[test]
    fn rebuild_truncates_to_capacity() {
        let mut replica = OrderBookReplica::new();
        for rate in 1..=20 {
            replica.add(sell(&rate.to_string(), rate, 1));
        }

        let mut agg = PriceLevelAggregator::default();
        agg.rebuild(&replica);

        let bins = agg.bins(Side::Sell);
        assert_eq!(bins.len(), DEFAULT_MAX_BINS);
        assert_eq!(bins[0].rate, 1);
        assert_eq!(bins[DEFAULT_MAX_BINS - 1].rate, 13);
    }

    #[test]
    fn remove_from_drops_empty_bin() {
        let mut agg = PriceLevelAggregator::default();
        agg.insert_into(Side::Buy, buy("a", 100, 2));
        agg.insert_into(Side::Buy, buy("b", 100, 3));
        agg.insert_into(Side::Buy, buy("c", 90, 3));

        assert!(agg.remove_from(Side::Buy, &OrderId::from("a")));
        assert_eq!(agg.bins(Side::Buy)[0].quantity, 3);

        assert!(agg.remove_from(Side::Buy, &OrderId::from("c")));
        assert_eq!(keys(agg.bins(Side::Buy)), vec![(100, false)]);

        assert!(!agg.remove_from(Side::Buy, &OrderId::from("c")));
        assert!(!agg.remove_from(Side::Sell, &OrderId::from("b")));
    }

    #[test]
    fn update_quantity_patches_aggregate() {
        let mut agg = PriceLevelAggregator::default();
        agg.insert_into(Side::Sell, sell("a", 10, 2));
        agg.insert_into(Side::Sell, sell("b", 10, 3));

        assert!(agg.update_quantity(Side::Sell, &OrderId::from("b"), 1));
        assert_eq!(agg.bins(Side::Sell)[0].quantity, 3);
        assert!(!agg.update_quantity(Side::Sell, &OrderId::from("q"), 1));
    }

    #[test]
    fn annotate_ownership_is_idempotent() {
        let mut agg = PriceLevelAggregator::default();
        agg.insert_into(Side::Sell, sell("mine", 10, 2));
        agg.insert_into(Side::Sell, sell("theirs", 11, 2));

        let owned = |id: &OrderId| id.as_str() == "mine";
        assert!(agg.annotate_ownership(owned));
        assert!(!agg.annotate_ownership(owned));

        let bins = agg.bins(Side::Sell);
        assert!(bins[0].owned);
        assert!(!bins[1].owned);
    }

    #[test]
    fn relevance_weight_combines_proximity_and_size() {
        let mut replica = OrderBookReplica::new();
        replica.add(buy("a", 100, 50));
        replica.add(buy("b", 95, 25));
        replica.add(buy("c", 80, 500));

        let mut agg = PriceLevelAggregator::default();
        agg.rebuild(&replica);
        let bins = agg.bins(Side::Buy).to_vec();

        // Best bin is also the heaviest within 10%.
        assert_eq!(agg.relevance_weight(&replica, Side::Buy, &bins[0]), Decimal::ONE);
        // Halfway to the cap, half the heaviest quantity.
        assert_eq!(agg.relevance_weight(&replica, Side::Buy, &bins[1]), dec!(0.5));
        // Beyond the cap: proximity 0, size capped at 1.
        assert_eq!(agg.relevance_weight(&replica, Side::Buy, &bins[2]), dec!(0.5));

        assert_eq!(
            agg.relevance_weights(&replica, Side::Buy),
            vec![Decimal::ONE, dec!(0.5), dec!(0.5)]
        );
    }

    #[test]
    fn market_orders_do_not_shift_proximity() {
        let mut replica = OrderBookReplica::new();
        replica.add(sell("m", 0, 10));
        replica.add(sell("a", 100, 10));
        replica.add(sell("b", 105, 10));

        let mut agg = PriceLevelAggregator::default();
        agg.rebuild(&replica);

        // Market bin, best bin, halfway bin.
        assert_eq!(
            agg.relevance_weights(&replica, Side::Sell),
            vec![Decimal::ONE, Decimal::ONE, dec!(0.75)]
        );
    }

    fn event_strategy() -> impl Strategy<Value = BookEvent> {
        let id = || (0u8..24).prop_map(|i| OrderId::new(i.to_string()));
        let order = (id(), any::<bool>(), 0u64..12, 0u64..20, prop::option::of(0u64..4)).prop_map(
            |(id, is_buy, rate, quantity_atoms, epoch)| OrderRecord {
                id,
                side: if is_buy { Side::Buy } else { Side::Sell },
                rate,
                quantity_atoms,
                epoch,
            },
        );
        prop_oneof![
            5 => order.prop_map(BookEvent::Insert),
            2 => id().prop_map(|id| BookEvent::Remove { id }),
            2 => (id(), 0u64..20).prop_map(|(id, qty)| BookEvent::UpdateRemaining { id, qty }),
            1 => (1u64..4).prop_map(|epoch| BookEvent::EpochAdvance { epoch }),
        ]
    }

    proptest! {
        #[test]
        fn incremental_bins_match_rebuild(
            events in prop::collection::vec(event_strategy(), 0..150),
            max_bins in 1usize..6,
        ) {
            let config = Config {
                max_bins_per_side: max_bins,
                track_market_orders: true,
                ..Config::default()
            };
            let mut session = BookSession::new(MarketId::new("dcr_btc"), &config);

            for event in events {
                session.apply(MarketEvent::new("dcr_btc", event));

                let mut fresh = PriceLevelAggregator::new(max_bins, DEFAULT_MAX_DIVERGENCE);
                fresh.rebuild(session.replica());
                for side in [Side::Buy, Side::Sell] {
                    prop_assert_eq!(session.bins(side), fresh.bins(side));
                    prop_assert!(session
                        .bins(side)
                        .windows(2)
                        .all(|w| bin_cmp(side, w[0].key(), w[1].key()) == Ordering::Less));
                }
            }
        }
    }
}
