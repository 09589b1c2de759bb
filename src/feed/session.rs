//! Per-subscription book state driven by the event feed.

use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, trace};

use super::events::{BookEvent, MarketEvent};
use crate::book::{
    Atoms, Bin, EpochGate, FillEstimate, MarketId, OrderBookReplica, OrderId, OrderRecord,
    PriceLevelAggregator, Rate, Side,
};
use crate::config::Config;
use crate::metrics;

/// Outcome of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Event belonged to a market that is no longer active.
    Stale,
    /// Event was absorbed without changing the book.
    Unchanged,
    /// The book changed.
    Changed,
}

/// Point-in-time view of the book for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BookSummary {
    /// Active market.
    pub market: MarketId,
    /// Subscription generation.
    pub generation: u64,
    /// Whether a snapshot has been applied.
    pub ready: bool,
    /// Orders on both sides.
    pub count: usize,
    /// Orders on the bid side.
    pub bid_count: usize,
    /// Orders on the ask side.
    pub ask_count: usize,
    /// Best bid rate.
    pub best_bid: Option<Rate>,
    /// Best ask rate.
    pub best_ask: Option<Rate>,
    /// Midpoint of best bid and ask.
    pub mid_gap: Option<Decimal>,
    /// Best ask minus best bid.
    pub spread: Option<i128>,
    /// Whether the best ask sits below the best bid.
    pub inverted: bool,
    /// Remaining quantity on the bid side.
    pub bid_quantity: Atoms,
    /// Remaining quantity on the ask side.
    pub ask_quantity: Atoms,
    /// Last epoch applied.
    pub epoch: Option<u64>,
    /// When the last event was applied.
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

/// Replica, epoch gate and bins for the active market subscription.
#[derive(Debug, Clone)]
pub struct BookSession {
    market: MarketId,
    generation: u64,
    replica: OrderBookReplica,
    gate: EpochGate,
    aggregator: PriceLevelAggregator,
    track_market_orders: bool,
    ready: bool,
    updated_at: Option<OffsetDateTime>,
}

impl BookSession {
    /// Create a session subscribed to `market`.
    pub fn new(market: MarketId, config: &Config) -> Self {
        Self {
            market,
            generation: 0,
            replica: OrderBookReplica::new(),
            gate: EpochGate::new(),
            aggregator: PriceLevelAggregator::new(
                config.max_bins_per_side,
                config.max_relevance_divergence,
            ),
            track_market_orders: config.track_market_orders,
            ready: false,
            updated_at: None,
        }
    }

    /// Switch to another market, discarding all book state.
    ///
    /// Work scheduled against the previous generation must check
    /// [`BookSession::generation`] before touching the session.
    pub fn subscribe(&mut self, market: MarketId) {
        info!(from = %self.market, to = %market, "Switching market");
        self.market = market;
        self.generation += 1;
        self.replica.clear();
        self.gate.reset();
        self.aggregator.clear();
        self.ready = false;
        self.updated_at = None;
        metrics::set_order_count(0);
    }

    /// Active market.
    pub fn market(&self) -> &MarketId {
        &self.market
    }

    /// Incremented on every market switch.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a snapshot has been applied since subscribing.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// The underlying replica.
    pub fn replica(&self) -> &OrderBookReplica {
        &self.replica
    }

    /// Apply one feed event.
    #[instrument(level = "trace", skip_all, fields(market = %event.market, kind = event.event.kind()))]
    pub fn apply(&mut self, event: MarketEvent) -> Applied {
        if event.market != self.market {
            trace!(active = %self.market, "Dropping event for inactive market");
            metrics::inc_stale_events();
            return Applied::Stale;
        }

        let _timer = metrics::timer_event_apply();
        let kind = event.event.kind();
        let changed = match event.event {
            BookEvent::Snapshot {
                bids,
                asks,
                epoch_orders,
            } => self.apply_snapshot(bids, asks, epoch_orders),
            BookEvent::Insert(order) => self.insert(order),
            BookEvent::Remove { id } => self.remove(&id),
            BookEvent::UpdateRemaining { id, qty } => self.update_remaining(&id, qty),
            BookEvent::EpochAdvance { epoch } => self.advance_epoch(epoch),
        };

        metrics::inc_events_applied(kind);
        metrics::set_order_count(self.replica.count());
        self.updated_at = Some(OffsetDateTime::now_utc());

        if changed {
            Applied::Changed
        } else {
            Applied::Unchanged
        }
    }

    fn admits(&self, order: &OrderRecord) -> bool {
        if order.is_market() && !self.track_market_orders {
            trace!(order_id = %order.id, "Skipping market order");
            return false;
        }
        true
    }

    fn apply_snapshot(
        &mut self,
        bids: Vec<OrderRecord>,
        asks: Vec<OrderRecord>,
        epoch_orders: Vec<OrderRecord>,
    ) -> bool {
        self.replica.clear();
        self.gate.reset();

        for order in bids.into_iter().chain(asks).chain(epoch_orders) {
            if self.admits(&order) {
                self.replica.add(order);
            }
        }

        self.aggregator.rebuild(&self.replica);
        self.ready = true;
        debug!(
            bids = self.replica.bids().len(),
            asks = self.replica.asks().len(),
            "Snapshot applied"
        );
        true
    }

    fn insert(&mut self, order: OrderRecord) -> bool {
        if !self.admits(&order) {
            return false;
        }

        let previous_side = self.replica.get(&order.id).map(|o| o.side);
        if !self.replica.add(order.clone()) {
            return false;
        }
        let side = order.side;
        if let Some(previous) = previous_side.filter(|&p| p != side) {
            self.patch_bins(previous, |bins| {
                bins.remove_from(previous, &order.id);
            });
        }
        self.patch_bins(side, |bins| {
            if previous_side == Some(side) {
                bins.remove_from(side, &order.id);
            }
            bins.insert_into(side, order);
        });
        true
    }

    fn remove(&mut self, id: &OrderId) -> bool {
        let side = self.replica.get(id).map(|o| o.side);
        if !self.replica.remove(id) {
            return false;
        }
        if let Some(side) = side {
            self.patch_bins(side, |bins| {
                bins.remove_from(side, id);
            });
        }
        true
    }

    fn update_remaining(&mut self, id: &OrderId, quantity: u64) -> bool {
        let side = self.replica.get(id).map(|o| o.side);
        if !self.replica.update_remaining(id, quantity) {
            return false;
        }
        if let Some(side) = side {
            self.patch_bins(side, |bins| {
                bins.update_quantity(side, id, quantity);
            });
        }
        true
    }

    /// Mirror a replica change into the bins of `side`.
    ///
    /// Runs after the replica has changed. A truncated side hides price
    /// levels the patch cannot see, so it is regrouped from the replica.
    fn patch_bins(&mut self, side: Side, patch: impl FnOnce(&mut PriceLevelAggregator)) {
        if self.aggregator.is_truncated(side) {
            trace!(%side, "Regrouping truncated side");
            self.aggregator.rebuild_side(side, self.replica.side(side));
        } else {
            patch(&mut self.aggregator);
        }
    }

    fn advance_epoch(&mut self, epoch: u64) -> bool {
        if !self.gate.advance(&mut self.replica, epoch) {
            return false;
        }
        self.aggregator.rebuild(&self.replica);
        true
    }

    /// Best rate on a side.
    pub fn best_price(&self, side: Side) -> Option<Rate> {
        self.replica.best_rate(side)
    }

    /// Largest order within `tolerance` of the best rate.
    pub fn heaviest_relevant_order(&self, side: Side, tolerance: Decimal) -> Option<OrderRecord> {
        self.replica.heaviest_order(side, tolerance).cloned()
    }

    /// Bins on a side, best first.
    pub fn bins(&self, side: Side) -> &[Bin] {
        self.aggregator.bins(side)
    }

    /// Relevance weight of each bin on a side, in bin order.
    pub fn relevance_weights(&self, side: Side) -> Vec<Decimal> {
        self.aggregator.relevance_weights(&self.replica, side)
    }

    /// Estimate filling `quantity` for a taker on `side`, walking the
    /// opposite side from its best rate.
    pub fn fill_estimate(&self, side: Side, quantity: Atoms) -> Option<FillEstimate> {
        self.replica.fill_estimate(side.opposite(), quantity)
    }

    /// Whether both sides are empty.
    pub fn is_empty(&self) -> bool {
        self.replica.is_empty()
    }

    /// Orders on both sides.
    pub fn count(&self) -> usize {
        self.replica.count()
    }

    /// Midpoint of best bid and ask.
    pub fn mid_gap(&self) -> Option<Decimal> {
        self.replica.mid_gap()
    }

    /// Re-derive bin ownership markers, unless the session has moved on to
    /// another market since `generation`.
    ///
    /// Returns `None` when the generation no longer matches, otherwise
    /// whether any marker changed.
    pub fn annotate_ownership(
        &mut self,
        generation: u64,
        is_owned: impl Fn(&OrderId) -> bool,
    ) -> Option<bool> {
        if generation != self.generation {
            trace!(generation, current = self.generation, "Dropping stale ownership re-check");
            return None;
        }
        metrics::inc_ownership_rechecks();
        Some(self.aggregator.annotate_ownership(is_owned))
    }

    /// Point-in-time summary.
    pub fn summary(&self) -> BookSummary {
        BookSummary {
            market: self.market.clone(),
            generation: self.generation,
            ready: self.ready,
            count: self.replica.count(),
            bid_count: self.replica.bids().len(),
            ask_count: self.replica.asks().len(),
            best_bid: self.best_price(Side::Buy),
            best_ask: self.best_price(Side::Sell),
            mid_gap: self.mid_gap(),
            spread: self.replica.spread(),
            inverted: self.replica.is_inverted(),
            bid_quantity: self.replica.total_quantity(Side::Buy),
            ask_quantity: self.replica.total_quantity(Side::Sell),
            epoch: self.gate.last_applied(),
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    const MARKET: &str = "dcr_btc";

    fn session() -> BookSession {
        BookSession::new(MarketId::new(MARKET), &Config::default())
    }

    fn event(event: BookEvent) -> MarketEvent {
        MarketEvent::new(MARKET, event)
    }

    fn insert(order: OrderRecord) -> MarketEvent {
        event(BookEvent::Insert(order))
    }

    fn bin_rates(session: &BookSession, side: Side) -> Vec<(Rate, bool)> {
        session.bins(side).iter().map(|b| (b.rate, b.provisional)).collect()
    }

    #[test]
    fn snapshot_initializes_replica_and_bins() {
        let mut s = session();
        assert!(!s.is_ready());

        let applied = s.apply(event(BookEvent::Snapshot {
            bids: vec![
                OrderRecord::booked("b1", Side::Buy, 100, 5),
                OrderRecord::booked("b2", Side::Buy, 98, 5),
            ],
            asks: vec![OrderRecord::booked("s1", Side::Sell, 105, 2)],
            epoch_orders: vec![
                OrderRecord::provisional("e1", Side::Buy, 100, 1, 7),
                OrderRecord::provisional("m1", Side::Sell, 0, 9, 7),
            ],
        }));

        assert_eq!(applied, Applied::Changed);
        assert!(s.is_ready());
        assert_eq!(s.count(), 4);
        assert_eq!(bin_rates(&s, Side::Buy), vec![(100, false), (100, true), (98, false)]);
        assert_eq!(s.mid_gap(), Some(dec!(102.5)));
    }

    #[test]
    fn market_orders_admitted_when_tracking() {
        let config = Config {
            track_market_orders: true,
            ..Config::default()
        };
        let mut s = BookSession::new(MarketId::new(MARKET), &config);
        s.apply(insert(OrderRecord::provisional("m", Side::Buy, 0, 9, 3)));
        s.apply(insert(OrderRecord::booked("b", Side::Buy, 50, 1)));

        assert_eq!(s.count(), 2);
        assert_eq!(bin_rates(&s, Side::Buy), vec![(0, true), (50, false)]);
        assert_eq!(s.best_price(Side::Buy), Some(50));
    }

    #[test]
    fn market_sell_does_not_become_best_ask() {
        let config = Config {
            track_market_orders: true,
            ..Config::default()
        };
        let mut s = BookSession::new(MarketId::new(MARKET), &config);
        s.apply(insert(OrderRecord::booked("b", Side::Buy, 90, 1)));
        s.apply(insert(OrderRecord::booked("s", Side::Sell, 110, 1)));
        s.apply(insert(OrderRecord::provisional("m", Side::Sell, 0, 9, 3)));

        assert_eq!(bin_rates(&s, Side::Sell), vec![(0, true), (110, false)]);
        assert_eq!(s.best_price(Side::Sell), Some(110));
        assert_eq!(s.mid_gap(), Some(dec!(100)));

        let summary = s.summary();
        assert_eq!(summary.spread, Some(20));
        assert!(!summary.inverted);
        assert_eq!(summary.ask_quantity, 10);
    }

    fn capped_session() -> BookSession {
        let config = Config {
            max_bins_per_side: 3,
            ..Config::default()
        };
        let mut s = BookSession::new(MarketId::new(MARKET), &config);
        s.apply(event(BookEvent::Snapshot {
            bids: vec![
                OrderRecord::booked("100", Side::Buy, 100, 1),
                OrderRecord::booked("99", Side::Buy, 99, 1),
                OrderRecord::booked("98", Side::Buy, 98, 1),
                OrderRecord::booked("97", Side::Buy, 97, 10),
            ],
            asks: vec![],
            epoch_orders: vec![],
        }));
        s
    }

    fn rebuilt(s: &BookSession, side: Side) -> Vec<Bin> {
        let mut agg = PriceLevelAggregator::new(3, Decimal::ONE);
        agg.rebuild(s.replica());
        agg.bins(side).to_vec()
    }

    #[test]
    fn insert_beyond_kept_depth_stays_hidden() {
        let mut s = capped_session();
        s.apply(insert(OrderRecord::booked("97b", Side::Buy, 97, 1)));

        assert_eq!(bin_rates(&s, Side::Buy), vec![(100, false), (99, false), (98, false)]);
        assert_eq!(s.bins(Side::Buy), rebuilt(&s, Side::Buy).as_slice());
    }

    #[test]
    fn removal_on_capped_side_surfaces_hidden_level() {
        let mut s = capped_session();
        s.apply(insert(OrderRecord::booked("97b", Side::Buy, 97, 1)));
        s.apply(event(BookEvent::Remove { id: OrderId::from("100") }));

        let bins = s.bins(Side::Buy);
        assert_eq!(bin_rates(&s, Side::Buy), vec![(99, false), (98, false), (97, false)]);
        assert_eq!(bins[2].quantity, 11);
        assert_eq!(bins, rebuilt(&s, Side::Buy).as_slice());
    }

    #[test]
    fn fill_estimate_walks_opposite_side() {
        let mut s = session();
        s.apply(insert(OrderRecord::booked("s1", Side::Sell, 40, 2)));
        s.apply(insert(OrderRecord::booked("s2", Side::Sell, 50, 2)));
        s.apply(insert(OrderRecord::booked("b1", Side::Buy, 30, 2)));

        let fill = s.fill_estimate(Side::Buy, 3).unwrap();
        assert_eq!(fill.total_cost, 130);
        assert_eq!(fill.worst_rate, 50);
        assert!(s.fill_estimate(Side::Sell, 3).is_none());
    }

    #[test]
    fn stale_market_events_are_dropped() {
        let mut s = session();
        let applied = s.apply(MarketEvent::new(
            "btc_ltc",
            BookEvent::Insert(OrderRecord::booked("x", Side::Buy, 1, 1)),
        ));

        assert_eq!(applied, Applied::Stale);
        assert!(s.is_empty());
    }

    #[test]
    fn insert_remove_update_keep_bins_in_step() {
        let mut s = session();
        s.apply(insert(OrderRecord::booked("a", Side::Sell, 50, 2)));
        s.apply(insert(OrderRecord::booked("b", Side::Sell, 40, 3)));
        s.apply(insert(OrderRecord::booked("c", Side::Sell, 40, 1)));

        assert_eq!(s.best_price(Side::Sell), Some(40));
        assert_eq!(s.bins(Side::Sell)[0].quantity, 4);

        s.apply(event(BookEvent::UpdateRemaining {
            id: OrderId::from("b"),
            qty: 1,
        }));
        assert_eq!(s.bins(Side::Sell)[0].quantity, 2);

        s.apply(event(BookEvent::Remove { id: OrderId::from("a") }));
        assert_eq!(bin_rates(&s, Side::Sell), vec![(40, false)]);
        assert_eq!(s.count(), 2);
    }

    #[test]
    fn anomalies_are_unchanged_noops() {
        let mut s = session();
        s.apply(insert(OrderRecord::booked("a", Side::Buy, 10, 2)));

        assert_eq!(
            s.apply(insert(OrderRecord::booked("x", Side::Buy, 11, 0))),
            Applied::Unchanged
        );
        assert_eq!(
            s.apply(event(BookEvent::Remove { id: OrderId::from("nope") })),
            Applied::Unchanged
        );
        assert_eq!(
            s.apply(event(BookEvent::UpdateRemaining {
                id: OrderId::from("nope"),
                qty: 4,
            })),
            Applied::Unchanged
        );
        assert_eq!(s.count(), 1);
    }

    #[test]
    fn booking_a_provisional_order_reclassifies_its_bin() {
        let mut s = session();
        s.apply(event(BookEvent::EpochAdvance { epoch: 8 }));
        s.apply(insert(OrderRecord::provisional("p", Side::Buy, 100, 3, 8)));
        s.apply(insert(OrderRecord::booked("b", Side::Buy, 100, 1)));
        assert_eq!(bin_rates(&s, Side::Buy), vec![(100, false), (100, true)]);

        // Matched remainder gets booked.
        s.apply(insert(OrderRecord::booked("p", Side::Buy, 100, 2)));
        assert_eq!(bin_rates(&s, Side::Buy), vec![(100, false)]);
        assert_eq!(s.bins(Side::Buy)[0].quantity, 3);
        assert_eq!(s.count(), 2);
    }

    #[test]
    fn epoch_advance_discards_unresolved_provisional_bins() {
        let mut s = session();
        s.apply(event(BookEvent::EpochAdvance { epoch: 4 }));
        s.apply(insert(OrderRecord::provisional("1", Side::Buy, 100, 1, 4)));
        s.apply(insert(OrderRecord::booked("3", Side::Buy, 90, 1)));
        s.apply(event(BookEvent::EpochAdvance { epoch: 5 }));
        s.apply(insert(OrderRecord::provisional("2", Side::Buy, 95, 1, 5)));

        assert_eq!(s.count(), 2);
        assert_eq!(bin_rates(&s, Side::Buy), vec![(95, true), (90, false)]);
        assert_eq!(s.summary().epoch, Some(5));
        assert_eq!(
            s.apply(event(BookEvent::EpochAdvance { epoch: 5 })),
            Applied::Unchanged
        );
    }

    #[test]
    fn subscribe_resets_state_and_generation() {
        let mut s = session();
        s.apply(insert(OrderRecord::booked("a", Side::Buy, 10, 2)));
        let generation = s.generation();

        s.subscribe(MarketId::new("btc_ltc"));

        assert!(s.is_empty());
        assert!(s.bins(Side::Buy).is_empty());
        assert_eq!(s.generation(), generation + 1);
        assert_eq!(s.apply(insert(OrderRecord::booked("b", Side::Buy, 10, 2))), Applied::Stale);
    }

    #[test]
    fn ownership_annotation_checks_generation() {
        let mut s = session();
        s.apply(insert(OrderRecord::booked("mine", Side::Sell, 10, 2)));
        let generation = s.generation();

        let owned = |id: &OrderId| id.as_str() == "mine";
        assert_eq!(s.annotate_ownership(generation, owned), Some(true));
        assert!(s.bins(Side::Sell)[0].owned);

        s.subscribe(MarketId::new("other"));
        assert_eq!(s.annotate_ownership(generation, owned), None);
    }

    #[test]
    fn heaviest_relevant_order_and_weights() {
        let mut s = session();
        s.apply(insert(OrderRecord::booked("a", Side::Buy, 100, 5)));
        s.apply(insert(OrderRecord::booked("b", Side::Buy, 99, 50)));
        s.apply(insert(OrderRecord::booked("c", Side::Buy, 80, 1000)));

        let heaviest = s.heaviest_relevant_order(Side::Buy, dec!(0.10)).unwrap();
        assert_eq!(heaviest.id.as_str(), "b");

        let weights = s.relevance_weights(Side::Buy);
        assert_eq!(weights.len(), 3);
        assert!(weights.iter().all(|w| *w >= Decimal::ZERO && *w <= Decimal::ONE));
    }
}
