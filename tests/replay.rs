//! End-to-end replay of a recorded feed through the book session.

use book_replica::book::{MarketId, OrderId, Rate, Side};
use book_replica::config::Config;
use book_replica::feed::{read_feed, Applied, BookSession};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

const FEED: &str = r#"
# subscription snapshot at epoch 41
{"market":"dcr_btc","event":{"type":"snapshot","bids":[{"id":"b100","side":"buy","rate":100,"qty":5},{"id":"b99","side":"buy","rate":99,"qty":50}],"asks":[{"id":"s50","side":"sell","rate":50000,"qty":3}],"epoch_orders":[{"id":"e1","side":"buy","rate":98,"qty":4,"epoch":41},{"id":"mkt","side":"sell","rate":0,"qty":9,"epoch":41}]}}
{"market":"dcr_btc","event":{"type":"insert","id":"b80","side":"buy","rate":80,"qty":1000}}
{"market":"dcr_btc","event":{"type":"insert","id":"b95","side":"buy","rate":95,"qty":2}}
{"market":"dcr_btc","event":{"type":"insert","id":"s40k","side":"sell","rate":40000,"qty":1}}
{"market":"btc_ltc","event":{"type":"insert","id":"other","side":"buy","rate":1,"qty":1}}
{"market":"dcr_btc","event":{"type":"insert","id":"zero","side":"buy","rate":101,"qty":0}}
{"market":"dcr_btc","event":{"type":"remove","id":"never-seen"}}
{"market":"dcr_btc","event":{"type":"update_remaining","id":"b99","qty":45}}
{"market":"dcr_btc","event":{"type":"epoch_advance","epoch":42}}
{"market":"dcr_btc","event":{"type":"insert","id":"e2","side":"sell","rate":45000,"qty":2,"epoch":42}}
"#;

fn replay() -> (BookSession, Vec<Applied>) {
    let events = read_feed(FEED.as_bytes()).unwrap();
    let mut session = BookSession::new(MarketId::new("dcr_btc"), &Config::default());
    let applied = events.into_iter().map(|e| session.apply(e)).collect();
    (session, applied)
}

fn rates(session: &BookSession, side: Side) -> Vec<Rate> {
    session.replica().side(side).iter().map(|o| o.rate).collect()
}

#[test]
fn replay_reports_each_outcome() {
    let (_, applied) = replay();
    assert_eq!(
        applied,
        vec![
            Applied::Changed,   // snapshot
            Applied::Changed,   // b80
            Applied::Changed,   // b95
            Applied::Changed,   // s40k
            Applied::Stale,     // other market
            Applied::Unchanged, // zero quantity
            Applied::Unchanged, // unknown remove
            Applied::Changed,   // update b99
            Applied::Changed,   // epoch 42 drops e1
            Applied::Changed,   // e2
        ]
    );
}

#[test]
fn replay_leaves_sides_sorted() {
    let (session, _) = replay();

    assert_eq!(rates(&session, Side::Buy), vec![100, 99, 95, 80]);
    assert_eq!(rates(&session, Side::Sell), vec![40000, 45000, 50000]);
    assert_eq!(session.best_price(Side::Sell), Some(40000));
    assert_eq!(session.count(), 7);
    assert!(!session.is_empty());
}

#[test]
fn replay_heaviest_stays_within_band() {
    let (session, _) = replay();

    let heaviest = session.heaviest_relevant_order(Side::Buy, dec!(0.10)).unwrap();
    assert_eq!(heaviest.id, OrderId::from("b99"));
    assert_eq!(heaviest.quantity_atoms, 45);
}

#[test]
fn replay_bins_follow_epoch_state() {
    let (session, _) = replay();

    let asks: Vec<(Rate, bool, u64)> = session
        .bins(Side::Sell)
        .iter()
        .map(|b| (b.rate, b.provisional, b.quantity))
        .collect();
    assert_eq!(asks, vec![(40000, false, 1), (45000, true, 2), (50000, false, 3)]);

    let summary = session.summary();
    assert_eq!(summary.epoch, Some(42));
    assert_eq!(summary.bid_count, 4);
    assert!(summary.ready);
}
