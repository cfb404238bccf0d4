//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use livesync_protocol::{Delta, Odds, RootEntity};
use livesync_testkit::{EventBuilder, MarketBuilder};
use rand::Rng;

/// Builds event `E1` with `markets` markets of `outcomes` outcomes each.
///
/// Market ids are `M{i}`, outcome ids `M{i}-O{j}`.
pub fn large_event(markets: usize, outcomes: usize) -> RootEntity {
    (0..markets)
        .fold(EventBuilder::new("E1"), |event, i| {
            let market = (0..outcomes).fold(MarketBuilder::new(&format!("M{i}")), |market, j| {
                market.outcome(&format!("M{i}-O{j}"), 1 + j as u32, 2)
            });
            event.market(market)
        })
        .build()
}

/// Generates odds updates against random outcomes of a [`large_event`].
pub fn random_odds_deltas(count: usize, markets: usize, outcomes: usize) -> Vec<Delta> {
    let mut rng = rand::thread_rng();
    (0..count)
        .filter_map(|_| {
            let i = rng.gen_range(0..markets);
            let j = rng.gen_range(0..outcomes);
            let odds = Odds::new(rng.gen_range(1..500), rng.gen_range(1..100)).ok()?;
            Some(Delta::odds(format!("M{i}-O{j}"), odds))
        })
        .collect()
}
