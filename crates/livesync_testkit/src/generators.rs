//! Property-based test generators using proptest.
//!
//! Generated events use structured ids: market `Mi`, outcome `Mi-Oj`.
//! Delta strategies draw targets from a slightly larger id range than the
//! events hold, so some deltas always miss.

use livesync_protocol::{Delta, Event, FieldSet, Market, Odds, Outcome, RootEntity, Score};
use proptest::prelude::*;
use std::sync::Arc;

/// Largest market index an event strategy generates.
pub const MAX_MARKETS: usize = 4;

/// Largest outcome index per market an event strategy generates.
pub const MAX_OUTCOMES: usize = 4;

/// Strategy for generating valid odds.
pub fn odds_strategy() -> impl Strategy<Value = Odds> {
    (0u32..=200, 1u32..=100).prop_map(|(n, d)| {
        Odds::new(n, d).expect("denominator is never zero")
    })
}

/// Id of outcome `j` in market `i`.
pub fn outcome_id(market: usize, outcome: usize) -> String {
    format!("M{market}-O{outcome}")
}

/// Id of market `i`.
pub fn market_id(market: usize) -> String {
    format!("M{market}")
}

fn market_strategy(index: usize) -> impl Strategy<Value = Market> {
    (
        prop::collection::vec((odds_strategy(), any::<bool>()), 1..=MAX_OUTCOMES),
        any::<bool>(),
    )
        .prop_map(move |(outcomes, tradable)| Market {
            id: market_id(index).into(),
            name: format!("Market {index}"),
            tradable,
            outcomes: outcomes
                .into_iter()
                .enumerate()
                .map(|(j, (odds, tradable))| {
                    Arc::new(Outcome {
                        id: outcome_id(index, j).into(),
                        market_id: market_id(index).into(),
                        name: format!("Outcome {j}"),
                        odds,
                        tradable,
                    })
                })
                .collect(),
        })
}

/// Strategy for generating event roots with unique nested ids.
pub fn event_strategy() -> impl Strategy<Value = RootEntity> {
    (1..=MAX_MARKETS)
        .prop_flat_map(|count| {
            let markets: Vec<_> = (0..count).map(market_strategy).collect();
            (markets, prop::option::of((0u32..10, 0u32..10)))
        })
        .prop_map(|(markets, score)| {
            RootEntity::from(Event {
                id: "E1".into(),
                home_team: "Home".into(),
                away_team: "Away".into(),
                status: None,
                match_time: None,
                score: score.map(|(home, away)| Score { home, away }),
                market_count: markets.len() as u32,
                markets: markets.into_iter().map(Arc::new).collect(),
            })
        })
}

/// Strategy for outcome ids, some of which no generated event holds.
pub fn outcome_target_strategy() -> impl Strategy<Value = String> {
    (0..=MAX_MARKETS, 0..=MAX_OUTCOMES).prop_map(|(i, j)| outcome_id(i, j))
}

/// Strategy for a market added under id `Mi`.
///
/// Outcome ids are drawn from the whole id range, so an added market may
/// take over outcomes its siblings hold.
pub fn added_market_strategy() -> impl Strategy<Value = Market> {
    (
        0..=MAX_MARKETS,
        prop::collection::vec((outcome_target_strategy(), odds_strategy()), 0..=MAX_OUTCOMES),
        any::<bool>(),
    )
        .prop_map(|(index, outcomes, tradable)| {
            let mut seen = Vec::new();
            let outcomes = outcomes
                .into_iter()
                .filter(|(id, _)| {
                    let fresh = !seen.contains(id);
                    seen.push(id.clone());
                    fresh
                })
                .map(|(id, odds)| {
                    Arc::new(Outcome {
                        id: id.as_str().into(),
                        market_id: market_id(index).into(),
                        name: format!("Outcome {id}"),
                        odds,
                        tradable: true,
                    })
                })
                .collect();
            Market {
                id: market_id(index).into(),
                name: format!("Market {index}"),
                tradable,
                outcomes,
            }
        })
}

/// Strategy for an outcome added to market `Mi`, possibly moving it there
/// from another market.
pub fn added_outcome_strategy() -> impl Strategy<Value = Outcome> {
    (outcome_target_strategy(), 0..=MAX_MARKETS, odds_strategy(), any::<bool>()).prop_map(
        |(id, market, odds, tradable)| Outcome {
            id: id.as_str().into(),
            market_id: market_id(market).into(),
            name: format!("Outcome {id}"),
            odds,
            tradable,
        },
    )
}

/// Strategy for deltas a push stream could carry against a generated event.
pub fn delta_strategy() -> impl Strategy<Value = Delta> {
    prop_oneof![
        4 => (outcome_target_strategy(), odds_strategy())
            .prop_map(|(id, odds)| Delta::odds(id, odds)),
        2 => (outcome_target_strategy(), any::<bool>())
            .prop_map(|(id, available)| Delta::availability(id, available)),
        1 => ((0..=MAX_MARKETS), any::<bool>())
            .prop_map(|(i, available)| Delta::availability(market_id(i), available)),
        1 => (0u32..10, 0u32..10)
            .prop_map(|(home, away)| Delta::update("E1", FieldSet::score(home, away))),
        1 => outcome_target_strategy().prop_map(Delta::remove),
        1 => (0..=MAX_MARKETS).prop_map(|i| Delta::remove(market_id(i))),
        1 => added_market_strategy().prop_map(|market| Delta::AddMarket { market }),
        2 => added_outcome_strategy().prop_map(|outcome| Delta::AddOutcome { outcome }),
        1 => event_strategy().prop_map(|root| Delta::Replace { root }),
    ]
}

/// Strategy for sequences of deltas.
pub fn delta_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<Delta>> {
    prop::collection::vec(delta_strategy(), 0..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    proptest! {
        #[test]
        fn generated_events_have_unique_ids(root in event_strategy()) {
            let event = root.as_event().unwrap();
            let mut seen = HashSet::new();
            for market in &event.markets {
                prop_assert!(seen.insert(market.id.clone()));
                for outcome in &market.outcomes {
                    prop_assert!(seen.insert(outcome.id.clone()));
                    prop_assert_eq!(&outcome.market_id, &market.id);
                }
            }
        }

        #[test]
        fn added_markets_have_unique_outcomes(market in added_market_strategy()) {
            let mut seen = HashSet::new();
            for outcome in &market.outcomes {
                prop_assert!(seen.insert(outcome.id.clone()));
                prop_assert_eq!(&outcome.market_id, &market.id);
            }
        }

        #[test]
        fn generated_odds_are_valid(odds in odds_strategy()) {
            prop_assert!(odds.denominator() > 0);
        }
    }
}
