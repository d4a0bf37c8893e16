//! Diff/compare engine.
//!
//! Given the previous and the freshly merged [`Snapshot`] of a symbol, computes per displayed
//! field the [`PriceCompare`] tag driving the cell colour, and whether the rendered text changed
//! (which is what makes a cell flash).

use crate::{
    format::{PLACEHOLDER, display_value},
    model::{BOOK_DEPTH, BookLevel, FieldKey, FlashKind, OrderBook, PriceCompare, Snapshot, Symbol},
};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

/// Colour per field of one symbol. `None` is the neutral style.
pub type FieldColors = FnvHashMap<FieldKey, Option<PriceCompare>>;

/// Comparison result for one displayed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOutcome {
    pub field: FieldKey,
    pub compare: PriceCompare,
    /// Rendered text differs from the previous snapshot's.
    pub value_changed: bool,
}

/// A cell that should flash on the next frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashResult {
    pub symbol: Symbol,
    pub field_key: FieldKey,
    pub flash_kind: FlashKind,
}

/// Compare `next` against `prev` for every field known in `next`.
///
/// With no `prev` (first snapshot of a symbol) every outcome has `value_changed == false`, so no
/// flash is ever produced for it, but colours are still derived from the feed supplied tags.
pub fn compare(prev: Option<&Snapshot>, next: &Snapshot) -> Vec<FieldOutcome> {
    FieldKey::ALL
        .iter()
        .filter_map(|&field| {
            let value = field_value(next, field)?;
            Some(FieldOutcome {
                field,
                compare: field_compare(prev, next, field, value),
                value_changed: display_changed(prev, next, field),
            })
        })
        .collect()
}

/// Colour map of a set of outcomes.
pub fn colors(outcomes: &[FieldOutcome]) -> FieldColors {
    outcomes
        .iter()
        .map(|outcome| (outcome.field, outcome.compare.color_class().map(|_| outcome.compare)))
        .collect()
}

/// Flash results for the outcomes whose rendered value changed.
pub fn flashes(symbol: &Symbol, outcomes: &[FieldOutcome]) -> Vec<FlashResult> {
    outcomes
        .iter()
        .filter(|outcome| outcome.value_changed)
        .filter_map(|outcome| {
            outcome.compare.flash_kind().map(|flash_kind| FlashResult {
                symbol: symbol.clone(),
                field_key: outcome.field,
                flash_kind,
            })
        })
        .collect()
}

/// Split an encoded aggregate `"<value>|<tag>"` into its value and optional tag.
///
/// Returns `None` if the value part is not a number.
pub fn split_tagged(encoded: &str) -> Option<(f64, Option<PriceCompare>)> {
    let (value, tag) = match encoded.split_once('|') {
        Some((value, tag)) => (value, PriceCompare::from_code(tag)),
        None => (encoded, None),
    };
    let value = value.trim().parse::<f64>().ok()?;
    value.is_finite().then_some((value, tag))
}

/// Raw numeric value of `field`, if known.
pub fn field_value(snapshot: &Snapshot, field: FieldKey) -> Option<f64> {
    let trade = snapshot.trade.as_ref();
    let book = snapshot.order_book.as_ref();
    let refs = snapshot.ref_prices.as_ref();

    let value = match field {
        FieldKey::LastPrice => trade?.price,
        FieldKey::LastVolume => trade?.volume,
        FieldKey::Change => trade?.change,
        FieldKey::ChangePercent => trade?.change_percent,
        FieldKey::High => split_tagged(book?.high.as_deref()?).map(|(value, _)| value),
        FieldKey::Low => split_tagged(book?.low.as_deref()?).map(|(value, _)| value),
        FieldKey::Average => split_tagged(book?.average.as_deref()?).map(|(value, _)| value),
        FieldKey::TotalVolume => book?.total_volume,
        FieldKey::Ceiling => refs?.ceiling,
        FieldKey::Floor => refs?.floor,
        FieldKey::Reference => refs?.reference,
        FieldKey::ForeignBuy => snapshot.foreign_trade.as_ref()?.buy_volume,
        FieldKey::ForeignSell => snapshot.foreign_trade.as_ref()?.sell_volume,
        FieldKey::ForeignRoom => snapshot.foreign_room.as_ref()?.current_room,
        level_field => {
            let (level, is_price) = book_level(book?, level_field)?;
            if is_price { level.price } else { level.volume }
        }
    };
    value.filter(|value| value.is_finite())
}

/// Resolve a bid/ask field to its [`BookLevel`], and whether it is the price (vs volume) column.
fn book_level(book: &OrderBook, field: FieldKey) -> Option<(&BookLevel, bool)> {
    (0..BOOK_DEPTH).find_map(|depth| {
        if field == FieldKey::BID_PRICE[depth] {
            Some((&book.bids[depth], true))
        } else if field == FieldKey::BID_VOLUME[depth] {
            Some((&book.bids[depth], false))
        } else if field == FieldKey::ASK_PRICE[depth] {
            Some((&book.asks[depth], true))
        } else if field == FieldKey::ASK_VOLUME[depth] {
            Some((&book.asks[depth], false))
        } else {
            None
        }
    })
}

fn field_compare(prev: Option<&Snapshot>, next: &Snapshot, field: FieldKey, value: f64) -> PriceCompare {
    match field {
        FieldKey::Ceiling => PriceCompare::Ceiling,
        FieldKey::Floor => PriceCompare::Floor,
        FieldKey::Reference => PriceCompare::Reference,
        FieldKey::LastPrice | FieldKey::Change | FieldKey::ChangePercent => trade_compare(prev, next),
        FieldKey::High | FieldKey::Low | FieldKey::Average => next
            .order_book
            .as_ref()
            .and_then(|book| match field {
                FieldKey::High => book.high.as_deref(),
                FieldKey::Low => book.low.as_deref(),
                _ => book.average.as_deref(),
            })
            .and_then(split_tagged)
            .and_then(|(_, tag)| tag)
            .unwrap_or(PriceCompare::Unchanged),
        FieldKey::LastVolume
        | FieldKey::TotalVolume
        | FieldKey::ForeignBuy
        | FieldKey::ForeignSell
        | FieldKey::ForeignRoom => prev
            .and_then(|prev| field_value(prev, field))
            .map(|prev_value| PriceCompare::between(value, prev_value))
            .unwrap_or(PriceCompare::Unchanged),
        level_field => next
            .order_book
            .as_ref()
            .and_then(|book| book_level(book, level_field))
            .and_then(|(level, _)| level.compare)
            .unwrap_or(PriceCompare::Unchanged),
    }
}

/// Feed supplied trade tag, falling back to the last price direction when the feed omits it.
fn trade_compare(prev: Option<&Snapshot>, next: &Snapshot) -> PriceCompare {
    let trade = next.trade.as_ref();
    if let Some(tag) = trade.and_then(|trade| trade.compare) {
        return tag;
    }

    let next_price = trade.and_then(|trade| trade.price);
    let prev_price = prev
        .and_then(|prev| prev.trade.as_ref())
        .and_then(|trade| trade.price);

    match (next_price, prev_price) {
        (Some(next_price), Some(prev_price)) => PriceCompare::between(next_price, prev_price),
        _ => PriceCompare::Unchanged,
    }
}

fn display_changed(prev: Option<&Snapshot>, next: &Snapshot, field: FieldKey) -> bool {
    let Some(prev) = prev else {
        return false;
    };

    let before = display_value(prev, field);
    before != PLACEHOLDER && before != display_value(next, field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ForeignTrade, RefPrices, Trade};

    fn trade(price: f64, compare: Option<PriceCompare>) -> Snapshot {
        Snapshot::new("ACB:G1:STX").with_trade(Trade {
            price: Some(price),
            compare,
            ..Default::default()
        })
    }

    fn outcome(outcomes: &[FieldOutcome], field: FieldKey) -> Option<FieldOutcome> {
        outcomes.iter().copied().find(|outcome| outcome.field == field)
    }

    #[test]
    fn test_first_snapshot_emits_colors_but_no_flash() {
        let next = trade(25_000.0, Some(PriceCompare::Up));

        let outcomes = compare(None, &next);
        let last_price = outcome(&outcomes, FieldKey::LastPrice).unwrap();

        assert_eq!(last_price.compare, PriceCompare::Up);
        assert!(outcomes.iter().all(|outcome| !outcome.value_changed));
        assert!(flashes(&next.symbol, &outcomes).is_empty());
        assert_eq!(
            colors(&outcomes).get(&FieldKey::LastPrice),
            Some(&Some(PriceCompare::Up))
        );
    }

    #[test]
    fn test_flash_only_when_display_value_changes() {
        let prev = trade(10_000.0, Some(PriceCompare::Up));
        let next = trade(10_000.000_000_1, Some(PriceCompare::Up));

        let outcomes = compare(Some(&prev), &next);

        assert!(!outcome(&outcomes, FieldKey::LastPrice).unwrap().value_changed);
        assert!(flashes(&next.symbol, &outcomes).is_empty());
    }

    #[test]
    fn test_trade_tag_falls_back_to_price_direction() {
        struct TestCase {
            prev: Option<Snapshot>,
            next: Snapshot,
            expected: PriceCompare,
        }

        let tests = vec![
            TestCase {
                // TC0: feed tag wins over derived direction
                prev: Some(trade(25_000.0, None)),
                next: trade(26_000.0, Some(PriceCompare::Ceiling)),
                expected: PriceCompare::Ceiling,
            },
            TestCase {
                // TC1: no feed tag, price rose
                prev: Some(trade(25_000.0, None)),
                next: trade(25_100.0, None),
                expected: PriceCompare::Up,
            },
            TestCase {
                // TC2: no feed tag, price fell
                prev: Some(trade(25_000.0, None)),
                next: trade(24_900.0, None),
                expected: PriceCompare::Down,
            },
            TestCase {
                // TC3: no feed tag, no previous snapshot
                prev: None,
                next: trade(24_900.0, None),
                expected: PriceCompare::Unchanged,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let outcomes = compare(test.prev.as_ref(), &test.next);
            let actual = outcome(&outcomes, FieldKey::LastPrice).unwrap().compare;
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_reference_levels_use_fixed_tags() {
        let refs = RefPrices {
            reference: Some(25_000.0),
            ceiling: Some(26_700.0),
            floor: Some(23_300.0),
        };
        let prev = Snapshot::new("ACB:G1:STX").with_ref_prices(refs.clone());
        let next = Snapshot::new("ACB:G1:STX").with_ref_prices(RefPrices {
            ceiling: Some(26_750.0),
            ..refs
        });

        let outcomes = compare(Some(&prev), &next);

        let ceiling = outcome(&outcomes, FieldKey::Ceiling).unwrap();
        assert_eq!(ceiling.compare, PriceCompare::Ceiling);
        assert!(ceiling.value_changed);
        assert_eq!(outcome(&outcomes, FieldKey::Floor).unwrap().compare, PriceCompare::Floor);
        assert_eq!(
            outcome(&outcomes, FieldKey::Reference).unwrap().compare,
            PriceCompare::Reference
        );
        assert_eq!(
            flashes(&next.symbol, &outcomes),
            vec![FlashResult {
                symbol: "ACB:G1:STX".into(),
                field_key: FieldKey::Ceiling,
                flash_kind: FlashKind::Ceiling,
            }]
        );
    }

    #[test]
    fn test_aggregates_split_value_and_tag() {
        let book = |high: &str| {
            Snapshot::new("ACB:G1:STX").with_order_book(OrderBook {
                high: Some(high.into()),
                average: Some("not-a-number|u".into()),
                ..Default::default()
            })
        };

        let outcomes = compare(Some(&book("25300|u")), &book("25400|c"));
        let high = outcome(&outcomes, FieldKey::High).unwrap();

        assert_eq!(high.compare, PriceCompare::Ceiling);
        assert!(high.value_changed);
        assert!(outcome(&outcomes, FieldKey::Average).is_none());
    }

    #[test]
    fn test_book_levels_use_per_level_tag() {
        let mut book = OrderBook::default();
        book.bids[1] = BookLevel {
            price: Some(24_800.0),
            volume: Some(1_500.0),
            compare: Some(PriceCompare::Down),
        };
        let next = Snapshot::new("ACB:G1:STX").with_order_book(book);

        let outcomes = compare(None, &next);

        assert_eq!(outcome(&outcomes, FieldKey::Bid2Price).unwrap().compare, PriceCompare::Down);
        assert_eq!(outcome(&outcomes, FieldKey::Bid2Volume).unwrap().compare, PriceCompare::Down);
        assert!(outcome(&outcomes, FieldKey::Bid1Price).is_none());
    }

    #[test]
    fn test_volume_fields_compare_by_magnitude() {
        let foreign = |buy: f64, sell: f64| {
            Snapshot::new("ACB:G1:STX").with_foreign_trade(ForeignTrade {
                buy_volume: Some(buy),
                sell_volume: Some(sell),
            })
        };

        let outcomes = compare(Some(&foreign(1_000.0, 500.0)), &foreign(1_200.0, 400.0));

        let buy = outcome(&outcomes, FieldKey::ForeignBuy).unwrap();
        let sell = outcome(&outcomes, FieldKey::ForeignSell).unwrap();
        assert_eq!(buy.compare, PriceCompare::Up);
        assert!(buy.value_changed);
        assert_eq!(sell.compare, PriceCompare::Down);
    }

    #[test]
    fn test_field_appearing_for_first_time_does_not_flash() {
        let prev = trade(25_000.0, Some(PriceCompare::Up));
        let next = prev.clone().with_ref_prices(RefPrices {
            reference: Some(24_000.0),
            ..Default::default()
        });

        let outcomes = compare(Some(&prev), &next);

        assert!(!outcome(&outcomes, FieldKey::Reference).unwrap().value_changed);
    }

    #[test]
    fn test_split_tagged() {
        assert_eq!(split_tagged("25300|u"), Some((25_300.0, Some(PriceCompare::Up))));
        assert_eq!(split_tagged("25300"), Some((25_300.0, None)));
        assert_eq!(split_tagged("25300|?"), Some((25_300.0, None)));
        assert_eq!(split_tagged("|u"), None);
    }
}
