//! Core data model for the price board.
//!
//! A [`Snapshot`] is the latest known state of one instrument, assembled from several message
//! categories. Every sub-record and every field inside it is optional: a field is only known once
//! the feed has sent it, and a later partial update never erases it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::cmp::Ordering;

/// Unique identifier of an instrument on a board and market, eg/ `"ACB:G1:STX"`.
pub type Symbol = SmolStr;

/// Number of bid and ask levels carried by an [`OrderBook`].
pub const BOOK_DEPTH: usize = 3;

/// Categorical comparison outcome driving both the persistent colour and the flash of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum PriceCompare {
    #[serde(rename = "u")]
    Up,
    #[serde(rename = "d")]
    Down,
    #[serde(rename = "c")]
    Ceiling,
    #[serde(rename = "f")]
    Floor,
    #[serde(rename = "r")]
    Reference,
    #[serde(rename = "e", alias = "x")]
    Unchanged,
}

impl PriceCompare {
    /// Parse the single letter wire code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "u" => Some(Self::Up),
            "d" => Some(Self::Down),
            "c" => Some(Self::Ceiling),
            "f" => Some(Self::Floor),
            "r" => Some(Self::Reference),
            "e" | "x" => Some(Self::Unchanged),
            _ => None,
        }
    }

    /// Single letter wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Up => "u",
            Self::Down => "d",
            Self::Ceiling => "c",
            Self::Floor => "f",
            Self::Reference => "r",
            Self::Unchanged => "e",
        }
    }

    /// Derive a directional tag from comparing a new value against a previous one.
    pub fn from_ordering(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Greater => Self::Up,
            Ordering::Less => Self::Down,
            Ordering::Equal => Self::Unchanged,
        }
    }

    /// Compare two numbers, treating incomparable values (NaN) as unchanged.
    pub fn between(next: f64, prev: f64) -> Self {
        next.partial_cmp(&prev)
            .map(Self::from_ordering)
            .unwrap_or(Self::Unchanged)
    }

    /// Exclusive colour class applied to a cell, `None` for the neutral style.
    pub fn color_class(&self) -> Option<&'static str> {
        match self {
            Self::Up => Some("up"),
            Self::Down => Some("down"),
            Self::Ceiling => Some("ceiling"),
            Self::Floor => Some("floor"),
            Self::Reference => Some("reference"),
            Self::Unchanged => None,
        }
    }

    /// Flash kind for a changed value carrying this tag.
    pub fn flash_kind(&self) -> Option<FlashKind> {
        match self {
            Self::Up => Some(FlashKind::Up),
            Self::Down => Some(FlashKind::Down),
            Self::Ceiling => Some(FlashKind::Ceiling),
            Self::Floor => Some(FlashKind::Floor),
            Self::Reference => Some(FlashKind::Reference),
            Self::Unchanged => None,
        }
    }
}

/// Transient highlight applied to a cell whose displayed value just changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Up,
    Down,
    Ceiling,
    Floor,
    Reference,
}

impl FlashKind {
    pub const ALL: [FlashKind; 5] = [
        FlashKind::Up,
        FlashKind::Down,
        FlashKind::Ceiling,
        FlashKind::Floor,
        FlashKind::Reference,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlashKind::Up => "up",
            FlashKind::Down => "down",
            FlashKind::Ceiling => "ceiling",
            FlashKind::Floor => "floor",
            FlashKind::Reference => "reference",
        }
    }
}

impl std::fmt::Display for FlashKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Displayed field of a board row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKey {
    LastPrice,
    LastVolume,
    Change,
    ChangePercent,
    Bid1Price,
    Bid1Volume,
    Bid2Price,
    Bid2Volume,
    Bid3Price,
    Bid3Volume,
    Ask1Price,
    Ask1Volume,
    Ask2Price,
    Ask2Volume,
    Ask3Price,
    Ask3Volume,
    High,
    Low,
    Average,
    TotalVolume,
    Ceiling,
    Floor,
    Reference,
    ForeignBuy,
    ForeignSell,
    ForeignRoom,
}

impl FieldKey {
    pub const ALL: [FieldKey; 26] = [
        FieldKey::LastPrice,
        FieldKey::LastVolume,
        FieldKey::Change,
        FieldKey::ChangePercent,
        FieldKey::Bid1Price,
        FieldKey::Bid1Volume,
        FieldKey::Bid2Price,
        FieldKey::Bid2Volume,
        FieldKey::Bid3Price,
        FieldKey::Bid3Volume,
        FieldKey::Ask1Price,
        FieldKey::Ask1Volume,
        FieldKey::Ask2Price,
        FieldKey::Ask2Volume,
        FieldKey::Ask3Price,
        FieldKey::Ask3Volume,
        FieldKey::High,
        FieldKey::Low,
        FieldKey::Average,
        FieldKey::TotalVolume,
        FieldKey::Ceiling,
        FieldKey::Floor,
        FieldKey::Reference,
        FieldKey::ForeignBuy,
        FieldKey::ForeignSell,
        FieldKey::ForeignRoom,
    ];

    pub const BID_PRICE: [FieldKey; BOOK_DEPTH] =
        [FieldKey::Bid1Price, FieldKey::Bid2Price, FieldKey::Bid3Price];
    pub const BID_VOLUME: [FieldKey; BOOK_DEPTH] =
        [FieldKey::Bid1Volume, FieldKey::Bid2Volume, FieldKey::Bid3Volume];
    pub const ASK_PRICE: [FieldKey; BOOK_DEPTH] =
        [FieldKey::Ask1Price, FieldKey::Ask2Price, FieldKey::Ask3Price];
    pub const ASK_VOLUME: [FieldKey; BOOK_DEPTH] =
        [FieldKey::Ask1Volume, FieldKey::Ask2Volume, FieldKey::Ask3Volume];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKey::LastPrice => "lastPrice",
            FieldKey::LastVolume => "lastVolume",
            FieldKey::Change => "change",
            FieldKey::ChangePercent => "changePercent",
            FieldKey::Bid1Price => "bid1Price",
            FieldKey::Bid1Volume => "bid1Volume",
            FieldKey::Bid2Price => "bid2Price",
            FieldKey::Bid2Volume => "bid2Volume",
            FieldKey::Bid3Price => "bid3Price",
            FieldKey::Bid3Volume => "bid3Volume",
            FieldKey::Ask1Price => "ask1Price",
            FieldKey::Ask1Volume => "ask1Volume",
            FieldKey::Ask2Price => "ask2Price",
            FieldKey::Ask2Volume => "ask2Volume",
            FieldKey::Ask3Price => "ask3Price",
            FieldKey::Ask3Volume => "ask3Volume",
            FieldKey::High => "high",
            FieldKey::Low => "low",
            FieldKey::Average => "average",
            FieldKey::TotalVolume => "totalVolume",
            FieldKey::Ceiling => "ceiling",
            FieldKey::Floor => "floor",
            FieldKey::Reference => "reference",
            FieldKey::ForeignBuy => "foreignBuy",
            FieldKey::ForeignSell => "foreignSell",
            FieldKey::ForeignRoom => "foreignRoom",
        }
    }

    /// Whether the field renders a quantity rather than a price.
    pub fn is_volume(&self) -> bool {
        matches!(
            self,
            FieldKey::LastVolume
                | FieldKey::Bid1Volume
                | FieldKey::Bid2Volume
                | FieldKey::Bid3Volume
                | FieldKey::Ask1Volume
                | FieldKey::Ask2Volume
                | FieldKey::Ask3Volume
                | FieldKey::TotalVolume
                | FieldKey::ForeignBuy
                | FieldKey::ForeignSell
                | FieldKey::ForeignRoom
        )
    }
}

impl std::fmt::Display for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Field-wise partial merge: values present in `update` overwrite, absent values are kept.
pub trait Merge {
    fn merge(&mut self, update: Self);
}

fn overwrite<T>(slot: &mut Option<T>, update: Option<T>) {
    if let Some(value) = update {
        *slot = Some(value);
    }
}

fn merge_record<T: Merge>(slot: &mut Option<T>, update: Option<T>) {
    let Some(update) = update else {
        return;
    };
    match slot.as_mut() {
        Some(current) => current.merge(update),
        None => *slot = Some(update),
    }
}

/// Last trade of the session.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Trade {
    pub price: Option<f64>,
    pub volume: Option<f64>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    /// Direction tag supplied by the feed, when it supplies one.
    pub compare: Option<PriceCompare>,
    pub time: Option<DateTime<Utc>>,
}

impl Merge for Trade {
    fn merge(&mut self, update: Self) {
        overwrite(&mut self.volume, update.volume);
        overwrite(&mut self.change, update.change);
        overwrite(&mut self.change_percent, update.change_percent);
        // The tag describes the price it came with, a new untagged price drops it
        if update.price.is_some() || update.compare.is_some() {
            self.compare = update.compare;
        }
        overwrite(&mut self.price, update.price);
        overwrite(&mut self.time, update.time);
    }
}

/// One price level of the order book.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BookLevel {
    pub price: Option<f64>,
    pub volume: Option<f64>,
    pub compare: Option<PriceCompare>,
}

impl Merge for BookLevel {
    fn merge(&mut self, update: Self) {
        overwrite(&mut self.price, update.price);
        overwrite(&mut self.volume, update.volume);
        overwrite(&mut self.compare, update.compare);
    }
}

/// Top [`BOOK_DEPTH`] levels of each side plus session aggregates.
///
/// `high`, `low` and `average` are kept in their encoded wire form `"<value>|<tag>"`; the compare
/// engine splits them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct OrderBook {
    pub bids: [BookLevel; BOOK_DEPTH],
    pub asks: [BookLevel; BOOK_DEPTH],
    pub high: Option<SmolStr>,
    pub low: Option<SmolStr>,
    pub average: Option<SmolStr>,
    pub total_volume: Option<f64>,
}

impl Merge for OrderBook {
    fn merge(&mut self, update: Self) {
        let OrderBook {
            bids,
            asks,
            high,
            low,
            average,
            total_volume,
        } = update;

        for (current, update) in self.bids.iter_mut().zip(bids) {
            current.merge(update);
        }
        for (current, update) in self.asks.iter_mut().zip(asks) {
            current.merge(update);
        }
        overwrite(&mut self.high, high);
        overwrite(&mut self.low, low);
        overwrite(&mut self.average, average);
        overwrite(&mut self.total_volume, total_volume);
    }
}

/// Session reference levels. Static per session.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RefPrices {
    pub reference: Option<f64>,
    pub ceiling: Option<f64>,
    pub floor: Option<f64>,
}

impl Merge for RefPrices {
    fn merge(&mut self, update: Self) {
        overwrite(&mut self.reference, update.reference);
        overwrite(&mut self.ceiling, update.ceiling);
        overwrite(&mut self.floor, update.floor);
    }
}

/// Foreign investor traded volumes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ForeignTrade {
    pub buy_volume: Option<f64>,
    pub sell_volume: Option<f64>,
}

impl Merge for ForeignTrade {
    fn merge(&mut self, update: Self) {
        overwrite(&mut self.buy_volume, update.buy_volume);
        overwrite(&mut self.sell_volume, update.sell_volume);
    }
}

/// Remaining foreign ownership room.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ForeignRoom {
    pub current_room: Option<f64>,
    pub total_room: Option<f64>,
}

impl Merge for ForeignRoom {
    fn merge(&mut self, update: Self) {
        overwrite(&mut self.current_room, update.current_room);
        overwrite(&mut self.total_room, update.total_room);
    }
}

/// Latest known market state of one symbol. Also used as the partial update type: a sub-record
/// that is `None` in an update simply was not part of that message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Snapshot {
    pub symbol: Symbol,
    pub trade: Option<Trade>,
    pub order_book: Option<OrderBook>,
    pub ref_prices: Option<RefPrices>,
    pub foreign_trade: Option<ForeignTrade>,
    pub foreign_room: Option<ForeignRoom>,
}

impl Snapshot {
    /// Construct an empty snapshot for `symbol`.
    pub fn new(symbol: impl Into<Symbol>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    pub fn with_trade(mut self, trade: Trade) -> Self {
        self.trade = Some(trade);
        self
    }

    pub fn with_order_book(mut self, order_book: OrderBook) -> Self {
        self.order_book = Some(order_book);
        self
    }

    pub fn with_ref_prices(mut self, ref_prices: RefPrices) -> Self {
        self.ref_prices = Some(ref_prices);
        self
    }

    pub fn with_foreign_trade(mut self, foreign_trade: ForeignTrade) -> Self {
        self.foreign_trade = Some(foreign_trade);
        self
    }

    pub fn with_foreign_room(mut self, foreign_room: ForeignRoom) -> Self {
        self.foreign_room = Some(foreign_room);
        self
    }

    /// Check if no sub-record has been received yet.
    pub fn is_empty(&self) -> bool {
        self.trade.is_none()
            && self.order_book.is_none()
            && self.ref_prices.is_none()
            && self.foreign_trade.is_none()
            && self.foreign_room.is_none()
    }
}

impl Merge for Snapshot {
    fn merge(&mut self, update: Self) {
        merge_record(&mut self.trade, update.trade);
        merge_record(&mut self.order_book, update.order_book);
        merge_record(&mut self.ref_prices, update.ref_prices);
        merge_record(&mut self.foreign_trade, update.foreign_trade);
        merge_record(&mut self.foreign_room, update.foreign_room);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_compare_codes() {
        for tag in [
            PriceCompare::Up,
            PriceCompare::Down,
            PriceCompare::Ceiling,
            PriceCompare::Floor,
            PriceCompare::Reference,
            PriceCompare::Unchanged,
        ] {
            assert_eq!(PriceCompare::from_code(tag.code()), Some(tag));
        }
        assert_eq!(PriceCompare::from_code("x"), Some(PriceCompare::Unchanged));
        assert_eq!(PriceCompare::from_code("?"), None);
    }

    #[test]
    fn test_price_compare_serde_alias() {
        let tag: PriceCompare = serde_json::from_str("\"x\"").unwrap();
        assert_eq!(tag, PriceCompare::Unchanged);
        assert_eq!(serde_json::to_string(&PriceCompare::Up).unwrap(), "\"u\"");
    }

    #[test]
    fn test_price_compare_between() {
        assert_eq!(PriceCompare::between(2.0, 1.0), PriceCompare::Up);
        assert_eq!(PriceCompare::between(1.0, 2.0), PriceCompare::Down);
        assert_eq!(PriceCompare::between(1.0, 1.0), PriceCompare::Unchanged);
        assert_eq!(PriceCompare::between(f64::NAN, 1.0), PriceCompare::Unchanged);
    }

    #[test]
    fn test_unchanged_never_flashes() {
        assert_eq!(PriceCompare::Unchanged.flash_kind(), None);
        assert_eq!(PriceCompare::Unchanged.color_class(), None);
        assert_eq!(PriceCompare::Floor.flash_kind(), Some(FlashKind::Floor));
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut snapshot = Snapshot::new("ACB:G1:STX").with_trade(Trade {
            price: Some(25_000.0),
            volume: Some(100.0),
            compare: Some(PriceCompare::Up),
            ..Default::default()
        });

        snapshot.merge(Snapshot::new("ACB:G1:STX").with_trade(Trade {
            volume: Some(200.0),
            ..Default::default()
        }));

        let trade = snapshot.trade.unwrap();
        assert_eq!(trade.price, Some(25_000.0));
        assert_eq!(trade.volume, Some(200.0));
        assert_eq!(trade.compare, Some(PriceCompare::Up));
    }

    #[test]
    fn test_merge_untagged_price_drops_previous_tag() {
        let mut snapshot = Snapshot::new("ACB:G1:STX").with_trade(Trade {
            price: Some(25_000.0),
            compare: Some(PriceCompare::Up),
            ..Default::default()
        });

        snapshot.merge(Snapshot::new("ACB:G1:STX").with_trade(Trade {
            price: Some(24_000.0),
            ..Default::default()
        }));

        let trade = snapshot.trade.unwrap();
        assert_eq!(trade.price, Some(24_000.0));
        assert_eq!(trade.compare, None);
    }

    #[test]
    fn test_merge_order_book_levels_independently() {
        let mut book = OrderBook::default();
        book.bids[0] = BookLevel {
            price: Some(24_900.0),
            volume: Some(1_000.0),
            compare: Some(PriceCompare::Down),
        };
        book.asks[2].price = Some(25_200.0);

        let mut update = OrderBook::default();
        update.bids[1].price = Some(24_800.0);
        update.high = Some("25300|u".into());
        book.merge(update);

        assert_eq!(book.bids[0].price, Some(24_900.0));
        assert_eq!(book.bids[1].price, Some(24_800.0));
        assert_eq!(book.asks[2].price, Some(25_200.0));
        assert_eq!(book.high.as_deref(), Some("25300|u"));
    }
}
