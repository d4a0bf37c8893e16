//! Wire format of the market-data feed.
//!
//! Inbound frames are compact JSON records discriminated by a single letter `t` field, with short
//! keys for every price, volume and comparison field. Outbound frames are subscription control
//! messages.

use crate::{
    error::PipelineError,
    model::{
        BOOK_DEPTH, BookLevel, ForeignRoom, ForeignTrade, OrderBook, PriceCompare, RefPrices,
        Snapshot, Symbol, Trade,
    },
};
use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use rand::Rng;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Inbound feed message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "t")]
pub enum WireMessage {
    #[serde(rename = "B")]
    OrderBook(WireOrderBook),
    #[serde(rename = "T")]
    Trade(WireTrade),
    #[serde(rename = "F")]
    ForeignTrade(WireForeignTrade),
    #[serde(rename = "R")]
    ForeignRoom(WireForeignRoom),
    #[serde(rename = "P")]
    RefPrices(WireRefPrices),
    /// Reply to a `list-symbols` control message.
    #[serde(rename = "L")]
    SymbolList {
        #[serde(rename = "g")]
        group_id: SmolStr,
        #[serde(rename = "s")]
        symbols: Vec<Symbol>,
    },
    #[serde(rename = "W")]
    Welcome {
        #[serde(rename = "m", default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl WireMessage {
    pub fn decode(text: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Symbol of a market-data message.
    pub fn symbol(&self) -> Option<&Symbol> {
        match self {
            WireMessage::OrderBook(book) => Some(&book.symbol),
            WireMessage::Trade(trade) => Some(&trade.symbol),
            WireMessage::ForeignTrade(foreign) => Some(&foreign.symbol),
            WireMessage::ForeignRoom(room) => Some(&room.symbol),
            WireMessage::RefPrices(refs) => Some(&refs.symbol),
            WireMessage::SymbolList { .. } | WireMessage::Welcome { .. } => None,
        }
    }

    /// Partial snapshot carried by this message, if it is a market-data message.
    pub fn into_update(self) -> Option<Snapshot> {
        match self {
            WireMessage::OrderBook(book) => Some(book.into()),
            WireMessage::Trade(trade) => Some(trade.into()),
            WireMessage::ForeignTrade(foreign) => Some(foreign.into()),
            WireMessage::ForeignRoom(room) => Some(room.into()),
            WireMessage::RefPrices(refs) => Some(refs.into()),
            WireMessage::SymbolList { .. } | WireMessage::Welcome { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WireTrade {
    #[serde(rename = "s")]
    pub symbol: Symbol,
    #[serde(
        rename = "p",
        default,
        deserialize_with = "de_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub price: Option<f64>,
    #[serde(
        rename = "v",
        default,
        deserialize_with = "de_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub volume: Option<f64>,
    #[serde(
        rename = "c",
        default,
        deserialize_with = "de_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub change: Option<f64>,
    #[serde(
        rename = "cp",
        default,
        deserialize_with = "de_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub change_percent: Option<f64>,
    #[serde(
        rename = "pc",
        default,
        deserialize_with = "de_opt_compare",
        skip_serializing_if = "Option::is_none"
    )]
    pub compare: Option<PriceCompare>,
    /// Exchange time in epoch milliseconds.
    #[serde(
        rename = "ts",
        default,
        deserialize_with = "de_opt_i64",
        skip_serializing_if = "Option::is_none"
    )]
    pub time: Option<i64>,
}

impl From<WireTrade> for Snapshot {
    fn from(trade: WireTrade) -> Self {
        Snapshot::new(trade.symbol).with_trade(Trade {
            price: trade.price,
            volume: trade.volume,
            change: trade.change,
            change_percent: trade.change_percent,
            compare: trade.compare,
            time: trade.time.and_then(DateTime::<Utc>::from_timestamp_millis),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WireLevel {
    #[serde(
        rename = "p",
        default,
        deserialize_with = "de_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub price: Option<f64>,
    #[serde(
        rename = "v",
        default,
        deserialize_with = "de_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub volume: Option<f64>,
    #[serde(
        rename = "pc",
        default,
        deserialize_with = "de_opt_compare",
        skip_serializing_if = "Option::is_none"
    )]
    pub compare: Option<PriceCompare>,
}

impl From<WireLevel> for BookLevel {
    fn from(level: WireLevel) -> Self {
        Self {
            price: level.price,
            volume: level.volume,
            compare: level.compare,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WireOrderBook {
    #[serde(rename = "s")]
    pub symbol: Symbol,
    #[serde(rename = "b1", default, skip_serializing_if = "Option::is_none")]
    pub bid1: Option<WireLevel>,
    #[serde(rename = "b2", default, skip_serializing_if = "Option::is_none")]
    pub bid2: Option<WireLevel>,
    #[serde(rename = "b3", default, skip_serializing_if = "Option::is_none")]
    pub bid3: Option<WireLevel>,
    #[serde(rename = "a1", default, skip_serializing_if = "Option::is_none")]
    pub ask1: Option<WireLevel>,
    #[serde(rename = "a2", default, skip_serializing_if = "Option::is_none")]
    pub ask2: Option<WireLevel>,
    #[serde(rename = "a3", default, skip_serializing_if = "Option::is_none")]
    pub ask3: Option<WireLevel>,
    /// Encoded `"<value>|<tag>"`.
    #[serde(rename = "hi", default, skip_serializing_if = "Option::is_none")]
    pub high: Option<SmolStr>,
    #[serde(rename = "lo", default, skip_serializing_if = "Option::is_none")]
    pub low: Option<SmolStr>,
    #[serde(rename = "av", default, skip_serializing_if = "Option::is_none")]
    pub average: Option<SmolStr>,
    #[serde(
        rename = "tv",
        default,
        deserialize_with = "de_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_volume: Option<f64>,
}

impl From<WireOrderBook> for Snapshot {
    fn from(book: WireOrderBook) -> Self {
        let levels = |levels: [Option<WireLevel>; BOOK_DEPTH]| {
            levels.map(|level| level.map(BookLevel::from).unwrap_or_default())
        };

        Snapshot::new(book.symbol).with_order_book(OrderBook {
            bids: levels([book.bid1, book.bid2, book.bid3]),
            asks: levels([book.ask1, book.ask2, book.ask3]),
            high: book.high,
            low: book.low,
            average: book.average,
            total_volume: book.total_volume,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WireRefPrices {
    #[serde(rename = "s")]
    pub symbol: Symbol,
    #[serde(
        rename = "re",
        default,
        deserialize_with = "de_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub reference: Option<f64>,
    #[serde(
        rename = "ce",
        default,
        deserialize_with = "de_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub ceiling: Option<f64>,
    #[serde(
        rename = "fl",
        default,
        deserialize_with = "de_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub floor: Option<f64>,
}

impl From<WireRefPrices> for Snapshot {
    fn from(refs: WireRefPrices) -> Self {
        Snapshot::new(refs.symbol).with_ref_prices(RefPrices {
            reference: refs.reference,
            ceiling: refs.ceiling,
            floor: refs.floor,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WireForeignTrade {
    #[serde(rename = "s")]
    pub symbol: Symbol,
    #[serde(
        rename = "fb",
        default,
        deserialize_with = "de_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub buy_volume: Option<f64>,
    #[serde(
        rename = "fs",
        default,
        deserialize_with = "de_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub sell_volume: Option<f64>,
}

impl From<WireForeignTrade> for Snapshot {
    fn from(foreign: WireForeignTrade) -> Self {
        Snapshot::new(foreign.symbol).with_foreign_trade(ForeignTrade {
            buy_volume: foreign.buy_volume,
            sell_volume: foreign.sell_volume,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WireForeignRoom {
    #[serde(rename = "s")]
    pub symbol: Symbol,
    #[serde(
        rename = "cr",
        default,
        deserialize_with = "de_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_room: Option<f64>,
    #[serde(
        rename = "tr",
        default,
        deserialize_with = "de_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_room: Option<f64>,
}

impl From<WireForeignRoom> for Snapshot {
    fn from(room: WireForeignRoom) -> Self {
        Snapshot::new(room.symbol).with_foreign_room(ForeignRoom {
            current_room: room.current_room,
            total_room: room.total_room,
        })
    }
}

/// Deserialize an optional number, treating a malformed value as unknown.
fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    let number = match value {
        Some(serde_json::Value::Number(number)) => number.as_f64(),
        Some(serde_json::Value::String(raw)) => raw.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(number.filter(|number| number.is_finite()))
}

/// Deserialize an optional epoch millisecond timestamp, treating a malformed value as unknown.
fn de_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(number)) => number.as_i64(),
        Some(serde_json::Value::String(raw)) => raw.trim().parse::<i64>().ok(),
        _ => None,
    })
}

/// Deserialize an optional comparison tag, treating an unknown code as no tag.
fn de_opt_compare<'de, D>(deserializer: D) -> Result<Option<PriceCompare>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(code)) => PriceCompare::from_code(code.trim()),
        _ => None,
    })
}

/// Random per-process identifier letting the server tell connections apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Deserialize, Serialize)]
pub struct SessionId(pub SmolStr);

impl SessionId {
    pub fn random() -> Self {
        let id: u64 = rand::rng().random();
        Self(SmolStr::new(format!("{id:016x}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
    ListSymbols,
    RequestNegotiated,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Subscribe => "subscribe",
            ControlAction::Unsubscribe => "unsubscribe",
            ControlAction::ListSymbols => "list-symbols",
            ControlAction::RequestNegotiated => "request-negotiated",
        }
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outbound subscription control message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlMessage {
    pub action: ControlAction,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<Symbol>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_id: Option<SmolStr>,
}

impl ControlMessage {
    fn new(action: ControlAction, session_id: &SessionId) -> Self {
        Self {
            action,
            session_id: session_id.clone(),
            group_id: None,
            symbols: None,
            market_id: None,
        }
    }

    pub fn subscribe(session_id: &SessionId, group_id: SmolStr, symbols: Vec<Symbol>) -> Self {
        Self {
            group_id: Some(group_id),
            symbols: Some(symbols),
            ..Self::new(ControlAction::Subscribe, session_id)
        }
    }

    pub fn unsubscribe(session_id: &SessionId, group_id: SmolStr, symbols: Vec<Symbol>) -> Self {
        Self {
            group_id: Some(group_id),
            symbols: Some(symbols),
            ..Self::new(ControlAction::Unsubscribe, session_id)
        }
    }

    pub fn list_symbols(session_id: &SessionId, group_id: SmolStr) -> Self {
        Self {
            group_id: Some(group_id),
            ..Self::new(ControlAction::ListSymbols, session_id)
        }
    }

    pub fn request_negotiated(session_id: &SessionId, group_id: SmolStr, market_id: SmolStr) -> Self {
        Self {
            group_id: Some(group_id),
            market_id: Some(market_id),
            ..Self::new(ControlAction::RequestNegotiated, session_id)
        }
    }

    pub fn encode(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_trade() {
        let message =
            WireMessage::decode(r#"{"t":"T","s":"ACB:G1:STX","p":25000,"v":100,"pc":"u"}"#)
                .unwrap();

        let update = message.into_update().unwrap();
        let trade = update.trade.unwrap();
        assert_eq!(update.symbol, "ACB:G1:STX");
        assert_eq!(trade.price, Some(25_000.0));
        assert_eq!(trade.volume, Some(100.0));
        assert_eq!(trade.compare, Some(PriceCompare::Up));
        assert!(update.order_book.is_none());
    }

    #[test]
    fn test_decode_order_book_partial_levels() {
        let message = WireMessage::decode(
            r#"{"t":"B","s":"ACB:G1:STX","b2":{"p":24900,"v":500,"pc":"d"},"hi":"25300|u","tv":12000}"#,
        )
        .unwrap();

        let book = message.into_update().unwrap().order_book.unwrap();
        assert_eq!(book.bids[0], BookLevel::default());
        assert_eq!(book.bids[1].price, Some(24_900.0));
        assert_eq!(book.bids[1].compare, Some(PriceCompare::Down));
        assert_eq!(book.high.as_deref(), Some("25300|u"));
        assert_eq!(book.total_volume, Some(12_000.0));
    }

    #[test]
    fn test_decode_malformed_field_is_unknown() {
        struct TestCase {
            input: &'static str,
            expected: Trade,
        }

        let cases = vec![
            // TC0: unknown compare code
            TestCase {
                input: r#"{"t":"T","s":"ACB:G1:STX","p":25000,"pc":"z"}"#,
                expected: Trade {
                    price: Some(25_000.0),
                    ..Default::default()
                },
            },
            // TC1: non-numeric volume
            TestCase {
                input: r#"{"t":"T","s":"ACB:G1:STX","p":25000,"v":"n/a","pc":"u"}"#,
                expected: Trade {
                    price: Some(25_000.0),
                    compare: Some(PriceCompare::Up),
                    ..Default::default()
                },
            },
            // TC2: numeric string price, malformed timestamp
            TestCase {
                input: r#"{"t":"T","s":"ACB:G1:STX","p":"24900","ts":{}}"#,
                expected: Trade {
                    price: Some(24_900.0),
                    ..Default::default()
                },
            },
            // TC3: null fields
            TestCase {
                input: r#"{"t":"T","s":"ACB:G1:STX","p":null,"v":12}"#,
                expected: Trade {
                    volume: Some(12.0),
                    ..Default::default()
                },
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            let update = WireMessage::decode(test.input)
                .unwrap_or_else(|error| panic!("TC{} failed: {}", index, error))
                .into_update()
                .unwrap();
            assert_eq!(update.trade, Some(test.expected), "TC{} failed", index);
        }
    }

    #[test]
    fn test_decode_order_book_malformed_level_field_is_unknown() {
        let message = WireMessage::decode(
            r#"{"t":"B","s":"ACB:G1:STX","b1":{"p":24900,"v":true,"pc":"?"},"tv":"x"}"#,
        )
        .unwrap();

        let book = message.into_update().unwrap().order_book.unwrap();
        assert_eq!(book.bids[0].price, Some(24_900.0));
        assert_eq!(book.bids[0].volume, None);
        assert_eq!(book.bids[0].compare, None);
        assert_eq!(book.total_volume, None);
    }

    #[test]
    fn test_decode_symbol_list_has_no_update() {
        let message = WireMessage::decode(r#"{"t":"L","g":"VN30","s":["ACB:G1:STX"]}"#).unwrap();
        assert_eq!(
            message,
            WireMessage::SymbolList {
                group_id: "VN30".into(),
                symbols: vec!["ACB:G1:STX".into()],
            }
        );
        assert!(message.into_update().is_none());
    }

    #[test]
    fn test_decode_malformed_is_error() {
        assert!(matches!(
            WireMessage::decode(r#"{"t":"Z","s":"ACB:G1:STX"}"#),
            Err(PipelineError::Decode(_))
        ));
        assert!(WireMessage::decode("not json").is_err());
    }

    #[test]
    fn test_encode_control_message_omits_absent_keys() {
        let session = SessionId::from(SmolStr::new("tab-1"));
        let subscribe =
            ControlMessage::subscribe(&session, "VN30".into(), vec!["ACB:G1:STX".into()]);

        let value: serde_json::Value = serde_json::from_str(&subscribe.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "action": "subscribe",
                "sessionId": "tab-1",
                "groupId": "VN30",
                "symbols": ["ACB:G1:STX"],
            })
        );

        let negotiated =
            ControlMessage::request_negotiated(&session, "PT".into(), "STO".into());
        let value: serde_json::Value = serde_json::from_str(&negotiated.encode().unwrap()).unwrap();
        assert_eq!(value["action"], "request-negotiated");
        assert_eq!(value["marketId"], "STO");
        assert!(value.get("symbols").is_none());
    }

    #[test]
    fn test_session_ids_are_random() {
        assert_ne!(SessionId::random(), SessionId::random());
        assert_eq!(SessionId::random().to_string().len(), 16);
    }
}
