//! Simulated exchange: a random walk per listed symbol inside its daily price band.

use chrono::Utc;
use fnv::FnvHashMap;
use price_board::{
    PriceCompare, Symbol,
    wire::{
        WireForeignRoom, WireForeignTrade, WireLevel, WireMessage, WireOrderBook, WireRefPrices,
        WireTrade,
    },
};
use rand::{Rng, seq::IndexedRandom};
use smol_str::SmolStr;
use std::cmp::Ordering;

/// Listed symbols: (board, symbol, reference price).
const LISTINGS: &[(&str, &str, f64)] = &[
    ("VN30", "ACB:G1:STX", 25_000.0),
    ("VN30", "BID:G1:STX", 45_000.0),
    ("VN30", "FPT:G1:STX", 120_000.0),
    ("VN30", "HPG:G1:STX", 27_000.0),
    ("VN30", "MBB:G1:STX", 23_000.0),
    ("VN30", "MSN:G1:STX", 75_000.0),
    ("VN30", "MWG:G1:STX", 60_000.0),
    ("VN30", "SSI:G1:STX", 33_000.0),
    ("VN30", "TCB:G1:STX", 24_000.0),
    ("VN30", "VCB:G1:STX", 92_000.0),
    ("VN30", "VHM:G1:STX", 42_000.0),
    ("VN30", "VIC:G1:STX", 44_000.0),
    ("VN30", "VNM:G1:STX", 68_000.0),
    ("VN30", "VPB:G1:STX", 19_000.0),
    ("HNX30", "CEO:G1:HNX", 18_000.0),
    ("HNX30", "IDC:G1:HNX", 55_000.0),
    ("HNX30", "MBS:G1:HNX", 29_000.0),
    ("HNX30", "PVS:G1:HNX", 35_000.0),
    ("HNX30", "SHS:G1:HNX", 16_000.0),
    ("HNX30", "VCS:G1:HNX", 60_000.0),
    ("UPCOM", "ACV:G1:UPX", 110_000.0),
    ("UPCOM", "BSR:G1:UPX", 22_000.0),
    ("UPCOM", "OIL:G1:UPX", 11_000.0),
    ("UPCOM", "VEA:G1:UPX", 40_000.0),
];

/// Market ids accepted by `request-negotiated`, with their symbol suffix.
const MARKETS: &[(&str, &str)] = &[("HOSE", ":STX"), ("HNX", ":HNX"), ("UPCOM", ":UPX")];

/// Daily band around the reference price, in percent.
const BAND_PERCENT: f64 = 7.0;

pub fn tick_size(price: f64) -> f64 {
    if price < 10_000.0 {
        10.0
    } else if price < 50_000.0 {
        50.0
    } else {
        100.0
    }
}

#[derive(Debug, Clone)]
pub struct Instrument {
    pub symbol: Symbol,
    pub reference: f64,
    pub ceiling: f64,
    pub floor: f64,
    pub price: f64,
    pub high: f64,
    pub low: f64,
    pub total_volume: f64,
    turnover: f64,
    foreign_buy: f64,
    foreign_sell: f64,
    total_room: f64,
}

impl Instrument {
    pub fn new(symbol: impl Into<Symbol>, reference: f64) -> Self {
        let tick = tick_size(reference);
        let ceiling = (reference * (100.0 + BAND_PERCENT) / 100.0 / tick).floor() * tick;
        let floor = (reference * (100.0 - BAND_PERCENT) / 100.0 / tick).ceil() * tick;

        Self {
            symbol: symbol.into(),
            reference,
            ceiling,
            floor,
            price: reference,
            high: reference,
            low: reference,
            total_volume: 0.0,
            turnover: 0.0,
            foreign_buy: 0.0,
            foreign_sell: 0.0,
            total_room: 50_000_000.0,
        }
    }

    /// Board tag of `price` relative to the day's reference and band.
    pub fn compare(&self, price: f64) -> PriceCompare {
        if price >= self.ceiling {
            return PriceCompare::Ceiling;
        }
        if price <= self.floor {
            return PriceCompare::Floor;
        }
        match price.partial_cmp(&self.reference) {
            Some(Ordering::Greater) => PriceCompare::Up,
            Some(Ordering::Less) => PriceCompare::Down,
            Some(Ordering::Equal) => PriceCompare::Reference,
            None => PriceCompare::Unchanged,
        }
    }

    /// Match one trade a few ticks away from the last price. Returns the traded volume.
    fn trade<R: Rng>(&mut self, rng: &mut R) -> f64 {
        let ticks = rng.random_range(-2_i32..=2);
        let price = (self.price + f64::from(ticks) * tick_size(self.price))
            .clamp(self.floor, self.ceiling);
        let volume = f64::from(rng.random_range(1_u32..=50) * 100);

        self.price = price;
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.total_volume += volume;
        self.turnover += price * volume;

        if rng.random_bool(0.2) {
            if rng.random_bool(0.5) {
                self.foreign_buy += volume;
            } else {
                self.foreign_sell += volume;
            }
        }

        volume
    }

    fn average(&self) -> f64 {
        if self.total_volume == 0.0 {
            return self.reference;
        }
        let average = self.turnover / self.total_volume;
        let tick = tick_size(average);
        (average / tick).round() * tick
    }

    fn tagged(&self, value: f64) -> SmolStr {
        SmolStr::new(format!("{value}|{}", self.compare(value).code()))
    }

    fn level(&self, price: f64, volume: f64) -> Option<WireLevel> {
        (price >= self.floor && price <= self.ceiling).then(|| WireLevel {
            price: Some(price),
            volume: Some(volume),
            compare: Some(self.compare(price)),
        })
    }

    pub fn ref_message(&self) -> WireMessage {
        WireMessage::RefPrices(WireRefPrices {
            symbol: self.symbol.clone(),
            reference: Some(self.reference),
            ceiling: Some(self.ceiling),
            floor: Some(self.floor),
        })
    }

    pub fn trade_message(&self, volume: Option<f64>) -> WireMessage {
        let change = self.price - self.reference;
        WireMessage::Trade(WireTrade {
            symbol: self.symbol.clone(),
            price: Some(self.price),
            volume,
            change: Some(change),
            change_percent: Some(change / self.reference * 100.0),
            compare: Some(self.compare(self.price)),
            time: Some(Utc::now().timestamp_millis()),
        })
    }

    pub fn book_message<R: Rng>(&self, rng: &mut R) -> WireMessage {
        let tick = tick_size(self.price);
        let mut volume = || f64::from(rng.random_range(1_u32..=200) * 100);

        WireMessage::OrderBook(WireOrderBook {
            symbol: self.symbol.clone(),
            bid1: self.level(self.price - tick, volume()),
            bid2: self.level(self.price - 2.0 * tick, volume()),
            bid3: self.level(self.price - 3.0 * tick, volume()),
            ask1: self.level(self.price + tick, volume()),
            ask2: self.level(self.price + 2.0 * tick, volume()),
            ask3: self.level(self.price + 3.0 * tick, volume()),
            high: Some(self.tagged(self.high)),
            low: Some(self.tagged(self.low)),
            average: Some(self.tagged(self.average())),
            total_volume: Some(self.total_volume),
        })
    }

    pub fn foreign_trade_message(&self) -> WireMessage {
        WireMessage::ForeignTrade(WireForeignTrade {
            symbol: self.symbol.clone(),
            buy_volume: Some(self.foreign_buy),
            sell_volume: Some(self.foreign_sell),
        })
    }

    pub fn foreign_room_message(&self) -> WireMessage {
        WireMessage::ForeignRoom(WireForeignRoom {
            symbol: self.symbol.clone(),
            current_room: Some(self.total_room - self.foreign_buy + self.foreign_sell),
            total_room: Some(self.total_room),
        })
    }
}

/// Every listed instrument and the boards grouping them.
#[derive(Debug, Clone)]
pub struct Market {
    instruments: FnvHashMap<Symbol, Instrument>,
    boards: FnvHashMap<SmolStr, Vec<Symbol>>,
    symbols: Vec<Symbol>,
}

impl Market {
    pub fn listed() -> Self {
        let mut instruments = FnvHashMap::default();
        let mut boards: FnvHashMap<SmolStr, Vec<Symbol>> = FnvHashMap::default();
        let mut symbols = Vec::with_capacity(LISTINGS.len());

        for &(board, symbol, reference) in LISTINGS {
            let symbol = Symbol::new(symbol);
            instruments.insert(symbol.clone(), Instrument::new(symbol.clone(), reference));
            boards.entry(SmolStr::new(board)).or_default().push(symbol.clone());
            symbols.push(symbol);
        }

        Self {
            instruments,
            boards,
            symbols,
        }
    }

    pub fn instrument(&self, symbol: &str) -> Option<&Instrument> {
        self.instruments.get(symbol)
    }

    /// Symbols of an index board, empty if the board is unknown.
    pub fn board_symbols(&self, group_id: &str) -> Vec<Symbol> {
        self.boards.get(group_id).cloned().unwrap_or_default()
    }

    /// Symbols traded on the market's negotiated-deal board.
    pub fn negotiated_symbols(&self, market_id: &str) -> Vec<Symbol> {
        let Some((_, suffix)) = MARKETS.iter().find(|(id, _)| id.eq_ignore_ascii_case(market_id))
        else {
            return Vec::new();
        };

        self.symbols
            .iter()
            .filter(|symbol| symbol.ends_with(*suffix))
            .cloned()
            .collect()
    }

    /// Full state of `symbol`, sent when a client subscribes.
    pub fn snapshot<R: Rng>(&self, symbol: &str, rng: &mut R) -> Vec<WireMessage> {
        let Some(instrument) = self.instruments.get(symbol) else {
            return Vec::new();
        };

        vec![
            instrument.ref_message(),
            instrument.trade_message(None),
            instrument.book_message(rng),
            instrument.foreign_trade_message(),
            instrument.foreign_room_message(),
        ]
    }

    /// Advance `moves` randomly chosen instruments by one trade each.
    pub fn step<R: Rng>(&mut self, rng: &mut R, moves: usize) -> Vec<WireMessage> {
        let mut messages = Vec::with_capacity(moves * 3);

        for _ in 0..moves {
            let Some(symbol) = self.symbols.choose(rng).cloned() else {
                break;
            };
            let Some(instrument) = self.instruments.get_mut(&symbol) else {
                continue;
            };

            let volume = instrument.trade(rng);
            messages.push(instrument.trade_message(Some(volume)));
            messages.push(instrument.book_message(rng));
            if rng.random_bool(0.1) {
                messages.push(instrument.foreign_trade_message());
                messages.push(instrument.foreign_room_message());
            }
        }

        messages
    }
}
