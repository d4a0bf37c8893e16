//! Display formatting for board cells.
//!
//! The flash decision compares these strings, not the raw floats, so feed noise that does not
//! change the rendered text never flashes a cell.

use crate::{
    compare::field_value,
    model::{FieldKey, Snapshot},
};
use rust_decimal::{Decimal, RoundingStrategy, prelude::FromPrimitive};

/// Rendered in place of a value the feed has not sent (or sent malformed).
pub const PLACEHOLDER: &str = "";

/// Maximum number of decimals shown for a price.
pub const PRICE_DECIMALS: u32 = 2;

/// Format a price with thousands separators and at most [`PRICE_DECIMALS`] decimals, trailing
/// zeros trimmed. `25000.0` renders as `"25,000"`, `1234.5` as `"1,234.5"`.
pub fn format_price(value: f64) -> String {
    match round(value, PRICE_DECIMALS) {
        Some(rounded) => group_thousands(&rounded.normalize().to_string()),
        None => PLACEHOLDER.to_string(),
    }
}

/// Format a quantity as a whole number with thousands separators.
pub fn format_volume(value: f64) -> String {
    match round(value, 0) {
        Some(rounded) => group_thousands(&format!("{rounded:.0}")),
        None => PLACEHOLDER.to_string(),
    }
}

/// Format a percentage with exactly two decimals.
pub fn format_percent(value: f64) -> String {
    match round(value, 2) {
        Some(rounded) => format!("{rounded:.2}"),
        None => PLACEHOLDER.to_string(),
    }
}

/// Rendered text of `field` for `snapshot`, or [`PLACEHOLDER`] if the field is unknown.
pub fn display_value(snapshot: &Snapshot, field: FieldKey) -> String {
    let Some(value) = field_value(snapshot, field) else {
        return PLACEHOLDER.to_string();
    };

    match field {
        FieldKey::ChangePercent => format_percent(value),
        field if field.is_volume() => format_volume(value),
        _ => format_price(value),
    }
}

fn round(value: f64, decimals: u32) -> Option<Decimal> {
    let decimal = Decimal::from_f64(value)?;
    let rounded = decimal.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);

    // Avoid rendering "-0" for tiny negative noise
    if rounded.is_zero() {
        Some(Decimal::ZERO)
    } else {
        Some(rounded)
    }
}

fn group_thousands(text: &str) -> String {
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(text.len() + integer.len() / 3);
    grouped.push_str(sign);
    for (index, digit) in integer.chars().enumerate() {
        if index > 0 && (integer.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if let Some(fraction) = fraction {
        grouped.push('.');
        grouped.push_str(fraction);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RefPrices, Trade};

    #[test]
    fn test_format_price() {
        struct TestCase {
            input: f64,
            expected: &'static str,
        }

        let tests = vec![
            TestCase {
                // TC0: whole price
                input: 25_000.0,
                expected: "25,000",
            },
            TestCase {
                // TC1: rounding noise below display precision
                input: 10_000.000_000_1,
                expected: "10,000",
            },
            TestCase {
                // TC2: trailing zero trimmed
                input: 1_234.50,
                expected: "1,234.5",
            },
            TestCase {
                // TC3: negative change
                input: -1_000.0,
                expected: "-1,000",
            },
            TestCase {
                // TC4: small price, no separator
                input: 999.0,
                expected: "999",
            },
            TestCase {
                // TC5: index level
                input: 1_287.456,
                expected: "1,287.46",
            },
            TestCase {
                // TC6: negative zero noise
                input: -0.000_1,
                expected: "0",
            },
            TestCase {
                // TC7: not a number
                input: f64::NAN,
                expected: PLACEHOLDER,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = format_price(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_format_volume_and_percent() {
        assert_eq!(format_volume(1_234_567.4), "1,234,567");
        assert_eq!(format_volume(100.0), "100");
        assert_eq!(format_percent(2.0408), "2.04");
        assert_eq!(format_percent(-0.5), "-0.50");
    }

    #[test]
    fn test_display_value_placeholder_for_unknown_field() {
        let snapshot = Snapshot::new("ACB:G1:STX")
            .with_trade(Trade {
                price: Some(25_000.0),
                ..Default::default()
            })
            .with_ref_prices(RefPrices {
                ceiling: Some(26_700.0),
                ..Default::default()
            });

        assert_eq!(display_value(&snapshot, FieldKey::LastPrice), "25,000");
        assert_eq!(display_value(&snapshot, FieldKey::Ceiling), "26,700");
        assert_eq!(display_value(&snapshot, FieldKey::Floor), PLACEHOLDER);
        assert_eq!(display_value(&snapshot, FieldKey::Bid1Price), PLACEHOLDER);
    }
}
