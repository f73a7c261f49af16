use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Validated ISO 4217 alphabetic currency code, normalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Parse and normalize a 3-letter currency code.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_uppercase();
        let valid =
            normalized.len() == 3 && normalized.chars().all(|ch| ch.is_ascii_alphabetic());
        if !valid {
            return Err(ValidationError::InvalidCurrencyCode {
                value: input.to_owned(),
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CurrencyCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for CurrencyCode {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

/// Directed currency pair key with the canonical `"EUR/USD"` rendering.
///
/// Used as the key for cache rows, message-bus topics, and streaming
/// subscriptions. `EUR/USD` and `USD/EUR` are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PairSymbol {
    base: CurrencyCode,
    quote: CurrencyCode,
}

impl PairSymbol {
    pub fn new(base: CurrencyCode, quote: CurrencyCode) -> Result<Self, ValidationError> {
        if base == quote {
            return Err(ValidationError::IdenticalPairLegs {
                code: base.to_string(),
            });
        }
        Ok(Self { base, quote })
    }

    /// Parse a `"BASE/QUOTE"` symbol.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let mut legs = input.trim().splitn(2, '/');
        let (Some(base), Some(quote)) = (legs.next(), legs.next()) else {
            return Err(ValidationError::InvalidPairSymbol {
                value: input.to_owned(),
            });
        };
        Self::new(CurrencyCode::parse(base)?, CurrencyCode::parse(quote)?)
    }

    pub fn base(&self) -> &CurrencyCode {
        &self.base
    }

    pub fn quote(&self) -> &CurrencyCode {
        &self.quote
    }

    /// The opposite direction of this pair.
    pub fn inverse(&self) -> Self {
        Self {
            base: self.quote.clone(),
            quote: self.base.clone(),
        }
    }
}

impl Display for PairSymbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl TryFrom<String> for PairSymbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PairSymbol> for String {
    fn from(value: PairSymbol) -> Self {
        value.to_string()
    }
}

/// Liquidity tier of a currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrencyCategory {
    Major,
    Emerging,
    Minor,
}

/// Trading-session window for a currency or pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingHours {
    /// Tradeable around the clock (the FX default).
    #[default]
    Continuous,
    /// Open between two UTC minutes-of-day, exchange-listed style.
    Window {
        open_utc_minute: u16,
        close_utc_minute: u16,
    },
}

/// Catalog entry for one supported currency.
///
/// Created at registry bootstrap or through `add_currency`; mutated only by
/// registry methods and never deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyDefinition {
    pub code: CurrencyCode,
    pub name: String,
    pub symbol: String,
    pub decimal_places: u32,
    pub numeric_code: u16,
    pub countries: Vec<String>,
    pub trading_hours: TradingHours,
    pub category: CurrencyCategory,
    pub is_active: bool,
}

impl CurrencyDefinition {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        code: CurrencyCode,
        name: impl Into<String>,
        symbol: impl Into<String>,
        decimal_places: u32,
        numeric_code: u16,
        countries: Vec<String>,
        category: CurrencyCategory,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "name" });
        }
        if decimal_places > 8 {
            return Err(ValidationError::DecimalPlacesOutOfRange {
                value: decimal_places,
            });
        }
        if numeric_code == 0 || numeric_code > 999 {
            return Err(ValidationError::NumericCodeOutOfRange {
                value: numeric_code,
            });
        }

        Ok(Self {
            code,
            name,
            symbol: symbol.into(),
            decimal_places,
            numeric_code,
            countries,
            trading_hours: TradingHours::Continuous,
            category,
            is_active: true,
        })
    }
}

/// Tradeable pair parameters.
///
/// For every two distinct active currencies both directions exist; the
/// registry regenerates the full set whenever the active set changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub symbol: PairSymbol,
    pub min_trade_amount: f64,
    pub max_trade_amount: f64,
    pub tick_size: f64,
    pub trading_hours: TradingHours,
    pub settlement_days: u8,
    pub is_active: bool,
}

impl CurrencyPair {
    pub fn new(
        symbol: PairSymbol,
        min_trade_amount: f64,
        max_trade_amount: f64,
        tick_size: f64,
        settlement_days: u8,
    ) -> Result<Self, ValidationError> {
        for (field, value) in [
            ("min_trade_amount", min_trade_amount),
            ("max_trade_amount", max_trade_amount),
            ("tick_size", tick_size),
        ] {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteValue { field });
            }
            if value < 0.0 {
                return Err(ValidationError::NegativeValue { field });
            }
        }
        if min_trade_amount > max_trade_amount {
            return Err(ValidationError::InvertedAmountBounds {
                min: min_trade_amount,
                max: max_trade_amount,
            });
        }

        Ok(Self {
            symbol,
            min_trade_amount,
            max_trade_amount,
            tick_size,
            trading_hours: TradingHours::Continuous,
            settlement_days,
            is_active: true,
        })
    }

    /// Standard spot-FX parameters derived from the quote currency's
    /// precision: one pip tick, T+2 settlement.
    pub fn spot_defaults(
        symbol: PairSymbol,
        quote_decimal_places: u32,
    ) -> Result<Self, ValidationError> {
        let tick_size = 10f64.powi(-(quote_decimal_places.min(8) as i32 + 2));
        Self::new(symbol, 0.01, 10_000_000.0, tick_size, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_currency_code() {
        let code = CurrencyCode::parse(" eur ").expect("code should parse");
        assert_eq!(code.as_str(), "EUR");
    }

    #[test]
    fn rejects_wrong_length_codes() {
        assert!(matches!(
            CurrencyCode::parse("EURO"),
            Err(ValidationError::InvalidCurrencyCode { .. })
        ));
        assert!(matches!(
            CurrencyCode::parse("E1"),
            Err(ValidationError::InvalidCurrencyCode { .. })
        ));
    }

    #[test]
    fn pair_symbol_round_trips_and_inverts() {
        let pair = PairSymbol::parse("eur/usd").expect("pair should parse");
        assert_eq!(pair.to_string(), "EUR/USD");
        assert_eq!(pair.inverse().to_string(), "USD/EUR");
    }

    #[test]
    fn pair_rejects_identical_legs() {
        assert!(matches!(
            PairSymbol::parse("USD/USD"),
            Err(ValidationError::IdenticalPairLegs { .. })
        ));
    }

    #[test]
    fn definition_rejects_out_of_range_fields() {
        let code = CurrencyCode::parse("ABC").expect("code");
        let err = CurrencyDefinition::new(
            code.clone(),
            "Test",
            "t",
            9,
            100,
            vec![],
            CurrencyCategory::Minor,
        )
        .expect_err("9 decimal places must fail");
        assert!(matches!(
            err,
            ValidationError::DecimalPlacesOutOfRange { value: 9 }
        ));

        let err = CurrencyDefinition::new(code, "Test", "t", 2, 0, vec![], CurrencyCategory::Minor)
            .expect_err("numeric code 0 must fail");
        assert!(matches!(
            err,
            ValidationError::NumericCodeOutOfRange { value: 0 }
        ));
    }

    #[test]
    fn pair_rejects_inverted_bounds() {
        let symbol = PairSymbol::parse("EUR/USD").expect("pair");
        assert!(matches!(
            CurrencyPair::new(symbol, 100.0, 1.0, 0.0001, 2),
            Err(ValidationError::InvertedAmountBounds { .. })
        ));
    }
}
