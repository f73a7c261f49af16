use thiserror::Error;

/// Field-specific validation failures for domain types and amounts.
///
/// Every variant names the offending field or value so callers can surface a
/// descriptive reason instead of a generic failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("field '{field}' is required and was missing or empty")]
    MissingField { field: &'static str },

    #[error("currency code must be exactly 3 ASCII letters, got '{value}'")]
    InvalidCurrencyCode { value: String },

    #[error("decimal places must be within 0..=8, got {value}")]
    DecimalPlacesOutOfRange { value: u32 },

    #[error("ISO numeric code must be within 1..=999, got {value}")]
    NumericCodeOutOfRange { value: u16 },

    #[error("pair symbol '{value}' must have the form 'EUR/USD'")]
    InvalidPairSymbol { value: String },

    #[error("base and quote legs of a pair must differ, got '{code}' twice")]
    IdenticalPairLegs { code: String },

    #[error("field '{field}' must be a finite number")]
    NonFiniteValue { field: &'static str },

    #[error("field '{field}' must not be negative")]
    NegativeValue { field: &'static str },

    #[error("reliability must be within 0.0..=1.0, got {value}")]
    ReliabilityOutOfRange { value: f64 },

    #[error("amount {amount} is below the configured minimum of {min}")]
    AmountBelowMinimum { amount: f64, min: f64 },

    #[error("amount {amount} is above the configured maximum of {max}")]
    AmountAboveMaximum { amount: f64, max: f64 },

    #[error("amount {amount} has more fractional digits than the {decimal_places} allowed for this currency")]
    TooManyFractionalDigits { amount: f64, decimal_places: u32 },

    #[error("timestamp '{value}' is not a valid RFC 3339 datetime")]
    InvalidTimestamp { value: String },

    #[error("trade amount bounds are inverted: min {min} exceeds max {max}")]
    InvertedAmountBounds { min: f64, max: f64 },
}
