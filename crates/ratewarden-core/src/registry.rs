//! Currency and pair registry.
//!
//! The single owned catalog of supported currencies, tradeable pairs, and
//! regional restrictions, injected into every component that needs
//! supported-currency checks. Mutators regenerate the pair set and broadcast
//! a change event; nothing here is ambient global state.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::{
    CurrencyCategory, CurrencyCode, CurrencyDefinition, CurrencyPair, PairSymbol, ValidationError,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

// Tolerance for counting fractional digits of an f64 amount.
const FRACTION_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("currency '{code}' is already registered")]
    CurrencyExists { code: CurrencyCode },

    #[error("currency '{code}' is not registered")]
    UnknownCurrency { code: CurrencyCode },

    #[error("the base currency '{code}' can never be removed or deactivated")]
    BaseCurrencyImmutable { code: CurrencyCode },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Change notification emitted by every registry mutator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistryEvent {
    CurrencyAdded { code: CurrencyCode },
    CurrencyActivated { code: CurrencyCode },
    CurrencyDeactivated { code: CurrencyCode },
    PairsRegenerated { pair_count: usize },
}

/// Administrative per-region currency policy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegionalRestriction {
    pub restricted_currencies: Vec<CurrencyCode>,
    pub requires_compliance: bool,
}

/// Outcome of a regional restriction lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictionCheck {
    pub allowed: bool,
    pub requires_compliance: bool,
}

/// Global amount bounds applied by [`CurrencyRegistry::validate_currency_amount`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmountLimits {
    pub min: f64,
    pub max: f64,
}

impl Default for AmountLimits {
    fn default() -> Self {
        Self {
            min: 0.01,
            max: 1_000_000_000.0,
        }
    }
}

struct RegistryState {
    currencies: HashMap<CurrencyCode, CurrencyDefinition>,
    pairs: HashMap<PairSymbol, CurrencyPair>,
    restrictions: HashMap<String, RegionalRestriction>,
}

pub struct CurrencyRegistry {
    base_currency: CurrencyCode,
    limits: AmountLimits,
    state: RwLock<RegistryState>,
    events: broadcast::Sender<RegistryEvent>,
}

impl CurrencyRegistry {
    /// Registry holding only the base currency. The active set can never
    /// shrink below it.
    pub fn new(base: CurrencyDefinition) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let base_currency = base.code.clone();
        let mut currencies = HashMap::new();
        currencies.insert(base_currency.clone(), base);
        Self {
            base_currency,
            limits: AmountLimits::default(),
            state: RwLock::new(RegistryState {
                currencies,
                pairs: HashMap::new(),
                restrictions: HashMap::new(),
            }),
            events,
        }
    }

    /// Registry pre-seeded with the G10-ish major catalog, based on the
    /// given currency (which must be one of the majors).
    pub fn with_major_currencies(base_code: &CurrencyCode) -> Result<Self, RegistryError> {
        let catalog = major_catalog();
        let base = catalog
            .iter()
            .find(|def| def.code == *base_code)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownCurrency {
                code: base_code.clone(),
            })?;

        let registry = Self::new(base);
        for definition in catalog {
            if definition.code != *base_code {
                registry.add_currency(definition)?;
            }
        }
        Ok(registry)
    }

    pub fn with_amount_limits(mut self, limits: AmountLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn base_currency(&self) -> &CurrencyCode {
        &self.base_currency
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn add_currency(&self, definition: CurrencyDefinition) -> Result<(), RegistryError> {
        let code = definition.code.clone();
        {
            let mut state = self.state.write().expect("registry lock is not poisoned");
            if state.currencies.contains_key(&code) {
                return Err(RegistryError::CurrencyExists { code });
            }
            state.currencies.insert(code.clone(), definition);
            Self::regenerate_pairs(&mut state);
        }
        self.emit(RegistryEvent::CurrencyAdded { code });
        self.emit_pair_count();
        Ok(())
    }

    /// Deactivate a currency and drop every pair touching it.
    ///
    /// Definitions are never deleted; `remove_currency` is deactivation.
    pub fn deactivate_currency(&self, code: &CurrencyCode) -> Result<(), RegistryError> {
        if *code == self.base_currency {
            return Err(RegistryError::BaseCurrencyImmutable { code: code.clone() });
        }
        {
            let mut state = self.state.write().expect("registry lock is not poisoned");
            let definition = state
                .currencies
                .get_mut(code)
                .ok_or_else(|| RegistryError::UnknownCurrency { code: code.clone() })?;
            definition.is_active = false;
            Self::regenerate_pairs(&mut state);
        }
        self.emit(RegistryEvent::CurrencyDeactivated { code: code.clone() });
        self.emit_pair_count();
        Ok(())
    }

    /// Alias kept for administrative callers; currencies are only ever
    /// deactivated.
    pub fn remove_currency(&self, code: &CurrencyCode) -> Result<(), RegistryError> {
        self.deactivate_currency(code)
    }

    pub fn activate_currency(&self, code: &CurrencyCode) -> Result<(), RegistryError> {
        {
            let mut state = self.state.write().expect("registry lock is not poisoned");
            let definition = state
                .currencies
                .get_mut(code)
                .ok_or_else(|| RegistryError::UnknownCurrency { code: code.clone() })?;
            definition.is_active = true;
            Self::regenerate_pairs(&mut state);
        }
        self.emit(RegistryEvent::CurrencyActivated { code: code.clone() });
        self.emit_pair_count();
        Ok(())
    }

    pub fn get_currency(&self, code: &CurrencyCode) -> Option<CurrencyDefinition> {
        let state = self.state.read().expect("registry lock is not poisoned");
        state.currencies.get(code).cloned()
    }

    pub fn active_currencies(&self) -> Vec<CurrencyCode> {
        let state = self.state.read().expect("registry lock is not poisoned");
        let mut active: Vec<CurrencyCode> = state
            .currencies
            .values()
            .filter(|def| def.is_active)
            .map(|def| def.code.clone())
            .collect();
        active.sort();
        active
    }

    pub fn get_currency_pair(
        &self,
        base: &CurrencyCode,
        quote: &CurrencyCode,
    ) -> Option<CurrencyPair> {
        let symbol = PairSymbol::new(base.clone(), quote.clone()).ok()?;
        let state = self.state.read().expect("registry lock is not poisoned");
        state.pairs.get(&symbol).cloned()
    }

    pub fn pair_count(&self) -> usize {
        let state = self.state.read().expect("registry lock is not poisoned");
        state.pairs.len()
    }

    /// Validate an amount against global bounds and the currency's precision.
    pub fn validate_currency_amount(
        &self,
        amount: f64,
        code: &CurrencyCode,
    ) -> Result<(), RegistryError> {
        let definition = self
            .get_currency(code)
            .ok_or_else(|| RegistryError::UnknownCurrency { code: code.clone() })?;

        if !amount.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: "amount" }.into());
        }
        if amount < 0.0 {
            return Err(ValidationError::NegativeValue { field: "amount" }.into());
        }
        if amount < self.limits.min {
            return Err(ValidationError::AmountBelowMinimum {
                amount,
                min: self.limits.min,
            }
            .into());
        }
        if amount > self.limits.max {
            return Err(ValidationError::AmountAboveMaximum {
                amount,
                max: self.limits.max,
            }
            .into());
        }

        let scaled = amount * 10f64.powi(definition.decimal_places as i32);
        if (scaled - scaled.round()).abs() > FRACTION_EPSILON {
            return Err(ValidationError::TooManyFractionalDigits {
                amount,
                decimal_places: definition.decimal_places,
            }
            .into());
        }
        Ok(())
    }

    /// Admin operation: replace a region's restriction policy.
    pub fn set_regional_restriction(&self, region: impl Into<String>, policy: RegionalRestriction) {
        let mut state = self.state.write().expect("registry lock is not poisoned");
        state.restrictions.insert(region.into(), policy);
    }

    pub fn check_regional_restrictions(
        &self,
        code: &CurrencyCode,
        region: &str,
    ) -> RestrictionCheck {
        let state = self.state.read().expect("registry lock is not poisoned");
        match state.restrictions.get(region) {
            Some(policy) => RestrictionCheck {
                allowed: !policy.restricted_currencies.contains(code),
                requires_compliance: policy.requires_compliance,
            },
            None => RestrictionCheck {
                allowed: true,
                requires_compliance: false,
            },
        }
    }

    /// Rebuild the full symmetric pair set over the active currencies.
    /// O(active²), run under the write lock on every activation change.
    fn regenerate_pairs(state: &mut RegistryState) {
        let active: Vec<&CurrencyDefinition> = state
            .currencies
            .values()
            .filter(|def| def.is_active)
            .collect();

        let mut pairs = HashMap::with_capacity(active.len() * active.len().saturating_sub(1));
        for base in &active {
            for quote in &active {
                if base.code == quote.code {
                    continue;
                }
                let Ok(symbol) = PairSymbol::new(base.code.clone(), quote.code.clone()) else {
                    continue;
                };
                // Existing pairs keep their tuned parameters across regeneration.
                let pair = state.pairs.remove(&symbol).unwrap_or_else(|| {
                    CurrencyPair::spot_defaults(symbol.clone(), quote.decimal_places)
                        .expect("spot defaults are always in range")
                });
                pairs.insert(symbol, pair);
            }
        }
        state.pairs = pairs;
    }

    fn emit(&self, event: RegistryEvent) {
        // Best effort; no subscriber is fine.
        let _ = self.events.send(event);
    }

    fn emit_pair_count(&self) {
        let pair_count = self.pair_count();
        self.emit(RegistryEvent::PairsRegenerated { pair_count });
    }
}

/// Built-in catalog of major currencies.
fn major_catalog() -> Vec<CurrencyDefinition> {
    let entry = |code: &str,
                 name: &str,
                 symbol: &str,
                 decimal_places: u32,
                 numeric_code: u16,
                 countries: &[&str]| {
        CurrencyDefinition::new(
            CurrencyCode::parse(code).expect("catalog codes are valid"),
            name,
            symbol,
            decimal_places,
            numeric_code,
            countries.iter().map(ToString::to_string).collect(),
            CurrencyCategory::Major,
        )
        .expect("catalog definitions are valid")
    };

    vec![
        entry("USD", "United States Dollar", "$", 2, 840, &["US"]),
        entry("EUR", "Euro", "€", 2, 978, &["DE", "FR", "IT", "ES", "NL"]),
        entry("GBP", "Pound Sterling", "£", 2, 826, &["GB"]),
        entry("JPY", "Japanese Yen", "¥", 0, 392, &["JP"]),
        entry("CHF", "Swiss Franc", "Fr", 2, 756, &["CH", "LI"]),
        entry("CAD", "Canadian Dollar", "C$", 2, 124, &["CA"]),
        entry("AUD", "Australian Dollar", "A$", 2, 36, &["AU"]),
        entry("NZD", "New Zealand Dollar", "NZ$", 2, 554, &["NZ"]),
    ]
}
