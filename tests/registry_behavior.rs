use ratewarden_core::{
    CurrencyCategory, CurrencyDefinition, RegionalRestriction, RegistryError, RegistryEvent,
    ValidationError,
};
use ratewarden_tests::{code, usd_registry};

#[test]
fn every_active_pair_exists_in_both_directions() {
    let registry = usd_registry();
    let active = registry.active_currencies();
    assert!(active.len() >= 2);

    for base in &active {
        for quote in &active {
            if base == quote {
                continue;
            }
            assert!(
                registry.get_currency_pair(base, quote).is_some(),
                "missing pair {base}/{quote}"
            );
            assert!(
                registry.get_currency_pair(quote, base).is_some(),
                "missing pair {quote}/{base}"
            );
        }
    }
}

#[test]
fn deactivation_and_reactivation_regenerate_the_pair_set() {
    let registry = usd_registry();
    let full_count = registry.pair_count();

    registry.deactivate_currency(&code("GBP")).expect("deactivate");
    let shrunk = registry.pair_count();
    assert!(shrunk < full_count);
    for other in registry.active_currencies() {
        assert!(registry.get_currency_pair(&code("GBP"), &other).is_none());
        assert!(registry.get_currency_pair(&other, &code("GBP")).is_none());
    }

    registry.activate_currency(&code("GBP")).expect("activate");
    assert_eq!(registry.pair_count(), full_count);
    assert!(registry
        .get_currency_pair(&code("GBP"), &code("USD"))
        .is_some());
}

#[test]
fn base_currency_removal_always_fails() {
    let registry = usd_registry();

    // Even with every other currency deactivated, the base stays immutable.
    for other in ["EUR", "GBP", "JPY", "CHF", "CAD", "AUD", "NZD"] {
        registry.deactivate_currency(&code(other)).expect("deactivate");
    }
    assert_eq!(registry.active_currencies(), vec![code("USD")]);

    assert!(matches!(
        registry.deactivate_currency(&code("USD")),
        Err(RegistryError::BaseCurrencyImmutable { .. })
    ));
    assert!(matches!(
        registry.remove_currency(&code("USD")),
        Err(RegistryError::BaseCurrencyImmutable { .. })
    ));
}

#[test]
fn amount_validation_respects_currency_precision() {
    let registry = usd_registry();

    registry
        .validate_currency_amount(1500.0, &code("JPY"))
        .expect("whole yen amounts are valid");
    assert!(matches!(
        registry.validate_currency_amount(1500.5, &code("JPY")),
        Err(RegistryError::Validation(
            ValidationError::TooManyFractionalDigits { .. }
        ))
    ));

    registry
        .validate_currency_amount(1500.50, &code("USD"))
        .expect("two decimal places are valid for USD");
}

#[test]
fn amount_validation_reports_field_specific_reasons() {
    let registry = usd_registry();

    let negative = registry
        .validate_currency_amount(-1.0, &code("USD"))
        .expect_err("negative amount");
    assert!(negative.to_string().contains("must not be negative"));

    let unknown = registry
        .validate_currency_amount(10.0, &code("ZZZ"))
        .expect_err("unknown currency");
    assert!(matches!(unknown, RegistryError::UnknownCurrency { .. }));
}

#[test]
fn added_currency_joins_the_pair_catalog() {
    let registry = usd_registry();
    let mut events = registry.subscribe();
    let before = registry.pair_count();

    let krona = CurrencyDefinition::new(
        code("SEK"),
        "Swedish Krona",
        "kr",
        2,
        752,
        vec![String::from("SE")],
        CurrencyCategory::Major,
    )
    .expect("definition");
    registry.add_currency(krona).expect("add");

    // Eight existing active currencies each gain both directions.
    assert_eq!(registry.pair_count(), before + 16);
    assert_eq!(
        events.try_recv().expect("event"),
        RegistryEvent::CurrencyAdded { code: code("SEK") }
    );
}

#[test]
fn regional_restrictions_apply_per_region() {
    let registry = usd_registry();
    registry.set_regional_restriction(
        "region-a",
        RegionalRestriction {
            restricted_currencies: vec![code("JPY")],
            requires_compliance: true,
        },
    );

    assert!(!registry.check_regional_restrictions(&code("JPY"), "region-a").allowed);
    assert!(registry.check_regional_restrictions(&code("EUR"), "region-a").allowed);
    assert!(registry.check_regional_restrictions(&code("JPY"), "region-b").allowed);
}
