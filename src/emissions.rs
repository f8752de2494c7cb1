use tracing::debug;

use crate::factors::FactorTable;
use crate::models::{EmissionTotals, Source, Usage, UsageRecord};

const TRADE_CO2_UNIT: &str = "tons";

/// Emission produced by a single source entry, or `None` when the entry has
/// no usable value or no factor row matches its unit.
pub fn source_contribution(
    factors: &FactorTable,
    source: Source,
    usage: &Usage,
) -> Option<EmissionTotals> {
    let value = usage.value.filter(|value| *value != 0.0)?;
    let unit = if source.has_unit_field() {
        usage.unit.as_deref()
    } else {
        Some(TRADE_CO2_UNIT)
    };

    let Some(factor) = unit.and_then(|unit| factors.lookup(source, unit)) else {
        debug!(%source, unit = ?unit, value, "no emission factor for unit; contributes zero");
        return None;
    };

    Some(EmissionTotals {
        co2_tonnes: value * factor.co2_tonnes_per_unit,
        emission_kgco2e: value * factor.kgco2e_per_unit,
    })
}

pub fn compute_totals(factors: &FactorTable, usage: &UsageRecord) -> EmissionTotals {
    let mut totals = EmissionTotals::default();

    for (source, entry) in usage.iter() {
        if let Some(contribution) = source_contribution(factors, source, entry) {
            totals.co2_tonnes += contribution.co2_tonnes;
            totals.emission_kgco2e += contribution.emission_kgco2e;
        }
    }

    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::EmissionFactor;

    fn factor(source: Source, unit: &str, co2: f64, kgco2e: f64) -> EmissionFactor {
        EmissionFactor {
            source,
            unit: unit.to_string(),
            co2_tonnes_per_unit: co2,
            kgco2e_per_unit: kgco2e,
        }
    }

    fn table() -> FactorTable {
        FactorTable::new(vec![
            factor(Source::Electricity, "kWh", 0.0005, 0.82),
            factor(Source::Diesel, "liters", 0.00268, 2.68),
            factor(Source::TradeCo2, "tons", 1.0, 1000.0),
        ])
    }

    #[test]
    fn empty_record_has_zero_totals() {
        let totals = compute_totals(&table(), &UsageRecord::new());
        assert_eq!(totals, EmissionTotals::default());
    }

    #[test]
    fn all_null_entries_have_zero_totals() {
        let mut usage = UsageRecord::new();
        for source in Source::ALL {
            usage.set(source, None, Some(String::new()));
        }
        let totals = compute_totals(&table(), &usage);
        assert_eq!(totals.co2_tonnes, 0.0);
        assert_eq!(totals.emission_kgco2e, 0.0);
    }

    #[test]
    fn electricity_in_kwh_uses_both_factors() {
        let usage = UsageRecord::new().with(Source::Electricity, 100.0, "kWh");
        let totals = compute_totals(&table(), &usage);
        assert!((totals.co2_tonnes - 0.05).abs() < 1e-9);
        assert!((totals.emission_kgco2e - 82.0).abs() < 1e-9);
    }

    #[test]
    fn unmatched_unit_contributes_nothing() {
        let usage = UsageRecord::new()
            .with(Source::Electricity, 100.0, "MWh")
            .with(Source::Diesel, 10.0, "liters");
        let totals = compute_totals(&table(), &usage);
        assert!((totals.emission_kgco2e - 26.8).abs() < 1e-9);
    }

    #[test]
    fn trade_co2_is_always_in_tons() {
        let mut usage = UsageRecord::new();
        usage.set(Source::TradeCo2, Some(2.0), Some("kg".to_string()));
        let totals = compute_totals(&table(), &usage);
        assert_eq!(totals.co2_tonnes, 2.0);
        assert_eq!(totals.emission_kgco2e, 2000.0);
    }

    #[test]
    fn missing_unit_or_zero_value_is_skipped() {
        let mut usage = UsageRecord::new();
        usage.set(Source::Electricity, Some(100.0), None);
        usage.set(Source::Diesel, Some(0.0), Some("liters".to_string()));
        assert_eq!(compute_totals(&table(), &usage), EmissionTotals::default());
        assert!(source_contribution(&table(), Source::Diesel, usage.get(Source::Diesel).unwrap()).is_none());
    }
}
