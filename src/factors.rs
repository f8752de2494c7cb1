use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::Source;

#[derive(Debug, Clone, PartialEq)]
pub struct EmissionFactor {
    pub source: Source,
    pub unit: String,
    pub co2_tonnes_per_unit: f64,
    pub kgco2e_per_unit: f64,
}

/// Reference table of (source, unit) conversion factors.
#[derive(Debug, Clone, Default)]
pub struct FactorTable {
    rows: Vec<EmissionFactor>,
}

#[derive(Deserialize)]
struct FactorRow {
    #[serde(rename = "Energy Source")]
    energy_source: String,
    #[serde(rename = "Unit")]
    unit: String,
    #[serde(rename = "CO2 Emission (tonnes)")]
    co2_tonnes: f64,
    #[serde(rename = "Carbon Footprint Value (kg CO2e)")]
    kgco2e: f64,
}

impl FactorTable {
    pub fn new(rows: Vec<EmissionFactor>) -> Self {
        let mut table = FactorTable::default();
        for row in rows {
            table.push(row);
        }
        table
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open factor table {}", path.display()))?;
        let table = Self::from_reader(file)
            .with_context(|| format!("invalid factor table {}", path.display()))?;
        if table.is_empty() {
            warn!(path = %path.display(), "factor table has no rows; every bill will total zero");
        }
        debug!(path = %path.display(), rows = table.len(), "loaded emission factors");
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut table = FactorTable::default();

        for (index, result) in reader.deserialize::<FactorRow>().enumerate() {
            let line = index + 2;
            let row = result.with_context(|| format!("line {line}"))?;
            let Some(source) = Source::from_factor_name(&row.energy_source) else {
                bail!("line {line}: unknown energy source '{}'", row.energy_source);
            };
            table.push(EmissionFactor {
                source,
                unit: row.unit,
                co2_tonnes_per_unit: row.co2_tonnes,
                kgco2e_per_unit: row.kgco2e,
            });
        }

        Ok(table)
    }

    fn push(&mut self, row: EmissionFactor) {
        if self.lookup(row.source, &row.unit).is_some() {
            warn!(source = %row.source, unit = %row.unit, "duplicate emission factor ignored");
            return;
        }
        self.rows.push(row);
    }

    /// Exact match on both source and unit.
    pub fn lookup(&self, source: Source, unit: &str) -> Option<&EmissionFactor> {
        self.rows
            .iter()
            .find(|row| row.source == source && row.unit == unit)
    }

    pub fn rows(&self) -> &[EmissionFactor] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Energy Source,Unit,CO2 Emission (tonnes),Carbon Footprint Value (kg CO2e)
Electricity,kWh,0.0005,0.82
Water, m3 ,0.000344,0.344
Trade CO₂ Value,tons,1,1000
";

    #[test]
    fn parses_rows_and_trims_cells() {
        let table = FactorTable::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(table.len(), 3);

        let water = table.lookup(Source::Water, "m3").unwrap();
        assert_eq!(water.kgco2e_per_unit, 0.344);

        let trade = table.lookup(Source::TradeCo2, "tons").unwrap();
        assert_eq!(trade.co2_tonnes_per_unit, 1.0);
    }

    #[test]
    fn lookup_is_exact_on_unit() {
        let table = FactorTable::from_reader(SAMPLE.as_bytes()).unwrap();
        assert!(table.lookup(Source::Electricity, "kWh").is_some());
        assert!(table.lookup(Source::Electricity, "kwh").is_none());
        assert!(table.lookup(Source::Water, "kWh").is_none());
    }

    #[test]
    fn rejects_unknown_sources_with_line_number() {
        let csv = "\
Energy Source,Unit,CO2 Emission (tonnes),Carbon Footprint Value (kg CO2e)
Electricity,kWh,0.0005,0.82
Steam,kg,0.1,100
";
        let err = FactorTable::from_reader(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn rejects_non_numeric_factors() {
        let csv = "\
Energy Source,Unit,CO2 Emission (tonnes),Carbon Footprint Value (kg CO2e)
Electricity,kWh,lots,0.82
";
        assert!(FactorTable::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn keeps_first_row_for_duplicate_pairs() {
        let table = FactorTable::new(vec![
            EmissionFactor {
                source: Source::Coal,
                unit: "kg".to_string(),
                co2_tonnes_per_unit: 0.0024,
                kgco2e_per_unit: 2.42,
            },
            EmissionFactor {
                source: Source::Coal,
                unit: "kg".to_string(),
                co2_tonnes_per_unit: 9.0,
                kgco2e_per_unit: 9.0,
            },
        ]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(Source::Coal, "kg").unwrap().kgco2e_per_unit, 2.42);
    }
}
