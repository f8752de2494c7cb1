use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Utility or resource category tracked on a bill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Electricity,
    Water,
    Methane,
    Oil,
    Coal,
    IndustrialWaste,
    TradeCo2,
    NaturalGas,
    Petrol,
    Diesel,
}

impl Source {
    pub const ALL: [Source; 10] = [
        Source::Electricity,
        Source::Water,
        Source::Methane,
        Source::Oil,
        Source::Coal,
        Source::IndustrialWaste,
        Source::TradeCo2,
        Source::NaturalGas,
        Source::Petrol,
        Source::Diesel,
    ];

    /// Name used in the `Energy Source` column of the factor table.
    pub fn factor_name(self) -> &'static str {
        match self {
            Source::Electricity => "Electricity",
            Source::Water => "Water",
            Source::Methane => "Methane",
            Source::Oil => "Oil",
            Source::Coal => "Coal",
            Source::IndustrialWaste => "Industrial Waste",
            Source::TradeCo2 => "Trade CO₂ Value",
            Source::NaturalGas => "Natural Gas",
            Source::Petrol => "Petrol",
            Source::Diesel => "Diesel",
        }
    }

    /// Prefix of the flat `<prefix>_value` / `<prefix>_unit` keys used by
    /// extraction output and CSV imports.
    pub fn field_prefix(self) -> &'static str {
        match self {
            Source::Electricity => "electricity_usage",
            Source::Water => "water_usage",
            Source::Methane => "methane_usage",
            Source::Oil => "oil_usage",
            Source::Coal => "coal_usage",
            Source::IndustrialWaste => "industrial_waste",
            Source::TradeCo2 => "trade_co2",
            Source::NaturalGas => "natural_gas_usage",
            Source::Petrol => "petrol_usage",
            Source::Diesel => "diesel_usage",
        }
    }

    pub fn cli_name(self) -> &'static str {
        match self {
            Source::Electricity => "electricity",
            Source::Water => "water",
            Source::Methane => "methane",
            Source::Oil => "oil",
            Source::Coal => "coal",
            Source::IndustrialWaste => "industrial-waste",
            Source::TradeCo2 => "trade-co2",
            Source::NaturalGas => "natural-gas",
            Source::Petrol => "petrol",
            Source::Diesel => "diesel",
        }
    }

    pub fn value_key(self) -> String {
        format!("{}_value", self.field_prefix())
    }

    pub fn unit_key(self) -> Option<String> {
        self.has_unit_field()
            .then(|| format!("{}_unit", self.field_prefix()))
    }

    /// Trade CO2 is always reported in tons and carries no unit of its own.
    pub fn has_unit_field(self) -> bool {
        !matches!(self, Source::TradeCo2)
    }

    pub fn from_factor_name(name: &str) -> Option<Source> {
        let name = name.trim();
        Source::ALL
            .into_iter()
            .find(|source| source.factor_name() == name)
            // Spreadsheets regularly lose the subscript.
            .or_else(|| (name == "Trade CO2 Value").then_some(Source::TradeCo2))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.factor_name())
    }
}

impl FromStr for Source {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase().replace('_', "-");
        Source::ALL
            .into_iter()
            .find(|source| source.cli_name() == needle)
            .ok_or_else(|| {
                let known: Vec<&str> = Source::ALL.iter().map(|s| s.cli_name()).collect();
                anyhow::anyhow!("unknown source '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub value: Option<f64>,
    pub unit: Option<String>,
}

/// Per-source usage reported on one bill. Sources without an entry are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageRecord(BTreeMap<Source, Usage>);

impl UsageRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: Source) -> Option<&Usage> {
        self.0.get(&source)
    }

    pub fn set(&mut self, source: Source, value: Option<f64>, unit: Option<String>) {
        if value.is_none() && unit.is_none() {
            self.0.remove(&source);
        } else {
            self.0.insert(source, Usage { value, unit });
        }
    }

    pub fn with(mut self, source: Source, value: f64, unit: &str) -> Self {
        self.set(source, Some(value), Some(unit.to_string()));
        self
    }

    pub fn clear(&mut self, source: Source) {
        self.0.remove(&source);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Source, &Usage)> {
        self.0.iter().map(|(source, usage)| (*source, usage))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EmissionTotals {
    pub co2_tonnes: f64,
    pub emission_kgco2e: f64,
}

#[derive(Debug, Clone)]
pub struct Company {
    pub id: Uuid,
    pub company_name: String,
    pub email: String,
    pub logo_path: String,
}

#[derive(Debug, Clone)]
pub struct Bill {
    pub id: Uuid,
    pub bill_date: Option<NaiveDate>,
    pub bill_number: Option<String>,
    pub usage: UsageRecord,
    pub billing_period_start: Option<NaiveDate>,
    pub billing_period_end: Option<NaiveDate>,
    pub totals: EmissionTotals,
    pub uploaded_at: DateTime<Utc>,
    pub bill_file_path: Option<String>,
}

/// A bill that has been extracted or imported but not yet persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillDraft {
    pub bill_date: Option<NaiveDate>,
    pub bill_number: Option<String>,
    pub usage: UsageRecord,
    pub billing_period_start: Option<NaiveDate>,
    pub billing_period_end: Option<NaiveDate>,
    pub bill_file_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PendingExtraction {
    pub token: Uuid,
    pub company_id: Uuid,
    pub draft: BillDraft,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CompanyTotals {
    pub company_name: String,
    pub logo_path: String,
    pub total_emission: f64,
    pub bill_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub company_name: String,
    pub logo_path: String,
    pub score: f64,
    pub total_emission: f64,
}
