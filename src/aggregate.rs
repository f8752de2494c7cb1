use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::emissions::source_contribution;
use crate::factors::FactorTable;
use crate::models::{Bill, Source};

/// Labelled series, shaped the way charting front ends expect it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Series {
    pub labels: Vec<String>,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceDataset {
    pub label: String,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonthlyBySource {
    pub labels: Vec<String>,
    pub datasets: Vec<SourceDataset>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregates {
    pub monthly_series: Series,
    pub monthly_by_source: MonthlyBySource,
    pub per_source_all_time: Series,
}

pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// Buckets bills by `YYYY-MM` and by source. Monthly totals come from the
/// stored bill totals; per-source figures are recomputed from the factors.
/// Undated bills only count towards the all-time source mix.
pub fn aggregate(factors: &FactorTable, bills: &[Bill]) -> Aggregates {
    let mut monthly: BTreeMap<String, f64> = BTreeMap::new();
    let mut monthly_sources: BTreeMap<String, BTreeMap<Source, f64>> = BTreeMap::new();
    let mut all_time: BTreeMap<Source, f64> = BTreeMap::new();

    for bill in bills {
        let month = bill.bill_date.map(month_key);

        if let Some(month) = &month {
            *monthly.entry(month.clone()).or_insert(0.0) += bill.totals.emission_kgco2e;
        }

        for (source, usage) in bill.usage.iter() {
            let Some(contribution) = source_contribution(factors, source, usage) else {
                continue;
            };
            let kgco2e = contribution.emission_kgco2e;

            if let Some(month) = &month {
                *monthly_sources
                    .entry(month.clone())
                    .or_default()
                    .entry(source)
                    .or_insert(0.0) += kgco2e;
            }
            *all_time.entry(source).or_insert(0.0) += kgco2e;
        }
    }

    let monthly_series = Series {
        labels: monthly.keys().cloned().collect(),
        data: monthly.values().copied().collect(),
    };

    let bar_labels: Vec<String> = monthly_sources.keys().cloned().collect();
    let datasets = Source::ALL
        .into_iter()
        .map(|source| SourceDataset {
            label: source.factor_name().to_string(),
            data: bar_labels
                .iter()
                .map(|month| {
                    monthly_sources
                        .get(month)
                        .and_then(|sources| sources.get(&source))
                        .copied()
                        .unwrap_or(0.0)
                })
                .collect(),
        })
        .collect();

    let per_source_all_time = Series {
        labels: all_time
            .keys()
            .map(|source| source.factor_name().to_string())
            .collect(),
        data: all_time.values().copied().collect(),
    };

    Aggregates {
        monthly_series,
        monthly_by_source: MonthlyBySource {
            labels: bar_labels,
            datasets,
        },
        per_source_all_time,
    }
}
